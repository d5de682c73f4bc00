use std::collections::HashMap;

/// Smallest spot order size accepted before submission.
pub const SPOT_MIN_LOT: f64 = 0.00001;

/// Instrument class, derived from the venue instrument id suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Spot,
    Swap,
    Futures,
}

impl InstrumentKind {
    pub fn classify(symbol: &str) -> Self {
        if symbol.contains("-SWAP") {
            InstrumentKind::Swap
        } else if symbol.contains("-FUTURES") {
            InstrumentKind::Futures
        } else {
            InstrumentKind::Spot
        }
    }

    /// Venue trade mode: spot orders settle from cash, derivatives use
    /// cross margin.
    pub fn td_mode(&self) -> &'static str {
        match self {
            InstrumentKind::Spot => "cash",
            InstrumentKind::Swap | InstrumentKind::Futures => "cross",
        }
    }

    pub fn is_derivative(&self) -> bool {
        !matches!(self, InstrumentKind::Spot)
    }
}

/// Contract multiplier table, keyed by instrument id.
///
/// A multiplier is the base-asset quantity represented by one contract
/// (e.g. one `BTC-USDT-SWAP` contract is 0.01 BTC). New instruments are
/// added with [`ContractSpecs::insert`]; call sites never change.
#[derive(Debug, Clone)]
pub struct ContractSpecs {
    multipliers: HashMap<String, f64>,
}

impl Default for ContractSpecs {
    fn default() -> Self {
        let mut specs = Self {
            multipliers: HashMap::new(),
        };
        specs.insert("BTC-USDT-SWAP", 0.01);
        specs
    }
}

impl ContractSpecs {
    pub fn insert(&mut self, symbol: impl Into<String>, base_per_contract: f64) {
        self.multipliers.insert(symbol.into(), base_per_contract);
    }

    pub fn multiplier(&self, symbol: &str) -> Option<f64> {
        self.multipliers.get(symbol).copied()
    }

    /// Normalize a requested base-asset quantity into the size the venue
    /// accepts for the instrument.
    ///
    /// Derivatives trade in whole contracts: `floor(qty / multiplier)`,
    /// floored at 1 contract. Derivative symbols without a configured
    /// multiplier round down to whole units. Spot sizes are continuous
    /// with a minimum lot.
    pub fn normalize_size(&self, symbol: &str, qty: f64) -> f64 {
        match InstrumentKind::classify(symbol) {
            InstrumentKind::Spot => qty.max(SPOT_MIN_LOT),
            InstrumentKind::Swap | InstrumentKind::Futures => {
                let contracts = match self.multiplier(symbol) {
                    Some(m) if m > 0.0 => (qty / m).floor(),
                    _ => qty.floor(),
                };
                contracts.max(1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            InstrumentKind::classify("BTC-USDT"),
            InstrumentKind::Spot
        );
        assert_eq!(
            InstrumentKind::classify("BTC-USDT-SWAP"),
            InstrumentKind::Swap
        );
        assert_eq!(
            InstrumentKind::classify("ETH-USD-FUTURES"),
            InstrumentKind::Futures
        );
    }

    #[test]
    fn test_td_mode() {
        assert_eq!(InstrumentKind::Spot.td_mode(), "cash");
        assert_eq!(InstrumentKind::Swap.td_mode(), "cross");
    }

    #[test]
    fn test_swap_quantity_converts_to_contracts() {
        let specs = ContractSpecs::default();
        // 0.015 BTC at 0.01 BTC/contract -> 1.5 contracts, floored to 1
        assert_eq!(specs.normalize_size("BTC-USDT-SWAP", 0.015), 1.0);
        assert_eq!(specs.normalize_size("BTC-USDT-SWAP", 0.05), 5.0);
    }

    #[test]
    fn test_swap_minimum_one_contract() {
        let specs = ContractSpecs::default();
        assert_eq!(specs.normalize_size("BTC-USDT-SWAP", 0.001), 1.0);
    }

    #[test]
    fn test_unlisted_derivative_rounds_to_whole_contracts() {
        let specs = ContractSpecs::default();
        assert_eq!(specs.normalize_size("ETH-USDT-SWAP", 7.9), 7.0);
        assert_eq!(specs.normalize_size("ETH-USDT-SWAP", 0.4), 1.0);
    }

    #[test]
    fn test_spot_minimum_lot() {
        let specs = ContractSpecs::default();
        assert_eq!(specs.normalize_size("BTC-USDT", 0.000001), SPOT_MIN_LOT);
        assert_eq!(specs.normalize_size("BTC-USDT", 0.25), 0.25);
    }

    #[test]
    fn test_new_instrument_addable_without_call_site_changes() {
        let mut specs = ContractSpecs::default();
        specs.insert("SOL-USDT-SWAP", 1.0);
        assert_eq!(specs.normalize_size("SOL-USDT-SWAP", 2.7), 2.0);
    }
}
