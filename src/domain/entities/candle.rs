use serde::{Deserialize, Serialize};

use crate::domain::entities::interval::BarInterval;

/// One OHLCV sample. Timestamps are venue epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered, immutable sequence of candles for one (symbol, bar) pair.
///
/// The constructor sorts ascending by timestamp so that replay order never
/// depends on how the rows were fetched.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    symbol: String,
    bar: BarInterval,
    candles: Vec<Candle>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, bar: BarInterval, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.ts);
        Self {
            symbol: symbol.into(),
            bar,
            candles,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bar(&self) -> BarInterval {
        self.bar
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }
}
