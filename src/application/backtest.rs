//! Backtest Orchestrator
//!
//! Drives one strategy runtime over a fixed historical series against a
//! fresh simulated broker: `initialize` once, then one `handle_data` per
//! sample with the cursor advanced by the orchestrator. No sleeping, no
//! heartbeats, no persistence side effects: identical inputs produce
//! identical reports.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::registry::StrategyRegistry;
use super::runtime::{RuntimeError, StrategyRuntime};
use crate::domain::entities::candle::PriceSeries;
use crate::domain::entities::interval::BarInterval;
use crate::domain::services::strategies::Strategy;
use crate::infrastructure::sim_broker::{Fill, SimBroker};

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("price series is empty")]
    EmptySeries,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub strategy: String,
    pub symbol: String,
    pub bar: BarInterval,
    pub initial_balance: f64,
    pub final_equity: f64,
    pub pnl: f64,
    /// Percent of initial balance.
    pub pnl_ratio: f64,
    pub total_orders: usize,
    pub data_points: usize,
    pub fills: Vec<Fill>,
}

pub struct BacktestOrchestrator {
    registry: StrategyRegistry,
}

impl BacktestOrchestrator {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    /// Run a registered strategy over the series.
    pub async fn run(
        &self,
        strategy_name: &str,
        series: PriceSeries,
        initial_balance: f64,
    ) -> Result<BacktestReport, BacktestError> {
        let strategy = self
            .registry
            .build(strategy_name)
            .ok_or_else(|| BacktestError::UnknownStrategy(strategy_name.to_string()))?;
        Self::run_with_strategy(strategy_name, strategy, series, initial_balance).await
    }

    /// Run an already-constructed strategy over the series.
    pub async fn run_with_strategy(
        strategy_name: &str,
        strategy: Box<dyn Strategy>,
        series: PriceSeries,
        initial_balance: f64,
    ) -> Result<BacktestReport, BacktestError> {
        let Some(last) = series.last().copied() else {
            return Err(BacktestError::EmptySeries);
        };
        let data_points = series.len();
        let symbol = series.symbol().to_string();
        let bar = series.bar();

        let broker = Arc::new(SimBroker::new(series, initial_balance));
        let mut runtime =
            StrategyRuntime::backtest(strategy_name, &symbol, bar, broker.clone(), strategy);

        runtime.initialize_once().await?;

        for index in 0..data_points {
            broker.set_cursor(index);
            runtime.step().await;
        }

        let final_equity = broker.equity_at(last.close);
        let pnl = final_equity - initial_balance;
        let pnl_ratio = if initial_balance != 0.0 {
            pnl / initial_balance * 100.0
        } else {
            0.0
        };
        let fills = broker.fills();

        info!(
            "Backtest {} on {} ({} bars): equity {:.2}, pnl {:.2} ({:.2}%), {} fills",
            strategy_name,
            symbol,
            data_points,
            final_equity,
            pnl,
            pnl_ratio,
            fills.len()
        );

        Ok(BacktestReport {
            strategy: strategy_name.to_string(),
            symbol,
            bar,
            initial_balance,
            final_equity,
            pnl,
            pnl_ratio,
            total_orders: fills.len(),
            data_points,
            fills,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::candle::Candle;

    fn series(closes: &[f64]) -> PriceSeries {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                ts: (i as i64 + 1) * 3_600_000,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.0,
            })
            .collect();
        PriceSeries::new("BTC-USDT", BarInterval::H1, candles)
    }

    #[tokio::test]
    async fn test_unknown_strategy() {
        let orchestrator = BacktestOrchestrator::new(StrategyRegistry::with_builtins());
        let result = orchestrator.run("nope", series(&[100.0]), 1000.0).await;
        assert!(matches!(result, Err(BacktestError::UnknownStrategy(_))));
    }

    #[tokio::test]
    async fn test_empty_series() {
        let orchestrator = BacktestOrchestrator::new(StrategyRegistry::with_builtins());
        let result = orchestrator.run("ma_crossover", series(&[]), 1000.0).await;
        assert!(matches!(result, Err(BacktestError::EmptySeries)));
    }

    #[tokio::test]
    async fn test_no_trades_yields_flat_report() {
        let orchestrator = BacktestOrchestrator::new(StrategyRegistry::with_builtins());
        // Too few bars for ma_crossover to ever signal
        let report = orchestrator
            .run("ma_crossover", series(&[100.0, 101.0, 102.0]), 1000.0)
            .await
            .unwrap();
        assert_eq!(report.total_orders, 0);
        assert_eq!(report.final_equity, 1000.0);
        assert_eq!(report.pnl, 0.0);
        assert_eq!(report.data_points, 3);
    }
}
