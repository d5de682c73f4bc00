//! Persistence Models
//!
//! Row structures for strategy state, trades, event logs, metrics, and
//! historical candles.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::interval::BarInterval;
use crate::domain::entities::order::{OrderSide, OrderType, TradeStatus};

/// Desired/observed status of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Stopped,
    Running,
    Error,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Stopped => "STOPPED",
            StrategyStatus::Running => "RUNNING",
            StrategyStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(StrategyStatus::Stopped),
            "RUNNING" => Ok(StrategyStatus::Running),
            "ERROR" => Ok(StrategyStatus::Error),
            other => Err(format!("Unknown strategy status: {}", other)),
        }
    }
}

/// Strategy state row, keyed by strategy name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StrategyStateRecord {
    pub name: String,
    pub symbol: String,
    pub leverage: i64,
    pub interval: String,
    pub status: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl StrategyStateRecord {
    pub fn is_running(&self) -> bool {
        self.status == StrategyStatus::Running.as_str()
    }

    /// Parsed bar interval, defaulting to 1H for unrecognized rows.
    pub fn bar(&self) -> BarInterval {
        self.interval.parse().unwrap_or(BarInterval::H1)
    }
}

/// Trade row. Append-only except status/pnl follow-ups keyed by order id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub strategy_name: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub price: f64,
    pub quantity: f64,
    pub order_id: Option<String>,
    pub status: String,
    pub pnl: Option<f64>,
}

/// Create trade input
#[derive(Debug, Clone)]
pub struct CreateTrade {
    pub strategy_name: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: f64,
    pub quantity: f64,
    pub order_id: Option<String>,
    pub status: TradeStatus,
    pub pnl: Option<f64>,
}

/// Structured event log row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventLogRecord {
    pub id: i64,
    pub strategy_name: String,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub event_type: String,
    pub message: String,
    pub data: Option<String>,
}

/// Derived performance metrics, recomputed on demand from filled trades.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricsSnapshot {
    pub strategy_name: String,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Zeroed snapshot for strategies with no recorded metrics yet.
    pub fn empty(strategy_name: impl Into<String>) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: 0.0,
            win_rate: 0.0,
            last_updated: None,
        }
    }
}

/// Historical candle row.
#[derive(Debug, Clone, FromRow)]
pub struct KlineRecord {
    pub symbol: String,
    pub bar: String,
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub vol: Option<f64>,
}

/// Per-(symbol, bar) summary of stored candles.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KlineCoverage {
    pub symbol: String,
    pub bar: String,
    pub count: i64,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            StrategyStatus::Stopped,
            StrategyStatus::Running,
            StrategyStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<StrategyStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_record_is_running() {
        let record = StrategyStateRecord {
            name: "ma_crossover".to_string(),
            symbol: "BTC-USDT".to_string(),
            leverage: 1,
            interval: "1H".to_string(),
            status: "RUNNING".to_string(),
            last_heartbeat: None,
            error_message: None,
        };
        assert!(record.is_running());
        assert_eq!(record.bar(), BarInterval::H1);
    }

    #[test]
    fn test_record_bar_falls_back_to_hourly() {
        let record = StrategyStateRecord {
            name: "x".to_string(),
            symbol: "BTC-USDT".to_string(),
            leverage: 1,
            interval: "bogus".to_string(),
            status: "STOPPED".to_string(),
            last_heartbeat: None,
            error_message: None,
        };
        assert_eq!(record.bar(), BarInterval::H1);
    }
}
