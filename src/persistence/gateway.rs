//! Persistence Gateway
//!
//! The abstract store operations the engine consumes, plus the SQLite
//! implementation. Runtimes write heartbeats, trades, and event logs
//! through this seam; the supervisor reads desired state and records
//! crashes through it.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::{debug, error};

use super::models::{
    CreateTrade, EventLogRecord, MetricsSnapshot, StrategyStateRecord, StrategyStatus, TradeRecord,
};
use super::{DatabaseError, DbPool};
use crate::domain::entities::interval::BarInterval;
use crate::domain::entities::order::TradeStatus;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create or replace a strategy's state row. Used by start requests;
    /// replaces any previous error message.
    async fn upsert_strategy_state(
        &self,
        name: &str,
        symbol: &str,
        leverage: i64,
        interval: BarInterval,
        status: StrategyStatus,
    ) -> Result<(), DatabaseError>;

    /// Update a strategy's status, refreshing the heartbeat timestamp.
    async fn update_strategy_status(
        &self,
        name: &str,
        status: StrategyStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Refresh the heartbeat timestamp while the strategy is still
    /// RUNNING. A no-op otherwise, so a heartbeat can never resurrect a
    /// stop request or mask an ERROR status.
    async fn heartbeat(&self, name: &str) -> Result<(), DatabaseError>;

    async fn read_all_strategy_states(&self) -> Result<Vec<StrategyStateRecord>, DatabaseError>;

    async fn read_strategy_state(
        &self,
        name: &str,
    ) -> Result<Option<StrategyStateRecord>, DatabaseError>;

    /// Delete a strategy's state row. Refused (returns false) unless the
    /// strategy is STOPPED.
    async fn delete_strategy_state(&self, name: &str) -> Result<bool, DatabaseError>;

    /// Append a structured event log entry.
    async fn append_log(
        &self,
        name: &str,
        level: &str,
        event_type: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), DatabaseError>;

    /// Append a trade record, returning its row id.
    async fn append_trade(&self, trade: CreateTrade) -> Result<i64, DatabaseError>;

    /// Follow-up status/pnl update for a trade, keyed by venue order id.
    async fn update_trade_status(
        &self,
        order_id: &str,
        status: TradeStatus,
        pnl: Option<f64>,
    ) -> Result<(), DatabaseError>;

    async fn recent_logs(&self, name: &str, limit: i64)
        -> Result<Vec<EventLogRecord>, DatabaseError>;

    async fn recent_trades(&self, name: &str, limit: i64)
        -> Result<Vec<TradeRecord>, DatabaseError>;

    /// Recompute metrics from the full set of FILLED trades with non-null
    /// pnl and persist the snapshot. Metrics are eventually consistent
    /// with trades: stale until the next explicit recompute.
    async fn recompute_metrics(&self, name: &str) -> Result<MetricsSnapshot, DatabaseError>;

    /// Stored snapshot, or a zeroed default when none exists.
    async fn read_metrics(&self, name: &str) -> Result<MetricsSnapshot, DatabaseError>;
}

/// SQLite-backed gateway.
pub struct SqliteGateway {
    pool: DbPool,
}

impl SqliteGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn upsert_strategy_state(
        &self,
        name: &str,
        symbol: &str,
        leverage: i64,
        interval: BarInterval,
        status: StrategyStatus,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO strategy_status
                (name, symbol, leverage, interval, status, last_heartbeat)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(name)
        .bind(symbol)
        .bind(leverage)
        .bind(interval.as_str())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to upsert strategy state for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to upsert strategy state: {}", e))
        })?;

        debug!("Upserted strategy state: {} -> {}", name, status);
        Ok(())
    }

    async fn update_strategy_status(
        &self,
        name: &str,
        status: StrategyStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let query = if error_message.is_some() {
            sqlx::query(
                r#"
                UPDATE strategy_status
                SET status = ?1, error_message = ?2, last_heartbeat = ?3
                WHERE name = ?4
                "#,
            )
            .bind(status.as_str())
            .bind(error_message)
            .bind(Utc::now())
            .bind(name)
        } else {
            sqlx::query(
                r#"
                UPDATE strategy_status
                SET status = ?1, last_heartbeat = ?2
                WHERE name = ?3
                "#,
            )
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(name)
        };

        query.execute(&self.pool).await.map_err(|e| {
            error!("Failed to update status for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to update strategy status: {}", e))
        })?;

        Ok(())
    }

    async fn heartbeat(&self, name: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE strategy_status SET last_heartbeat = ?1 WHERE name = ?2 AND status = 'RUNNING'",
        )
        .bind(Utc::now())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to heartbeat {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to heartbeat: {}", e))
        })?;

        Ok(())
    }

    async fn read_all_strategy_states(&self) -> Result<Vec<StrategyStateRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, StrategyStateRecord>(
            "SELECT * FROM strategy_status ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read strategy states: {}", e);
            DatabaseError::QueryError(format!("Failed to read strategy states: {}", e))
        })?;

        Ok(records)
    }

    async fn read_strategy_state(
        &self,
        name: &str,
    ) -> Result<Option<StrategyStateRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, StrategyStateRecord>(
            "SELECT * FROM strategy_status WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read strategy state {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to read strategy state: {}", e))
        })?;

        Ok(record)
    }

    async fn delete_strategy_state(&self, name: &str) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            "DELETE FROM strategy_status WHERE name = ?1 AND status = 'STOPPED'",
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete strategy state {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to delete strategy state: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn append_log(
        &self,
        name: &str,
        level: &str,
        event_type: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), DatabaseError> {
        let data_json = match data {
            Some(value) => Some(serde_json::to_string(&value).map_err(|e| {
                DatabaseError::QueryError(format!("Failed to serialize log data: {}", e))
            })?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO strategy_logs (strategy_name, timestamp, level, event_type, message, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .bind(level)
        .bind(event_type)
        .bind(message)
        .bind(data_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append log for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to append log: {}", e))
        })?;

        Ok(())
    }

    async fn append_trade(&self, trade: CreateTrade) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO strategy_trades
                (strategy_name, timestamp, symbol, side, order_type,
                 price, quantity, order_id, status, pnl)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&trade.strategy_name)
        .bind(Utc::now())
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.order_type.as_str())
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(&trade.order_id)
        .bind(trade.status.as_str())
        .bind(trade.pnl)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append trade for {}: {}", trade.strategy_name, e);
            DatabaseError::QueryError(format!("Failed to append trade: {}", e))
        })?;

        debug!(
            "Recorded trade: {} {} {} @ {}",
            trade.strategy_name, trade.side, trade.quantity, trade.price
        );
        Ok(result.last_insert_rowid())
    }

    async fn update_trade_status(
        &self,
        order_id: &str,
        status: TradeStatus,
        pnl: Option<f64>,
    ) -> Result<(), DatabaseError> {
        let query = if pnl.is_some() {
            sqlx::query(
                "UPDATE strategy_trades SET status = ?1, pnl = ?2 WHERE order_id = ?3",
            )
            .bind(status.as_str())
            .bind(pnl)
            .bind(order_id)
        } else {
            sqlx::query("UPDATE strategy_trades SET status = ?1 WHERE order_id = ?2")
                .bind(status.as_str())
                .bind(order_id)
        };

        query.execute(&self.pool).await.map_err(|e| {
            error!("Failed to update trade {}: {}", order_id, e);
            DatabaseError::QueryError(format!("Failed to update trade status: {}", e))
        })?;

        Ok(())
    }

    async fn recent_logs(
        &self,
        name: &str,
        limit: i64,
    ) -> Result<Vec<EventLogRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, EventLogRecord>(
            r#"
            SELECT * FROM strategy_logs
            WHERE strategy_name = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read logs for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to read logs: {}", e))
        })?;

        Ok(records)
    }

    async fn recent_trades(
        &self,
        name: &str,
        limit: i64,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            r#"
            SELECT * FROM strategy_trades
            WHERE strategy_name = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read trades for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to read trades: {}", e))
        })?;

        Ok(records)
    }

    async fn recompute_metrics(&self, name: &str) -> Result<MetricsSnapshot, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT pnl FROM strategy_trades
            WHERE strategy_name = ?1 AND status = 'FILLED' AND pnl IS NOT NULL
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to scan filled trades for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to scan filled trades: {}", e))
        })?;

        let pnls: Vec<f64> = rows.iter().map(|row| row.get::<f64, _>("pnl")).collect();
        let total_trades = pnls.len() as i64;
        let winning_trades = pnls.iter().filter(|p| **p > 0.0).count() as i64;
        let losing_trades = pnls.iter().filter(|p| **p < 0.0).count() as i64;
        let total_pnl: f64 = pnls.iter().sum();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO strategy_metrics
                (strategy_name, total_trades, winning_trades, losing_trades,
                 total_pnl, win_rate, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(name)
        .bind(total_trades)
        .bind(winning_trades)
        .bind(losing_trades)
        .bind(total_pnl)
        .bind(win_rate)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store metrics for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to store metrics: {}", e))
        })?;

        Ok(MetricsSnapshot {
            strategy_name: name.to_string(),
            total_trades,
            winning_trades,
            losing_trades,
            total_pnl,
            win_rate,
            last_updated: Some(now),
        })
    }

    async fn read_metrics(&self, name: &str) -> Result<MetricsSnapshot, DatabaseError> {
        let record = sqlx::query_as::<_, MetricsSnapshot>(
            "SELECT * FROM strategy_metrics WHERE strategy_name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read metrics for {}: {}", name, e);
            DatabaseError::QueryError(format!("Failed to read metrics: {}", e))
        })?;

        Ok(record.unwrap_or_else(|| MetricsSnapshot::empty(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{OrderSide, OrderType};
    use crate::persistence::init_database;

    async fn gateway() -> SqliteGateway {
        let pool = init_database("sqlite::memory:").await.unwrap();
        SqliteGateway::new(pool)
    }

    fn filled_trade(name: &str, pnl: Option<f64>, order_id: &str) -> CreateTrade {
        CreateTrade {
            strategy_name: name.to_string(),
            symbol: "BTC-USDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: 100.0,
            quantity: 1.0,
            order_id: Some(order_id.to_string()),
            status: TradeStatus::Filled,
            pnl,
        }
    }

    #[tokio::test]
    async fn test_strategy_state_lifecycle() {
        let gw = gateway().await;

        gw.upsert_strategy_state(
            "ma_crossover",
            "BTC-USDT",
            1,
            BarInterval::H1,
            StrategyStatus::Running,
        )
        .await
        .unwrap();

        let state = gw.read_strategy_state("ma_crossover").await.unwrap().unwrap();
        assert!(state.is_running());
        assert_eq!(state.symbol, "BTC-USDT");

        gw.update_strategy_status("ma_crossover", StrategyStatus::Error, Some("boom"))
            .await
            .unwrap();
        let state = gw.read_strategy_state("ma_crossover").await.unwrap().unwrap();
        assert_eq!(state.status, "ERROR");
        assert_eq!(state.error_message.as_deref(), Some("boom"));

        // Deletion refused while not STOPPED
        assert!(!gw.delete_strategy_state("ma_crossover").await.unwrap());
        gw.update_strategy_status("ma_crossover", StrategyStatus::Stopped, None)
            .await
            .unwrap();
        assert!(gw.delete_strategy_state("ma_crossover").await.unwrap());
        assert!(gw.read_strategy_state("ma_crossover").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_error_message() {
        let gw = gateway().await;

        gw.upsert_strategy_state("s", "BTC-USDT", 1, BarInterval::M1, StrategyStatus::Running)
            .await
            .unwrap();
        gw.update_strategy_status("s", StrategyStatus::Error, Some("crash"))
            .await
            .unwrap();
        gw.upsert_strategy_state("s", "BTC-USDT", 1, BarInterval::M1, StrategyStatus::Running)
            .await
            .unwrap();

        let state = gw.read_strategy_state("s").await.unwrap().unwrap();
        assert!(state.is_running());
        assert!(state.error_message.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_never_resurrects_stopped_strategy() {
        let gw = gateway().await;

        gw.upsert_strategy_state("s", "BTC-USDT", 1, BarInterval::M1, StrategyStatus::Running)
            .await
            .unwrap();
        gw.heartbeat("s").await.unwrap();
        assert!(gw.read_strategy_state("s").await.unwrap().unwrap().is_running());

        gw.update_strategy_status("s", StrategyStatus::Stopped, None)
            .await
            .unwrap();
        gw.heartbeat("s").await.unwrap();
        let state = gw.read_strategy_state("s").await.unwrap().unwrap();
        assert_eq!(state.status, "STOPPED");
    }

    #[tokio::test]
    async fn test_trade_append_and_follow_up() {
        let gw = gateway().await;

        let id = gw
            .append_trade(CreateTrade {
                strategy_name: "breakout".to_string(),
                symbol: "BTC-USDT".to_string(),
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                price: 50000.0,
                quantity: 0.002,
                order_id: Some("okx-1".to_string()),
                status: TradeStatus::Submitted,
                pnl: None,
            })
            .await
            .unwrap();
        assert!(id > 0);

        gw.update_trade_status("okx-1", TradeStatus::Filled, Some(12.5))
            .await
            .unwrap();

        let trades = gw.recent_trades("breakout", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, "FILLED");
        assert_eq!(trades[0].pnl, Some(12.5));
    }

    #[tokio::test]
    async fn test_logs_round_trip() {
        let gw = gateway().await;

        gw.append_log(
            "breakout",
            "INFO",
            "SIGNAL",
            "BUY: breakout above 50000",
            Some(serde_json::json!({"price": 50000.0})),
        )
        .await
        .unwrap();

        let logs = gw.recent_logs("breakout", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, "SIGNAL");
        assert!(logs[0].data.as_deref().unwrap().contains("50000"));
    }

    #[tokio::test]
    async fn test_recompute_metrics() {
        let gw = gateway().await;

        gw.append_trade(filled_trade("m", Some(10.0), "a")).await.unwrap();
        gw.append_trade(filled_trade("m", Some(-4.0), "b")).await.unwrap();
        gw.append_trade(filled_trade("m", Some(6.0), "c")).await.unwrap();
        // Not counted: no pnl
        gw.append_trade(filled_trade("m", None, "d")).await.unwrap();
        // Not counted: other strategy
        gw.append_trade(filled_trade("other", Some(99.0), "e")).await.unwrap();

        let metrics = gw.recompute_metrics("m").await.unwrap();
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.total_pnl - 12.0).abs() < 1e-9);
        assert!((metrics.win_rate - 66.666).abs() < 0.01);

        let stored = gw.read_metrics("m").await.unwrap();
        assert_eq!(stored.total_trades, 3);
    }

    #[tokio::test]
    async fn test_read_metrics_defaults_to_zero() {
        let gw = gateway().await;
        let metrics = gw.read_metrics("never_ran").await.unwrap();
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert!(metrics.last_updated.is_none());
    }
}
