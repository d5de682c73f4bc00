//! Historical candle store backing backtests.

use sqlx::Row;
use tracing::{debug, error};

use super::models::{KlineCoverage, KlineRecord};
use super::{DatabaseError, DbPool};
use crate::domain::entities::candle::Candle;
use crate::domain::entities::interval::BarInterval;

pub struct KlineStore {
    pool: DbPool,
}

impl KlineStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of candles for one (symbol, bar). Re-synced ranges
    /// overwrite in place via the UNIQUE(symbol, bar, ts) constraint.
    pub async fn upsert_batch(
        &self,
        symbol: &str,
        bar: BarInterval,
        candles: &[Candle],
    ) -> Result<u64, DatabaseError> {
        let mut count = 0u64;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO market_klines
                    (symbol, bar, ts, open, high, low, close, vol)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(symbol)
            .bind(bar.as_str())
            .bind(candle.ts)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to save kline {}@{}: {}", symbol, candle.ts, e);
                DatabaseError::QueryError(format!("Failed to save kline: {}", e))
            })?;
            count += 1;
        }

        debug!("Stored {} klines for {} {}", count, symbol, bar);
        Ok(count)
    }

    /// Candles for a (symbol, bar) in ascending timestamp order, optionally
    /// bounded by an inclusive millisecond range.
    pub async fn load_range(
        &self,
        symbol: &str,
        bar: BarInterval,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
    ) -> Result<Vec<Candle>, DatabaseError> {
        let records = sqlx::query_as::<_, KlineRecord>(
            r#"
            SELECT symbol, bar, ts, open, high, low, close, vol FROM market_klines
            WHERE symbol = ?1 AND bar = ?2
              AND (?3 IS NULL OR ts >= ?3)
              AND (?4 IS NULL OR ts <= ?4)
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(bar.as_str())
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load klines for {} {}: {}", symbol, bar, e);
            DatabaseError::QueryError(format!("Failed to load klines: {}", e))
        })?;

        Ok(records
            .into_iter()
            .map(|r| Candle {
                ts: r.ts,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.vol.unwrap_or(0.0),
            })
            .collect())
    }

    /// Per-(symbol, bar) row counts and timestamp bounds.
    pub async fn coverage(
        &self,
        symbol: Option<&str>,
        bar: Option<BarInterval>,
    ) -> Result<Vec<KlineCoverage>, DatabaseError> {
        let records = sqlx::query_as::<_, KlineCoverage>(
            r#"
            SELECT symbol, bar, COUNT(*) as count,
                   MIN(ts) as min_ts, MAX(ts) as max_ts
            FROM market_klines
            WHERE (?1 IS NULL OR symbol = ?1)
              AND (?2 IS NULL OR bar = ?2)
            GROUP BY symbol, bar
            ORDER BY symbol, bar
            "#,
        )
        .bind(symbol)
        .bind(bar.map(|b| b.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read kline coverage: {}", e);
            DatabaseError::QueryError(format!("Failed to read kline coverage: {}", e))
        })?;

        Ok(records)
    }

    /// Delete stored candles for a symbol, optionally limited to one bar.
    pub async fn delete(
        &self,
        symbol: &str,
        bar: Option<BarInterval>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM market_klines WHERE symbol = ?1 AND (?2 IS NULL OR bar = ?2)",
        )
        .bind(symbol)
        .bind(bar.map(|b| b.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete klines for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to delete klines: {}", e))
        })?;

        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM market_klines")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to count klines: {}", e)))?;
        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            ts,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_load_ascending() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let store = KlineStore::new(pool);

        let candles = vec![candle(3000, 120.0), candle(1000, 100.0), candle(2000, 110.0)];
        let stored = store
            .upsert_batch("BTC-USDT", BarInterval::H1, &candles)
            .await
            .unwrap();
        assert_eq!(stored, 3);

        let loaded = store
            .load_range("BTC-USDT", BarInterval::H1, None, None)
            .await
            .unwrap();
        let timestamps: Vec<i64> = loaded.iter().map(|c| c.ts).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_timestamp() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let store = KlineStore::new(pool);

        store
            .upsert_batch("BTC-USDT", BarInterval::H1, &[candle(1000, 100.0)])
            .await
            .unwrap();
        store
            .upsert_batch("BTC-USDT", BarInterval::H1, &[candle(1000, 105.0)])
            .await
            .unwrap();

        let loaded = store
            .load_range("BTC-USDT", BarInterval::H1, None, None)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, 105.0);
    }

    #[tokio::test]
    async fn test_range_bounds_and_coverage() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let store = KlineStore::new(pool);

        let candles: Vec<Candle> = (1..=5).map(|i| candle(i * 1000, 100.0 + i as f64)).collect();
        store
            .upsert_batch("BTC-USDT", BarInterval::M15, &candles)
            .await
            .unwrap();

        let mid = store
            .load_range("BTC-USDT", BarInterval::M15, Some(2000), Some(4000))
            .await
            .unwrap();
        assert_eq!(mid.len(), 3);

        let coverage = store.coverage(Some("BTC-USDT"), None).await.unwrap();
        assert_eq!(coverage.len(), 1);
        assert_eq!(coverage[0].count, 5);
        assert_eq!(coverage[0].min_ts, Some(1000));
        assert_eq!(coverage[0].max_ts, Some(5000));

        let deleted = store.delete("BTC-USDT", Some(BarInterval::M15)).await.unwrap();
        assert_eq!(deleted, 5);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
