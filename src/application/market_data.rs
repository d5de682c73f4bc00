//! Market Data Service
//!
//! Syncs historical candles from the venue into the local store and loads
//! them back as price series for backtests. The venue's history endpoint
//! pages backward in time through an `after` cursor, 100 rows per page.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::entities::candle::{Candle, PriceSeries};
use crate::domain::entities::interval::BarInterval;
use crate::domain::errors::BrokerError;
use crate::infrastructure::okx_client::OkxClient;
use crate::persistence::klines::KlineStore;
use crate::persistence::models::KlineCoverage;
use crate::persistence::DatabaseError;

const PAGE_LIMIT: u32 = 100;
const MAX_PAGES: usize = 500;
const PAGE_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error(transparent)]
    Venue(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("no stored candles for {symbol} {bar}")]
    NoData { symbol: String, bar: BarInterval },
}

pub struct MarketDataService {
    client: OkxClient,
    store: KlineStore,
}

impl MarketDataService {
    pub fn new(client: OkxClient, store: KlineStore) -> Self {
        Self { client, store }
    }

    /// Fetch candles for `[start_ts, end_ts]` (epoch milliseconds) and
    /// upsert them into the store. Returns the number of rows written.
    ///
    /// Pagination walks backward from `end_ts`: each page's oldest
    /// timestamp becomes the next `after` cursor, bounded at `MAX_PAGES`.
    pub async fn sync(
        &self,
        symbol: &str,
        bar: BarInterval,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<u64, MarketDataError> {
        let mut collected: Vec<Candle> = Vec::new();
        let mut after = end_ts;

        for page in 0..MAX_PAGES {
            let batch = self
                .client
                .history_candles(symbol, bar.as_str(), Some(after), PAGE_LIMIT)
                .await?;
            if batch.is_empty() {
                break;
            }

            // Rows arrive newest-first; the oldest row drives the cursor.
            let oldest_ts = batch.iter().map(|c| c.ts).min().unwrap_or(start_ts);

            if oldest_ts < start_ts {
                collected.extend(batch.into_iter().filter(|c| c.ts >= start_ts));
                break;
            }

            collected.extend(batch);
            after = oldest_ts;

            if page + 1 == MAX_PAGES {
                warn!(
                    "Candle sync for {} {} hit the {}-page cap; range may be incomplete",
                    symbol, bar, MAX_PAGES
                );
            }
            tokio::time::sleep(PAGE_PAUSE).await;
        }

        if collected.is_empty() {
            return Ok(0);
        }

        let stored = self.store.upsert_batch(symbol, bar, &collected).await?;
        info!("Synced {} candles for {} {}", stored, symbol, bar);
        Ok(stored)
    }

    /// Load a series from the store, ascending by timestamp.
    pub async fn load_series(
        &self,
        symbol: &str,
        bar: BarInterval,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
    ) -> Result<PriceSeries, MarketDataError> {
        let candles = self.store.load_range(symbol, bar, start_ts, end_ts).await?;
        if candles.is_empty() {
            return Err(MarketDataError::NoData {
                symbol: symbol.to_string(),
                bar,
            });
        }
        Ok(PriceSeries::new(symbol, bar, candles))
    }

    pub async fn coverage(
        &self,
        symbol: Option<&str>,
        bar: Option<BarInterval>,
    ) -> Result<Vec<KlineCoverage>, MarketDataError> {
        Ok(self.store.coverage(symbol, bar).await?)
    }

    pub async fn delete(
        &self,
        symbol: &str,
        bar: Option<BarInterval>,
    ) -> Result<u64, MarketDataError> {
        Ok(self.store.delete(symbol, bar).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    #[tokio::test]
    async fn test_load_series_requires_data() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let service =
            MarketDataService::new(OkxClient::public("http://127.0.0.1:0"), KlineStore::new(pool));

        let result = service
            .load_series("BTC-USDT", BarInterval::H1, None, None)
            .await;
        assert!(matches!(result, Err(MarketDataError::NoData { .. })));
    }

    #[tokio::test]
    async fn test_load_series_from_store() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let store = KlineStore::new(pool.clone());
        let candles = vec![
            Candle {
                ts: 2000,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 110.0,
                volume: 1.0,
            },
            Candle {
                ts: 1000,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 100.0,
                volume: 1.0,
            },
        ];
        store
            .upsert_batch("BTC-USDT", BarInterval::H1, &candles)
            .await
            .unwrap();

        let service =
            MarketDataService::new(OkxClient::public("http://127.0.0.1:0"), KlineStore::new(pool));
        let series = service
            .load_series("BTC-USDT", BarInterval::H1, None, None)
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.get(0).unwrap().close, 100.0);
        assert_eq!(series.last().unwrap().close, 110.0);
    }
}
