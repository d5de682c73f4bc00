//! Live Broker
//!
//! Broker port over the signed OKX REST client. Requested quantities are
//! normalized per instrument class before submission: spot sizes are
//! continuous with a minimum lot, derivatives trade in whole contracts via
//! the per-symbol multiplier table.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::entities::instrument::{ContractSpecs, InstrumentKind};
use crate::domain::entities::order::{OrderAck, OrderSide, OrderType};
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker::{Broker, BrokerResult};
use crate::infrastructure::okx_client::OkxClient;

pub struct LiveBroker {
    client: OkxClient,
    specs: ContractSpecs,
}

impl LiveBroker {
    pub fn new(client: OkxClient) -> Self {
        Self {
            client,
            specs: ContractSpecs::default(),
        }
    }

    pub fn with_specs(client: OkxClient, specs: ContractSpecs) -> Self {
        Self { client, specs }
    }
}

#[async_trait]
impl Broker for LiveBroker {
    fn name(&self) -> &str {
        "okx"
    }

    async fn price(&self, symbol: &str) -> BrokerResult<f64> {
        let ticker = self.client.ticker(symbol).await.map_err(|e| {
            BrokerError::MarketDataUnavailable {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            }
        })?;

        let Some(ticker) = ticker else {
            return Err(BrokerError::MarketDataUnavailable {
                symbol: symbol.to_string(),
                reason: "no ticker data".to_string(),
            });
        };

        ticker.last.parse::<f64>().map_err(|e| {
            BrokerError::MarketDataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("unparseable last price {:?}: {}", ticker.last, e),
            }
        })
    }

    async fn available_cash(&self, quote_ccy: &str) -> BrokerResult<f64> {
        let balances = self.client.account_balance().await?;

        for balance in &balances {
            for detail in &balance.details {
                if detail.ccy == quote_ccy {
                    return Ok(detail.avail_eq.parse::<f64>().unwrap_or(0.0));
                }
            }
        }
        Ok(0.0)
    }

    async fn position_quantity(&self, symbol: &str) -> BrokerResult<f64> {
        let positions = self.client.positions().await?;

        for position in &positions {
            if position.inst_id == symbol {
                let qty = position.pos.parse::<f64>().unwrap_or(0.0);
                return Ok(qty.max(0.0));
            }
        }
        Ok(0.0)
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: f64,
        price: Option<f64>,
    ) -> BrokerResult<OrderAck> {
        let kind = InstrumentKind::classify(symbol);
        let size = self.specs.normalize_size(symbol, qty);
        if size != qty {
            debug!(
                "Normalized {} size {} -> {} ({:?})",
                symbol, qty, size, kind
            );
        }

        let size_str = OkxClient::format_size(size);
        let price_str = match (order_type, price) {
            (OrderType::Limit, Some(px)) => Some(OkxClient::format_price(px)),
            _ => None,
        };

        self.client
            .place_order(
                symbol,
                kind.td_mode(),
                side.as_str(),
                order_type.as_str(),
                &size_str,
                price_str.as_deref(),
            )
            .await
    }
}
