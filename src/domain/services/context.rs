//! Strategy Context
//!
//! The explicit execution context handed to every strategy hook call. It
//! binds exactly one (broker, symbol, strategy identity) triple plus an
//! optional persistence handle; every injected primitive resolves against
//! this binding, so nothing about strategy execution is process-global.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::entities::order::{OrderAck, OrderAckStatus, OrderSide, OrderType, TradeStatus};
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker::Broker;
use crate::domain::value_objects::{price::Price, quantity::Quantity};
use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::models::CreateTrade;

/// Quote currency the engine trades against.
pub const QUOTE_CCY: &str = "USDT";

pub struct StrategyCtx {
    strategy_name: String,
    symbol: String,
    broker: Arc<dyn Broker>,
    /// Absent in backtests: replay produces no persistence side effects.
    gateway: Option<Arc<dyn PersistenceGateway>>,
}

impl StrategyCtx {
    pub fn new(
        strategy_name: impl Into<String>,
        symbol: impl Into<String>,
        broker: Arc<dyn Broker>,
        gateway: Option<Arc<dyn PersistenceGateway>>,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            symbol: symbol.into(),
            broker,
            gateway,
        }
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Latest price for the bound symbol. A returned price <= 0 is
    /// invalid; callers skip the iteration rather than trade on it.
    pub async fn current_price(&self) -> Result<f64, BrokerError> {
        self.broker.price(&self.symbol).await
    }

    /// Available quote-currency balance for buying.
    pub async fn available_cash(&self) -> Result<f64, BrokerError> {
        self.broker.available_cash(QUOTE_CCY).await
    }

    /// Quantity of the bound symbol available to sell.
    pub async fn position_quantity(&self) -> Result<f64, BrokerError> {
        self.broker.position_quantity(&self.symbol).await
    }

    /// Place a limit order through the bound broker.
    ///
    /// Every attempt is recorded as a trade (SUBMITTED or FAILED) plus an
    /// ORDER event, regardless of outcome. Venue rejections and transport
    /// failures surface only through the returned ack; nothing here
    /// propagates an error into the strategy loop.
    pub async fn place_limit(&self, side: OrderSide, price: f64, qty: f64) -> OrderAck {
        let (price, qty) = match (Price::new(price), Quantity::new(qty)) {
            (Ok(p), Ok(q)) => (p, q),
            (p, q) => {
                let reason = p
                    .err()
                    .map(|e| e.to_string())
                    .or_else(|| q.err().map(|e| e.to_string()))
                    .unwrap_or_else(|| "invalid order parameters".to_string());
                error!(
                    "Rejecting malformed order from {}: {} {} {} @ {} ({})",
                    self.strategy_name, side, qty, self.symbol, price, reason
                );
                let ack = OrderAck::rejected(None, reason);
                self.record_order_attempt(side, price, qty, &ack).await;
                return ack;
            }
        };

        info!(
            "Placing {} order: {} {} @ {}",
            side,
            qty.value(),
            self.symbol,
            price.value()
        );

        let ack = match self
            .broker
            .place_order(
                &self.symbol,
                side,
                OrderType::Limit,
                qty.value(),
                Some(price.value()),
            )
            .await
        {
            Ok(ack) => ack,
            Err(e) => OrderAck::rejected(None, e.to_string()),
        };

        self.record_order_attempt(side, price.value(), qty.value(), &ack)
            .await;
        ack
    }

    async fn record_order_attempt(&self, side: OrderSide, price: f64, qty: f64, ack: &OrderAck) {
        match &ack.status {
            OrderAckStatus::Submitted => {
                info!("Order submitted: id={:?}", ack.order_id);
            }
            OrderAckStatus::Rejected { reason } => {
                error!("Order failed: {}", reason);
            }
        }

        let Some(gateway) = &self.gateway else {
            return;
        };

        let (status, level, message) = match &ack.status {
            OrderAckStatus::Submitted => (
                TradeStatus::Submitted,
                "INFO",
                format!("Order submitted: {} {} @ {}", side, qty, price),
            ),
            OrderAckStatus::Rejected { reason } => (
                TradeStatus::Failed,
                "ERROR",
                format!("Order failed: {}", reason),
            ),
        };

        if let Err(e) = gateway
            .append_trade(CreateTrade {
                strategy_name: self.strategy_name.clone(),
                symbol: self.symbol.clone(),
                side,
                order_type: OrderType::Limit,
                price,
                quantity: qty,
                order_id: ack.order_id.clone(),
                status,
                pnl: None,
            })
            .await
        {
            warn!("Failed to record trade: {}", e);
        }

        let data = serde_json::json!({
            "symbol": self.symbol,
            "side": side.as_str(),
            "price": price,
            "qty": qty,
            "order_id": ack.order_id,
        });
        if let Err(e) = gateway
            .append_log(&self.strategy_name, level, "ORDER", &message, Some(data))
            .await
        {
            warn!("Failed to record order event: {}", e);
        }
    }

    /// Append a structured event for the bound strategy. Persistence
    /// failures are logged and swallowed; a full store must never break an
    /// iteration.
    pub async fn log_event(
        &self,
        level: &str,
        event_type: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) {
        if let Some(gateway) = &self.gateway {
            if let Err(e) = gateway
                .append_log(&self.strategy_name, level, event_type, message, data)
                .await
            {
                warn!("Failed to log event: {}", e);
            }
        }
    }

    /// Log a trading signal.
    pub async fn log_signal(&self, signal_type: &str, message: &str) {
        self.log_event(
            "INFO",
            "SIGNAL",
            &format!("{}: {}", signal_type, message),
            None,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::candle::{Candle, PriceSeries};
    use crate::domain::entities::interval::BarInterval;
    use crate::infrastructure::sim_broker::SimBroker;
    use crate::persistence::gateway::{PersistenceGateway, SqliteGateway};
    use crate::persistence::init_database;

    fn series() -> PriceSeries {
        let candles = vec![Candle {
            ts: 1_700_000_000_000,
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 1.0,
        }];
        PriceSeries::new("BTC-USDT", BarInterval::H1, candles)
    }

    async fn ctx_with_gateway(cash: f64) -> (StrategyCtx, Arc<SqliteGateway>) {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let gateway = Arc::new(SqliteGateway::new(pool));
        let broker = Arc::new(SimBroker::new(series(), cash));
        let ctx = StrategyCtx::new(
            "test_strategy",
            "BTC-USDT",
            broker,
            Some(gateway.clone()),
        );
        (ctx, gateway)
    }

    #[tokio::test]
    async fn test_place_limit_records_submitted_trade() {
        let (ctx, gateway) = ctx_with_gateway(1000.0).await;

        let ack = ctx.place_limit(OrderSide::Buy, 100.0, 1.0).await;
        assert!(ack.is_submitted());

        let trades = gateway.recent_trades("test_strategy", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, "SUBMITTED");
        assert_eq!(trades[0].side, "buy");

        let logs = gateway.recent_logs("test_strategy", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, "ORDER");
        assert_eq!(logs[0].level, "INFO");
    }

    #[tokio::test]
    async fn test_place_limit_rejects_malformed_order_without_broker_call() {
        let (ctx, gateway) = ctx_with_gateway(1000.0).await;

        let ack = ctx.place_limit(OrderSide::Buy, 100.0, -1.0).await;
        assert!(!ack.is_submitted());

        let trades = gateway.recent_trades("test_strategy", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, "FAILED");

        let logs = gateway.recent_logs("test_strategy", 10).await.unwrap();
        assert_eq!(logs[0].level, "ERROR");
    }

    #[tokio::test]
    async fn test_primitives_resolve_against_bound_context() {
        let (ctx, _gateway) = ctx_with_gateway(500.0).await;
        assert_eq!(ctx.current_price().await.unwrap(), 100.0);
        assert_eq!(ctx.available_cash().await.unwrap(), 500.0);
        assert_eq!(ctx.position_quantity().await.unwrap(), 0.0);
    }
}
