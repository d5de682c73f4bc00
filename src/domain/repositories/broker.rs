//! Broker Port
//!
//! Capability interface implemented by the live venue adapter and the
//! simulated replay broker. Strategy code only ever sees this trait, which
//! is what lets the same runtime drive live trading and backtests.

use async_trait::async_trait;

use crate::domain::entities::order::{OrderAck, OrderSide, OrderType};
use crate::domain::errors::BrokerError;

/// Common result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Name of this broker implementation, for logging.
    fn name(&self) -> &str;

    /// Latest price for the symbol.
    ///
    /// Fails with [`BrokerError::MarketDataUnavailable`] when no quote can
    /// be produced. Callers must additionally treat a returned price <= 0
    /// as invalid and skip the iteration rather than trade on it.
    async fn price(&self, symbol: &str) -> BrokerResult<f64>;

    /// Available balance in the given quote currency.
    async fn available_cash(&self, quote_ccy: &str) -> BrokerResult<f64>;

    /// Quantity of the symbol currently held, >= 0.
    async fn position_quantity(&self, symbol: &str) -> BrokerResult<f64>;

    /// Place an order.
    ///
    /// Venue-level rejections come back as `OrderAck::Rejected`, never as
    /// `Err`; errors are reserved for transport and protocol failures.
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: f64,
        price: Option<f64>,
    ) -> BrokerResult<OrderAck>;
}
