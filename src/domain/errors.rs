use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Price must be non-negative")]
    NegativePrice,

    #[error("Quantity must be non-negative")]
    NegativeQuantity,

    #[error("Value must be finite")]
    MustBeFinite,

    #[error("Limit orders must have a price")]
    LimitPriceRequired,

    #[error("Unknown bar interval: {0}")]
    UnknownInterval(String),
}

/// Errors surfaced by a broker port.
///
/// Venue-level order rejections are NOT errors; they come back as
/// `OrderAck::Rejected` so that callers always receive an acknowledgement.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No quote could be produced for the symbol. Callers skip the
    /// iteration instead of trading.
    #[error("Market data unavailable for {symbol}: {reason}")]
    MarketDataUnavailable { symbol: String, reason: String },

    /// Connection-level or retryable HTTP failure. Surfaces only after
    /// the transport retries are exhausted.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-transient venue error outside order placement (auth, params).
    #[error("Venue error {code}: {message}")]
    Venue { code: String, message: String },

    #[error("Invalid venue response: {0}")]
    InvalidResponse(String),
}

/// Errors raised by strategy hooks. Fatal only when raised from
/// `initialize`; inside the loop they are logged and contained.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Logic(String),
}
