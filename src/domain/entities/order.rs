use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Venue wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an order placement attempt as acknowledged by the venue.
///
/// Venue rejections are values, never errors: a broker returns
/// `Rejected` instead of raising so that every attempt yields an ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAckStatus {
    Submitted,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: Option<String>,
    pub status: OrderAckStatus,
}

impl OrderAck {
    pub fn submitted(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            status: OrderAckStatus::Submitted,
        }
    }

    pub fn rejected(order_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            status: OrderAckStatus::Rejected {
                reason: reason.into(),
            },
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == OrderAckStatus::Submitted
    }
}

/// Persisted lifecycle of a trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Submitted,
    Failed,
    Filled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Submitted => "SUBMITTED",
            TradeStatus::Failed => "FAILED",
            TradeStatus::Filled => "FILLED",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_wire_strings() {
        assert_eq!(OrderSide::Buy.as_str(), "buy");
        assert_eq!(OrderSide::Sell.as_str(), "sell");
    }

    #[test]
    fn test_order_type_wire_strings() {
        assert_eq!(OrderType::Limit.as_str(), "limit");
        assert_eq!(OrderType::Market.as_str(), "market");
    }

    #[test]
    fn test_ack_constructors() {
        let ok = OrderAck::submitted("abc123");
        assert!(ok.is_submitted());
        assert_eq!(ok.order_id.as_deref(), Some("abc123"));

        let rejected = OrderAck::rejected(None, "Insufficient balance");
        assert!(!rejected.is_submitted());
    }

    #[test]
    fn test_trade_status_strings() {
        assert_eq!(TradeStatus::Submitted.as_str(), "SUBMITTED");
        assert_eq!(TradeStatus::Failed.to_string(), "FAILED");
    }
}
