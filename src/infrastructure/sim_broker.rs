//! Simulated Broker
//!
//! Replays a historical price series against an in-memory ledger. The
//! cursor never advances on its own; the backtest orchestrator moves it,
//! which is what makes replay deterministic and independent of wall-clock
//! time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::entities::candle::PriceSeries;
use crate::domain::entities::order::{OrderAck, OrderSide, OrderType};
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker::{Broker, BrokerResult};

/// An executed simulated trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub ts: i64,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub cash_after: f64,
}

#[derive(Debug)]
struct Ledger {
    cash: f64,
    positions: HashMap<String, f64>,
    fills: Vec<Fill>,
    next_order_id: u64,
}

pub struct SimBroker {
    series: PriceSeries,
    cursor: AtomicUsize,
    ledger: Mutex<Ledger>,
}

impl SimBroker {
    pub fn new(series: PriceSeries, initial_cash: f64) -> Self {
        Self {
            series,
            cursor: AtomicUsize::new(0),
            ledger: Mutex::new(Ledger {
                cash: initial_cash,
                positions: HashMap::new(),
                fills: Vec::new(),
                next_order_id: 0,
            }),
        }
    }

    /// Seed a starting position. Construction-time only.
    pub fn with_position(self, symbol: impl Into<String>, qty: f64) -> Self {
        self.ledger().positions.insert(symbol.into(), qty);
        self
    }

    /// Advance (or rewind) the replay cursor. Orchestrator's job.
    pub fn set_cursor(&self, index: usize) {
        self.cursor.store(index, Ordering::SeqCst);
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn cash(&self) -> f64 {
        self.ledger().cash
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.ledger().positions.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.ledger().fills.clone()
    }

    /// Mark-to-market equity at the given price.
    pub fn equity_at(&self, price: f64) -> f64 {
        let ledger = self.ledger();
        ledger.cash + ledger.positions.values().map(|qty| qty * price).sum::<f64>()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A poisoned lock only means a panicking test thread; the ledger
        // itself is always left consistent.
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_close(&self) -> Option<(i64, f64)> {
        self.series.get(self.cursor()).map(|c| (c.ts, c.close))
    }
}

#[async_trait]
impl Broker for SimBroker {
    fn name(&self) -> &str {
        "sim"
    }

    async fn price(&self, symbol: &str) -> BrokerResult<f64> {
        match self.current_close() {
            Some((_, close)) => Ok(close),
            None => Err(BrokerError::MarketDataUnavailable {
                symbol: symbol.to_string(),
                reason: "cursor beyond end of series".to_string(),
            }),
        }
    }

    async fn available_cash(&self, _quote_ccy: &str) -> BrokerResult<f64> {
        Ok(self.ledger().cash)
    }

    async fn position_quantity(&self, symbol: &str) -> BrokerResult<f64> {
        Ok(self.position(symbol).max(0.0))
    }

    /// Fill at the limit price (or the cursor close for market orders).
    ///
    /// When the ledger cannot afford the order (buy without cash, sell
    /// without position) the call still returns a success-shaped ack but
    /// mutates nothing and records no fill. Callers that do not inspect
    /// their position will silently see no effect.
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        _order_type: OrderType,
        qty: f64,
        price: Option<f64>,
    ) -> BrokerResult<OrderAck> {
        let (ts, close) = self.current_close().ok_or_else(|| {
            BrokerError::MarketDataUnavailable {
                symbol: symbol.to_string(),
                reason: "cursor beyond end of series".to_string(),
            }
        })?;
        let price = price.unwrap_or(close);
        let cost = price * qty;

        let mut ledger = self.ledger();
        match side {
            OrderSide::Buy => {
                if ledger.cash >= cost {
                    ledger.cash -= cost;
                    *ledger.positions.entry(symbol.to_string()).or_insert(0.0) += qty;
                    let cash_after = ledger.cash;
                    ledger.fills.push(Fill {
                        ts,
                        side,
                        price,
                        quantity: qty,
                        cash_after,
                    });
                }
            }
            OrderSide::Sell => {
                let held = ledger.positions.get(symbol).copied().unwrap_or(0.0);
                if held >= qty {
                    ledger.cash += cost;
                    ledger.positions.insert(symbol.to_string(), held - qty);
                    let cash_after = ledger.cash;
                    ledger.fills.push(Fill {
                        ts,
                        side,
                        price,
                        quantity: qty,
                        cash_after,
                    });
                }
            }
        }

        ledger.next_order_id += 1;
        Ok(OrderAck::submitted(format!("sim-{}", ledger.next_order_id)))
    }
}
