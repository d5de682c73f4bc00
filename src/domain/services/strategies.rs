//! Strategy Contract and Built-ins
//!
//! Strategies implement a fixed two-hook lifecycle and are constructed by
//! name through the registry, a narrow plugin contract in place of
//! loading arbitrary code. `initialize` runs exactly once and is fatal on
//! failure; `handle_data` runs once per bar and its failures are contained
//! by the runtime.

use async_trait::async_trait;

use crate::domain::entities::order::OrderSide;
use crate::domain::errors::{BrokerError, StrategyError};
use crate::domain::services::context::StrategyCtx;

#[async_trait]
pub trait Strategy: Send {
    /// One-time setup. Any error here is fatal for the run.
    async fn initialize(&mut self, ctx: &StrategyCtx) -> Result<(), StrategyError>;

    /// One iteration of the trading loop.
    async fn handle_data(&mut self, ctx: &StrategyCtx) -> Result<(), StrategyError>;
}

/// Resolve the iteration's price, or None when the iteration should be
/// skipped (no quote, or a quote <= 0).
async fn usable_price(ctx: &StrategyCtx) -> Result<Option<f64>, StrategyError> {
    match ctx.current_price().await {
        Ok(price) if price > 0.0 => Ok(Some(price)),
        Ok(_) => Ok(None),
        Err(BrokerError::MarketDataUnavailable { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn moving_average(prices: &[f64], period: usize) -> f64 {
    if prices.len() < period {
        return 0.0;
    }
    prices[prices.len() - period..].iter().sum::<f64>() / period as f64
}

/// Dual moving-average crossover: buy the golden cross, sell the death
/// cross.
pub struct MaCrossover {
    short_period: usize,
    long_period: usize,
    max_history: usize,
    /// Quote-currency notional per order.
    order_amount: f64,
    prices: Vec<f64>,
    last_signal: i8,
    position_price: f64,
}

impl MaCrossover {
    pub fn new() -> Self {
        Self {
            short_period: 5,
            long_period: 20,
            max_history: 25,
            order_amount: 100.0,
            prices: Vec::new(),
            last_signal: 0,
            position_price: 0.0,
        }
    }
}

impl Default for MaCrossover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for MaCrossover {
    async fn initialize(&mut self, ctx: &StrategyCtx) -> Result<(), StrategyError> {
        ctx.log_event(
            "INFO",
            "START",
            &format!(
                "MA crossover on {} (short={}, long={})",
                ctx.symbol(),
                self.short_period,
                self.long_period
            ),
            None,
        )
        .await;
        Ok(())
    }

    async fn handle_data(&mut self, ctx: &StrategyCtx) -> Result<(), StrategyError> {
        let Some(price) = usable_price(ctx).await? else {
            return Ok(());
        };

        self.prices.push(price);
        if self.prices.len() > self.max_history {
            self.prices.remove(0);
        }
        if self.prices.len() < self.long_period {
            return Ok(());
        }

        let short_ma = moving_average(&self.prices, self.short_period);
        let long_ma = moving_average(&self.prices, self.long_period);
        let history = &self.prices[..self.prices.len() - 1];
        let prev_short_ma = moving_average(history, self.short_period);
        let prev_long_ma = moving_average(history, self.long_period);

        let position = ctx.position_quantity().await?;
        let cash = ctx.available_cash().await?;

        if prev_short_ma <= prev_long_ma && short_ma > long_ma && self.last_signal != 1 {
            if cash >= self.order_amount {
                let qty = self.order_amount / price;
                ctx.log_signal("BUY", &format!("golden cross at {:.2}", price))
                    .await;
                ctx.place_limit(OrderSide::Buy, price, qty).await;
                self.last_signal = 1;
                self.position_price = price;
            }
        } else if prev_short_ma >= prev_long_ma && short_ma < long_ma && self.last_signal != -1 {
            if position > 0.0 {
                let qty = position.min(self.order_amount / price);
                ctx.log_signal("SELL", &format!("death cross at {:.2}", price))
                    .await;
                ctx.place_limit(OrderSide::Sell, price, qty).await;
                self.last_signal = -1;
            }
        }

        Ok(())
    }
}

/// N-period high/low breakout with stop-loss and take-profit exits.
pub struct Breakout {
    lookback_period: usize,
    stop_loss_ratio: f64,
    take_profit_ratio: f64,
    order_amount: f64,
    prices: Vec<f64>,
    entry_price: f64,
}

impl Breakout {
    pub fn new() -> Self {
        Self {
            lookback_period: 20,
            stop_loss_ratio: 0.05,
            take_profit_ratio: 0.10,
            order_amount: 100.0,
            prices: Vec::new(),
            entry_price: 0.0,
        }
    }

    async fn exit_position(
        &mut self,
        ctx: &StrategyCtx,
        price: f64,
        qty: f64,
        reason: &str,
    ) -> Result<(), StrategyError> {
        ctx.log_signal("SELL", reason).await;
        ctx.place_limit(OrderSide::Sell, price, qty).await;
        self.entry_price = 0.0;
        Ok(())
    }
}

impl Default for Breakout {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for Breakout {
    async fn initialize(&mut self, ctx: &StrategyCtx) -> Result<(), StrategyError> {
        ctx.log_event(
            "INFO",
            "START",
            &format!(
                "Breakout on {} (lookback={})",
                ctx.symbol(),
                self.lookback_period
            ),
            None,
        )
        .await;
        Ok(())
    }

    async fn handle_data(&mut self, ctx: &StrategyCtx) -> Result<(), StrategyError> {
        let Some(price) = usable_price(ctx).await? else {
            return Ok(());
        };

        self.prices.push(price);
        if self.prices.len() > self.lookback_period {
            self.prices.remove(0);
        }
        if self.prices.len() < self.lookback_period {
            return Ok(());
        }

        let history = &self.prices[..self.prices.len() - 1];
        let highest_high = history.iter().cloned().fold(f64::MIN, f64::max);
        let lowest_low = history.iter().cloned().fold(f64::MAX, f64::min);

        let position = ctx.position_quantity().await?;

        if position > 0.0 && self.entry_price > 0.0 {
            let profit_ratio = (price - self.entry_price) / self.entry_price;

            if profit_ratio <= -self.stop_loss_ratio {
                return self
                    .exit_position(
                        ctx,
                        price,
                        position,
                        &format!("stop loss at {:.2} ({:.2}%)", price, profit_ratio * 100.0),
                    )
                    .await;
            }
            if profit_ratio >= self.take_profit_ratio {
                return self
                    .exit_position(
                        ctx,
                        price,
                        position,
                        &format!("take profit at {:.2} ({:.2}%)", price, profit_ratio * 100.0),
                    )
                    .await;
            }
            if price < lowest_low {
                return self
                    .exit_position(
                        ctx,
                        price,
                        position,
                        &format!("close below {}-bar low {:.2}", self.lookback_period, lowest_low),
                    )
                    .await;
            }
        } else if position <= 0.0 {
            let cash = ctx.available_cash().await?;
            if price > highest_high && cash >= self.order_amount {
                let qty = self.order_amount / price;
                ctx.log_signal(
                    "BUY",
                    &format!("breakout above {}-bar high {:.2}", self.lookback_period, highest_high),
                )
                .await;
                ctx.place_limit(OrderSide::Buy, price, qty).await;
                self.entry_price = price;
            }
        }

        Ok(())
    }
}
