//! Strategy Runtime
//!
//! Binds one strategy's lifecycle hooks to one (broker, symbol, identity)
//! triple and owns the iteration state machine. The live loop heartbeats
//! into the store and observes desired state between iterations; backtests
//! drive the same runtime step by step with no persistence side effects.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::entities::interval::BarInterval;
use crate::domain::errors::StrategyError;
use crate::domain::repositories::broker::Broker;
use crate::domain::services::context::StrategyCtx;
use crate::domain::services::strategies::Strategy;
use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::models::StrategyStatus;

/// Lifecycle of a runtime.
///
/// `Error` is terminal and reachable only from `Initializing`; iteration
/// failures inside `Looping` are contained and never end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    New,
    Initializing,
    Looping,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("strategy initialization failed: {0}")]
    Init(#[source] StrategyError),

    #[error("runtime already consumed (state {0:?})")]
    AlreadyStarted(RunnerState),

    #[error("live run requires a persistence gateway")]
    MissingGateway,
}

pub struct StrategyRuntime {
    name: String,
    symbol: String,
    interval: BarInterval,
    state: RunnerState,
    ctx: StrategyCtx,
    strategy: Box<dyn Strategy>,
    gateway: Option<Arc<dyn PersistenceGateway>>,
    /// Sleep between live iterations. Defaults to the bar interval; tests
    /// shrink it to keep the cancellation bound observable.
    loop_delay: Duration,
}

impl StrategyRuntime {
    /// Runtime for live execution: heartbeats, trade/event records, and
    /// desired-state checks all flow through the gateway.
    pub fn live(
        name: impl Into<String>,
        symbol: impl Into<String>,
        interval: BarInterval,
        broker: Arc<dyn Broker>,
        strategy: Box<dyn Strategy>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let name = name.into();
        let symbol = symbol.into();
        let ctx = StrategyCtx::new(&name, &symbol, broker, Some(gateway.clone()));
        Self {
            name,
            symbol,
            interval,
            state: RunnerState::New,
            ctx,
            strategy,
            gateway: Some(gateway),
            loop_delay: interval.as_duration(),
        }
    }

    /// Runtime for backtests: no heartbeats, no persistence side effects.
    pub fn backtest(
        name: impl Into<String>,
        symbol: impl Into<String>,
        interval: BarInterval,
        broker: Arc<dyn Broker>,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        let name = name.into();
        let symbol = symbol.into();
        let ctx = StrategyCtx::new(&name, &symbol, broker, None);
        Self {
            name,
            symbol,
            interval,
            state: RunnerState::New,
            ctx,
            strategy,
            gateway: None,
            loop_delay: interval.as_duration(),
        }
    }

    /// Override the sleep between iterations. The cancellation latency
    /// bound is exactly one `loop_delay`.
    pub fn with_loop_delay(mut self, delay: Duration) -> Self {
        self.loop_delay = delay;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the `initialize` hook exactly once. Any failure is fatal:
    /// status goes to ERROR and the error propagates so the hosting
    /// process can exit non-zero.
    pub async fn initialize_once(&mut self) -> Result<(), RuntimeError> {
        if self.state != RunnerState::New {
            return Err(RuntimeError::AlreadyStarted(self.state));
        }
        self.state = RunnerState::Initializing;

        match self.strategy.initialize(&self.ctx).await {
            Ok(()) => {
                self.state = RunnerState::Looping;
                Ok(())
            }
            Err(e) => {
                self.state = RunnerState::Error;
                let message = format!("Fatal error in strategy: {}", e);
                error!("{}", message);
                if let Some(gateway) = &self.gateway {
                    if let Err(log_err) = gateway
                        .append_log(&self.name, "ERROR", "ERROR", &message, None)
                        .await
                    {
                        warn!("Failed to log fatal error: {}", log_err);
                    }
                    if let Err(status_err) = gateway
                        .update_strategy_status(&self.name, StrategyStatus::Error, Some(&message))
                        .await
                    {
                        warn!("Failed to persist error status: {}", status_err);
                    }
                }
                Err(RuntimeError::Init(e))
            }
        }
    }

    /// One `handle_data` iteration. Errors are contained: logged as
    /// recoverable events, never propagated.
    pub async fn step(&mut self) {
        if let Err(e) = self.strategy.handle_data(&self.ctx).await {
            let message = format!("Error in strategy loop: {}", e);
            error!("{}", message);
            if let Some(gateway) = &self.gateway {
                if let Err(log_err) = gateway
                    .append_log(&self.name, "ERROR", "ERROR", &message, None)
                    .await
                {
                    warn!("Failed to log iteration error: {}", log_err);
                }
            }
        }
    }

    /// Run the live loop until desired state leaves RUNNING.
    ///
    /// Each iteration: `handle_data`, heartbeat, sleep one interval, then
    /// re-check desired state, so graceful shutdown latency is bounded by
    /// one interval.
    pub async fn run_live(&mut self) -> Result<(), RuntimeError> {
        let gateway = self.gateway.clone().ok_or(RuntimeError::MissingGateway)?;

        info!(
            "Strategy {} starting on {} ({} loop)",
            self.name, self.symbol, self.interval
        );
        if let Err(e) = gateway
            .append_log(
                &self.name,
                "INFO",
                "START",
                &format!("Strategy {} started on {}", self.name, self.symbol),
                None,
            )
            .await
        {
            warn!("Failed to log start event: {}", e);
        }

        self.initialize_once().await?;

        loop {
            self.step().await;

            // Heartbeat once per iteration; refreshes the timestamp only
            // while desired state is still RUNNING.
            if let Err(e) = gateway.heartbeat(&self.name).await {
                warn!("Failed to update heartbeat: {}", e);
            }
            if let Err(e) = gateway
                .append_log(&self.name, "INFO", "HEARTBEAT", "Strategy is running", None)
                .await
            {
                warn!("Failed to log heartbeat: {}", e);
            }

            tokio::time::sleep(self.loop_delay).await;

            match gateway.read_strategy_state(&self.name).await {
                Ok(Some(state)) if state.is_running() => continue,
                Ok(_) => break,
                Err(e) => {
                    // Transient store failure: keep looping, the next
                    // check will see the real desired state.
                    warn!("Failed to read desired state: {}", e);
                }
            }
        }

        self.state = RunnerState::Stopping;
        info!("Strategy {} stopping", self.name);
        if let Err(e) = gateway
            .append_log(
                &self.name,
                "INFO",
                "STOP",
                &format!("Strategy {} stopped", self.name),
                None,
            )
            .await
        {
            warn!("Failed to log stop event: {}", e);
        }
        self.state = RunnerState::Stopped;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::domain::entities::candle::{Candle, PriceSeries};
    use crate::domain::errors::StrategyError;
    use crate::infrastructure::sim_broker::SimBroker;
    use crate::persistence::gateway::SqliteGateway;
    use crate::persistence::init_database;

    struct FailingInit;

    #[async_trait]
    impl Strategy for FailingInit {
        async fn initialize(&mut self, _ctx: &StrategyCtx) -> Result<(), StrategyError> {
            Err(StrategyError::Logic("missing parameter".to_string()))
        }

        async fn handle_data(&mut self, _ctx: &StrategyCtx) -> Result<(), StrategyError> {
            Ok(())
        }
    }

    struct FlakyLoop {
        iterations: usize,
    }

    #[async_trait]
    impl Strategy for FlakyLoop {
        async fn initialize(&mut self, _ctx: &StrategyCtx) -> Result<(), StrategyError> {
            Ok(())
        }

        async fn handle_data(&mut self, _ctx: &StrategyCtx) -> Result<(), StrategyError> {
            self.iterations += 1;
            Err(StrategyError::Logic("iteration failed".to_string()))
        }
    }

    fn sim_broker() -> Arc<SimBroker> {
        let candles = vec![Candle {
            ts: 3_600_000,
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 1.0,
        }];
        Arc::new(SimBroker::new(
            PriceSeries::new("BTC-USDT", BarInterval::H1, candles),
            1000.0,
        ))
    }

    async fn gateway() -> Arc<SqliteGateway> {
        let pool = init_database("sqlite::memory:").await.unwrap();
        Arc::new(SqliteGateway::new(pool))
    }

    #[tokio::test]
    async fn test_initialize_failure_is_terminal_error() {
        use crate::persistence::gateway::PersistenceGateway;

        let gw = gateway().await;
        gw.upsert_strategy_state(
            "bad",
            "BTC-USDT",
            1,
            BarInterval::H1,
            StrategyStatus::Running,
        )
        .await
        .unwrap();

        let mut runtime = StrategyRuntime::live(
            "bad",
            "BTC-USDT",
            BarInterval::H1,
            sim_broker(),
            Box::new(FailingInit),
            gw.clone(),
        );

        let result = runtime.run_live().await;
        assert!(matches!(result, Err(RuntimeError::Init(_))));
        assert_eq!(runtime.state(), RunnerState::Error);

        let state = gw.read_strategy_state("bad").await.unwrap().unwrap();
        assert_eq!(state.status, "ERROR");
        assert!(state.error_message.unwrap().contains("missing parameter"));
    }

    #[tokio::test]
    async fn test_iteration_errors_never_terminate_loop() {
        use crate::persistence::gateway::PersistenceGateway;

        let gw = gateway().await;
        gw.upsert_strategy_state(
            "flaky",
            "BTC-USDT",
            1,
            BarInterval::M1,
            StrategyStatus::Running,
        )
        .await
        .unwrap();

        let mut runtime = StrategyRuntime::live(
            "flaky",
            "BTC-USDT",
            BarInterval::M1,
            sim_broker(),
            Box::new(FlakyLoop { iterations: 0 }),
            gw.clone(),
        )
        .with_loop_delay(Duration::from_millis(10));

        // Stop after a few iterations from the outside
        let stopper = gw.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            stopper
                .update_strategy_status("flaky", StrategyStatus::Stopped, None)
                .await
                .unwrap();
        });

        runtime.run_live().await.unwrap();
        handle.await.unwrap();

        // The loop survived repeated iteration errors and stopped
        // gracefully when desired state changed.
        assert_eq!(runtime.state(), RunnerState::Stopped);

        let logs = gw.recent_logs("flaky", 100).await.unwrap();
        assert!(logs.iter().any(|l| l.event_type == "ERROR"));
        assert!(logs.iter().any(|l| l.event_type == "HEARTBEAT"));
        assert!(logs.iter().any(|l| l.event_type == "STOP"));
    }

    #[tokio::test]
    async fn test_cancellation_within_one_interval() {
        use crate::persistence::gateway::PersistenceGateway;

        let gw = gateway().await;
        // Desired state is already STOPPED when the loop first checks.
        gw.upsert_strategy_state(
            "quick",
            "BTC-USDT",
            1,
            BarInterval::M1,
            StrategyStatus::Stopped,
        )
        .await
        .unwrap();

        let mut runtime = StrategyRuntime::live(
            "quick",
            "BTC-USDT",
            BarInterval::M1,
            sim_broker(),
            Box::new(FlakyLoop { iterations: 0 }),
            gw.clone(),
        )
        .with_loop_delay(Duration::from_millis(10));

        let started = std::time::Instant::now();
        runtime.run_live().await.unwrap();

        // One iteration + one loop delay, with generous slack.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(runtime.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn test_initialize_once_rejects_reuse() {
        let gw = gateway().await;
        let mut runtime = StrategyRuntime::live(
            "once",
            "BTC-USDT",
            BarInterval::H1,
            sim_broker(),
            Box::new(FlakyLoop { iterations: 0 }),
            gw,
        );

        runtime.initialize_once().await.unwrap();
        assert_eq!(runtime.state(), RunnerState::Looping);
        assert!(matches!(
            runtime.initialize_once().await,
            Err(RuntimeError::AlreadyStarted(_))
        ));
    }
}
