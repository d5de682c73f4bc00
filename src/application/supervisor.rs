//! Process Supervisor
//!
//! A fixed-period reconciliation loop comparing persisted desired state
//! against the set of managed strategy processes: spawn what should be
//! running, stop what should not, and record crashes. At most one process
//! per strategy name, enforced here by the managed set, never by the
//! store.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::persistence::gateway::PersistenceGateway;
use crate::persistence::models::{StrategyStateRecord, StrategyStatus};
use crate::persistence::DatabaseError;

/// Lines of child stderr kept for crash reports.
const STDERR_TAIL_LINES: usize = 50;
/// Characters of the joined tail persisted in the error message.
const STDERR_TAIL_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("state store unavailable: {0}")]
    Store(#[from] DatabaseError),

    #[error("process inspection failed: {0}")]
    Process(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Reconciliation period. Small relative to the shortest strategy
    /// interval so that start/stop requests are picked up promptly.
    pub poll_interval: Duration,
    /// Delay after a failed reconciliation tick.
    pub error_delay: Duration,
    /// How long a stopping process gets to exit on its own before being
    /// force-killed.
    pub grace_period: Duration,
    /// Program spawned per strategy, receiving
    /// `(name, symbol, leverage, interval)` as positional arguments.
    pub runner_program: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            error_delay: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
            runner_program: PathBuf::from("strategy_runner"),
        }
    }
}

struct ManagedProcess {
    child: Child,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl ManagedProcess {
    fn tail(&self) -> String {
        let lines = self
            .stderr_tail
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let joined = lines.iter().cloned().collect::<Vec<_>>().join("\n");
        if joined.len() > STDERR_TAIL_CHARS {
            let cut = joined.len() - STDERR_TAIL_CHARS;
            // Keep the end of the output, where the panic/exit message is
            joined
                .char_indices()
                .find(|(i, _)| *i >= cut)
                .map(|(i, _)| joined[i..].to_string())
                .unwrap_or(joined)
        } else {
            joined
        }
    }
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    gateway: Arc<dyn PersistenceGateway>,
    managed: HashMap<String, ManagedProcess>,
}

impl ProcessSupervisor {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: SupervisorConfig) -> Self {
        Self {
            config,
            gateway,
            managed: HashMap::new(),
        }
    }

    pub fn managed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managed.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.managed.contains_key(name)
    }

    /// Run the reconciliation loop forever. A failed tick is logged and
    /// followed by a delay; it never terminates the supervisor.
    pub async fn run(mut self) {
        info!(
            "Supervisor started (poll {:?}, grace {:?}, runner {:?})",
            self.config.poll_interval, self.config.grace_period, self.config.runner_program
        );
        loop {
            match self.reconcile().await {
                Ok(()) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    error!("Reconciliation tick failed: {}", e);
                    tokio::time::sleep(self.config.error_delay).await;
                }
            }
        }
    }

    /// One reconciliation tick.
    pub async fn reconcile(&mut self) -> Result<(), SupervisorError> {
        let states = self.gateway.read_all_strategy_states().await?;
        let desired: HashMap<&str, &StrategyStateRecord> =
            states.iter().map(|s| (s.name.as_str(), s)).collect();

        // Start strategies that should be running but are not managed.
        // A name already in the managed set is never spawned again.
        for state in &states {
            if state.is_running() && !self.managed.contains_key(&state.name) {
                self.spawn_runner(state).await;
            }
        }

        // Stop managed processes whose desired state left RUNNING. The
        // persisted flip is the graceful request; the process gets the
        // grace period to observe it before being force-killed.
        let to_stop: Vec<String> = self
            .managed
            .keys()
            .filter(|name| {
                desired
                    .get(name.as_str())
                    .map(|state| !state.is_running())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        for name in to_stop {
            self.stop_runner(&name).await;
        }

        // Anything left in the managed set that exited did so on its own:
        // a crash.
        let names: Vec<String> = self.managed.keys().cloned().collect();
        for name in names {
            self.check_for_crash(&name).await?;
        }

        Ok(())
    }

    async fn spawn_runner(&mut self, state: &StrategyStateRecord) {
        info!(
            "Starting strategy process: {} {} leverage={} interval={}",
            state.name, state.symbol, state.leverage, state.interval
        );

        let spawned = Command::new(&self.config.runner_program)
            .arg(&state.name)
            .arg(&state.symbol)
            .arg(state.leverage.to_string())
            .arg(state.bar().as_str())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start strategy {}: {}", state.name, e);
                let message = format!("Failed to start strategy process: {}", e);
                if let Err(db_err) = self
                    .gateway
                    .update_strategy_status(&state.name, StrategyStatus::Error, Some(&message))
                    .await
                {
                    error!("Failed to record spawn failure: {}", db_err);
                }
                return;
            }
        };

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
                    if tail.len() >= STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            });
        }

        if let Some(pid) = child.id() {
            info!("Started process {} for {}", pid, state.name);
        }
        self.managed.insert(
            state.name.clone(),
            ManagedProcess { child, stderr_tail },
        );
    }

    async fn stop_runner(&mut self, name: &str) {
        let Some(mut process) = self.managed.remove(name) else {
            return;
        };
        info!("Stopping strategy process: {}", name);

        match tokio::time::timeout(self.config.grace_period, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process for {} exited with {} during shutdown", name, status);
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for {}: {}", name, e);
            }
            Err(_) => {
                warn!(
                    "Process for {} did not exit within {:?}, killing",
                    name, self.config.grace_period
                );
                if let Err(e) = process.child.kill().await {
                    warn!("Failed to kill process for {}: {}", name, e);
                }
            }
        }
        info!("Stopped process for {}", name);
    }

    async fn check_for_crash(&mut self, name: &str) -> Result<(), SupervisorError> {
        let exited = match self.managed.get_mut(name) {
            Some(process) => process.child.try_wait()?,
            None => return Ok(()),
        };
        let Some(status) = exited else {
            return Ok(());
        };

        let Some(process) = self.managed.remove(name) else {
            return Ok(());
        };
        let tail = process.tail();
        error!(
            "Process for {} exited unexpectedly ({}). Stderr: {}",
            name, status, tail
        );

        let message = format!("Process exited unexpectedly. Stderr: {}", tail);
        if let Err(e) = self
            .gateway
            .update_strategy_status(name, StrategyStatus::Error, Some(&message))
            .await
        {
            error!("Failed to record crash for {}: {}", name, e);
        }
        if let Err(e) = self
            .gateway
            .append_log(
                name,
                "ERROR",
                "ERROR",
                &format!("Process exited unexpectedly with {}", status),
                None,
            )
            .await
        {
            error!("Failed to log crash for {}: {}", name, e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.error_delay, Duration::from_secs(5));
        assert_eq!(config.grace_period, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tail_keeps_last_chars() {
        let tail_lines: VecDeque<String> =
            vec!["x".repeat(150), "y".repeat(150)].into_iter().collect();
        let process = ManagedProcess {
            child: Command::new("true")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .unwrap(),
            stderr_tail: Arc::new(Mutex::new(tail_lines)),
        };
        let tail = process.tail();
        assert_eq!(tail.len(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with(&"y".repeat(150)));
    }
}
