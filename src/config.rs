//! Application configuration, loaded from the environment with validated
//! fallbacks. Out-of-range values are logged and replaced by defaults
//! rather than failing startup.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::application::supervisor::SupervisorConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/quantd.db";

/// OKX API credentials and endpoint.
#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    pub base_url: String,
}

impl OkxConfig {
    /// None when any credential is missing; live trading is impossible
    /// without a complete key set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OKX_API_KEY").ok()?;
        let secret_key = std::env::var("OKX_SECRET_KEY").ok()?;
        let passphrase = std::env::var("OKX_PASSPHRASE").ok()?;
        if api_key.is_empty() || secret_key.is_empty() || passphrase.is_empty() {
            return None;
        }
        let base_url = std::env::var("OKX_API_ENDPOINT")
            .unwrap_or_else(|_| crate::infrastructure::okx_client::OKX_API_BASE.to_string());
        Some(Self {
            api_key,
            secret_key,
            passphrase,
            base_url,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub okx: Option<OkxConfig>,
    pub supervisor: SupervisorConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let mut supervisor = SupervisorConfig::default();
        supervisor.poll_interval = duration_from_env(
            "SUPERVISOR_POLL_SECONDS",
            supervisor.poll_interval,
            1..=60,
        );
        supervisor.grace_period = duration_from_env(
            "SUPERVISOR_GRACE_SECONDS",
            supervisor.grace_period,
            1..=60,
        );
        supervisor.error_delay = duration_from_env(
            "SUPERVISOR_ERROR_DELAY_SECONDS",
            supervisor.error_delay,
            1..=300,
        );
        supervisor.runner_program = runner_program_from_env();

        Self {
            database_url,
            okx: OkxConfig::from_env(),
            supervisor,
        }
    }
}

fn duration_from_env(
    key: &str,
    default: Duration,
    range: std::ops::RangeInclusive<u64>,
) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) if range.contains(&secs) => Duration::from_secs(secs),
            Ok(secs) => {
                warn!(
                    "{} value {} outside {:?}s, using default {:?}",
                    key, secs, range, default
                );
                default
            }
            Err(e) => {
                warn!("Failed to parse {} '{}': {}, using default {:?}", key, raw, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// The runner binary to spawn per strategy. Defaults to `strategy_runner`
/// next to the current executable.
fn runner_program_from_env() -> PathBuf {
    if let Ok(program) = std::env::var("QUANTD_RUNNER_PROGRAM") {
        return PathBuf::from(program);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("strategy_runner")))
        .unwrap_or_else(|| PathBuf::from("strategy_runner"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_env_default_when_unset() {
        let value = duration_from_env(
            "QUANTD_TEST_UNSET_DURATION",
            Duration::from_secs(2),
            1..=60,
        );
        assert_eq!(value, Duration::from_secs(2));
    }

    #[test]
    fn test_duration_from_env_rejects_out_of_range() {
        std::env::set_var("QUANTD_TEST_RANGE_DURATION", "999");
        let value = duration_from_env(
            "QUANTD_TEST_RANGE_DURATION",
            Duration::from_secs(5),
            1..=60,
        );
        assert_eq!(value, Duration::from_secs(5));
        std::env::remove_var("QUANTD_TEST_RANGE_DURATION");
    }

    #[test]
    fn test_duration_from_env_accepts_valid() {
        std::env::set_var("QUANTD_TEST_VALID_DURATION", "10");
        let value = duration_from_env(
            "QUANTD_TEST_VALID_DURATION",
            Duration::from_secs(5),
            1..=60,
        );
        assert_eq!(value, Duration::from_secs(10));
        std::env::remove_var("QUANTD_TEST_VALID_DURATION");
    }
}
