//! Per-strategy process spawned by the supervisor.
//!
//! Positional arguments: `strategy_name symbol leverage [interval]`.
//! Exits 0 on graceful stop, non-zero on any fatal startup or
//! initialization error so the supervisor can tell crashes from clean
//! shutdowns.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quantd::application::registry::StrategyRegistry;
use quantd::application::runtime::StrategyRuntime;
use quantd::config::AppConfig;
use quantd::domain::entities::interval::BarInterval;
use quantd::infrastructure::live_broker::LiveBroker;
use quantd::infrastructure::okx_client::{OkxClient, OkxCredentials};
use quantd::persistence::gateway::SqliteGateway;
use quantd::persistence::init_database;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quantd=info,strategy_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: strategy_runner <strategy_name> <symbol> <leverage> [interval]");
        return ExitCode::from(2);
    }
    let strategy_name = args[1].clone();
    let symbol = args[2].clone();
    let Ok(leverage) = args[3].parse::<i64>() else {
        eprintln!("Error: leverage must be an integer, got {:?}", args[3]);
        return ExitCode::from(2);
    };
    let interval = args
        .get(4)
        .and_then(|raw| raw.parse::<BarInterval>().ok())
        .unwrap_or(BarInterval::H1);

    info!(
        "Runner starting: {} on {} with leverage {}, interval {} ({}s)",
        strategy_name,
        symbol,
        leverage,
        interval,
        interval.as_secs()
    );

    let config = AppConfig::from_env();
    let Some(okx) = config.okx else {
        eprintln!("Error: OKX client configuration missing");
        return ExitCode::FAILURE;
    };

    let pool = match init_database(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Error: failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let gateway = Arc::new(SqliteGateway::new(pool));

    let registry = StrategyRegistry::with_builtins();
    let Some(strategy) = registry.build(&strategy_name) else {
        eprintln!(
            "Error: unknown strategy {:?} (available: {:?})",
            strategy_name,
            registry.names()
        );
        return ExitCode::FAILURE;
    };

    let client = OkxClient::new(
        OkxCredentials {
            api_key: okx.api_key,
            secret_key: okx.secret_key,
            passphrase: okx.passphrase,
        },
        okx.base_url,
    );
    let broker = Arc::new(LiveBroker::new(client));

    let mut runtime = StrategyRuntime::live(
        strategy_name.clone(),
        symbol,
        interval,
        broker,
        strategy,
        gateway,
    );

    tokio::select! {
        result = runtime.run_live() => match result {
            Ok(()) => {
                info!("Strategy {} stopped gracefully", strategy_name);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Strategy {} failed: {}", strategy_name, e);
                eprintln!("Error executing strategy: {}", e);
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            info!("Runner for {} interrupted, exiting", strategy_name);
            ExitCode::SUCCESS
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
