//! Supervisor daemon: reconciles persisted desired state against strategy
//! processes until interrupted.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quantd::application::supervisor::ProcessSupervisor;
use quantd::config::AppConfig;
use quantd::persistence::gateway::SqliteGateway;
use quantd::persistence::init_database;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quantd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!("quantd supervisor starting");
    if config.okx.is_none() {
        info!("No OKX credentials configured; spawned runners will exit until keys are set");
    }

    let pool = init_database(&config.database_url).await?;
    let gateway = Arc::new(SqliteGateway::new(pool));

    let supervisor = ProcessSupervisor::new(gateway, config.supervisor);

    tokio::select! {
        _ = supervisor.run() => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
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
