//! Persistence Layer
//!
//! SQLite storage for strategy state, trades, event logs, derived metrics,
//! and historical candles. The store is the single source of truth for a
//! strategy's desired state; runtimes heartbeat into it and the supervisor
//! reconciles against it.

pub mod gateway;
pub mod klines;
pub mod models;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
///
/// `database_url` is a sqlite URL such as `sqlite://data/quantd.db` or
/// `sqlite::memory:` for tests.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure the data directory exists for file-backed databases
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS strategy_status (
            name TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            leverage INTEGER NOT NULL DEFAULT 1,
            interval TEXT NOT NULL DEFAULT '1H',
            status TEXT NOT NULL DEFAULT 'STOPPED'
                CHECK(status IN ('STOPPED', 'RUNNING', 'ERROR')),
            last_heartbeat DATETIME,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create strategy_status table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS strategy_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            strategy_name TEXT NOT NULL,
            timestamp DATETIME NOT NULL,
            level TEXT NOT NULL,
            event_type TEXT NOT NULL,
            message TEXT NOT NULL,
            data TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create strategy_logs table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS strategy_trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            strategy_name TEXT NOT NULL,
            timestamp DATETIME NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            order_type TEXT NOT NULL,
            price REAL NOT NULL,
            quantity REAL NOT NULL,
            order_id TEXT,
            status TEXT NOT NULL
                CHECK(status IN ('PENDING', 'SUBMITTED', 'FAILED', 'FILLED')),
            pnl REAL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create strategy_trades table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS strategy_metrics (
            strategy_name TEXT PRIMARY KEY,
            total_trades INTEGER NOT NULL DEFAULT 0,
            winning_trades INTEGER NOT NULL DEFAULT 0,
            losing_trades INTEGER NOT NULL DEFAULT 0,
            total_pnl REAL NOT NULL DEFAULT 0,
            win_rate REAL NOT NULL DEFAULT 0,
            last_updated DATETIME
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create strategy_metrics table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS market_klines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            bar TEXT NOT NULL,
            ts INTEGER NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            vol REAL,
            UNIQUE(symbol, bar, ts)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create market_klines table: {}", e))
    })?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_logs_strategy ON strategy_logs(strategy_name, timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_trades_strategy ON strategy_trades(strategy_name, timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_trades_order_id ON strategy_trades(order_id)",
        "CREATE INDEX IF NOT EXISTS idx_klines_symbol_bar_ts ON market_klines(symbol, bar, ts)",
    ] {
        sqlx::query(index)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('strategy_status', 'strategy_logs', 'strategy_trades', 'strategy_metrics', 'market_klines')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 5);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }
}
