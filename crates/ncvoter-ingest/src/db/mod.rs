//! SQLite storage for jobs, voters, the change log and bad lines
//!
//! Query helpers take any SQLite executor so the same code runs against the
//! pool or inside a flush transaction.

pub mod bad_lines;
pub mod changes;
pub mod files;
pub mod voters;

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Embedded schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open (creating if needed) the database and apply migrations
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database URL '{}'", config.url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.busy_timeout())
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to {}", config.url))?;

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!(url = %config.url, "Database ready");
    Ok(pool)
}

/// A private in-memory database with the schema applied.
///
/// A single connection that never expires, because every new connection to
/// `sqlite::memory:` would open an empty database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .context("Invalid in-memory database URL")?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open in-memory database")?;

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
