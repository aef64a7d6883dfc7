//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the media library store.
//!
//! ## Features
//!
//! - **WAL Mode**: readers see a consistent snapshot while one writer commits
//! - **Connection Pooling**: configurable min/max connections with timeouts
//! - **Statement Caching**: prepared statements are cached per connection
//! - **Foreign Keys**: enforced for referential integrity
//! - **Health Checks**: connection validation
//!
//! Schema migrations are not run here; [`crate::schema::Migrator`] owns them
//! and runs once the pool is up.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::{config::StoreConfig, db::create_pool};
//!
//! let pool = create_pool(&StoreConfig::new("library.db")).await?;
//! ```

use crate::config::StoreConfig;
use crate::error::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Create a configured SQLite connection pool
///
/// # Errors
///
/// Returns `Configuration` for an invalid config or database URL, and
/// `StoreIo` when the pool cannot connect.
pub async fn create_pool(config: &StoreConfig) -> Result<SqlitePool> {
    config.validate()?;

    info!(
        database_url = %config.database_url,
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| {
            LibraryError::Configuration(format!(
                "Invalid database url {}: {}",
                config.database_url, e
            ))
        })?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        // 64MB page cache
        .pragma("cache_size", "-64000")
        .statement_cache_capacity(config.statement_cache_capacity);

    debug!("SQLite connection options configured");

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LibraryError::StoreIo(e)
        })?;

    info!(
        connections = pool.size(),
        "Database connection pool created successfully"
    );

    Ok(pool)
}

/// Verify the pool can serve a query.
pub async fn health_check(pool: &SqlitePool) -> Result<()> {
    debug!("Performing database health check");

    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LibraryError::StoreIo(e)
    })?;

    debug!("Database health check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_memory_pool() {
        let pool = create_pool(&StoreConfig::in_memory()).await;
        assert!(pool.is_ok(), "Should create in-memory pool successfully");
    }

    #[tokio::test]
    async fn test_health_check() {
        let pool = create_pool(&StoreConfig::in_memory()).await.unwrap();
        assert!(health_check(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_connecting() {
        let err = create_pool(&StoreConfig::in_memory().page_size(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_pool(&StoreConfig::in_memory()).await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_wal_mode_enabled_for_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&StoreConfig::new(dir.path().join("wal.db")))
            .await
            .unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }
}
