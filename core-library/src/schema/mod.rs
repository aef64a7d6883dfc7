//! # Schema & Shadow-Index Manager
//!
//! Owns the table definitions, the migration ladder and the full-text shadow
//! indexes. The schema version is the SQLite `user_version` header field, so
//! it travels with the data file.
//!
//! Migrations run once, when the store is opened, before any reader or writer
//! gets a handle:
//!
//! ```rust,ignore
//! let pool = create_pool(&config).await?;
//! Migrator::new().migrate(&pool, CURRENT_VERSION).await?;
//! ```

pub(crate) mod hooks;
pub mod migrations;

use crate::error::{LibraryError, Result};
use crate::models::AggregateKind;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

pub use migrations::{MigrationStep, MIGRATIONS};

/// Version a freshly migrated store reports
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Source table carrying a shadow index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTable {
    Media,
    Videos,
    Albums,
    Artists,
    Genres,
}

impl SourceTable {
    pub const ALL: [SourceTable; 5] = [
        SourceTable::Media,
        SourceTable::Videos,
        SourceTable::Albums,
        SourceTable::Artists,
        SourceTable::Genres,
    ];

    /// Name of the table itself
    pub fn name(self) -> &'static str {
        hooks::shadow_for(self).source
    }

    /// Name of the full-text table mirroring it
    pub fn shadow_name(self) -> &'static str {
        hooks::shadow_for(self).shadow
    }
}

impl From<AggregateKind> for SourceTable {
    fn from(kind: AggregateKind) -> Self {
        match kind {
            AggregateKind::Album => SourceTable::Albums,
            AggregateKind::Artist => SourceTable::Artists,
            AggregateKind::Genre => SourceTable::Genres,
        }
    }
}

/// Read the stored schema version.
pub async fn current_version(pool: &SqlitePool) -> Result<u32> {
    let mut conn = pool.acquire().await?;
    read_version(&mut conn).await
}

async fn read_version(conn: &mut SqliteConnection) -> Result<u32> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(conn)
        .await?;
    u32::try_from(version).map_err(|_| LibraryError::Migration {
        version: 0,
        message: format!("stored schema version {} is not valid", version),
    })
}

/// Applies ladder steps, all or nothing.
#[derive(Debug, Clone, Copy)]
pub struct Migrator<'a> {
    steps: &'a [MigrationStep],
}

impl Migrator<'static> {
    /// Migrator over the built-in ladder
    pub fn new() -> Self {
        Self { steps: MIGRATIONS }
    }
}

impl Default for Migrator<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Migrator<'a> {
    /// Migrator over a custom ladder. Step `n` must upgrade from version `n`.
    pub fn with_steps(steps: &'a [MigrationStep]) -> Self {
        Self { steps }
    }

    /// Highest version this ladder can reach
    pub fn latest_version(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Bring the store from its stored version to `target`.
    ///
    /// Every pending step, and the version bump, runs inside one transaction;
    /// if any statement fails nothing is committed and the stored version is
    /// unchanged. Returns the version the store is at afterwards.
    ///
    /// # Errors
    ///
    /// `LibraryError::Migration` naming the version whose step failed, or the
    /// requested target when it is unknown or lower than the stored version.
    pub async fn migrate(&self, pool: &SqlitePool, target: u32) -> Result<u32> {
        self.check_ladder()?;

        if target > self.latest_version() {
            return Err(LibraryError::Migration {
                version: target,
                message: format!(
                    "unknown schema version; latest is {}",
                    self.latest_version()
                ),
            });
        }

        let mut tx = pool.begin().await?;
        let stored = read_version(&mut tx).await?;

        if stored > target {
            return Err(LibraryError::Migration {
                version: target,
                message: format!("cannot downgrade from version {}", stored),
            });
        }
        if stored == target {
            debug!(version = stored, "Schema is up to date");
            return Ok(stored);
        }

        info!(from = stored, to = target, "Migrating schema");

        for step in &self.steps[stored as usize..target as usize] {
            if let Err(e) = run_step(&mut tx, step).await {
                warn!(version = step.to(), error = %e, "Migration step failed, rolling back");
                tx.rollback().await?;
                return Err(e);
            }
        }

        // PRAGMA values cannot be bound
        sqlx::query(&format!("PRAGMA user_version = {}", target))
            .execute(&mut *tx)
            .await
            .map_err(|e| LibraryError::Migration {
                version: target,
                message: e.to_string(),
            })?;

        tx.commit().await.map_err(|e| LibraryError::Migration {
            version: target,
            message: e.to_string(),
        })?;

        info!(version = target, "Schema migration completed");
        Ok(target)
    }

    fn check_ladder(&self) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            if step.from as usize != index {
                return Err(LibraryError::Migration {
                    version: step.to(),
                    message: format!(
                        "step '{}' upgrades from {} but sits at position {}",
                        step.description, step.from, index
                    ),
                });
            }
        }
        Ok(())
    }
}

async fn run_step(conn: &mut SqliteConnection, step: &MigrationStep) -> Result<()> {
    debug!(from = step.from, to = step.to(), description = step.description, "Applying migration step");

    for statement in step.statements {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| LibraryError::Migration {
                version: step.to(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}

/// Number of rows in the shadow index of `table`.
pub async fn shadow_row_count(pool: &SqlitePool, table: SourceTable) -> Result<i64> {
    let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.shadow_name()))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Searchable text the shadow index holds for source row `id`.
pub async fn shadow_text(pool: &SqlitePool, table: SourceTable, id: i64) -> Result<Option<String>> {
    let text = sqlx::query_scalar(&format!(
        "SELECT searchable FROM {} WHERE rowid = ?",
        table.shadow_name()
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(text)
}

/// Number of live source rows that should have a shadow row.
pub async fn indexable_row_count(pool: &SqlitePool, table: SourceTable) -> Result<i64> {
    let index = hooks::shadow_for(table);
    let count = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} AND {} IS NOT NULL",
        index.source, index.live_filter, index.text_column
    ))
    .fetch_one(pool)
    .await?;
    Ok(count)
}
