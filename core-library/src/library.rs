//! # Media Library
//!
//! Opens the store: pool, migrations to the current schema version, health
//! check, then the write side ([`LibraryStore`]) and the read side
//! ([`PagingProvider`]) sharing one change notifier.
//!
//! ```rust,ignore
//! use core_library::{MediaLibrary, StoreConfig};
//!
//! let library = MediaLibrary::open(StoreConfig::new("library.db")).await?;
//! library.store().insert_media(NewMedia::new("Blue").album("Blue")).await?;
//! ```

use crate::config::StoreConfig;
use crate::db::{create_pool, health_check};
use crate::error::Result;
use crate::paging::{ChangeNotifier, PagingProvider};
use crate::schema::{Migrator, CURRENT_VERSION};
use crate::store::LibraryStore;
use sqlx::SqlitePool;
use tracing::{info, instrument};

#[derive(Clone, Debug)]
pub struct MediaLibrary {
    pool: SqlitePool,
    store: LibraryStore,
    pages: PagingProvider,
}

impl MediaLibrary {
    /// Open (creating if needed) the store described by `config` and migrate
    /// it to [`CURRENT_VERSION`].
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid config, `Migration` when the schema
    /// cannot be brought up to date (nothing is committed in that case), and
    /// `StoreIo` when the database cannot be reached.
    #[instrument(skip(config), fields(database_url = %config.database_url))]
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let pool = create_pool(&config).await?;
        let version = Migrator::new().migrate(&pool, CURRENT_VERSION).await?;
        health_check(&pool).await?;

        let notifier = ChangeNotifier::new(config.change_capacity);
        let store = LibraryStore::new(pool.clone(), notifier.clone(), version);
        let pages = PagingProvider::new(pool.clone(), notifier, version, config.page_size);

        info!(schema_version = version, page_size = config.page_size, "Media library opened");
        Ok(Self { pool, store, pages })
    }

    /// Write entry points and direct reads
    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    /// Paged reads and change signals
    pub fn pages(&self) -> &PagingProvider {
        &self.pages
    }

    /// Schema version stored in the data file
    pub async fn current_version(&self) -> Result<u32> {
        crate::schema::current_version(&self.pool).await
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Media library closed");
    }
}
