//! # Store Configuration
//!
//! Connection pool sizing plus the paging contract shared by every reader.
//!
//! ```rust,ignore
//! use core_library::config::StoreConfig;
//!
//! let config = StoreConfig::new("library.db")
//!     .max_connections(8)
//!     .page_size(100);
//! let library = MediaLibrary::open(config).await?;
//! ```

use crate::error::{LibraryError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Default capacity of the change-notification channel.
pub const DEFAULT_CHANGE_CAPACITY: usize = 64;

/// Configuration for opening a media library store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path or `:memory:` for in-memory database
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,

    /// Enable statement caching (number of statements to cache)
    pub statement_cache_capacity: usize,

    /// Records per page handed out by the paging provider
    pub page_size: u32,

    /// Buffered change notifications before slow subscribers lag
    pub change_capacity: usize,
}

impl StoreConfig {
    /// Create a configuration backed by the given database file
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        let database_url = format!("sqlite:{}", path.display());

        Self {
            database_url,
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 100,
            page_size: DEFAULT_PAGE_SIZE,
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }

    /// Create a configuration for an in-memory database (useful for testing)
    ///
    /// The pool is pinned to one long-lived connection: every connection to a
    /// shared in-memory database contends on table locks, and the database
    /// disappears when its last connection closes.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 100,
            page_size: DEFAULT_PAGE_SIZE,
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }

    /// Set the minimum number of connections
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Set the number of records per page
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Set the change-notification buffer size
    pub fn change_capacity(mut self, capacity: usize) -> Self {
        self.change_capacity = capacity;
        self
    }

    /// Reject configurations the store cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(LibraryError::Configuration(
                "page_size must be greater than zero".to_string(),
            ));
        }
        if self.change_capacity == 0 {
            return Err(LibraryError::Configuration(
                "change_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(LibraryError::Configuration(format!(
                "invalid pool bounds: min {} / max {}",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}
