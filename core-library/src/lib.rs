//! # Media Library Engine
//!
//! Query and grouped-pagination engine over a SQLite media library.
//!
//! ## Overview
//!
//! - [`query`] compiles abstract group-by keys and sort options into typed
//!   filter/sort fragments
//! - [`schema`] owns the versioned tables, the migration ladder and the FTS5
//!   shadow indexes kept in sync by transactional write hooks
//! - [`store`] is the single write entry point (aggregate counts, soft
//!   deletes, playlists)
//! - [`paging`] serves fixed-size pages, page streams and change signals
//! - [`grouping`] folds a loaded prefix into primary/secondary groups and
//!   maps group positions back to absolute indexes
//!
//! [`MediaLibrary::open`] wires them together.

pub mod config;
pub mod db;
pub mod error;
pub mod grouping;
pub mod library;
pub mod logging;
pub mod models;
pub mod paging;
pub mod query;
pub mod schema;
pub mod store;

pub use config::StoreConfig;
pub use error::{LibraryError, Result};
pub use grouping::{flatten_index, fold, GroupValue, PrimaryGroup, SecondaryGroup};
pub use library::MediaLibrary;
pub use paging::{
    BaseSelector, ChangeNotifier, LoadState, LoadedPrefix, Page, PageSource, PageToken,
    PagingProvider,
};
pub use query::{compile_fragments, CompiledQuery, EntityKind, GroupKey, SortKey, SortOption};
pub use schema::{Migrator, SourceTable, CURRENT_VERSION};
pub use store::LibraryStore;
