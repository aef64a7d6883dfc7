//! Workspace facade.
//!
//! Re-exports the media library engine so host applications can depend on
//! `medialib-workspace` alone.
//!
//! ```rust,ignore
//! use medialib_workspace::{MediaLibrary, StoreConfig};
//!
//! let library = MediaLibrary::open(StoreConfig::new("library.db")).await?;
//! ```

pub use core_library::*;
