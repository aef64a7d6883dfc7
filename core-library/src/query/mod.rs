//! Query compilation.
//!
//! [`fragments`] turns abstract UI selections into typed fragment lists;
//! the crate-private `sql` module renders them against the store schema.

pub mod fragments;
pub(crate) mod sql;

pub use fragments::{
    compile_fragments, Column, CompiledQuery, EntityKind, FilterFragment, FilterOp, GroupKey,
    SortDirection, SortFragment, SortKey, SortOption,
};
