use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    /// Invalid fragment, grouping or configuration combination. A defect in
    /// the caller's selection mapping; never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fragments were compiled against a different schema version than the
    /// one the store is running. Recompile and retry.
    #[error("Schema mismatch: fragments compiled for version {found}, store is at version {expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    /// Transient storage failure. Safe to retry the whole operation.
    #[error("Storage error: {0}")]
    StoreIo(#[from] sqlx::Error),

    /// Fatal: the store cannot be opened until the schema is repaired.
    #[error("Migration to version {version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    /// A page was appended to a loaded prefix at the wrong position.
    #[error("Page out of sequence: expected offset {expected}, got {found}")]
    PageOutOfSequence { expected: u64, found: u64 },
}

impl LibraryError {
    /// Whether the failed operation may be retried as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LibraryError::StoreIo(_))
    }

    pub(crate) fn not_found(entity_type: &str, id: impl ToString) -> Self {
        LibraryError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
