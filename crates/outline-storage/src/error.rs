//! Storage error types for outline-storage.
//!
//! [`StorageError`] wraps core errors raised while hydrating or applying
//! patches, backend I/O failures, and bootstrap failures. I/O failures are
//! retryable under the flush policy; everything else is fatal.

use outline_core::CoreError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Lookup or schema failure from the entity graph.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization of a row failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A backend-specific failure outside SQLite.
    #[error("storage backend error: {reason}")]
    Backend { reason: String },

    /// A table was used before `open_tables` declared it.
    #[error("table not declared: '{name}'")]
    UnknownTable { name: String },

    /// Root/config bootstrap failed; the graph is unusable.
    #[error("initialization failed: {reason}")]
    Initialization { reason: String },
}

impl StorageError {
    /// I/O-class failures that a later flush may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Sqlite(_) | StorageError::Backend { .. }
        )
    }

    /// Lookup failures from the entity graph, which callers may treat as
    /// "nothing to show" rather than a hard error.
    pub fn is_lookup(&self) -> bool {
        matches!(self, StorageError::Core(e) if e.is_lookup())
    }
}
