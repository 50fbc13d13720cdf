//! Storage error types.

use thiserror::Error;

/// Errors from a storage backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The addressed inbox or row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A row that must be unique already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
