//! # Storage Error Types

use thiserror::Error;

/// Errors from the storage layer.
///
/// `Corruption` is fatal: the node refuses to continue and exits with the
/// storage error code rather than running on inconsistent state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key or record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data violates a structural invariant.
    #[error("Storage corruption: {0}")]
    Corruption(String),

    /// Serialization of a stored value failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the data directory lock.
    #[error("Data directory locked: {0}")]
    Locked(String),

    /// Backend-specific failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether the node must stop rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Corruption(_))
    }
}
