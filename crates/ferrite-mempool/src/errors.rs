//! # Mempool Error and Verdict Types

use ferrite_types::Digest;
use thiserror::Error;

/// Outcome of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionVerdict {
    /// Entry inserted and queued for validation.
    Accepted,
    /// Identity already pooled; dropped.
    DuplicateDropped,
    /// Inserted after evicting the oldest entry.
    CapacityEvicted(Digest),
}

/// Mempool failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MempoolError {
    /// Identity already pooled.
    #[error("Duplicate transaction {0}")]
    Duplicate(Digest),

    /// Transaction failed validation.
    #[error("Invalid transaction {tx}: {reason}")]
    Invalid { tx: Digest, reason: String },

    /// Pool is full and nothing could be evicted.
    #[error("Mempool at capacity {capacity}")]
    CapacityExceeded { capacity: usize },

    /// Entry outlived its lifetime.
    #[error("Transaction {0} expired")]
    Expired(Digest),

    /// Validation queue full; retriable.
    #[error("Validation queue full")]
    Busy,

    /// Identity not pooled.
    #[error("Transaction {0} not found")]
    NotFound(Digest),
}
