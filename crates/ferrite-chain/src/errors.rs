//! # Chain Error Types

use ferrite_consensus::ConsensusError;
use ferrite_state::StateError;
use ferrite_storage::StorageError;
use ferrite_types::{BlockError, Digest, Severity, TxError};
use thiserror::Error;

/// Failures from chain application, fork choice, and reorganization.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The block's parent is not known yet; buffer and retry once it
    /// arrives.
    #[error("Orphan block {block}: missing parent {missing_parent}")]
    Orphan {
        block: Digest,
        missing_parent: Digest,
    },

    /// The block is already part of the index.
    #[error("Block {0} already known")]
    AlreadyKnown(Digest),

    /// No such block.
    #[error("Block {0} not found")]
    NotFound(Digest),

    /// The chain has no genesis yet.
    #[error("Chain not initialized")]
    NotInitialized,

    /// Structural block validation failed.
    #[error(transparent)]
    Block(#[from] BlockError),

    /// Consensus validation failed.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// A body transaction failed chain-context validation.
    #[error("Invalid transaction {tx}: {source}")]
    Tx {
        tx: Digest,
        #[source]
        source: TxError,
    },

    /// Execution failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// PoW difficulty disagrees with the retarget schedule.
    #[error("Block declares difficulty {declared}, schedule expects {expected}")]
    WrongDifficulty { declared: u64, expected: u64 },

    /// Coinbase mints more than reward plus fees.
    #[error("Coinbase mints {declared}, allowed {allowed}")]
    CoinbaseOverpays { declared: u64, allowed: u64 },

    /// Reorganization would cross a finalized block.
    #[error("Reorganization past finalized height {finalized_height} (ancestor at {ancestor_height})")]
    FinalityViolation {
        ancestor_height: u64,
        finalized_height: u64,
    },
}

impl ChainError {
    /// Taxonomy class of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            ChainError::Orphan { .. } | ChainError::AlreadyKnown(_) | ChainError::NotFound(_) => {
                Severity::Resource
            }
            ChainError::NotInitialized => Severity::Resource,
            ChainError::Block(e) => e.severity(),
            ChainError::Consensus(e) => e.severity(),
            ChainError::Tx { source, .. } => source.severity(),
            ChainError::State(_) => Severity::Semantic,
            ChainError::Storage(e) => {
                if e.is_fatal() {
                    Severity::Corruption
                } else {
                    Severity::Resource
                }
            }
            ChainError::WrongDifficulty { .. } | ChainError::CoinbaseOverpays { .. } => {
                Severity::Semantic
            }
            ChainError::FinalityViolation { .. } => Severity::Finality,
        }
    }
}
