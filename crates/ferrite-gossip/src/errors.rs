//! # Gossip Error Types

use ferrite_types::{Digest, Severity};
use thiserror::Error;

/// Failures from relay and sync handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GossipError {
    /// A header batch does not form a parent-linked ascending chain.
    #[error("Broken header chain at {0}")]
    BrokenHeaderChain(Digest),

    /// A header batch started at an unexpected height.
    #[error("Header batch starts at {got}, expected {expected}")]
    UnexpectedBatchStart { got: u64, expected: u64 },

    /// A header failed its seal check.
    #[error("Invalid header seal on {0}")]
    InvalidHeaderSeal(Digest),

    /// No sync in progress for the responding peer.
    #[error("Unsolicited sync response")]
    Unsolicited,
}

impl GossipError {
    /// Taxonomy class of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            GossipError::BrokenHeaderChain(_)
            | GossipError::UnexpectedBatchStart { .. }
            | GossipError::InvalidHeaderSeal(_) => Severity::Semantic,
            GossipError::Unsolicited => Severity::Structural,
        }
    }
}
