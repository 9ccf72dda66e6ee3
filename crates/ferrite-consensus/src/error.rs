//! # Consensus Error Types

use ferrite_types::{Address, Digest, Severity};
use thiserror::Error;

/// Failures shared by every consensus variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// The block's producer is not entitled to the slot.
    #[error("Unauthorized producer {producer} at height {height}")]
    UnauthorizedProducer { producer: Address, height: u64 },

    /// PoW digest above the difficulty target.
    #[error("Block {block} does not meet target for difficulty {difficulty}")]
    TargetNotMet { block: Digest, difficulty: u64 },

    /// Header timestamp violates the rule's ordering constraint.
    #[error("Timestamp violation: block {block_timestamp}, parent {parent_timestamp}")]
    TimestampViolation {
        block_timestamp: u64,
        parent_timestamp: u64,
    },

    /// Parent linkage broken: wrong digest or height.
    #[error("Bad parent for block {block}: expected parent {expected_parent}")]
    BadParent {
        block: Digest,
        expected_parent: Digest,
    },

    /// Sealing was cancelled (shutdown or tip change).
    #[error("Sealing cancelled")]
    Cancelled,

    /// Seal shape does not match the engine (e.g. PoW block under PoA).
    #[error("Seal does not match consensus rule")]
    SealMismatch,

    /// Producer signature over the header does not verify.
    #[error("Invalid producer signature on block {0}")]
    InvalidSeal(Digest),

    /// PoS registration or delegation below the minimum stake.
    #[error("Stake {stake} below minimum {min_stake}")]
    StakeBelowMinimum { stake: u64, min_stake: u64 },

    /// PoS validator set is full.
    #[error("Validator set full ({max})")]
    ValidatorSetFull { max: usize },

    /// Unknown validator referenced.
    #[error("Unknown validator {0}")]
    UnknownValidator(Address),

    /// Equivocation evidence failed verification.
    #[error("Invalid equivocation evidence: {0}")]
    InvalidEvidence(String),

    /// The engine cannot produce blocks (no signer, or not a validator).
    #[error("Engine cannot produce: {0}")]
    CannotProduce(String),
}

impl ConsensusError {
    /// Taxonomy class of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            ConsensusError::Cancelled => Severity::Transient,
            ConsensusError::StakeBelowMinimum { .. }
            | ConsensusError::ValidatorSetFull { .. }
            | ConsensusError::UnknownValidator(_)
            | ConsensusError::CannotProduce(_) => Severity::Resource,
            ConsensusError::SealMismatch | ConsensusError::InvalidEvidence(_) => {
                Severity::Structural
            }
            _ => Severity::Semantic,
        }
    }
}
