//! # Proof of Authority
//!
//! A fixed, ordered set of authorized validators producing blocks
//! round-robin: the proposer for height `h` is `validators[h mod n]`.
//! A block is valid iff its seal recovers to the expected authority and
//! the producer respects the minimum spacing from its parent.

use ferrite_crypto::Keypair;
use ferrite_types::{Address, Block, BlockHeader, Seal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConsensusError;

/// Proof-of-authority configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoaConfig {
    /// Ordered authority set; position defines the round-robin slot.
    pub authorities: Vec<Address>,
    /// Minimum seconds between a parent and its child.
    pub block_time_secs: u64,
}

impl Default for PoaConfig {
    fn default() -> Self {
        Self {
            authorities: vec![],
            block_time_secs: 5,
        }
    }
}

/// Proof-of-authority engine.
pub struct PoaEngine {
    config: PoaConfig,
    /// Key for the local authority, when this node produces.
    signer: Option<Keypair>,
}

impl PoaEngine {
    /// Engine over a configuration; pass a signer to enable production.
    pub fn new(config: PoaConfig, signer: Option<Keypair>) -> Self {
        Self { config, signer }
    }

    /// The configuration.
    pub fn config(&self) -> &PoaConfig {
        &self.config
    }

    /// Round-robin proposer for a height.
    pub fn next_proposer(&self, height: u64) -> Option<Address> {
        if self.config.authorities.is_empty() {
            return None;
        }
        let slot = (height % self.config.authorities.len() as u64) as usize;
        Some(self.config.authorities[slot])
    }

    /// Consensus validation of a sealed block against its parent.
    pub fn validate_block(&self, block: &Block, parent: &BlockHeader) -> Result<(), ConsensusError> {
        let identity = block.identity();

        if block.header.prev_digest != parent.identity() || block.header.height != parent.height + 1
        {
            return Err(ConsensusError::BadParent {
                block: identity,
                expected_parent: parent.identity(),
            });
        }

        let Seal::Signed { producer, .. } = &block.seal else {
            return Err(ConsensusError::SealMismatch);
        };

        let expected = self
            .next_proposer(block.header.height)
            .ok_or(ConsensusError::CannotProduce("empty authority set".to_string()))?;
        if *producer != expected {
            return Err(ConsensusError::UnauthorizedProducer {
                producer: *producer,
                height: block.header.height,
            });
        }

        // Spacing: an authority may not produce within block_time of the
        // parent's timestamp.
        if block.header.timestamp < parent.timestamp + self.config.block_time_secs {
            return Err(ConsensusError::TimestampViolation {
                block_timestamp: block.header.timestamp,
                parent_timestamp: parent.timestamp,
            });
        }

        if !block.signed_header().verify_seal() {
            return Err(ConsensusError::InvalidSeal(identity));
        }
        Ok(())
    }

    /// Seal a candidate header with the local authority key.
    pub fn seal(&self, header: BlockHeader) -> Result<(BlockHeader, Seal), ConsensusError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ConsensusError::CannotProduce("no signer configured".to_string()))?;

        let producer = signer.address();
        let expected = self
            .next_proposer(header.height)
            .ok_or_else(|| ConsensusError::CannotProduce("empty authority set".to_string()))?;
        if producer != expected {
            return Err(ConsensusError::UnauthorizedProducer {
                producer,
                height: header.height,
            });
        }

        let identity = header.identity();
        let seal = Seal::Signed {
            producer,
            public_key: signer.public_key(),
            signature: signer.sign(identity.as_bytes()),
        };
        debug!(height = header.height, %producer, "Sealed authority block");
        Ok((header, seal))
    }
}
