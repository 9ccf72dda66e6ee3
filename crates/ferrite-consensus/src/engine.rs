//! # Consensus Engine Variant
//!
//! One tagged type over the three rules. The chain and the producer loop
//! hold an [`Engine`] and dispatch by `match`; each rule's state (the
//! difficulty schedule, the authority set, the stake registry) lives
//! inside its variant.
//!
//! Sealing splits in two so no lock spans the mining suspension: a short
//! synchronous [`Engine::begin_seal`] under the engine lock, and (for
//! PoW only) an awaited nonce search on the [`SealJob::Mine`] handle
//! after the lock is released.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ferrite_types::{Address, Block, BlockHeader, Digest, Seal};

use crate::error::ConsensusError;
use crate::poa::PoaEngine;
use crate::pos::PosEngine;
use crate::pow::{DifficultyWindow, PowEngine};

/// A sealed candidate: the (possibly nonce-mutated) header plus its seal.
#[derive(Debug, Clone)]
pub struct SealOutcome {
    /// Header as sealed; under PoW the nonce and possibly the timestamp
    /// differ from the candidate.
    pub header: BlockHeader,
    /// The seal to attach.
    pub seal: Seal,
}

/// Result of `begin_seal`: either already sealed (signature rules) or a
/// mining handle to await outside any lock.
pub enum SealJob {
    /// Signed synchronously.
    Sealed(SealOutcome),
    /// Awaitable nonce search.
    Mine {
        /// Shared PoW engine to run the search on.
        pow: Arc<PowEngine>,
        /// The candidate header.
        header: BlockHeader,
    },
}

impl SealJob {
    /// Drive the job to completion.
    pub async fn finish(
        self,
        now: u64,
        cancel: Arc<AtomicBool>,
    ) -> Result<SealOutcome, ConsensusError> {
        match self {
            SealJob::Sealed(outcome) => Ok(outcome),
            SealJob::Mine { pow, header } => {
                let sealed = pow.seal(header, now, cancel).await?;
                Ok(SealOutcome {
                    header: sealed,
                    seal: Seal::Work,
                })
            }
        }
    }
}

/// The pluggable consensus rule.
pub enum Engine {
    /// Nonce search against a difficulty target.
    ProofOfWork(Arc<PowEngine>),
    /// Round-robin over a fixed authority set.
    ProofOfAuthority(PoaEngine),
    /// Stake-weighted proposer election.
    ProofOfStake(PosEngine),
}

impl Engine {
    /// Rule name for logs and the API.
    pub fn name(&self) -> &'static str {
        match self {
            Engine::ProofOfWork(_) => "pow",
            Engine::ProofOfAuthority(_) => "poa",
            Engine::ProofOfStake(_) => "pos",
        }
    }

    /// One-time initialization once the genesis digest is known.
    pub fn initialize(&mut self, genesis_digest: Digest) -> Result<(), ConsensusError> {
        if let Engine::ProofOfStake(engine) = self {
            engine.initialize(genesis_digest);
        }
        Ok(())
    }

    /// Validate a sealed block against its parent under this rule.
    pub fn validate_block(
        &self,
        block: &Block,
        parent: &BlockHeader,
    ) -> Result<(), ConsensusError> {
        match self {
            Engine::ProofOfWork(engine) => engine.validate_block(block, parent),
            Engine::ProofOfAuthority(engine) => engine.validate_block(block, parent),
            Engine::ProofOfStake(engine) => engine.validate_block(block, parent),
        }
    }

    /// Start sealing a candidate header.
    ///
    /// Signature rules seal synchronously; PoW returns a mining handle
    /// whose `finish` the caller awaits after releasing the engine lock.
    pub fn begin_seal(&self, header: BlockHeader) -> Result<SealJob, ConsensusError> {
        match self {
            Engine::ProofOfWork(engine) => Ok(SealJob::Mine {
                pow: engine.clone(),
                header,
            }),
            Engine::ProofOfAuthority(engine) => {
                let (header, seal) = engine.seal(header)?;
                Ok(SealJob::Sealed(SealOutcome { header, seal }))
            }
            Engine::ProofOfStake(engine) => {
                let (header, seal) = engine.seal(header)?;
                Ok(SealJob::Sealed(SealOutcome { header, seal }))
            }
        }
    }

    /// The account entitled to produce at `height`, where the rule elects
    /// one. PoW is permissionless and returns `None`.
    pub fn next_proposer(&self, height: u64, parent_digest: &Digest) -> Option<Address> {
        match self {
            Engine::ProofOfWork(_) => None,
            Engine::ProofOfAuthority(engine) => engine.next_proposer(height),
            Engine::ProofOfStake(engine) => engine.next_proposer(height, parent_digest),
        }
    }

    /// Difficulty the next block must carry. Signature-based rules carry
    /// zero difficulty.
    pub fn next_difficulty(&self, window: &DifficultyWindow) -> u64 {
        match self {
            Engine::ProofOfWork(engine) => engine.next_difficulty(window),
            _ => 0,
        }
    }

    /// Advance rule-internal schedules as the chain grows.
    pub fn commit_block(&mut self, height: u64, producer: Option<Address>) {
        if let Engine::ProofOfStake(engine) = self {
            engine.commit_epoch(height);
            if let Some(producer) = producer {
                engine.record_proposal(&producer);
            }
        }
    }

    /// Minimum seconds between a parent and its child under this rule.
    /// PoW paces itself through difficulty; signature rules enforce an
    /// explicit block time.
    pub fn spacing_secs(&self) -> u64 {
        match self {
            Engine::ProofOfWork(_) => 0,
            Engine::ProofOfAuthority(engine) => engine.config().block_time_secs,
            Engine::ProofOfStake(engine) => engine.config().block_time_secs,
        }
    }

    /// Size of the electorate: active validators under PoS, authorities
    /// under PoA, zero under PoW. Drives the finality threshold.
    pub fn validator_count(&self) -> usize {
        match self {
            Engine::ProofOfWork(_) => 0,
            Engine::ProofOfAuthority(engine) => engine.config().authorities.len(),
            Engine::ProofOfStake(engine) => engine.active_validator_count(),
        }
    }

    /// The PoS engine, where staking operations apply.
    pub fn as_pos(&self) -> Option<&PosEngine> {
        match self {
            Engine::ProofOfStake(engine) => Some(engine),
            _ => None,
        }
    }

    /// Mutable access to the PoS engine.
    pub fn as_pos_mut(&mut self) -> Option<&mut PosEngine> {
        match self {
            Engine::ProofOfStake(engine) => Some(engine),
            _ => None,
        }
    }

    /// The PoW engine, where the difficulty schedule and mining stats
    /// live.
    pub fn as_pow(&self) -> Option<&Arc<PowEngine>> {
        match self {
            Engine::ProofOfWork(engine) => Some(engine),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poa::PoaConfig;
    use crate::pos::PosConfig;
    use crate::pow::PowConfig;
    use ferrite_crypto::Keypair;

    fn pow_engine() -> Engine {
        Engine::ProofOfWork(Arc::new(PowEngine::new(PowConfig::default())))
    }

    #[test]
    fn test_names() {
        assert_eq!(pow_engine().name(), "pow");
        assert_eq!(
            Engine::ProofOfAuthority(PoaEngine::new(PoaConfig::default(), None)).name(),
            "poa"
        );
        assert_eq!(
            Engine::ProofOfStake(PosEngine::new(PosConfig::default(), None)).name(),
            "pos"
        );
    }

    #[tokio::test]
    async fn test_pow_seal_job() {
        let engine = pow_engine();
        let header = BlockHeader {
            version: 1,
            prev_digest: Digest::ZERO,
            merkle_root: Digest::ZERO,
            timestamp: 1_700_000_000,
            nonce: 0,
            difficulty: 1,
            height: 1,
            tx_count: 0,
        };
        let job = engine.begin_seal(header).unwrap();
        let outcome = job
            .finish(1_700_000_000, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert!(matches!(outcome.seal, Seal::Work));
    }

    #[test]
    fn test_pow_has_no_proposer() {
        let engine = pow_engine();
        assert_eq!(engine.next_proposer(3, &Digest::ZERO), None);
        assert_eq!(engine.validator_count(), 0);
    }

    #[test]
    fn test_poa_validator_count() {
        let keypair = Keypair::from_bytes([1; 32]).unwrap();
        let engine = Engine::ProofOfAuthority(PoaEngine::new(
            PoaConfig {
                authorities: vec![keypair.address()],
                block_time_secs: 5,
            },
            None,
        ));
        assert_eq!(engine.validator_count(), 1);
        assert_eq!(engine.next_proposer(0, &Digest::ZERO), Some(keypair.address()));
    }
}
