//! # Proof of Work
//!
//! Nonce search against a full 256-bit target plus epoch-based difficulty
//! retargeting.
//!
//! ## Target encoding
//!
//! `target(d) = U256::MAX / d` for difficulty `d ≥ 1`; a sealed header
//! satisfies `digest ≤ target` reading the digest big-endian. Difficulty 1
//! therefore accepts any digest. The full-integer encoding (rather than
//! compact bits) is part of the protocol version.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ferrite_types::{Block, BlockHeader, Seal, MAX_CLOCK_SKEW_SECS};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ConsensusError;

/// How many nonces to try between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

/// Proof-of-work configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowConfig {
    /// Difficulty of the first blocks after genesis.
    pub initial_difficulty: u64,
    /// Target seconds between blocks.
    pub target_block_time_secs: u64,
    /// Blocks between retargets.
    pub retarget_interval: u64,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: 1,
            target_block_time_secs: 10,
            retarget_interval: 10,
        }
    }
}

/// Full 256-bit target for a difficulty.
///
/// Difficulty 0 is structurally invalid and maps to a zero target that
/// rejects everything.
pub fn target_from_difficulty(difficulty: u64) -> U256 {
    if difficulty == 0 {
        return U256::zero();
    }
    U256::MAX / U256::from(difficulty)
}

/// One block of retarget context, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Block height.
    pub height: u64,
    /// Header timestamp.
    pub timestamp: u64,
    /// Difficulty the block was produced at.
    pub difficulty: u64,
}

/// Recent-block context for difficulty scheduling, newest first.
pub type DifficultyWindow = Vec<WindowEntry>;

/// Mining statistics.
#[derive(Debug, Default)]
pub struct MiningStats {
    /// Blocks sealed by this engine.
    pub blocks_sealed: AtomicU64,
    /// Total nonce attempts.
    pub hashes_tried: AtomicU64,
}

/// Proof-of-work engine.
pub struct PowEngine {
    config: PowConfig,
    stats: MiningStats,
}

impl PowEngine {
    /// Engine over a configuration.
    pub fn new(config: PowConfig) -> Self {
        Self {
            config,
            stats: MiningStats::default(),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &PowConfig {
        &self.config
    }

    /// Blocks sealed and hashes tried so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.blocks_sealed.load(Ordering::Relaxed),
            self.stats.hashes_tried.load(Ordering::Relaxed),
        )
    }

    /// Difficulty the next block must carry, given recent blocks newest
    /// first.
    ///
    /// Retargets every `retarget_interval` blocks: scale by expected
    /// window time over actual, clamped to `[1/4, 4]` per step and to a
    /// minimum difficulty of 1. Between retargets the parent's difficulty
    /// carries forward.
    pub fn next_difficulty(&self, window: &DifficultyWindow) -> u64 {
        let Some(parent) = window.first() else {
            return self.config.initial_difficulty;
        };

        let next_height = parent.height + 1;
        let interval = self.config.retarget_interval;
        if interval == 0 || next_height % interval != 0 {
            return parent.difficulty;
        }

        let span = interval.min(window.len() as u64);
        if span < 2 {
            return parent.difficulty;
        }
        let oldest = &window[span as usize - 1];

        let expected = (span - 1) * self.config.target_block_time_secs;
        let actual = parent.timestamp.saturating_sub(oldest.timestamp).max(1);

        // Clamp the observed window to a 4x swing before scaling.
        let clamped = actual.clamp(expected.max(1) / 4, expected.max(1) * 4);

        let scaled = (parent.difficulty as u128) * (expected.max(1) as u128) / clamped as u128;
        let bounded = scaled.clamp(
            (parent.difficulty / 4).max(1) as u128,
            (parent.difficulty as u128) * 4,
        );
        (bounded as u64).max(1)
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
        if block.header.timestamp < parent.timestamp {
            return Err(ConsensusError::TimestampViolation {
                block_timestamp: block.header.timestamp,
                parent_timestamp: parent.timestamp,
            });
        }
        if !matches!(block.seal, Seal::Work) {
            return Err(ConsensusError::SealMismatch);
        }

        let target = target_from_difficulty(block.header.difficulty);
        if !block.header.meets_target(target) {
            return Err(ConsensusError::TargetNotMet {
                block: identity,
                difficulty: block.header.difficulty,
            });
        }
        Ok(())
    }

    /// Seal a header by nonce search.
    ///
    /// Enumerates nonces over `[0, 2^32)`, checking the cancel flag every
    /// 2^16 attempts and yielding to the runtime so shutdown and tip
    /// changes stay responsive. When the nonce space is exhausted the
    /// timestamp advances one second (bounded by the clock-skew allowance
    /// over the caller's clock) and the search restarts.
    pub async fn seal(
        &self,
        mut header: BlockHeader,
        now: u64,
        cancel: Arc<AtomicBool>,
    ) -> Result<BlockHeader, ConsensusError> {
        let target = target_from_difficulty(header.difficulty);
        let timestamp_bound = now.saturating_add(MAX_CLOCK_SKEW_SECS);

        loop {
            for nonce in 0..=u32::MAX as u64 {
                if nonce % CANCEL_CHECK_INTERVAL == 0 {
                    if cancel.load(Ordering::Relaxed) {
                        debug!(height = header.height, "Sealing cancelled");
                        return Err(ConsensusError::Cancelled);
                    }
                    tokio::task::yield_now().await;
                }

                header.nonce = nonce;
                self.stats.hashes_tried.fetch_add(1, Ordering::Relaxed);
                if header.meets_target(target) {
                    self.stats.blocks_sealed.fetch_add(1, Ordering::Relaxed);
                    trace!(height = header.height, nonce, "Sealed block");
                    return Ok(header);
                }
            }

            // Nonce space exhausted: advance the timestamp and retry.
            if header.timestamp >= timestamp_bound {
                return Err(ConsensusError::Cancelled);
            }
            header.timestamp += 1;
        }
    }
}
