//! # PoS Finality
//!
//! Attestation bookkeeping: a block backed by at least two thirds of the
//! validator set is final, and no reorganization may cross it. Under PoW
//! and PoA nothing ever finalizes here; confirmation depth stays a
//! client-side heuristic.

use std::collections::{HashMap, HashSet};

use ferrite_consensus::Attestation;
use ferrite_types::{Address, Digest};
use tracing::info;

/// Tracks attestations and the resulting finalized frontier.
#[derive(Debug, Default)]
pub struct FinalityTracker {
    /// Validators that attested each block.
    votes: HashMap<Digest, HashSet<Address>>,
    /// Height of each attested block.
    heights: HashMap<Digest, u64>,
    /// Highest finalized block, if any.
    finalized: Option<(Digest, u64)>,
}

impl FinalityTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Votes needed to finalize, given the electorate size: ⌈2n/3⌉.
    pub fn threshold(validator_count: usize) -> usize {
        (2 * validator_count).div_ceil(3)
    }

    /// Record a (pre-verified) attestation. Returns true if the block
    /// just crossed the finality threshold.
    pub fn record(&mut self, attestation: &Attestation, validator_count: usize) -> bool {
        if validator_count == 0 {
            return false;
        }

        self.heights
            .insert(attestation.block, attestation.height);
        let votes = self.votes.entry(attestation.block).or_default();
        votes.insert(attestation.validator);

        let threshold = Self::threshold(validator_count);
        if votes.len() >= threshold
            && self
                .finalized
                .map(|(_, height)| attestation.height > height)
                .unwrap_or(true)
        {
            self.finalized = Some((attestation.block, attestation.height));
            info!(
                block = %attestation.block,
                height = attestation.height,
                votes = votes.len(),
                "Block finalized"
            );
            return true;
        }
        false
    }

    /// Number of votes recorded for a block.
    pub fn votes_for(&self, block: &Digest) -> usize {
        self.votes.get(block).map(HashSet::len).unwrap_or(0)
    }

    /// The finalized frontier, if any block has finalized.
    pub fn finalized(&self) -> Option<(Digest, u64)> {
        self.finalized
    }

    /// Height below which reorganizations must not reach.
    pub fn finalized_height(&self) -> u64 {
        self.finalized.map(|(_, height)| height).unwrap_or(0)
    }

    /// Drop vote bookkeeping below a height (already-final history).
    pub fn prune_below(&mut self, height: u64) {
        let keep: Vec<Digest> = self
            .heights
            .iter()
            .filter(|(_, h)| **h >= height)
            .map(|(d, _)| *d)
            .collect();
        let keep: HashSet<Digest> = keep.into_iter().collect();
        self.votes.retain(|d, _| keep.contains(d));
        self.heights.retain(|d, _| keep.contains(d));
    }
}
