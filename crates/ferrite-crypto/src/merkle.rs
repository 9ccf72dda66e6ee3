//! # Merkle Tree
//!
//! Ordered-leaf binary hash tree committing a block body into its header.
//!
//! ## Construction
//!
//! - Leaves are the transaction identity digests, in block order.
//! - If a level has an odd count, the last element is duplicated.
//! - Internal node = `SHA-256(left ∥ right)`.
//! - The empty tree has the fixed all-zero root.
//!
//! The tree is immutable after construction. An inclusion proof carries the
//! sibling digest at each level plus the left/right direction bits of the
//! leaf index.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::errors::CryptoError;
use crate::hashing::sha256_concat;

/// Which side of the pair the sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiblingSide {
    /// Sibling is the left child; the running hash is the right.
    Left,
    /// Sibling is the right child; the running hash is the left.
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Digest of the sibling node at this level.
    pub sibling: Digest,
    /// Side the sibling occupies.
    pub side: SiblingSide,
}

/// Inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The leaf digest the proof commits.
    pub leaf: Digest,
    /// Index of the leaf in the original sequence.
    pub leaf_index: usize,
    /// Sibling path from leaf level to just below the root.
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recompute the root from the leaf and sibling path and compare.
    pub fn verify(&self, expected_root: &Digest) -> bool {
        let mut running = self.leaf;
        for step in &self.steps {
            running = match step.side {
                SiblingSide::Left => hash_pair(&step.sibling, &running),
                SiblingSide::Right => hash_pair(&running, &step.sibling),
            };
        }
        running == *expected_root
    }
}

/// Immutable binary hash tree over an ordered leaf sequence.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All levels, leaves first. `levels[0]` is the (possibly empty) leaf
    /// row; the last level holds exactly the root for non-empty trees.
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree over the given leaves.
    pub fn build(leaves: &[Digest]) -> Self {
        if leaves.is_empty() {
            return Self { levels: vec![] };
        }

        let mut levels: Vec<Vec<Digest>> = vec![leaves.to_vec()];
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let prev = levels.last().expect("non-empty by construction");
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let left = pair[0];
                // Odd count duplicates the last element.
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                next.push(hash_pair(&left, &right));
            }
            levels.push(next);
        }
        Self { levels }
    }

    /// Root digest. The empty tree has the fixed zero root.
    pub fn root(&self) -> Digest {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(Digest::ZERO)
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Generate an inclusion proof for leaf `index`.
    pub fn prove(&self, index: usize) -> Result<MerkleProof, CryptoError> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(CryptoError::LeafIndexOutOfRange { index, leaf_count });
        }

        let mut steps = Vec::new();
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_pos, side) = if pos % 2 == 0 {
                (pos + 1, SiblingSide::Right)
            } else {
                (pos - 1, SiblingSide::Left)
            };
            // A missing right sibling means the node pairs with itself.
            let sibling = level.get(sibling_pos).copied().unwrap_or(level[pos]);
            steps.push(ProofStep { sibling, side });
            pos /= 2;
        }

        Ok(MerkleProof {
            leaf: self.levels[0][index],
            leaf_index: index,
            steps,
        })
    }
}

/// Convenience: root over a leaf sequence without keeping the tree.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    MerkleTree::build(leaves).root()
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    sha256_concat(&[left.as_bytes(), right.as_bytes()])
}
