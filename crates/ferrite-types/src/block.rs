//! # Blocks
//!
//! A block is a header plus an ordered transaction body. The header commits
//! the body through the Merkle root of the transactions' identities; block
//! identity is the digest of the header's canonical serialization alone.
//!
//! The consensus seal (PoA/PoS producer signature) travels alongside the
//! header rather than inside it, so two blocks sealed by the same producer
//! at the same height still differ in identity only through their headers.

use ferrite_crypto::{merkle::merkle_root, sha256, Address, Digest, PublicKeyBytes, SignatureBytes};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::BlockError;
use crate::transaction::Transaction;
use crate::{MAX_BLOCK_BYTES, MAX_CLOCK_SKEW_SECS};

/// Block header: the identity-bearing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u32,
    /// Identity of the parent block; zero for genesis.
    pub prev_digest: Digest,
    /// Merkle root over the body's transaction identities.
    pub merkle_root: Digest,
    /// Unix timestamp (seconds) when the block was produced.
    pub timestamp: u64,
    /// Proof-of-work nonce; zero under PoA/PoS.
    pub nonce: u64,
    /// Difficulty the block was produced at.
    pub difficulty: u64,
    /// Height in the chain; genesis is 0.
    pub height: u64,
    /// Number of transactions in the body.
    pub tx_count: u32,
}

impl BlockHeader {
    /// Header identity: SHA-256 of the canonical serialization.
    pub fn identity(&self) -> Digest {
        sha256(&self.canonical_bytes())
    }

    /// Whether the identity digest, read big-endian, is at or below `target`.
    pub fn meets_target(&self, target: U256) -> bool {
        U256::from_big_endian(self.identity().as_bytes()) <= target
    }

    /// Canonical serialization: field-ordered, LE scalars.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 32 + 8 * 4 + 4 * 2);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_digest.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.difficulty.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.tx_count.to_le_bytes());
        out
    }
}

/// Consensus seal carried next to the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seal {
    /// Proof of work: the header itself carries nonce and difficulty.
    Work,
    /// Authority or stake seal: the producer's signature over the header
    /// identity.
    Signed {
        /// Producer account.
        producer: Address,
        /// Producer public key; its derived address must equal `producer`.
        public_key: PublicKeyBytes,
        /// Signature over the header identity digest.
        signature: SignatureBytes,
    },
}

impl Seal {
    /// Producer address for signed seals.
    pub fn producer(&self) -> Option<Address> {
        match self {
            Seal::Work => None,
            Seal::Signed { producer, .. } => Some(*producer),
        }
    }
}

/// A header together with its seal, as exchanged during header-first sync
/// and as equivocation evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    /// The header.
    pub header: BlockHeader,
    /// The seal over it.
    pub seal: Seal,
}

impl SignedHeader {
    /// Verify a signed seal against the header identity.
    ///
    /// `Seal::Work` carries no signature and verifies trivially here; the
    /// consensus engine checks the target instead.
    pub fn verify_seal(&self) -> bool {
        match &self.seal {
            Seal::Work => true,
            Seal::Signed {
                producer,
                public_key,
                signature,
            } => {
                let identity = self.header.identity();
                public_key.verify(identity.as_bytes(), signature).is_ok()
                    && public_key.to_address().ok() == Some(*producer)
            }
        }
    }
}

/// A full block: header, seal, and transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header committing the body.
    pub header: BlockHeader,
    /// Consensus seal.
    pub seal: Seal,
    /// Ordered transactions; first is coinbase for non-genesis blocks.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block over the given body, computing the Merkle root and
    /// transaction count.
    pub fn assemble(
        mut header: BlockHeader,
        seal: Seal,
        transactions: Vec<Transaction>,
    ) -> Self {
        header.merkle_root = Self::body_merkle_root(&transactions);
        header.tx_count = transactions.len() as u32;
        Self {
            header,
            seal,
            transactions,
        }
    }

    /// Block identity = header identity.
    pub fn identity(&self) -> Digest {
        self.header.identity()
    }

    /// Height shortcut.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// True for the chain's first block.
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_digest.is_zero()
    }

    /// Merkle root over the body's transaction identities.
    pub fn body_merkle_root(transactions: &[Transaction]) -> Digest {
        let leaves: Vec<Digest> = transactions.iter().map(Transaction::identity).collect();
        merkle_root(&leaves)
    }

    /// Recompute the root from the current body.
    pub fn recompute_merkle_root(&self) -> Digest {
        Self::body_merkle_root(&self.transactions)
    }

    /// The signed header for sync and evidence purposes.
    pub fn signed_header(&self) -> SignedHeader {
        SignedHeader {
            header: self.header.clone(),
            seal: self.seal.clone(),
        }
    }

    /// Approximate serialized size: header plus body.
    pub fn size_bytes(&self) -> usize {
        self.header.canonical_bytes().len()
            + self
                .transactions
                .iter()
                .map(Transaction::size_bytes)
                .sum::<usize>()
    }

    /// Structural validation: shape only, no parent or consensus context.
    ///
    /// `now` is the validator's clock (unix seconds) for the future-timestamp
    /// bound.
    pub fn validate_structural(&self, now: u64) -> Result<(), BlockError> {
        if self.header.tx_count as usize != self.transactions.len() {
            return Err(BlockError::TxCountMismatch {
                declared: self.header.tx_count,
                actual: self.transactions.len(),
            });
        }

        let root = self.recompute_merkle_root();
        if root != self.header.merkle_root {
            return Err(BlockError::MerkleRootMismatch {
                declared: self.header.merkle_root,
                computed: root,
            });
        }

        // First tx is coinbase iff height > 0; no other tx may be coinbase.
        let first_is_coinbase = self
            .transactions
            .first()
            .map(Transaction::is_coinbase)
            .unwrap_or(false);
        if self.header.height > 0 && !first_is_coinbase {
            return Err(BlockError::MissingCoinbase);
        }
        if self.header.height == 0 && first_is_coinbase {
            return Err(BlockError::CoinbaseInGenesis);
        }
        if self
            .transactions
            .iter()
            .skip(1)
            .any(Transaction::is_coinbase)
        {
            return Err(BlockError::MisplacedCoinbase);
        }

        if self.header.timestamp > now.saturating_add(MAX_CLOCK_SKEW_SECS) {
            return Err(BlockError::TimestampTooFarInFuture {
                timestamp: self.header.timestamp,
                now,
            });
        }

        let size = self.size_bytes();
        if size > MAX_BLOCK_BYTES {
            return Err(BlockError::Oversized {
                size,
                max: MAX_BLOCK_BYTES,
            });
        }

        for tx in &self.transactions {
            tx.validate_structural()
                .map_err(|source| BlockError::InvalidTransaction {
                    tx: tx.identity(),
                    source,
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxOutput, TxType};

    const NOW: u64 = 1_700_000_000;

    fn coinbase() -> Transaction {
        Transaction::coinbase(Address([0xAA; 20]), 50, NOW * 1000)
    }

    fn header_at(height: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_digest: if height == 0 {
                Digest::ZERO
            } else {
                Digest([0x11; 32])
            },
            merkle_root: Digest::ZERO,
            timestamp: NOW,
            nonce: 0,
            difficulty: 1,
            height,
            tx_count: 0,
        }
    }

    fn block_at(height: u64) -> Block {
        let txs = if height > 0 { vec![coinbase()] } else { vec![] };
        Block::assemble(header_at(height), Seal::Work, txs)
    }

    #[test]
    fn test_assemble_sets_root_and_count() {
        let block = block_at(1);
        assert_eq!(block.header.tx_count, 1);
        assert_eq!(block.header.merkle_root, block.recompute_merkle_root());
    }

    #[test]
    fn test_identity_changes_with_nonce() {
        let mut block = block_at(1);
        let before = block.identity();
        block.header.nonce += 1;
        assert_ne!(block.identity(), before);
    }

    #[test]
    fn test_identity_ignores_body_beyond_root() {
        // Identity covers only the header; the body is committed through
        // the Merkle root set at assembly time.
        let block = block_at(1);
        let mut copy = block.clone();
        copy.transactions.clear();
        assert_eq!(block.identity(), copy.identity());
    }

    #[test]
    fn test_structural_ok() {
        assert!(block_at(1).validate_structural(NOW).is_ok());
        assert!(block_at(0).validate_structural(NOW).is_ok());
    }

    #[test]
    fn test_tx_count_mismatch() {
        let mut block = block_at(1);
        block.header.tx_count = 5;
        assert!(matches!(
            block.validate_structural(NOW),
            Err(BlockError::TxCountMismatch { .. })
        ));
    }

    #[test]
    fn test_merkle_root_mismatch() {
        let mut block = block_at(1);
        block.header.merkle_root = Digest([0xFF; 32]);
        assert!(matches!(
            block.validate_structural(NOW),
            Err(BlockError::MerkleRootMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_coinbase() {
        // Coinbase-shaped body typed Regular: the coinbase rule trips
        // before per-transaction checks.
        let mut tx = coinbase();
        tx.tx_type = TxType::Regular;
        let block = Block::assemble(header_at(1), Seal::Work, vec![tx]);
        assert!(matches!(
            block.validate_structural(NOW),
            Err(BlockError::MissingCoinbase)
        ));
    }

    #[test]
    fn test_misplaced_coinbase() {
        let block = Block::assemble(header_at(1), Seal::Work, vec![coinbase(), coinbase()]);
        assert!(matches!(
            block.validate_structural(NOW),
            Err(BlockError::MisplacedCoinbase)
        ));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let mut block = block_at(1);
        block.header.timestamp = NOW + MAX_CLOCK_SKEW_SECS + 1;
        // Re-assemble not needed: timestamp is header-only.
        assert!(matches!(
            block.validate_structural(NOW),
            Err(BlockError::TimestampTooFarInFuture { .. })
        ));
    }

    #[test]
    fn test_meets_target_at_difficulty_one() {
        // target = U256::MAX accepts any digest.
        let block = block_at(1);
        assert!(block.header.meets_target(U256::MAX));
    }

    #[test]
    fn test_meets_target_zero_rejects() {
        let block = block_at(1);
        assert!(!block.header.meets_target(U256::zero()));
    }

    #[test]
    fn test_signed_seal_verification() {
        let keypair = ferrite_crypto::Keypair::from_bytes([0x07; 32]).unwrap();
        let header = header_at(1);
        let identity = header.identity();
        let signed = SignedHeader {
            seal: Seal::Signed {
                producer: keypair.address(),
                public_key: keypair.public_key(),
                signature: keypair.sign(identity.as_bytes()),
            },
            header,
        };
        assert!(signed.verify_seal());

        let mut tampered = signed.clone();
        tampered.header.nonce = 99;
        assert!(!tampered.verify_seal());
    }

    #[test]
    fn test_output_helper() {
        let out = TxOutput {
            value: 10,
            recipient: Address([1; 20]),
            script: vec![],
            index: 0,
        };
        assert_eq!(out.value, 10);
    }
}
