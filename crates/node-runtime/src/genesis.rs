//! # Genesis Builder
//!
//! The deterministic first block every node of a network agrees on:
//! height 0, zero parent, empty body (so the Merkle root is the zero
//! digest), and a fixed timestamp. Nodes with a populated store ignore
//! the built genesis and recover from the tip pointer instead.

use ferrite_types::{Block, BlockHeader, Digest, Seal};

/// Network launch timestamp, unix seconds.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Build the genesis block for a network.
///
/// `network_id` is folded into the version-reserved nonce field so
/// different networks get different genesis identities.
pub fn build_genesis(network_id: u64, initial_difficulty: u64) -> Block {
    Block::assemble(
        BlockHeader {
            version: 1,
            prev_digest: Digest::ZERO,
            merkle_root: Digest::ZERO,
            timestamp: GENESIS_TIMESTAMP,
            nonce: network_id,
            difficulty: initial_difficulty,
            height: 0,
            tx_count: 0,
        },
        Seal::Work,
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        assert_eq!(
            build_genesis(1, 1).identity(),
            build_genesis(1, 1).identity()
        );
    }

    #[test]
    fn test_networks_differ() {
        assert_ne!(
            build_genesis(1, 1).identity(),
            build_genesis(2, 1).identity()
        );
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = build_genesis(1337, 1);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.header.merkle_root, Digest::ZERO);
        assert_eq!(genesis.header.timestamp, GENESIS_TIMESTAMP);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.validate_structural(GENESIS_TIMESTAMP + 60).is_ok());
    }
}
