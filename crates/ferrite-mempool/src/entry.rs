//! # Mempool Entries and Configuration

use std::collections::HashSet;

use ferrite_types::{PeerKey, Transaction};
use serde::{Deserialize, Serialize};

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Maximum number of entries before eviction.
    pub capacity: usize,
    /// Per-entry lifetime in milliseconds.
    pub expiry_ms: u64,
    /// Flat gas charged per transaction by the built-in executor; used for
    /// the block gas budget during draining.
    pub gas_per_tx: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            expiry_ms: 24 * 60 * 60 * 1000,
            gas_per_tx: 21_000,
        }
    }
}

/// One pending transaction with its bookkeeping.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    /// The transaction.
    pub tx: Transaction,
    /// Unix milliseconds when the pool admitted it.
    pub received_at: u64,
    /// Unix milliseconds of the last gossip propagation.
    pub last_propagated_at: u64,
    /// Peers that already have it; excluded from re-propagation.
    pub propagated_to: HashSet<PeerKey>,
    /// Set once the validation worker accepts it.
    pub is_validated: bool,
    /// Fee computed against the UTXO view at validation time.
    pub fee: Option<u64>,
    /// Cached serialized size.
    pub size_bytes: usize,
    /// Peer that supplied it, if it arrived over gossip.
    pub source: Option<PeerKey>,
}

impl MempoolEntry {
    /// Build a fresh, unvalidated entry.
    pub fn new(tx: Transaction, received_at: u64, source: Option<PeerKey>) -> Self {
        let size_bytes = tx.size_bytes();
        Self {
            tx,
            received_at,
            last_propagated_at: received_at,
            propagated_to: HashSet::new(),
            is_validated: false,
            fee: None,
            size_bytes,
            source,
        }
    }

    /// Fee per byte, scaled by 1000 to keep integer precision on small
    /// fees. Unvalidated entries rank at zero.
    pub fn fee_per_byte_milli(&self) -> u64 {
        match self.fee {
            Some(fee) if self.size_bytes > 0 => fee * 1000 / self.size_bytes as u64,
            _ => 0,
        }
    }

    /// Whether the entry has outlived `expiry_ms` at time `now_ms`.
    pub fn is_expired(&self, now_ms: u64, expiry_ms: u64) -> bool {
        now_ms.saturating_sub(self.received_at) > expiry_ms
    }
}

/// Counters surfaced through `get_mempool_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolStats {
    /// Entries currently pooled.
    pub total_transactions: usize,
    /// Entries that passed validation.
    pub validated_transactions: usize,
    /// Entries awaiting the worker.
    pub pending_validation: usize,
    /// Transactions handed to gossip.
    pub transactions_propagated: u64,
    /// Admissions from peers or the API.
    pub transactions_received: u64,
    /// Admissions dropped as already-known.
    pub duplicates_filtered: u64,
    /// Entries dropped by the expiry sweep.
    pub expired: u64,
    /// Entries evicted under capacity pressure.
    pub capacity_evicted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_types::Address;

    #[test]
    fn test_fee_per_byte_ranks_unvalidated_at_zero() {
        let tx = Transaction::coinbase(Address([1; 20]), 10, 0);
        let entry = MempoolEntry::new(tx, 1_000, None);
        assert_eq!(entry.fee_per_byte_milli(), 0);
    }

    #[test]
    fn test_expiry() {
        let tx = Transaction::coinbase(Address([1; 20]), 10, 0);
        let entry = MempoolEntry::new(tx, 1_000, None);
        assert!(!entry.is_expired(1_500, 1_000));
        assert!(entry.is_expired(2_001, 1_000));
    }
}
