//! # Transaction Pool
//!
//! Bounded map `identity → entry` with oldest-first eviction, expiry, and
//! deterministic block draining.
//!
//! ## Invariants
//!
//! - No duplicate identities (keyed by identity).
//! - Size never exceeds the configured capacity (`add_tx` evicts first).
//! - Every entry's `received_at` is the admission clock reading, so the
//!   eviction victim is always the oldest entry.
//! - A removed entry never re-enters without a fresh external submission.

use std::collections::HashSet;

use ferrite_types::{Digest, PeerKey, Transaction};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::entry::{MempoolConfig, MempoolEntry, MempoolStats};
use crate::errors::{AdmissionVerdict, MempoolError};

struct Inner {
    entries: HashMap<Digest, MempoolEntry>,
    stats: MempoolStats,
}

/// Thread-safe pending-transaction pool.
pub struct TransactionPool {
    config: MempoolConfig,
    inner: RwLock<Inner>,
}

impl TransactionPool {
    /// Create an empty pool.
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                stats: MempoolStats::default(),
            }),
        }
    }

    /// Pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    /// The configuration.
    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Number of pooled entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// True when nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Whether an identity is pooled.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.inner.read().entries.contains_key(digest)
    }

    /// Clone of an entry's transaction.
    pub fn get_transaction(&self, digest: &Digest) -> Option<Transaction> {
        self.inner.read().entries.get(digest).map(|e| e.tx.clone())
    }

    /// Identities of every pooled transaction.
    pub fn digests(&self) -> Vec<Digest> {
        self.inner.read().entries.keys().copied().collect()
    }

    /// Peer that supplied an entry, if it arrived over gossip.
    pub fn source_of(&self, digest: &Digest) -> Option<PeerKey> {
        self.inner
            .read()
            .entries
            .get(digest)
            .and_then(|e| e.source.clone())
    }

    /// Admit a transaction.
    ///
    /// Structural validation runs here; signature and UTXO validation are
    /// the worker's job. At capacity, the oldest entry by `received_at`
    /// (ties broken by identity) is evicted first.
    pub fn add_tx(
        &self,
        tx: Transaction,
        now_ms: u64,
        source: Option<PeerKey>,
    ) -> Result<AdmissionVerdict, MempoolError> {
        let digest = tx.identity();

        tx.validate_structural().map_err(|e| MempoolError::Invalid {
            tx: digest,
            reason: e.to_string(),
        })?;

        let mut inner = self.inner.write();
        inner.stats.transactions_received += 1;

        if inner.entries.contains_key(&digest) {
            inner.stats.duplicates_filtered += 1;
            return Ok(AdmissionVerdict::DuplicateDropped);
        }

        let mut evicted = None;
        if inner.entries.len() >= self.config.capacity {
            let victim = inner
                .entries
                .values()
                .map(|e| (e.received_at, e.tx.identity()))
                .min()
                .map(|(_, id)| id);
            match victim {
                Some(id) => {
                    inner.entries.remove(&id);
                    inner.stats.capacity_evicted += 1;
                    debug!(evicted = %id, "Mempool at capacity; evicted oldest");
                    evicted = Some(id);
                }
                None => {
                    return Err(MempoolError::CapacityExceeded {
                        capacity: self.config.capacity,
                    })
                }
            }
        }

        inner
            .entries
            .insert(digest, MempoolEntry::new(tx, now_ms, source));

        Ok(match evicted {
            Some(id) => AdmissionVerdict::CapacityEvicted(id),
            None => AdmissionVerdict::Accepted,
        })
    }

    /// Mark an entry validated with its resolved fee.
    pub fn mark_validated(&self, digest: &Digest, fee: u64) -> Result<(), MempoolError> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(digest)
            .ok_or(MempoolError::NotFound(*digest))?;
        entry.is_validated = true;
        entry.fee = Some(fee);
        Ok(())
    }

    /// Remove an entry, returning its source peer if it had one.
    pub fn remove(&self, digest: &Digest) -> Option<MempoolEntry> {
        self.inner.write().entries.remove(digest)
    }

    /// Drop every entry whose identity appears in a committed block.
    pub fn purge_included(&self, included: &[Digest]) -> usize {
        let mut inner = self.inner.write();
        let mut purged = 0;
        for digest in included {
            if inner.entries.remove(digest).is_some() {
                purged += 1;
            }
        }
        purged
    }

    /// Expiry sweep: drop entries older than the configured lifetime.
    pub fn expire(&self, now_ms: u64) -> Vec<Digest> {
        let expiry_ms = self.config.expiry_ms;
        let mut inner = self.inner.write();
        let expired: Vec<Digest> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now_ms, expiry_ms))
            .map(|(d, _)| *d)
            .collect();
        for digest in &expired {
            inner.entries.remove(digest);
            inner.stats.expired += 1;
        }
        expired
    }

    /// Drain a block's worth of validated transactions.
    ///
    /// Deterministic given the pool contents: fee-per-byte descending,
    /// ties by earliest `received_at`, then by identity lexical order. The
    /// result is the longest prefix of that ordering fitting all three
    /// budgets. A snapshot: admissions after the call do not appear.
    pub fn take_for_block(
        &self,
        max_count: usize,
        max_bytes: usize,
        max_gas: u64,
    ) -> Vec<Transaction> {
        let inner = self.inner.read();

        let mut candidates: Vec<&MempoolEntry> = inner
            .entries
            .values()
            .filter(|e| e.is_validated)
            .collect();
        candidates.sort_by(|a, b| {
            b.fee_per_byte_milli()
                .cmp(&a.fee_per_byte_milli())
                .then(a.received_at.cmp(&b.received_at))
                .then(a.tx.identity().cmp(&b.tx.identity()))
        });

        let mut result = Vec::new();
        let mut bytes = 0usize;
        let mut gas = 0u64;
        for entry in candidates {
            if result.len() >= max_count {
                break;
            }
            let next_bytes = bytes + entry.size_bytes;
            let next_gas = gas + self.config.gas_per_tx;
            if next_bytes > max_bytes || next_gas > max_gas {
                break;
            }
            bytes = next_bytes;
            gas = next_gas;
            result.push(entry.tx.clone());
        }
        result
    }

    /// Peers already holding `digest`, for propagation exclusion.
    pub fn propagated_to(&self, digest: &Digest) -> HashSet<PeerKey> {
        self.inner
            .read()
            .entries
            .get(digest)
            .map(|e| e.propagated_to.clone())
            .unwrap_or_default()
    }

    /// Record a propagation of `digest` to `peers`.
    pub fn record_propagation(&self, digest: &Digest, peers: &[PeerKey], now_ms: u64) {
        let mut inner = self.inner.write();
        inner.stats.transactions_propagated += peers.len() as u64;
        if let Some(entry) = inner.entries.get_mut(digest) {
            entry.last_propagated_at = now_ms;
            entry.propagated_to.extend(peers.iter().cloned());
        }
    }

    /// Counter snapshot plus current sizes.
    pub fn stats(&self) -> MempoolStats {
        let inner = self.inner.read();
        let mut stats = inner.stats.clone();
        stats.total_transactions = inner.entries.len();
        stats.validated_transactions =
            inner.entries.values().filter(|e| e.is_validated).count();
        stats.pending_validation = stats.total_transactions - stats.validated_transactions;
        stats
    }
}
