//! # Flood Relay
//!
//! The dedup seen-set and forwarding-target selection. Receipt handling:
//! if the sending peer is already in the item's seen-set, the delivery is
//! a duplicate and dropped; otherwise the peer joins the set and the item
//! forwards to the best peers that have not seen it.

use std::collections::{HashMap, HashSet};

use ferrite_types::{Digest, PeerKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Peers an item forwards to per hop.
    pub fanout: usize,
    /// Seen-set entry lifetime, milliseconds.
    pub seen_ttl_ms: u64,
    /// Height lead a peer needs before sync starts.
    pub sync_threshold: u64,
    /// Headers per sync batch.
    pub header_batch: u32,
    /// Maximum addresses accepted per ADDR message.
    pub addr_max: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 8,
            seen_ttl_ms: 60 * 60 * 1000,
            sync_threshold: 3,
            header_batch: 500,
            addr_max: 10,
        }
    }
}

/// Relay counters for the stats surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStats {
    /// Items forwarded to at least one peer.
    pub relayed: u64,
    /// Deliveries dropped as duplicates.
    pub duplicates: u64,
    /// Seen-set entries aged out.
    pub expired: u64,
    /// Items received first-hand.
    pub received: u64,
}

struct SeenEntry {
    first_seen_ms: u64,
    peers: HashSet<PeerKey>,
}

/// The flood relay state.
pub struct Relay {
    config: GossipConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    seen: HashMap<Digest, SeenEntry>,
    stats: GossipStats,
}

impl Relay {
    /// Empty relay.
    pub fn new(config: GossipConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                stats: GossipStats::default(),
            }),
        }
    }

    /// Relay with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(GossipConfig::default())
    }

    /// The configuration.
    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Record a delivery of `digest` from `from` (or a local origin when
    /// `None`). Returns false for a duplicate delivery that should be
    /// dropped.
    pub fn note_received(&self, digest: &Digest, from: Option<&PeerKey>, now_ms: u64) -> bool {
        let mut inner = self.inner.lock();
        let entry = inner.seen.entry(*digest).or_insert_with(|| SeenEntry {
            first_seen_ms: now_ms,
            peers: HashSet::new(),
        });

        match from {
            Some(peer) => {
                if !entry.peers.insert(peer.clone()) {
                    inner.stats.duplicates += 1;
                    trace!(item = %digest, peer = %peer, "Duplicate delivery dropped");
                    return false;
                }
            }
            None => {
                // Locally originated; nothing to dedup against.
            }
        }
        inner.stats.received += 1;
        true
    }

    /// Whether any delivery of `digest` has been seen.
    pub fn has_seen(&self, digest: &Digest) -> bool {
        self.inner.lock().seen.contains_key(digest)
    }

    /// Forwarding targets: `best` minus the item's seen-set minus the
    /// sender, capped at the fanout.
    pub fn relay_targets(
        &self,
        digest: &Digest,
        best: &[PeerKey],
        exclude: Option<&PeerKey>,
    ) -> Vec<PeerKey> {
        let inner = self.inner.lock();
        let seen = inner.seen.get(digest).map(|entry| &entry.peers);
        best.iter()
            .filter(|peer| Some(*peer) != exclude)
            .filter(|peer| seen.map_or(true, |set| !set.contains(*peer)))
            .take(self.config.fanout)
            .cloned()
            .collect()
    }

    /// Record that `digest` was forwarded to `peers`, so they never get
    /// it again from this node.
    pub fn mark_relayed(&self, digest: &Digest, peers: &[PeerKey], now_ms: u64) {
        if peers.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let entry = inner.seen.entry(*digest).or_insert_with(|| SeenEntry {
            first_seen_ms: now_ms,
            peers: HashSet::new(),
        });
        entry.peers.extend(peers.iter().cloned());
        inner.stats.relayed += 1;
    }

    /// Age out entries older than the configured lifetime.
    pub fn cleanup(&self, now_ms: u64) -> usize {
        let ttl = self.config.seen_ttl_ms;
        let mut inner = self.inner.lock();
        let before = inner.seen.len();
        inner
            .seen
            .retain(|_, entry| now_ms.saturating_sub(entry.first_seen_ms) <= ttl);
        let dropped = before - inner.seen.len();
        inner.stats.expired += dropped as u64;
        dropped
    }

    /// Counter snapshot.
    pub fn stats(&self) -> GossipStats {
        self.inner.lock().stats.clone()
    }
}
