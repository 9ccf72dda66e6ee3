//! # Peer Registry
//!
//! Every peer the node has observed, with behavior scoring, bans, and
//! liveness bookkeeping. Scores only ever arrive through this registry,
//! so the ban decision lives in exactly one place.
//!
//! A bad score of exactly the threshold does not ban; the ban fires when
//! the score exceeds it. A reconnection after ban expiry re-admits the
//! peer with both scores reset.

use std::collections::HashMap;

use ferrite_types::PeerKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Bad score above which a peer is banned.
pub const BAN_SCORE_THRESHOLD: i32 = 100;

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRegistryConfig {
    /// How long a ban lasts, milliseconds.
    pub ban_duration_ms: u64,
    /// Disconnected peers unseen for this long are dropped.
    pub stale_cutoff_ms: u64,
    /// Maximum outbound connections the dialer maintains.
    pub max_outbound: usize,
}

impl Default for PeerRegistryConfig {
    fn default() -> Self {
        Self {
            ban_duration_ms: 24 * 60 * 60 * 1000,
            stale_cutoff_ms: 24 * 60 * 60 * 1000,
            max_outbound: 50,
        }
    }
}

/// Everything known about one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Network identity.
    pub key: PeerKey,
    /// Unix ms of first observation.
    pub first_seen: u64,
    /// Unix ms of last observation (any evidence of existence).
    pub last_seen: u64,
    /// Unix ms of last protocol activity on a live connection.
    pub last_activity: u64,
    /// Accumulated good-behavior score.
    pub good_score: i32,
    /// Accumulated misbehavior score.
    pub bad_score: i32,
    /// Messages received from this peer.
    pub messages_received: u64,
    /// Messages that failed validation.
    pub invalid_messages: u64,
    /// Whether a connection is currently live.
    pub connected: bool,
    /// Unix ms the ban lifts, when banned.
    pub banned_until: Option<u64>,
    /// Best chain height the peer has advertised.
    pub best_known_height: u64,
    /// Advertised user agent from the handshake.
    pub user_agent: String,
}

impl PeerRecord {
    fn new(key: PeerKey, now_ms: u64) -> Self {
        Self {
            key,
            first_seen: now_ms,
            last_seen: now_ms,
            last_activity: now_ms,
            good_score: 0,
            bad_score: 0,
            messages_received: 0,
            invalid_messages: 0,
            connected: false,
            banned_until: None,
            best_known_height: 0,
            user_agent: String::new(),
        }
    }

    /// Net behavior score used for peer selection.
    pub fn net_score(&self) -> i32 {
        self.good_score - self.bad_score
    }

    /// Whether the peer is banned at `now_ms`.
    pub fn is_banned(&self, now_ms: u64) -> bool {
        self.banned_until.is_some_and(|until| now_ms < until)
    }
}

/// Aggregate registry counters for the stats surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    /// Peers ever observed and still retained.
    pub total_peers: usize,
    /// Currently connected peers.
    pub connected_peers: usize,
    /// Currently banned peers.
    pub banned_peers: usize,
    /// Peers dropped as stale so far.
    pub stale_dropped: u64,
}

/// Thread-safe peer registry.
pub struct PeerRegistry {
    config: PeerRegistryConfig,
    inner: RwLock<Inner>,
}

struct Inner {
    peers: HashMap<PeerKey, PeerRecord>,
    stale_dropped: u64,
}

impl PeerRegistry {
    /// Empty registry.
    pub fn new(config: PeerRegistryConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                peers: HashMap::new(),
                stale_dropped: 0,
            }),
        }
    }

    /// Registry with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PeerRegistryConfig::default())
    }

    /// The configuration.
    pub fn config(&self) -> &PeerRegistryConfig {
        &self.config
    }

    /// Observe a peer (discovery, ADDR gossip, inbound dial). Creates the
    /// record if absent; refreshes `last_seen` either way.
    pub fn observe(&self, key: &PeerKey, now_ms: u64) {
        let mut inner = self.inner.write();
        let record = inner
            .peers
            .entry(key.clone())
            .or_insert_with(|| PeerRecord::new(key.clone(), now_ms));
        record.last_seen = now_ms;
    }

    /// Admit a connection attempt: refuses banned peers, resets scores
    /// after an expired ban.
    pub fn admit_connection(&self, key: &PeerKey, now_ms: u64) -> bool {
        let mut inner = self.inner.write();
        let record = inner
            .peers
            .entry(key.clone())
            .or_insert_with(|| PeerRecord::new(key.clone(), now_ms));

        if record.is_banned(now_ms) {
            debug!(peer = %key, "Refusing banned peer");
            return false;
        }
        if record.banned_until.take().is_some() {
            // Ban served; clean slate.
            record.good_score = 0;
            record.bad_score = 0;
            info!(peer = %key, "Ban expired; peer re-admitted");
        }
        record.connected = true;
        record.last_seen = now_ms;
        record.last_activity = now_ms;
        true
    }

    /// Mark a peer disconnected.
    pub fn mark_disconnected(&self, key: &PeerKey, now_ms: u64) {
        if let Some(record) = self.inner.write().peers.get_mut(key) {
            record.connected = false;
            record.last_seen = now_ms;
        }
    }

    /// Record protocol activity (message received).
    pub fn record_activity(&self, key: &PeerKey, now_ms: u64) {
        if let Some(record) = self.inner.write().peers.get_mut(key) {
            record.messages_received += 1;
            record.last_activity = now_ms;
            record.last_seen = now_ms;
        }
    }

    /// Record handshake facts.
    pub fn record_handshake(&self, key: &PeerKey, user_agent: &str, best_height: u64) {
        if let Some(record) = self.inner.write().peers.get_mut(key) {
            record.user_agent = user_agent.to_string();
            record.best_known_height = best_height;
        }
    }

    /// Update a peer's advertised chain height.
    pub fn update_height(&self, key: &PeerKey, height: u64) {
        if let Some(record) = self.inner.write().peers.get_mut(key) {
            record.best_known_height = record.best_known_height.max(height);
        }
    }

    /// Credit good behavior.
    pub fn record_good(&self, key: &PeerKey, score: i32) {
        if let Some(record) = self.inner.write().peers.get_mut(key) {
            record.good_score = record.good_score.saturating_add(score);
        }
    }

    /// Charge misbehavior; bans once the score exceeds the threshold.
    /// Returns true if this charge triggered a ban.
    pub fn record_misbehavior(&self, key: &PeerKey, score: i32, now_ms: u64) -> bool {
        let mut inner = self.inner.write();
        let Some(record) = inner.peers.get_mut(key) else {
            return false;
        };
        record.bad_score = record.bad_score.saturating_add(score);
        record.invalid_messages += 1;

        if record.bad_score > BAN_SCORE_THRESHOLD && !record.is_banned(now_ms) {
            let until = now_ms + self.config.ban_duration_ms;
            record.banned_until = Some(until);
            record.connected = false;
            warn!(peer = %key, score = record.bad_score, until, "Peer banned");
            return true;
        }
        false
    }

    /// Whether the peer is banned at `now_ms`.
    pub fn is_banned(&self, key: &PeerKey, now_ms: u64) -> bool {
        self.inner
            .read()
            .peers
            .get(key)
            .is_some_and(|record| record.is_banned(now_ms))
    }

    /// A peer's record.
    pub fn get(&self, key: &PeerKey) -> Option<PeerRecord> {
        self.inner.read().peers.get(key).cloned()
    }

    /// All currently connected peers.
    pub fn connected_peers(&self) -> Vec<PeerRecord> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|record| record.connected)
            .cloned()
            .collect()
    }

    /// Known, unbanned, disconnected peers worth dialing.
    pub fn dial_candidates(&self, now_ms: u64) -> Vec<PeerKey> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|record| !record.connected && !record.is_banned(now_ms))
            .map(|record| record.key.clone())
            .collect()
    }

    /// Best `count` connected peers by net score, ties by earliest
    /// first-seen.
    pub fn best_peers(&self, count: usize) -> Vec<PeerKey> {
        let mut connected = self.connected_peers();
        connected.sort_by(|a, b| {
            b.net_score()
                .cmp(&a.net_score())
                .then(a.first_seen.cmp(&b.first_seen))
        });
        connected
            .into_iter()
            .take(count)
            .map(|record| record.key)
            .collect()
    }

    /// Addresses to advertise in an ADDR reply, best first, capped.
    pub fn addresses_for_gossip(&self, count: usize, now_ms: u64) -> Vec<PeerKey> {
        let mut known: Vec<PeerRecord> = self
            .inner
            .read()
            .peers
            .values()
            .filter(|record| !record.is_banned(now_ms))
            .cloned()
            .collect();
        known.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        known.into_iter().take(count).map(|record| record.key).collect()
    }

    /// Highest chain height any connected peer advertises.
    pub fn best_known_height(&self) -> u64 {
        self.inner
            .read()
            .peers
            .values()
            .filter(|record| record.connected)
            .map(|record| record.best_known_height)
            .max()
            .unwrap_or(0)
    }

    /// Drop expired bans and stale disconnected records.
    pub fn cleanup(&self, now_ms: u64) {
        let stale_cutoff = self.config.stale_cutoff_ms;
        let mut inner = self.inner.write();

        for record in inner.peers.values_mut() {
            if record.banned_until.is_some_and(|until| now_ms >= until) {
                record.banned_until = None;
                record.good_score = 0;
                record.bad_score = 0;
            }
        }

        let before = inner.peers.len();
        inner.peers.retain(|_, record| {
            record.connected
                || record.banned_until.is_some()
                || now_ms.saturating_sub(record.last_seen) <= stale_cutoff
        });
        inner.stale_dropped += (before - inner.peers.len()) as u64;
    }

    /// Counter snapshot.
    pub fn stats(&self, now_ms: u64) -> PeerStats {
        let inner = self.inner.read();
        PeerStats {
            total_peers: inner.peers.len(),
            connected_peers: inner.peers.values().filter(|r| r.connected).count(),
            banned_peers: inner
                .peers
                .values()
                .filter(|r| r.is_banned(now_ms))
                .count(),
            stale_dropped: inner.stale_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PeerKey {
        PeerKey::new(format!("10.0.0.{byte}"), 30333)
    }

    fn registry() -> PeerRegistry {
        PeerRegistry::new(PeerRegistryConfig {
            ban_duration_ms: 1_000,
            stale_cutoff_ms: 10_000,
            max_outbound: 50,
        })
    }

    // =========================================================================
    // SCORING AND BANS
    // =========================================================================

    #[test]
    fn test_score_at_threshold_does_not_ban() {
        let registry = registry();
        registry.observe(&key(1), 0);
        assert!(!registry.record_misbehavior(&key(1), 100, 0));
        assert!(!registry.is_banned(&key(1), 0));
    }

    #[test]
    fn test_score_above_threshold_bans() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.record_misbehavior(&key(1), 100, 0);
        assert!(registry.record_misbehavior(&key(1), 1, 0));
        assert!(registry.is_banned(&key(1), 0));
        assert!(registry.is_banned(&key(1), 999));
        assert!(!registry.is_banned(&key(1), 1_000));
    }

    #[test]
    fn test_six_invalid_blocks_ban() {
        // Six structurally invalid blocks at +20 each crosses 100.
        let registry = registry();
        registry.observe(&key(1), 0);
        let mut banned = false;
        for _ in 0..6 {
            banned = registry.record_misbehavior(&key(1), 20, 0) || banned;
        }
        assert!(banned);
        assert!(registry.is_banned(&key(1), 0));
    }

    #[test]
    fn test_banned_peer_refused_then_readmitted_with_reset() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.record_misbehavior(&key(1), 101, 0);

        assert!(!registry.admit_connection(&key(1), 500));
        // After expiry, admitted with scores reset.
        assert!(registry.admit_connection(&key(1), 1_500));
        let record = registry.get(&key(1)).unwrap();
        assert_eq!(record.bad_score, 0);
        assert_eq!(record.good_score, 0);
        assert!(record.connected);
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    #[test]
    fn test_best_peers_prefers_net_score() {
        let registry = registry();
        for byte in 1..=3 {
            registry.observe(&key(byte), 0);
            registry.admit_connection(&key(byte), 0);
        }
        registry.record_good(&key(2), 50);
        registry.record_misbehavior(&key(3), 30, 0);

        let best = registry.best_peers(2);
        assert_eq!(best[0], key(2));
        assert_eq!(best[1], key(1));
    }

    #[test]
    fn test_best_peers_excludes_disconnected() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.admit_connection(&key(1), 0);
        registry.observe(&key(2), 0);

        assert_eq!(registry.best_peers(8), vec![key(1)]);
    }

    #[test]
    fn test_best_known_height() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.admit_connection(&key(1), 0);
        registry.update_height(&key(1), 42);
        registry.update_height(&key(1), 7);
        assert_eq!(registry.best_known_height(), 42);
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[test]
    fn test_cleanup_drops_stale_disconnected() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.observe(&key(2), 0);
        registry.admit_connection(&key(2), 0);

        registry.cleanup(20_000);
        assert!(registry.get(&key(1)).is_none());
        assert!(registry.get(&key(2)).is_some());
        assert_eq!(registry.stats(20_000).stale_dropped, 1);
    }

    #[test]
    fn test_cleanup_clears_expired_bans() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.record_misbehavior(&key(1), 101, 0);

        registry.cleanup(2_000);
        let record = registry.get(&key(1)).unwrap();
        assert_eq!(record.banned_until, None);
        assert_eq!(record.bad_score, 0);
    }

    #[test]
    fn test_stats() {
        let registry = registry();
        registry.observe(&key(1), 0);
        registry.admit_connection(&key(1), 0);
        registry.observe(&key(2), 0);
        registry.record_misbehavior(&key(2), 101, 0);

        let stats = registry.stats(0);
        assert_eq!(stats.total_peers, 2);
        assert_eq!(stats.connected_peers, 1);
        assert_eq!(stats.banned_peers, 1);
    }
}
