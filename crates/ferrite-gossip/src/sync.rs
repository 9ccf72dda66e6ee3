//! # Headers-First Sync
//!
//! When a peer's advertised height leads the local chain by more than the
//! threshold, sync starts: header batches stream from the announcing
//! peer and are validated as a parent-linked ascending chain; bodies are
//! then requested in parallel across peers via GETDATA. Blocks apply in
//! order through the chain; the first invalid block halts the sync and
//! costs its source the invalid-block score.

use ferrite_types::{Digest, PeerKey, SignedHeader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::GossipError;
use crate::relay::GossipConfig;

/// Bad score charged for serving an invalid block or header chain.
pub const INVALID_BLOCK_SCORE: i32 = 20;

/// Blocks requested per GETDATA during body fetch.
const BODIES_PER_REQUEST: usize = 16;

/// Outbound requests the sync layer wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Ask `peer` for headers starting at `from_height`.
    Headers {
        peer: PeerKey,
        from_height: u64,
        count: u32,
    },
    /// Ask `peer` for the given block bodies.
    Bodies { peer: PeerKey, items: Vec<Digest> },
}

/// Progress snapshot for the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether a sync is in flight.
    pub syncing: bool,
    /// Height being synced toward.
    pub target_height: u64,
    /// Local height at the last observation.
    pub current_height: u64,
    /// Peer serving headers.
    pub source: Option<PeerKey>,
}

struct SyncState {
    active: bool,
    source: Option<PeerKey>,
    target_height: u64,
    next_header_height: u64,
    last_header: Option<Digest>,
    current_height: u64,
}

impl SyncState {
    fn idle() -> Self {
        Self {
            active: false,
            source: None,
            target_height: 0,
            next_header_height: 0,
            last_header: None,
            current_height: 0,
        }
    }
}

/// The headers-first sync state machine.
pub struct SyncManager {
    config: GossipConfig,
    state: Mutex<SyncState>,
}

impl SyncManager {
    /// Idle manager.
    pub fn new(config: GossipConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SyncState::idle()),
        }
    }

    /// Consider starting a sync toward `peer` advertising `peer_height`.
    /// Returns the first header request when sync begins.
    pub fn maybe_start(
        &self,
        local_height: u64,
        peer: &PeerKey,
        peer_height: u64,
    ) -> Option<SyncRequest> {
        let mut state = self.state.lock();
        if state.active {
            return None;
        }
        if peer_height <= local_height + self.config.sync_threshold {
            return None;
        }

        state.active = true;
        state.source = Some(peer.clone());
        state.target_height = peer_height;
        state.next_header_height = local_height + 1;
        state.last_header = None;
        state.current_height = local_height;
        info!(peer = %peer, target = peer_height, from = local_height, "Chain sync started");

        Some(SyncRequest::Headers {
            peer: peer.clone(),
            from_height: local_height + 1,
            count: self.config.header_batch,
        })
    }

    /// Handle a header batch from the sync source.
    ///
    /// Validates the batch as an ascending, parent-linked, seal-valid
    /// chain continuing the previous batch, then returns body requests
    /// fanned across `fetch_peers` (plus the next header request while
    /// batches run full).
    pub fn on_headers(
        &self,
        peer: &PeerKey,
        headers: &[SignedHeader],
        fetch_peers: &[PeerKey],
    ) -> Result<Vec<SyncRequest>, GossipError> {
        let mut state = self.state.lock();
        if !state.active || state.source.as_ref() != Some(peer) {
            return Err(GossipError::Unsolicited);
        }

        if headers.is_empty() {
            // Source has nothing more; bodies already in flight finish
            // the job.
            debug!(peer = %peer, "Header stream exhausted");
            return Ok(vec![]);
        }

        let mut expected_height = state.next_header_height;
        let mut last = state.last_header;
        let mut wanted: Vec<Digest> = Vec::with_capacity(headers.len());

        for signed in headers {
            let identity = signed.header.identity();
            if signed.header.height != expected_height {
                return Err(GossipError::UnexpectedBatchStart {
                    got: signed.header.height,
                    expected: expected_height,
                });
            }
            if let Some(prev) = last {
                if signed.header.prev_digest != prev {
                    return Err(GossipError::BrokenHeaderChain(identity));
                }
            }
            if !signed.verify_seal() {
                return Err(GossipError::InvalidHeaderSeal(identity));
            }
            wanted.push(identity);
            last = Some(identity);
            expected_height += 1;
        }

        state.next_header_height = expected_height;
        state.last_header = last;

        // Fan body requests across peers, round-robin.
        let sources: Vec<PeerKey> = if fetch_peers.is_empty() {
            vec![peer.clone()]
        } else {
            fetch_peers.to_vec()
        };
        let mut requests: Vec<SyncRequest> = wanted
            .chunks(BODIES_PER_REQUEST)
            .enumerate()
            .map(|(i, chunk)| SyncRequest::Bodies {
                peer: sources[i % sources.len()].clone(),
                items: chunk.to_vec(),
            })
            .collect();

        // Keep streaming headers while batches run full.
        if headers.len() as u32 >= self.config.header_batch {
            requests.push(SyncRequest::Headers {
                peer: peer.clone(),
                from_height: state.next_header_height,
                count: self.config.header_batch,
            });
        }
        Ok(requests)
    }

    /// Note local chain progress; finishes the sync at the target.
    pub fn on_block_applied(&self, height: u64) {
        let mut state = self.state.lock();
        state.current_height = state.current_height.max(height);
        if state.active && height >= state.target_height {
            info!(height, "Chain sync complete");
            *state = SyncState::idle();
            state.current_height = height;
        }
    }

    /// Abort the sync (invalid block or source disconnect). The caller
    /// scores the offending peer.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if state.active {
            debug!("Chain sync aborted");
            let height = state.current_height;
            *state = SyncState::idle();
            state.current_height = height;
        }
    }

    /// Whether a sync is in flight.
    pub fn is_syncing(&self) -> bool {
        self.state.lock().active
    }

    /// Progress snapshot.
    pub fn status(&self) -> SyncStatus {
        let state = self.state.lock();
        SyncStatus {
            syncing: state.active,
            target_height: state.target_height,
            current_height: state.current_height,
            source: state.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_types::{BlockHeader, Seal};

    fn peer(byte: u8) -> PeerKey {
        PeerKey::new(format!("10.0.0.{byte}"), 30333)
    }

    fn config() -> GossipConfig {
        GossipConfig {
            sync_threshold: 3,
            header_batch: 4,
            ..GossipConfig::default()
        }
    }

    /// Parent-linked work-sealed headers from `from` to `to` inclusive.
    fn header_chain(from: u64, to: u64, prev: Digest) -> Vec<SignedHeader> {
        let mut out = Vec::new();
        let mut parent = prev;
        for height in from..=to {
            let header = BlockHeader {
                version: 1,
                prev_digest: parent,
                merkle_root: Digest::ZERO,
                timestamp: 1_700_000_000 + height,
                nonce: 0,
                difficulty: 1,
                height,
                tx_count: 0,
            };
            parent = header.identity();
            out.push(SignedHeader {
                header,
                seal: Seal::Work,
            });
        }
        out
    }

    #[test]
    fn test_starts_only_past_threshold() {
        let sync = SyncManager::new(config());
        assert!(sync.maybe_start(10, &peer(1), 13).is_none());
        let request = sync.maybe_start(10, &peer(1), 14).unwrap();
        assert_eq!(
            request,
            SyncRequest::Headers {
                peer: peer(1),
                from_height: 11,
                count: 4
            }
        );
        assert!(sync.is_syncing());
        // A second trigger while active is ignored.
        assert!(sync.maybe_start(10, &peer(2), 50).is_none());
    }

    #[test]
    fn test_header_batch_produces_body_requests() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();

        let headers = header_chain(1, 4, Digest::ZERO);
        let requests = sync
            .on_headers(&peer(1), &headers, &[peer(1), peer(2)])
            .unwrap();

        // 4 headers fit one body chunk; batch ran full so another header
        // request follows.
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[0], SyncRequest::Bodies { .. }));
        assert_eq!(
            requests[1],
            SyncRequest::Headers {
                peer: peer(1),
                from_height: 5,
                count: 4
            }
        );
    }

    #[test]
    fn test_short_batch_ends_header_stream() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();

        let headers = header_chain(1, 2, Digest::ZERO);
        let requests = sync.on_headers(&peer(1), &headers, &[peer(1)]).unwrap();
        assert_eq!(requests.len(), 1);
        assert!(matches!(requests[0], SyncRequest::Bodies { .. }));
    }

    #[test]
    fn test_broken_parent_link_rejected() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();

        let mut headers = header_chain(1, 3, Digest::ZERO);
        headers[2].header.prev_digest = Digest([0xEE; 32]);
        assert!(matches!(
            sync.on_headers(&peer(1), &headers, &[]),
            Err(GossipError::BrokenHeaderChain(_))
        ));
    }

    #[test]
    fn test_wrong_start_height_rejected() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();

        let headers = header_chain(5, 6, Digest::ZERO);
        assert!(matches!(
            sync.on_headers(&peer(1), &headers, &[]),
            Err(GossipError::UnexpectedBatchStart { got: 5, expected: 1 })
        ));
    }

    #[test]
    fn test_headers_from_wrong_peer_rejected() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();

        let headers = header_chain(1, 2, Digest::ZERO);
        assert!(matches!(
            sync.on_headers(&peer(2), &headers, &[]),
            Err(GossipError::Unsolicited)
        ));
    }

    #[test]
    fn test_completion_at_target() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();

        sync.on_block_applied(9);
        assert!(sync.is_syncing());
        sync.on_block_applied(10);
        assert!(!sync.is_syncing());
    }

    #[test]
    fn test_abort() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 10).unwrap();
        sync.abort();
        assert!(!sync.is_syncing());
        // A fresh sync can start again.
        assert!(sync.maybe_start(0, &peer(2), 10).is_some());
    }

    #[test]
    fn test_batches_link_across_calls() {
        let sync = SyncManager::new(config());
        sync.maybe_start(0, &peer(1), 20).unwrap();

        let first = header_chain(1, 4, Digest::ZERO);
        let tail = first.last().unwrap().header.identity();
        sync.on_headers(&peer(1), &first, &[]).unwrap();

        // Second batch must link to the first batch's last header.
        let good = header_chain(5, 8, tail);
        assert!(sync.on_headers(&peer(1), &good, &[]).is_ok());

        let bad = header_chain(9, 12, Digest([0x99; 32]));
        assert!(matches!(
            sync.on_headers(&peer(1), &bad, &[]),
            Err(GossipError::BrokenHeaderChain(_))
        ));
    }
}
