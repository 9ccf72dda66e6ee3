//! # Rolling-Window Rate Limiter
//!
//! Per-peer-per-message-type request counting over a sliding window.
//! Timestamps are caller-supplied so behavior is testable without
//! sleeping.

use std::collections::{HashMap, VecDeque};

use ferrite_types::PeerKey;
use parking_lot::Mutex;

use crate::message::MessageType;

/// Sliding-window limiter: at most `limit` messages per `window_ms` per
/// `(peer, message type)`.
pub struct RollingWindowLimiter {
    limit: usize,
    window_ms: u64,
    windows: Mutex<HashMap<(PeerKey, MessageType), VecDeque<u64>>>,
}

impl RollingWindowLimiter {
    /// Limiter with the given budget.
    pub fn new(limit: usize, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Default protocol budget: 100 messages per 60 seconds.
    pub fn with_defaults() -> Self {
        Self::new(100, 60_000)
    }

    /// Record one message at `now_ms`; false when the budget is blown.
    pub fn check_and_record(
        &self,
        peer: &PeerKey,
        message_type: MessageType,
        now_ms: u64,
    ) -> bool {
        let mut windows = self.windows.lock();
        let window = windows
            .entry((peer.clone(), message_type))
            .or_default();

        let cutoff = now_ms.saturating_sub(self.window_ms);
        while window.front().is_some_and(|&t| t < cutoff) {
            window.pop_front();
        }

        if window.len() >= self.limit {
            return false;
        }
        window.push_back(now_ms);
        true
    }

    /// Drop a peer's counters entirely (disconnect or ban).
    pub fn forget_peer(&self, peer: &PeerKey) {
        self.windows.lock().retain(|(p, _), _| p != peer);
    }

    /// Drop windows idle since before `now_ms - window_ms`.
    pub fn cleanup(&self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.windows
            .lock()
            .retain(|_, window| window.back().is_some_and(|&t| t >= cutoff));
    }
}
