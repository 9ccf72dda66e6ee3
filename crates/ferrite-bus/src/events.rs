//! # Node Events
//!
//! Every event that flows between subsystems. Carrying digests rather than
//! full payloads keeps the bus cheap; subscribers fetch bodies from the
//! owning store when they need them.

use ferrite_types::{Digest, PeerKey};
use serde::{Deserialize, Serialize};

/// Coarse event routing topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Mempool admission and validation outcomes.
    Mempool,
    /// Canonical chain changes.
    Chain,
    /// Peer lifecycle and scoring.
    Network,
}

/// All events published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeEvent {
    // =========================================================================
    // MEMPOOL
    // =========================================================================
    /// A transaction passed admission and validation and should be
    /// propagated to peers that have not seen it.
    TransactionAdmitted {
        /// Transaction identity.
        tx: Digest,
        /// Peer the transaction arrived from, if any; excluded from
        /// re-propagation.
        source: Option<PeerKey>,
    },

    /// A transaction failed validation after admission.
    TransactionRejected {
        /// Transaction identity.
        tx: Digest,
        /// Supplying peer, if any; eligible for misbehavior scoring.
        source: Option<PeerKey>,
        /// Human-readable reason, logged and echoed in REJECT messages.
        reason: String,
    },

    // =========================================================================
    // CHAIN
    // =========================================================================
    /// A block was applied to the canonical chain.
    BlockApplied {
        /// Identity of the applied block.
        block: Digest,
        /// Its height.
        height: u64,
        /// Identities of the transactions it carried, coinbase included.
        included: Vec<Digest>,
    },

    /// The canonical tip switched branches.
    ChainReorganized {
        /// Tip before the switch.
        old_tip: Digest,
        /// Tip after the switch.
        new_tip: Digest,
        /// Non-coinbase transactions returned to the mempool.
        returned_txs: Vec<Digest>,
    },

    /// A block failed validation or application.
    BlockRejected {
        /// Identity of the rejected block.
        block: Digest,
        /// Supplying peer, if any.
        source: Option<PeerKey>,
        /// Reason, echoed in REJECT messages.
        reason: String,
    },

    // =========================================================================
    // NETWORK
    // =========================================================================
    /// A peer completed the handshake.
    PeerConnected(PeerKey),

    /// A peer disconnected or was dropped.
    PeerDisconnected(PeerKey),

    /// A peer crossed the ban threshold.
    PeerBanned {
        /// The banned peer.
        peer: PeerKey,
        /// Unix milliseconds when the ban lifts.
        until_ms: u64,
    },

    /// A subsystem observed peer misbehavior and requests scoring.
    MisbehaviorObserved {
        /// The offending peer.
        peer: PeerKey,
        /// Bad-score delta to apply.
        score: i32,
        /// What happened.
        reason: String,
    },
}

impl NodeEvent {
    /// Topic this event routes under.
    pub fn topic(&self) -> EventTopic {
        match self {
            NodeEvent::TransactionAdmitted { .. } | NodeEvent::TransactionRejected { .. } => {
                EventTopic::Mempool
            }
            NodeEvent::BlockApplied { .. }
            | NodeEvent::ChainReorganized { .. }
            | NodeEvent::BlockRejected { .. } => EventTopic::Chain,
            NodeEvent::PeerConnected(_)
            | NodeEvent::PeerDisconnected(_)
            | NodeEvent::PeerBanned { .. }
            | NodeEvent::MisbehaviorObserved { .. } => EventTopic::Network,
        }
    }
}

/// Which topics a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Topics to receive; empty means all.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Receive everything.
    pub fn all() -> Self {
        Self { topics: vec![] }
    }

    /// Receive only the given topics.
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Whether an event passes this filter.
    pub fn matches(&self, event: &NodeEvent) -> bool {
        self.topics.is_empty() || self.topics.contains(&event.topic())
    }
}
