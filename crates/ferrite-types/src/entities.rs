//! # State and Network Entities
//!
//! Records shared across subsystem boundaries: account state, canonical
//! chain summary, and the peer key used by gossip bookkeeping.

use ferrite_crypto::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-account world-state record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Balance in base units.
    pub balance: u64,
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Digest of deployed code, for contract accounts.
    pub code_digest: Option<Digest>,
    /// Root of the account's storage cells.
    pub storage_root: Digest,
}

/// Summary of the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Identity of the current tip.
    pub tip_digest: Digest,
    /// Height of the tip.
    pub height: u64,
    /// Cumulative chain weight under the configured fork-choice rule.
    pub total_work: u128,
    /// Identity of the genesis block.
    pub genesis_digest: Digest,
}

/// Network identity of a peer: address and port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerKey {
    /// IP address or host name.
    pub addr: String,
    /// TCP port.
    pub port: u16,
}

impl PeerKey {
    /// Construct from parts.
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}
