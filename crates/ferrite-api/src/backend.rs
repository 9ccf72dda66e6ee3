//! # Backend Contract
//!
//! The methods the core exposes to the gateway. The runtime implements
//! this over the chain, mempool, peer registry, gossip, and transport;
//! tests implement it over fixtures.

use ferrite_chain::ReplayReport;
use ferrite_gossip::{GossipStats, SyncStatus};
use ferrite_mempool::MempoolStats;
use ferrite_network::{PeerRecord, PeerStats};
use ferrite_types::{
    AccountRecord, Address, Block, ChainState, Digest, Transaction,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Identity and status facts for `get_node_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier.
    pub node_id: Digest,
    /// Client software identification.
    pub user_agent: String,
    /// Protocol version spoken.
    pub protocol_version: u32,
    /// Consensus rule in effect.
    pub consensus: String,
    /// Whether the producer loop runs.
    pub mining: bool,
    /// Network identifier for `net_version`.
    pub network_id: u64,
    /// Whether the P2P listener is up.
    pub listening: bool,
}

/// Core surface consumed by the gateway.
pub trait NodeBackend: Send + Sync + 'static {
    /// Node identity and status.
    fn node_info(&self) -> NodeInfo;

    /// Canonical chain summary.
    fn blockchain_info(&self) -> Result<ChainState, ApiError>;

    /// Block by identity.
    fn block_by_digest(&self, digest: &Digest) -> Result<Option<Block>, ApiError>;

    /// Canonical block by height.
    fn block_by_height(&self, height: u64) -> Result<Option<Block>, ApiError>;

    /// Canonical transaction with its block digest and height.
    fn transaction(
        &self,
        digest: &Digest,
    ) -> Result<Option<(Transaction, Digest, u64)>, ApiError>;

    /// Sum of unspent outputs held by the address.
    fn balance(&self, address: &Address) -> Result<u64, ApiError>;

    /// World-state account record, if the account exists.
    fn account(&self, address: &Address) -> Result<Option<AccountRecord>, ApiError>;

    /// Mempool counters.
    fn mempool_info(&self) -> MempoolStats;

    /// Peer registry counters.
    fn network_info(&self) -> PeerStats;

    /// Connected peer records.
    fn peers(&self) -> Vec<PeerRecord>;

    /// Gossip counters.
    fn network_stats(&self) -> GossipStats;

    /// Admit a signed transaction; returns its identity.
    fn broadcast_transaction(&self, tx: Transaction) -> Result<Digest, ApiError>;

    /// Submit a sealed block; returns its identity.
    fn broadcast_block(&self, block: Block) -> Result<Digest, ApiError>;

    /// Sandbox re-execution of a canonical block.
    fn replay_block(&self, digest: &Digest) -> Result<ReplayReport, ApiError>;

    /// Sync progress; optionally kick a sync check.
    fn sync_status(&self) -> SyncStatus;

    /// Dial a peer.
    fn connect_peer(&self, addr: &str, port: u16) -> Result<(), ApiError>;

    /// Drop a peer.
    fn disconnect_peer(&self, addr: &str, port: u16) -> Result<(), ApiError>;

    /// Deployed code digest for a contract account.
    fn code_digest(&self, address: &Address) -> Result<Option<Digest>, ApiError>;

    /// A contract storage cell.
    fn storage_at(&self, address: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, ApiError>;

    /// Flat gas estimate for a call of the given payload size.
    fn estimate_gas(&self, payload_len: usize) -> u64;

    /// Fee-per-gas hint for `eth_gasPrice`.
    fn gas_price(&self) -> u64;
}
