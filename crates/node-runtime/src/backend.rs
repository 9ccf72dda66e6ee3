//! # API Backend
//!
//! Implements the gateway's backend contract over the running node's
//! subsystems.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ferrite_api::{ApiError, NodeBackend, NodeInfo};
use ferrite_chain::ReplayReport;
use ferrite_gossip::{GossipStats, SyncStatus};
use ferrite_mempool::MempoolStats;
use ferrite_network::{PeerRecord, PeerStats};
use ferrite_types::{
    AccountRecord, Address, Block, ChainState, Digest, PeerKey, Transaction, PROTOCOL_VERSION,
};
use tracing::warn;

use crate::runtime::NodeContext;
use crate::{now_unix_ms, USER_AGENT};

/// The gateway backend over a live node.
pub struct RuntimeBackend {
    ctx: Arc<NodeContext>,
}

impl RuntimeBackend {
    /// Wrap the shared context.
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl NodeBackend for RuntimeBackend {
    fn node_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.ctx.node_id,
            user_agent: USER_AGENT.to_string(),
            protocol_version: PROTOCOL_VERSION,
            consensus: self.ctx.engine.read().name().to_string(),
            mining: self.ctx.mining.load(Ordering::Relaxed),
            network_id: self.ctx.config.network_id,
            listening: self.ctx.listening.load(Ordering::Relaxed),
        }
    }

    fn blockchain_info(&self) -> Result<ChainState, ApiError> {
        self.ctx
            .chain
            .chain_state()
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn block_by_digest(&self, digest: &Digest) -> Result<Option<Block>, ApiError> {
        self.ctx
            .chain
            .get_block_by_digest(digest)
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, ApiError> {
        self.ctx
            .chain
            .get_block_by_height(height)
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn transaction(
        &self,
        digest: &Digest,
    ) -> Result<Option<(Transaction, Digest, u64)>, ApiError> {
        self.ctx
            .chain
            .get_transaction(digest)
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn balance(&self, address: &Address) -> Result<u64, ApiError> {
        Ok(self.ctx.chain.balance(address))
    }

    fn account(&self, address: &Address) -> Result<Option<AccountRecord>, ApiError> {
        Ok(self.ctx.chain.account(address))
    }

    fn mempool_info(&self) -> MempoolStats {
        self.ctx.pool.stats()
    }

    fn network_info(&self) -> PeerStats {
        self.ctx.registry.stats(now_unix_ms())
    }

    fn peers(&self) -> Vec<PeerRecord> {
        self.ctx.registry.connected_peers()
    }

    fn network_stats(&self) -> GossipStats {
        self.ctx.relay.stats()
    }

    fn broadcast_transaction(&self, tx: Transaction) -> Result<Digest, ApiError> {
        let digest = tx.identity();
        self.ctx
            .validation
            .submit(tx, now_unix_ms(), None)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(digest)
    }

    fn broadcast_block(&self, block: Block) -> Result<Digest, ApiError> {
        let digest = block.identity();
        self.ctx
            .chain
            .handle_new_tip(block)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(digest)
    }

    fn replay_block(&self, digest: &Digest) -> Result<ReplayReport, ApiError> {
        self.ctx
            .chain
            .replay_block(digest)
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    fn sync_status(&self) -> SyncStatus {
        // `sync_chain` both queries and kicks: if a connected peer is
        // materially ahead and no sync runs, start one.
        if !self.ctx.sync.is_syncing() {
            let local = self
                .ctx
                .chain
                .chain_state()
                .map(|state| state.height)
                .unwrap_or(0);
            let best = self.ctx.registry.best_known_height();
            let candidates = self.ctx.registry.best_peers(1);
            if let Some(peer) = candidates.first() {
                if let Some(ferrite_gossip::SyncRequest::Headers {
                    peer,
                    from_height,
                    count,
                }) = self.ctx.sync.maybe_start(local, peer, best)
                {
                    let transport = self.ctx.transport.clone();
                    tokio::spawn(async move {
                        let envelope = ferrite_network::Envelope::new(
                            ferrite_network::Payload::GetHeaders { from_height, count },
                            crate::now_unix_ms(),
                        );
                        if let Err(error) = transport.send(&peer, &envelope).await {
                            warn!(peer = %peer, %error, "Sync kick failed");
                        }
                    });
                }
            }
        }
        self.ctx.sync.status()
    }

    fn connect_peer(&self, addr: &str, port: u16) -> Result<(), ApiError> {
        let peer = PeerKey::new(addr, port);
        self.ctx.registry.observe(&peer, now_unix_ms());
        let transport = self.ctx.transport.clone();
        // Dial in the background; the dispatcher completes the handshake.
        tokio::spawn(async move {
            if let Err(error) = transport.connect(&peer).await {
                warn!(peer = %peer, %error, "Dial failed");
            }
        });
        Ok(())
    }

    fn disconnect_peer(&self, addr: &str, port: u16) -> Result<(), ApiError> {
        let peer = PeerKey::new(addr, port);
        self.ctx.transport.disconnect(&peer);
        self.ctx.registry.mark_disconnected(&peer, now_unix_ms());
        Ok(())
    }

    fn code_digest(&self, address: &Address) -> Result<Option<Digest>, ApiError> {
        Ok(self
            .ctx
            .chain
            .account(address)
            .and_then(|record| record.code_digest))
    }

    fn storage_at(&self, _address: &Address, _key: &[u8]) -> Result<Option<Vec<u8>>, ApiError> {
        // The built-in transfer executor keeps no contract storage cells.
        Ok(None)
    }

    fn estimate_gas(&self, _payload_len: usize) -> u64 {
        21_000
    }

    fn gas_price(&self) -> u64 {
        1
    }
}
