//! # Node Assembly and Lifecycle
//!
//! Startup order: open storage, load or create genesis, initialize world
//! state at the tip, start gossip and discovery, start mempool workers,
//! start the producer when mining is enabled, expose the API. Shutdown
//! reverses it: cancel the producer, stop gossip, drop the mempool
//! worker, flush storage, join tasks.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferrite_bus::{EventFilter, EventPublisher, InMemoryEventBus, NodeEvent};
use ferrite_chain::{Blockchain, ChainConfig};
use ferrite_consensus::{Engine, PoaConfig, PoaEngine, PosConfig, PosEngine, PowConfig, PowEngine};
use ferrite_crypto::{sha256, Keypair};
use ferrite_gossip::{GossipConfig, Relay, SyncManager};
use ferrite_mempool::{
    spawn_validation_worker, BlockPool, BlockPoolConfig, MempoolConfig, TransactionPool,
    TxValidator, ValidationHandle,
};
use ferrite_network::{
    PeerRegistry, PeerRegistryConfig, RollingWindowLimiter, Transport, TransportConfig,
};
use ferrite_state::TransferVm;
use ferrite_storage::{BlockStore, JsonFileStore, KeyValueStore, StateStore, StorageError};
use ferrite_types::{Address, Digest, OutPoint, TxOutput};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::RuntimeBackend;
use crate::config::{ConfigError, ConsensusKind, NodeConfig, StorageBackend};
use crate::dispatcher;
use crate::genesis::build_genesis;
use crate::producer;
use crate::{now_unix_ms, USER_AGENT};

/// Fatal node failures, mapped onto process exit codes.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Exit code 1.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Exit code 2.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Exit code 3.
    #[error("Network bind failure: {0}")]
    NetworkBind(String),

    /// Exit code 2 (chain-level storage/corruption failures).
    #[error("Chain error: {0}")]
    Chain(String),
}

impl NodeError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Config(_) => 1,
            NodeError::Storage(_) | NodeError::Chain(_) => 2,
            NodeError::NetworkBind(_) => 3,
        }
    }
}

/// Everything the dispatcher, producer, and API backend share.
pub struct NodeContext {
    /// Effective configuration.
    pub config: NodeConfig,
    /// The canonical chain.
    pub chain: Arc<Blockchain>,
    /// Pending-transaction pool.
    pub pool: Arc<TransactionPool>,
    /// Admission front-end (pool + validation queue).
    pub validation: ValidationHandle,
    /// Orphan / side-branch block buffer.
    pub block_pool: Arc<BlockPool>,
    /// Peer registry.
    pub registry: Arc<PeerRegistry>,
    /// Gossip relay.
    pub relay: Arc<Relay>,
    /// Headers-first sync.
    pub sync: Arc<SyncManager>,
    /// TCP transport.
    pub transport: Arc<Transport>,
    /// Per-peer rate limiter.
    pub limiter: Arc<RollingWindowLimiter>,
    /// Event bus.
    pub bus: Arc<InMemoryEventBus>,
    /// Consensus engine.
    pub engine: Arc<RwLock<Engine>>,
    /// Node identity digest (from the node public key).
    pub node_id: Digest,
    /// Producer coinbase / seal address.
    pub producer_address: Address,
    /// Whether the producer loop runs.
    pub mining: AtomicBool,
    /// Whether the P2P listener is up.
    pub listening: AtomicBool,
}

/// UTXO view the validation worker checks against: the chain at its tip.
struct ChainUtxoView {
    chain: Arc<Blockchain>,
}

impl TxValidator for ChainUtxoView {
    fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.chain.utxo(outpoint)
    }
}

/// A running node and its supervised tasks.
pub struct Node {
    /// Shared context.
    pub ctx: Arc<NodeContext>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    validation_handle: Option<ValidationHandle>,
}

impl Node {
    /// Build and start a node.
    pub async fn start(config: NodeConfig) -> Result<Node, NodeError> {
        let bus = Arc::new(InMemoryEventBus::new());

        // 1. Storage.
        let kv = open_backend(&config)?;
        let block_store = BlockStore::new(kv.clone());
        let state_store = StateStore::new(kv.clone());

        // 2. Identity and consensus engine.
        let keypair = load_or_generate_key(&config)?;
        let node_id = sha256(keypair.public_key().as_bytes());
        let producer_address = keypair.address();
        let engine = Arc::new(RwLock::new(build_engine(&config, keypair)?));

        // 3. Chain: load or bootstrap genesis, world state at the tip.
        let chain_config = ChainConfig {
            fork_choice: config.fork_choice,
            block_gas_limit: config.block_gas_limit,
            block_size_limit: config.block_size_limit,
            ..ChainConfig::default()
        };
        let chain = Arc::new(Blockchain::new(
            chain_config,
            block_store,
            state_store,
            Box::new(TransferVm::new()),
            engine.clone(),
            bus.clone(),
        ));
        let genesis = build_genesis(config.network_id, config.mining_difficulty);
        chain
            .initialize(genesis)
            .map_err(|e| NodeError::Chain(e.to_string()))?;

        // 4. Mempool and its validation worker.
        let pool = Arc::new(TransactionPool::new(MempoolConfig {
            capacity: config.max_mempool_size,
            ..MempoolConfig::default()
        }));
        let (validation, validation_task) = spawn_validation_worker(
            pool.clone(),
            Arc::new(ChainUtxoView {
                chain: chain.clone(),
            }),
            bus.clone(),
            1024,
        );
        let block_pool = Arc::new(BlockPool::new(BlockPoolConfig::default()));

        // 5. Networking.
        let registry = Arc::new(PeerRegistry::new(PeerRegistryConfig::default()));
        let relay = Arc::new(Relay::new(GossipConfig::default()));
        let sync = Arc::new(SyncManager::new(GossipConfig::default()));
        let limiter = Arc::new(RollingWindowLimiter::with_defaults());

        let transport_config = TransportConfig {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: config.p2p_port,
            inbound_queue: 1024,
        };
        let (transport, inbound, shutdown_tx) = Transport::new(&transport_config);
        let transport = Arc::new(transport);

        let ctx = Arc::new(NodeContext {
            mining: AtomicBool::new(config.enable_mining),
            listening: AtomicBool::new(false),
            config,
            chain,
            pool,
            validation: validation.clone(),
            block_pool,
            registry,
            relay,
            sync,
            transport: transport.clone(),
            limiter,
            bus: bus.clone(),
            engine,
            node_id,
            producer_address,
        });

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        tasks.push(("mempool-validation", validation_task));

        if ctx.config.enable_p2p {
            let (accept_task, _port) = transport
                .listen(&transport_config)
                .await
                .map_err(|e| NodeError::NetworkBind(e.to_string()))?;
            ctx.listening.store(true, Ordering::Relaxed);
            tasks.push(("p2p-accept", accept_task));

            // Message dispatcher.
            tasks.push((
                "dispatcher",
                tokio::spawn(dispatcher::run(ctx.clone(), inbound)),
            ));

            // Bootstrap dialing; handshakes flow through the dispatcher.
            for peer in ctx.config.bootstrap_peers() {
                ctx.registry.observe(&peer, now_unix_ms());
                if let Err(error) = transport.connect(&peer).await {
                    warn!(peer = %peer, %error, "Bootstrap dial failed");
                }
            }
        }

        // 6. Producer loop.
        if ctx.config.enable_mining {
            tasks.push((
                "producer",
                tokio::spawn(producer::run(ctx.clone(), shutdown_tx.subscribe())),
            ));
        }

        // Event pump: bus → gossip/registry actions.
        tasks.push((
            "event-pump",
            tokio::spawn(event_pump(ctx.clone(), shutdown_tx.subscribe())),
        ));

        // Periodic maintenance.
        tasks.push((
            "cleanup",
            tokio::spawn(cleanup_loop(ctx.clone(), shutdown_tx.subscribe())),
        ));

        // 7. External API.
        let api_config = ferrite_api::ApiConfig {
            host: ctx.config.api_host.clone(),
            port: ctx.config.api_port,
            basic_auth: (!ctx.config.api_username.is_empty()).then(|| {
                (
                    ctx.config.api_username.clone(),
                    ctx.config.api_password.clone(),
                )
            }),
        };
        let backend: Arc<dyn ferrite_api::NodeBackend> =
            Arc::new(RuntimeBackend::new(ctx.clone()));
        let (api_task, _api_port) = ferrite_api::serve(api_config, backend)
            .await
            .map_err(|e| NodeError::NetworkBind(e.to_string()))?;
        tasks.push(("api", api_task));

        info!(
            node_id = %node_id,
            consensus = ctx.engine.read().name(),
            user_agent = USER_AGENT,
            "Node started"
        );

        Ok(Node {
            ctx,
            shutdown: shutdown_tx,
            tasks,
            validation_handle: Some(validation),
        })
    }

    /// Signal every task and drain joins in dependency order.
    pub async fn shutdown(mut self) {
        info!("Shutting down");
        let _ = self.shutdown.send(true);
        // Dropping the admission handle lets the validation worker drain
        // and exit.
        self.validation_handle.take();

        for (name, task) in self.tasks {
            task.abort();
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    warn!(task = name, %error, "Task ended abnormally");
                }
            }
        }
        info!("Shutdown complete");
    }
}

fn open_backend(config: &NodeConfig) -> Result<Arc<dyn KeyValueStore>, NodeError> {
    // Both stores share one engine so a block application commits
    // accounts, UTXO changes, block, and tip pointer in a single batch.
    Ok(match config.storage_backend {
        StorageBackend::Json => Arc::new(JsonFileStore::open(&config.data_directory)?),
        StorageBackend::Kv => {
            #[cfg(feature = "rocksdb")]
            {
                Arc::new(ferrite_storage::RocksDbStore::open(
                    &config.data_directory,
                    ferrite_storage::RocksDbConfig::default(),
                )?)
            }
            #[cfg(not(feature = "rocksdb"))]
            {
                Arc::new(ferrite_storage::MemoryStore::new())
            }
        }
    })
}

fn load_or_generate_key(config: &NodeConfig) -> Result<Keypair, NodeError> {
    if config.node_key.is_empty() {
        return Ok(Keypair::generate());
    }
    let bytes = hex::decode(config.node_key.trim_start_matches("0x")).map_err(|_| {
        NodeError::Config(ConfigError::BadOverride {
            variable: "node_key".to_string(),
            value: "<redacted>".to_string(),
        })
    })?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        NodeError::Config(ConfigError::BadOverride {
            variable: "node_key".to_string(),
            value: "<redacted>".to_string(),
        })
    })?;
    Keypair::from_bytes(bytes).map_err(|_| {
        NodeError::Config(ConfigError::BadOverride {
            variable: "node_key".to_string(),
            value: "<redacted>".to_string(),
        })
    })
}

fn build_engine(config: &NodeConfig, keypair: Keypair) -> Result<Engine, NodeError> {
    Ok(match config.consensus {
        ConsensusKind::Pow => Engine::ProofOfWork(Arc::new(PowEngine::new(PowConfig {
            initial_difficulty: config.mining_difficulty.max(1),
            ..PowConfig::default()
        }))),
        ConsensusKind::Poa => {
            let mut authorities: Vec<Address> = config
                .authorities
                .iter()
                .filter_map(|raw| Address::from_str(raw).ok())
                .collect();
            if authorities.is_empty() {
                // Single-authority development chain run by this node.
                authorities.push(keypair.address());
            }
            Engine::ProofOfAuthority(PoaEngine::new(
                PoaConfig {
                    authorities,
                    block_time_secs: 5,
                },
                Some(keypair),
            ))
        }
        ConsensusKind::Pos => {
            let public_key = keypair.public_key();
            let stake = config.validator_stake;
            let mut engine = PosEngine::new(
                PosConfig {
                    min_stake: stake.min(1_000_000),
                    ..PosConfig::default()
                },
                Some(keypair),
            );
            engine
                .register_validator(public_key, stake, 1_000)
                .map_err(|e| NodeError::Chain(e.to_string()))?;
            Engine::ProofOfStake(engine)
        }
    })
}

/// Bus → side effects that cross subsystems.
async fn event_pump(ctx: Arc<NodeContext>, mut shutdown: watch::Receiver<bool>) {
    let mut subscription = ctx.bus.subscribe(EventFilter::all());
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = subscription.recv() => {
                let Ok(event) = event else { break };
                handle_event(&ctx, event).await;
            }
        }
    }
}

async fn handle_event(ctx: &Arc<NodeContext>, event: NodeEvent) {
    let now = now_unix_ms();
    match event {
        NodeEvent::TransactionAdmitted { tx, source } => {
            // Announce to the best peers that have not seen it.
            dispatcher::announce_inventory(
                ctx,
                ferrite_network::InvKind::Transaction,
                tx,
                source.as_ref(),
            )
            .await;
        }
        NodeEvent::BlockApplied {
            block,
            height,
            included,
        } => {
            ctx.pool.purge_included(&included);
            ctx.sync.on_block_applied(height);
            dispatcher::announce_inventory(ctx, ferrite_network::InvKind::Block, block, None)
                .await;
        }
        NodeEvent::TransactionRejected { tx, source, reason } => {
            if let Some(peer) = source {
                dispatcher::send_reject(ctx, &peer, tx, &reason).await;
            }
        }
        NodeEvent::MisbehaviorObserved { peer, score, .. } => {
            if ctx.registry.record_misbehavior(&peer, score, now) {
                let record = ctx.registry.get(&peer);
                ctx.bus
                    .publish(NodeEvent::PeerBanned {
                        peer: peer.clone(),
                        until_ms: record.and_then(|r| r.banned_until).unwrap_or(0),
                    })
                    .await;
            }
        }
        NodeEvent::PeerBanned { peer, .. } => {
            ctx.transport.disconnect(&peer);
            ctx.limiter.forget_peer(&peer);
        }
        NodeEvent::ChainReorganized { .. }
        | NodeEvent::BlockRejected { .. }
        | NodeEvent::PeerConnected(_)
        | NodeEvent::PeerDisconnected(_) => {}
    }
}

/// Periodic maintenance: mempool expiry, block-pool expiry, peer
/// staleness and ban expiry, seen-set age-out, rate-limit windows.
async fn cleanup_loop(ctx: Arc<NodeContext>, mut shutdown: watch::Receiver<bool>) {
    let interval = std::time::Duration::from_secs(ctx.config.cleanup_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let now = now_unix_ms();
                let expired_txs = ctx.pool.expire(now);
                let expired_blocks = ctx.block_pool.expire(now);
                ctx.registry.cleanup(now);
                ctx.relay.cleanup(now);
                ctx.limiter.cleanup(now);
                if !expired_txs.is_empty() || !expired_blocks.is_empty() {
                    info!(
                        txs = expired_txs.len(),
                        blocks = expired_blocks.len(),
                        "Expired pooled items"
                    );
                }

                if ctx.config.enable_p2p {
                    // Liveness probes; PONGs refresh last_activity.
                    let ping = ferrite_network::Envelope::new(
                        ferrite_network::Payload::Ping { nonce: now },
                        now,
                    );
                    let connected = ctx.transport.connected();
                    ctx.transport.send_many(&connected, &ping).await;

                    // Top up outbound connections from discovered peers.
                    let budget = ctx
                        .registry
                        .config()
                        .max_outbound
                        .saturating_sub(connected.len());
                    for peer in ctx.registry.dial_candidates(now).into_iter().take(budget.min(4)) {
                        if let Err(error) = ctx.transport.connect(&peer).await {
                            tracing::debug!(peer = %peer, %error, "Discovery dial failed");
                        }
                    }
                }
            }
        }
    }
}
