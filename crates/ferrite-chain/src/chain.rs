//! # Blockchain
//!
//! Block application, fork choice, and reorganization over the persistent
//! stores.
//!
//! ## Invariants upheld here
//!
//! - Every applied block's parent is the prior tip (or a stored side
//!   block during reorganization), with `height = parent.height + 1`.
//! - No input is consumed unless its outpoint is unspent at the moment of
//!   application; application and reversion are the only UTXO mutators.
//! - A block application commits accounts, UTXO changes, the block, and
//!   the tip pointer in one atomic storage batch.
//! - Apply and reorganize serialize behind the chain-mutator lock; either
//!   every step of a reorganization lands or the old tip stays.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ferrite_bus::{InMemoryEventBus, NodeEvent};
use ferrite_consensus::{Attestation, DifficultyWindow, Engine, WindowEntry};
use ferrite_state::{
    AccountDelta, ExecutionContext, Receipt, StateDelta, VirtualMachine, WorldState,
};
use ferrite_storage::{BatchOperation, BlockStore, StateStore};
use ferrite_types::{
    Address, Block, BlockHeader, ChainState, Digest, OutPoint, Transaction, TxError, TxOutput,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ChainError;
use crate::finality::FinalityTracker;
use crate::fork_choice::{chain_weight, ForkChoiceRule, HeaderMeta};

/// Chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Rule weighing competing branches.
    pub fork_choice: ForkChoiceRule,
    /// Gas allowance per block.
    pub block_gas_limit: u64,
    /// Size allowance per block, bytes.
    pub block_size_limit: usize,
    /// Client-side confirmation depth heuristic, surfaced via the API.
    pub confirmations: u64,
    /// Coinbase subsidy per block.
    pub block_reward: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            fork_choice: ForkChoiceRule::HeaviestChain,
            block_gas_limit: 10_000_000,
            block_size_limit: ferrite_types::MAX_BLOCK_BYTES,
            confirmations: 6,
            block_reward: ferrite_types::BLOCK_REWARD,
        }
    }
}

/// What submitting a block did to the chain.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The block extended the canonical tip.
    Extended { block: Digest, height: u64 },
    /// Stored on a side branch; the canonical tip did not move.
    SideBranch { block: Digest },
    /// The block's branch outweighed the canonical chain and became it.
    Reorganized {
        old_tip: Digest,
        new_tip: Digest,
        /// Transactions from reverted blocks not present on the new
        /// branch; candidates for mempool readmission.
        returned: Vec<Transaction>,
    },
}

/// Sandbox re-execution result for `replay_block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    /// The replayed block.
    pub block_digest: Digest,
    /// Its parent.
    pub parent_digest: Digest,
    /// Total gas used.
    pub gas_used: u64,
    /// Per-transaction outcomes.
    pub receipts: Vec<Receipt>,
    /// Accounts touched, with before/after images.
    pub state_deltas: Vec<AccountDelta>,
    /// Whether the block validates and executes cleanly.
    pub verdict: bool,
    /// First failure, when the verdict is negative.
    pub error: Option<String>,
}

/// Side effects of one applied block, retained for cheap reversion.
struct BlockEffects {
    consumed: Vec<(OutPoint, TxOutput)>,
    produced: Vec<(OutPoint, TxOutput)>,
    delta: StateDelta,
    receipts: Vec<Receipt>,
    gas_used: u64,
    fees: u64,
}

struct ChainInner {
    initialized: bool,
    tip: Digest,
    height: u64,
    genesis: Digest,
    total_work: u128,
    utxo: HashMap<OutPoint, TxOutput>,
    world: WorldState,
    headers: HashMap<Digest, HeaderMeta>,
    children: HashMap<Digest, Vec<Digest>>,
    effects: HashMap<Digest, BlockEffects>,
    finality: FinalityTracker,
}

impl ChainInner {
    fn empty() -> Self {
        Self {
            initialized: false,
            tip: Digest::ZERO,
            height: 0,
            genesis: Digest::ZERO,
            total_work: 0,
            utxo: HashMap::new(),
            world: WorldState::new(),
            headers: HashMap::new(),
            children: HashMap::new(),
            effects: HashMap::new(),
            finality: FinalityTracker::new(),
        }
    }

    fn index_header(&mut self, digest: Digest, header: &BlockHeader) {
        self.headers.insert(
            digest,
            HeaderMeta {
                height: header.height,
                prev: header.prev_digest,
                difficulty: header.difficulty,
                timestamp: header.timestamp,
            },
        );
        let siblings = self.children.entry(header.prev_digest).or_default();
        if !siblings.contains(&digest) {
            siblings.push(digest);
        }
    }
}

/// Unix seconds from the system clock.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The canonical chain and its state.
pub struct Blockchain {
    config: ChainConfig,
    store: BlockStore,
    state_store: StateStore,
    vm: Box<dyn VirtualMachine>,
    engine: Arc<RwLock<Engine>>,
    bus: Arc<InMemoryEventBus>,
    inner: RwLock<ChainInner>,
    /// Chain-mutator lock: at most one apply or reorganization in flight.
    mutator: Mutex<()>,
}

impl Blockchain {
    /// Assemble a chain over its collaborators. Call
    /// [`Blockchain::initialize`] before use.
    pub fn new(
        config: ChainConfig,
        store: BlockStore,
        state_store: StateStore,
        vm: Box<dyn VirtualMachine>,
        engine: Arc<RwLock<Engine>>,
        bus: Arc<InMemoryEventBus>,
    ) -> Self {
        Self {
            config,
            store,
            state_store,
            vm,
            engine,
            bus,
            inner: RwLock::new(ChainInner::empty()),
            mutator: Mutex::new(()),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // =========================================================================
    // STARTUP
    // =========================================================================

    /// Load the persisted chain, or bootstrap from `genesis` on an empty
    /// store.
    pub fn initialize(&self, genesis: Block) -> Result<(), ChainError> {
        let _guard = self.mutator.lock();

        if let Some(tip) = self.store.recover()? {
            self.load_existing(tip)?;
            return Ok(());
        }

        if !genesis.is_genesis() {
            return Err(ChainError::NotInitialized);
        }
        genesis.validate_structural(now_unix_secs())?;

        let digest = genesis.identity();
        let mut utxo = HashMap::new();
        let mut world = WorldState::new();
        let effects = self.execute_block(&genesis, &mut utxo, &mut world)?;

        let mut batch = Vec::new();
        self.store.batch_commit_canonical(&genesis, &mut batch)?;
        self.compose_state_batch(&effects, &mut batch)?;
        self.store.commit(batch)?;

        let mut inner = self.inner.write();
        inner.initialized = true;
        inner.tip = digest;
        inner.height = 0;
        inner.genesis = digest;
        inner.utxo = utxo;
        inner.world = world;
        inner.index_header(digest, &genesis.header);
        inner.effects.insert(digest, effects);
        inner.total_work = chain_weight(
            self.config.fork_choice,
            &digest,
            &inner.headers,
            &inner.children,
        );
        drop(inner);

        self.engine.write().initialize(digest)?;
        info!(genesis = %digest, "Chain bootstrapped from genesis");
        Ok(())
    }

    fn load_existing(&self, tip: Block) -> Result<(), ChainError> {
        let tip_digest = tip.identity();
        let mut inner = self.inner.write();

        // Rebuild the canonical header index tip → genesis.
        let mut cursor = Some(tip.clone());
        let mut genesis_digest = None;
        while let Some(block) = cursor {
            let digest = block.identity();
            inner.index_header(digest, &block.header);
            if block.is_genesis() {
                genesis_digest = Some(digest);
                cursor = None;
            } else {
                let parent = self.store.get_block(&block.header.prev_digest)?.ok_or_else(|| {
                    ferrite_storage::StorageError::Corruption(format!(
                        "missing parent {} of persisted block {digest}",
                        block.header.prev_digest
                    ))
                })?;
                cursor = Some(parent);
            }
        }
        let genesis_digest = genesis_digest.ok_or(ChainError::NotInitialized)?;

        inner.utxo = self.state_store.scan_utxos()?.into_iter().collect();
        inner.world = WorldState::from_accounts(self.state_store.scan_accounts()?);
        inner.tip = tip_digest;
        inner.height = tip.height();
        inner.genesis = genesis_digest;
        inner.total_work = chain_weight(
            self.config.fork_choice,
            &tip_digest,
            &inner.headers,
            &inner.children,
        );
        inner.initialized = true;
        drop(inner);

        self.engine.write().initialize(genesis_digest)?;
        info!(tip = %tip_digest, height = tip.height(), "Chain recovered from storage");
        Ok(())
    }

    // =========================================================================
    // APPLICATION
    // =========================================================================

    /// Apply a block that extends the canonical tip. Atomic: either all
    /// state changes land or none.
    pub fn try_apply(&self, block: Block) -> Result<ApplyOutcome, ChainError> {
        let _guard = self.mutator.lock();
        self.apply_extending(block)
    }

    /// Submit any block: extend, park on a side branch, or trigger the
    /// fork-choice path when the block's branch outweighs the tip.
    pub fn handle_new_tip(&self, block: Block) -> Result<ApplyOutcome, ChainError> {
        let _guard = self.mutator.lock();
        let digest = block.identity();

        {
            let inner = self.inner.read();
            if !inner.initialized {
                return Err(ChainError::NotInitialized);
            }
            if inner.headers.contains_key(&digest) {
                return Err(ChainError::AlreadyKnown(digest));
            }
            if block.header.prev_digest != inner.tip
                && !inner.headers.contains_key(&block.header.prev_digest)
            {
                return Err(ChainError::Orphan {
                    block: digest,
                    missing_parent: block.header.prev_digest,
                });
            }
        }

        if block.header.prev_digest == self.inner.read().tip {
            return self.apply_extending(block);
        }

        // Side branch: park the block, then let fork choice decide.
        block.validate_structural(now_unix_secs())?;
        self.store.put_side_block(&block)?;
        {
            let mut inner = self.inner.write();
            inner.index_header(digest, &block.header);
        }

        let (candidate_weight, current_weight) = {
            let inner = self.inner.read();
            (
                chain_weight(
                    self.config.fork_choice,
                    &digest,
                    &inner.headers,
                    &inner.children,
                ),
                inner.total_work,
            )
        };

        if candidate_weight > current_weight {
            self.reorganize(digest)
        } else {
            debug!(block = %digest, candidate_weight, current_weight, "Parked side-branch block");
            Ok(ApplyOutcome::SideBranch { block: digest })
        }
    }

    fn apply_extending(&self, block: Block) -> Result<ApplyOutcome, ChainError> {
        let digest = block.identity();
        let (tip, parent_meta) = {
            let inner = self.inner.read();
            if !inner.initialized {
                return Err(ChainError::NotInitialized);
            }
            let meta = *inner
                .headers
                .get(&inner.tip)
                .ok_or(ChainError::NotFound(inner.tip))?;
            (inner.tip, meta)
        };

        if block.header.prev_digest != tip {
            return Err(ChainError::Orphan {
                block: digest,
                missing_parent: block.header.prev_digest,
            });
        }

        block.validate_structural(now_unix_secs())?;
        let parent_header = self
            .store
            .get_block(&tip)?
            .ok_or(ChainError::NotFound(tip))?
            .header;
        self.validate_consensus(&block, &parent_header, &parent_meta)?;

        let (mut utxo, mut world) = {
            let inner = self.inner.read();
            (inner.utxo.clone(), inner.world.clone())
        };
        let effects = self.execute_block(&block, &mut utxo, &mut world)?;

        let mut batch = Vec::new();
        self.store.batch_commit_canonical(&block, &mut batch)?;
        self.compose_state_batch(&effects, &mut batch)?;
        self.store.commit(batch)?;

        let included: Vec<Digest> = block.transactions.iter().map(Transaction::identity).collect();
        let height = block.height();

        {
            let mut inner = self.inner.write();
            inner.tip = digest;
            inner.height = height;
            inner.utxo = utxo;
            inner.world = world;
            inner.index_header(digest, &block.header);
            inner.effects.insert(digest, effects);
            inner.total_work = chain_weight(
                self.config.fork_choice,
                &digest,
                &inner.headers,
                &inner.children,
            );
        }

        self.engine
            .write()
            .commit_block(height, block.seal.producer());
        self.bus.publish_sync(NodeEvent::BlockApplied {
            block: digest,
            height,
            included,
        });
        info!(block = %digest, height, "Block applied");
        Ok(ApplyOutcome::Extended {
            block: digest,
            height,
        })
    }

    /// Consensus and schedule validation against a parent.
    fn validate_consensus(
        &self,
        block: &Block,
        parent_header: &BlockHeader,
        parent_meta: &HeaderMeta,
    ) -> Result<(), ChainError> {
        let engine = self.engine.read();
        engine.validate_block(block, parent_header)?;

        // PoW blocks must also follow the retarget schedule.
        if let Some(pow) = engine.as_pow() {
            let span = pow.config().retarget_interval.max(2) as usize;
            let window = self.difficulty_window_from(parent_meta, span);
            let expected = engine.next_difficulty(&window);
            if block.header.difficulty != expected {
                return Err(ChainError::WrongDifficulty {
                    declared: block.header.difficulty,
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Retarget context ending at the given parent, newest first.
    fn difficulty_window_from(&self, parent: &HeaderMeta, span: usize) -> DifficultyWindow {
        let inner = self.inner.read();
        let mut window = Vec::with_capacity(span);
        let mut meta = *parent;
        loop {
            window.push(WindowEntry {
                height: meta.height,
                timestamp: meta.timestamp,
                difficulty: meta.difficulty,
            });
            if window.len() >= span || meta.prev.is_zero() {
                break;
            }
            match inner.headers.get(&meta.prev) {
                Some(next) => meta = *next,
                None => break,
            }
        }
        window
    }

    /// Difficulty the next canonical block must carry.
    pub fn next_difficulty(&self) -> u64 {
        let tip_meta = {
            let inner = self.inner.read();
            inner.headers.get(&inner.tip).copied()
        };
        let engine = self.engine.read();
        let Some(meta) = tip_meta else {
            return engine
                .as_pow()
                .map(|p| p.config().initial_difficulty)
                .unwrap_or(0);
        };
        let span = engine
            .as_pow()
            .map(|pow| pow.config().retarget_interval.max(2) as usize)
            .unwrap_or(2);
        let window = self.difficulty_window_from(&meta, span);
        engine.next_difficulty(&window)
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Validate and execute a block's body against working copies of the
    /// UTXO set and world state, mutating them in place.
    fn execute_block(
        &self,
        block: &Block,
        utxo: &mut HashMap<OutPoint, TxOutput>,
        world: &mut WorldState,
    ) -> Result<BlockEffects, ChainError> {
        let ctx = ExecutionContext {
            block_height: block.height(),
            block_timestamp: block.header.timestamp,
            coinbase: block
                .transactions
                .first()
                .filter(|tx| tx.is_coinbase())
                .and_then(|tx| tx.outputs.first())
                .map(|out| out.recipient)
                .unwrap_or_default(),
            block_gas_limit: self.config.block_gas_limit,
        };

        let mut effects = BlockEffects {
            consumed: Vec::new(),
            produced: Vec::new(),
            delta: StateDelta::default(),
            receipts: Vec::new(),
            gas_used: 0,
            fees: 0,
        };

        for tx in &block.transactions {
            let identity = tx.identity();

            let mut resolved = Vec::with_capacity(tx.inputs.len());
            if !tx.is_coinbase() {
                if !tx.verify_signatures() {
                    return Err(ChainError::Tx {
                        tx: identity,
                        source: TxError::InvalidSignature,
                    });
                }

                let mut input_total: u64 = 0;
                for input in &tx.inputs {
                    let outpoint = input.previous_output;
                    let consumed = utxo.get(&outpoint).cloned().ok_or(ChainError::Tx {
                        tx: identity,
                        source: TxError::UnknownUtxo(outpoint),
                    })?;
                    let owner = input.public_key.to_address().map_err(|_| ChainError::Tx {
                        tx: identity,
                        source: TxError::InvalidSignature,
                    })?;
                    if owner != consumed.recipient {
                        return Err(ChainError::Tx {
                            tx: identity,
                            source: TxError::WrongOwner(outpoint),
                        });
                    }
                    input_total = input_total.saturating_add(consumed.value);
                    resolved.push(consumed);
                }

                let output_total = tx.output_total();
                if input_total < output_total {
                    return Err(ChainError::Tx {
                        tx: identity,
                        source: TxError::InputOutputMismatch {
                            input_total,
                            output_total,
                        },
                    });
                }
                effects.fees += input_total - output_total;

                // Consume inputs only after every check passed.
                for (input, consumed) in tx.inputs.iter().zip(&resolved) {
                    let outpoint = input.previous_output;
                    utxo.remove(&outpoint);
                    effects.consumed.push((outpoint, consumed.clone()));
                }
            }

            let receipt = self
                .vm
                .execute(tx, &resolved, world, &mut effects.delta, &ctx)?;
            effects.gas_used = effects.gas_used.saturating_add(receipt.gas_used);
            if effects.gas_used > self.config.block_gas_limit {
                return Err(ChainError::State(ferrite_state::StateError::OutOfGas {
                    tx: identity,
                    limit: self.config.block_gas_limit,
                }));
            }
            effects.receipts.push(receipt);

            for output in &tx.outputs {
                let outpoint = OutPoint {
                    tx: identity,
                    index: output.index,
                };
                utxo.insert(outpoint, output.clone());
                effects.produced.push((outpoint, output.clone()));
            }
        }

        // The coinbase may mint at most the subsidy plus the block's fees.
        if let Some(coinbase) = block.transactions.first().filter(|tx| tx.is_coinbase()) {
            let allowed = self.config.block_reward.saturating_add(effects.fees);
            let declared = coinbase.output_total();
            if declared > allowed {
                return Err(ChainError::CoinbaseOverpays { declared, allowed });
            }
        }

        Ok(effects)
    }

    /// Storage ops for one applied block's account and UTXO changes.
    ///
    /// Net effect only: an output both produced and consumed inside the
    /// same block never touches storage.
    fn compose_state_batch(
        &self,
        effects: &BlockEffects,
        batch: &mut Vec<BatchOperation>,
    ) -> Result<(), ChainError> {
        let produced: HashSet<OutPoint> = effects.produced.iter().map(|(o, _)| *o).collect();
        let consumed: HashSet<OutPoint> = effects.consumed.iter().map(|(o, _)| *o).collect();

        for (outpoint, _) in &effects.consumed {
            if !produced.contains(outpoint) {
                self.state_store.batch_delete_utxo(outpoint, batch);
            }
        }
        for (outpoint, output) in &effects.produced {
            if !consumed.contains(outpoint) {
                self.state_store.batch_put_utxo(outpoint, output, batch)?;
            }
        }
        for change in &effects.delta.accounts {
            self.state_store
                .batch_put_account(&change.address, &change.after, batch)?;
        }
        Ok(())
    }

    // =========================================================================
    // REORGANIZATION
    // =========================================================================

    /// Walk parents of `a` and `b` until the paths intersect.
    pub fn common_ancestor(&self, a: &Digest, b: &Digest) -> Option<Digest> {
        let inner = self.inner.read();

        let mut seen = HashSet::new();
        let mut cursor = *a;
        loop {
            seen.insert(cursor);
            match inner.headers.get(&cursor) {
                Some(meta) if !meta.prev.is_zero() => cursor = meta.prev,
                _ => break,
            }
        }

        let mut cursor = *b;
        loop {
            if seen.contains(&cursor) {
                return Some(cursor);
            }
            match inner.headers.get(&cursor) {
                Some(meta) if !meta.prev.is_zero() => cursor = meta.prev,
                _ => return None,
            }
        }
    }

    fn path_between(&self, descendant: &Digest, ancestor: &Digest) -> Vec<Digest> {
        let inner = self.inner.read();
        let mut path = Vec::new();
        let mut cursor = *descendant;
        while cursor != *ancestor {
            path.push(cursor);
            match inner.headers.get(&cursor) {
                Some(meta) => cursor = meta.prev,
                None => break,
            }
        }
        path
    }

    fn reorganize(&self, new_tip: Digest) -> Result<ApplyOutcome, ChainError> {
        let old_tip = self.inner.read().tip;
        let ancestor = self
            .common_ancestor(&old_tip, &new_tip)
            .ok_or(ChainError::NotFound(new_tip))?;

        let ancestor_height = self
            .inner
            .read()
            .headers
            .get(&ancestor)
            .map(|m| m.height)
            .ok_or(ChainError::NotFound(ancestor))?;
        let finalized_height = self.inner.read().finality.finalized_height();
        if finalized_height > 0 && ancestor_height < finalized_height {
            return Err(ChainError::FinalityViolation {
                ancestor_height,
                finalized_height,
            });
        }

        // Old-tip-first revert list; ascending apply list.
        let to_revert = self.path_between(&old_tip, &ancestor);
        let mut to_apply = self.path_between(&new_tip, &ancestor);
        to_apply.reverse();

        info!(
            %old_tip, %new_tip, %ancestor,
            revert = to_revert.len(), apply = to_apply.len(),
            "Reorganizing chain"
        );

        // Work entirely on copies; swap only on success.
        let (mut utxo, mut world) = {
            let inner = self.inner.read();
            (inner.utxo.clone(), inner.world.clone())
        };
        let mut batch: Vec<BatchOperation> = Vec::new();
        let mut returned: Vec<Transaction> = Vec::new();
        let mut new_effects: Vec<(Digest, BlockEffects)> = Vec::new();

        // Step 1: revert the old branch.
        for digest in &to_revert {
            let block = self
                .store
                .get_block(digest)?
                .ok_or(ChainError::NotFound(*digest))?;
            {
                let inner = self.inner.read();
                let effects = inner
                    .effects
                    .get(digest)
                    .ok_or_else(|| {
                        ferrite_storage::StorageError::Corruption(format!(
                            "no retained effects for canonical block {digest}"
                        ))
                    })?;

                for (outpoint, _) in &effects.produced {
                    utxo.remove(outpoint);
                    self.state_store.batch_delete_utxo(outpoint, &mut batch);
                }
                for (outpoint, output) in &effects.consumed {
                    utxo.insert(*outpoint, output.clone());
                    self.state_store.batch_put_utxo(outpoint, output, &mut batch)?;
                }
                world.revert(&effects.delta);
                for change in &effects.delta.accounts {
                    match &change.before {
                        Some(record) => self
                            .state_store
                            .batch_put_account(&change.address, record, &mut batch)?,
                        None => self.state_store.batch_delete_account(&change.address, &mut batch),
                    }
                }
            }
            self.store.batch_demote(&block, &mut batch);
            returned.extend(block.transactions.iter().filter(|tx| !tx.is_coinbase()).cloned());
        }

        // Step 2: apply the new branch; any failure keeps the old tip.
        let mut applied_txs: HashSet<Digest> = HashSet::new();
        for digest in &to_apply {
            let block = self
                .store
                .get_block(digest)?
                .ok_or(ChainError::NotFound(*digest))?;
            let parent_digest = block.header.prev_digest;
            let parent_header = self
                .store
                .get_block(&parent_digest)?
                .ok_or(ChainError::NotFound(parent_digest))?
                .header;
            let parent_meta = self
                .inner
                .read()
                .headers
                .get(&parent_digest)
                .copied()
                .ok_or(ChainError::NotFound(parent_digest))?;

            block.validate_structural(now_unix_secs())?;
            self.validate_consensus(&block, &parent_header, &parent_meta)?;
            let effects = self.execute_block(&block, &mut utxo, &mut world)?;

            self.store.batch_commit_canonical(&block, &mut batch)?;
            self.compose_state_batch(&effects, &mut batch)?;
            applied_txs.extend(block.transactions.iter().map(Transaction::identity));
            new_effects.push((*digest, effects));
        }

        self.store.batch_set_tip(&new_tip, &mut batch);
        self.store.commit(batch)?;

        let new_height = {
            let mut inner = self.inner.write();
            inner.tip = new_tip;
            inner.utxo = utxo;
            inner.world = world;
            for digest in &to_revert {
                inner.effects.remove(digest);
            }
            for (digest, effects) in new_effects {
                inner.effects.insert(digest, effects);
            }
            inner.height = inner
                .headers
                .get(&new_tip)
                .map(|m| m.height)
                .unwrap_or(inner.height);
            inner.total_work = chain_weight(
                self.config.fork_choice,
                &new_tip,
                &inner.headers,
                &inner.children,
            );
            inner.height
        };

        {
            let mut engine = self.engine.write();
            engine.commit_block(new_height, None);
        }

        let returned: Vec<Transaction> = returned
            .into_iter()
            .filter(|tx| !applied_txs.contains(&tx.identity()))
            .collect();

        self.bus.publish_sync(NodeEvent::ChainReorganized {
            old_tip,
            new_tip,
            returned_txs: returned.iter().map(Transaction::identity).collect(),
        });
        warn!(%old_tip, %new_tip, returned = returned.len(), "Chain reorganized");

        Ok(ApplyOutcome::Reorganized {
            old_tip,
            new_tip,
            returned,
        })
    }

    // =========================================================================
    // FINALITY
    // =========================================================================

    /// Record a PoS attestation. Returns true when the block just
    /// finalized. Attestations are ignored (false) under PoW/PoA.
    pub fn record_attestation(&self, attestation: &Attestation) -> Result<bool, ChainError> {
        let engine = self.engine.read();
        let Some(pos) = engine.as_pos() else {
            return Ok(false);
        };
        if !pos.verify_attestation(attestation) {
            return Err(ChainError::Consensus(
                ferrite_consensus::ConsensusError::InvalidSeal(attestation.block),
            ));
        }
        let count = pos.active_validator_count();
        drop(engine);

        let mut inner = self.inner.write();
        Ok(inner.finality.record(attestation, count))
    }

    /// The finalized frontier height (0 when nothing finalized).
    pub fn finalized_height(&self) -> u64 {
        self.inner.read().finality.finalized_height()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Canonical chain summary.
    pub fn chain_state(&self) -> Result<ChainState, ChainError> {
        let inner = self.inner.read();
        if !inner.initialized {
            return Err(ChainError::NotInitialized);
        }
        Ok(ChainState {
            tip_digest: inner.tip,
            height: inner.height,
            total_work: inner.total_work,
            genesis_digest: inner.genesis,
        })
    }

    /// Block by digest, canonical or side.
    pub fn get_block_by_digest(&self, digest: &Digest) -> Result<Option<Block>, ChainError> {
        Ok(self.store.get_block(digest)?)
    }

    /// Canonical block at a height.
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, ChainError> {
        Ok(self.store.get_block_by_height(height)?)
    }

    /// The current tip block.
    pub fn best_block(&self) -> Result<Block, ChainError> {
        let tip = self.chain_state()?.tip_digest;
        self.store
            .get_block(&tip)?
            .ok_or(ChainError::NotFound(tip))
    }

    /// The genesis block.
    pub fn genesis(&self) -> Result<Block, ChainError> {
        let genesis = self.chain_state()?.genesis_digest;
        self.store
            .get_block(&genesis)?
            .ok_or(ChainError::NotFound(genesis))
    }

    /// The tip header, for candidate construction.
    pub fn tip_header(&self) -> Result<BlockHeader, ChainError> {
        Ok(self.best_block()?.header)
    }

    /// A canonical transaction with its containing block and height.
    pub fn get_transaction(
        &self,
        tx: &Digest,
    ) -> Result<Option<(Transaction, Digest, u64)>, ChainError> {
        let Some(block_digest) = self.store.tx_location(tx)? else {
            return Ok(None);
        };
        let Some(block) = self.store.get_block(&block_digest)? else {
            return Ok(None);
        };
        let height = block.height();
        Ok(block
            .transactions
            .into_iter()
            .find(|candidate| candidate.identity() == *tx)
            .map(|found| (found, block_digest, height)))
    }

    /// An unspent output, if it exists at the tip.
    pub fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.inner.read().utxo.get(outpoint).cloned()
    }

    /// Sum of unspent outputs held by an address.
    pub fn balance(&self, address: &Address) -> u64 {
        self.inner
            .read()
            .utxo
            .values()
            .filter(|output| output.recipient == *address)
            .map(|output| output.value)
            .sum()
    }

    /// Unspent outputs held by an address.
    pub fn unspent_outputs(&self, address: &Address) -> Vec<(OutPoint, TxOutput)> {
        self.inner
            .read()
            .utxo
            .iter()
            .filter(|(_, output)| output.recipient == *address)
            .map(|(outpoint, output)| (*outpoint, output.clone()))
            .collect()
    }

    /// Deterministic root of the current world state.
    pub fn state_root(&self) -> Digest {
        self.inner.read().world.state_root()
    }

    /// Account record at the tip.
    pub fn account(&self, address: &Address) -> Option<ferrite_types::AccountRecord> {
        self.inner.read().world.get(address).cloned()
    }

    /// Number of UTXOs at the tip (stats surface).
    pub fn utxo_count(&self) -> usize {
        self.inner.read().utxo.len()
    }

    // =========================================================================
    // VERIFICATION AND REPLAY
    // =========================================================================

    /// Full-chain invariant walk: parent links, heights, Merkle roots,
    /// at-most-once inclusion.
    pub fn verify_chain(&self) -> Result<(), ChainError> {
        let state = self.chain_state()?;
        let mut seen_txs: HashSet<Digest> = HashSet::new();
        let mut prev: Option<BlockHeader> = None;

        for height in 0..=state.height {
            let block = self
                .store
                .get_block_by_height(height)?
                .ok_or(ChainError::NotInitialized)?;

            if let Some(parent) = &prev {
                if block.header.prev_digest != parent.identity()
                    || block.header.height != parent.height + 1
                {
                    return Err(ChainError::Storage(
                        ferrite_storage::StorageError::Corruption(format!(
                            "broken parent link at height {height}"
                        )),
                    ));
                }
            }

            if block.recompute_merkle_root() != block.header.merkle_root {
                return Err(ChainError::Storage(
                    ferrite_storage::StorageError::Corruption(format!(
                        "merkle root mismatch at height {height}"
                    )),
                ));
            }

            for tx in &block.transactions {
                if !seen_txs.insert(tx.identity()) {
                    return Err(ChainError::Storage(
                        ferrite_storage::StorageError::Corruption(format!(
                            "transaction {} included twice",
                            tx.identity()
                        )),
                    ));
                }
            }
            prev = Some(block.header);
        }
        Ok(())
    }

    /// Re-execute a canonical block in a sandbox: returns gas, receipts,
    /// and state deltas without mutating the chain.
    pub fn replay_block(&self, digest: &Digest) -> Result<ReplayReport, ChainError> {
        let block = self
            .store
            .get_block(digest)?
            .ok_or(ChainError::NotFound(*digest))?;
        if block.height() > 0 {
            // Replay needs the block's ancestors on the canonical path.
            let canonical_parent = self.store.digest_at_height(block.height() - 1)?;
            if canonical_parent != Some(block.header.prev_digest) {
                return Err(ChainError::NotFound(*digest));
            }
        }

        // Rebuild the parent state by replaying the canonical prefix.
        let mut utxo = HashMap::new();
        let mut world = WorldState::new();
        for height in 0..block.height() {
            let ancestor = self
                .store
                .get_block_by_height(height)?
                .ok_or(ChainError::NotInitialized)?;
            self.execute_block(&ancestor, &mut utxo, &mut world)?;
        }

        match self.execute_block(&block, &mut utxo, &mut world) {
            Ok(effects) => Ok(ReplayReport {
                block_digest: *digest,
                parent_digest: block.header.prev_digest,
                gas_used: effects.gas_used,
                receipts: effects.receipts,
                state_deltas: effects.delta.accounts,
                verdict: true,
                error: None,
            }),
            Err(error) => Ok(ReplayReport {
                block_digest: *digest,
                parent_digest: block.header.prev_digest,
                gas_used: 0,
                receipts: vec![],
                state_deltas: vec![],
                verdict: false,
                error: Some(error.to_string()),
            }),
        }
    }
}
