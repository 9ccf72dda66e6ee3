//! # Ferrite Test Fixtures
//!
//! Shared helpers for the end-to-end scenarios: a chain over in-memory
//! storage at difficulty 1, deterministic keypairs, funded accounts, and
//! hand-assembled work-sealed blocks.

use std::sync::Arc;

use ferrite_bus::InMemoryEventBus;
use ferrite_chain::{Blockchain, ChainConfig, ForkChoiceRule};
use ferrite_consensus::{Engine, PowConfig, PowEngine};
use ferrite_crypto::Keypair;
use ferrite_state::TransferVm;
use ferrite_storage::{BlockStore, KeyValueStore, MemoryStore, StateStore};
use ferrite_types::{
    Block, BlockHeader, Digest, OutPoint, Seal, Transaction, TxInput, TxOutput,
};
use parking_lot::RwLock;

/// Genesis timestamp every fixture chain starts at.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Deterministic keypair for a test actor.
pub fn keypair(seed: u8) -> Keypair {
    Keypair::from_bytes([seed.max(1); 32]).expect("non-zero seed is a valid key")
}

/// The fixture genesis: height 0, zero parent, empty body.
pub fn genesis_block() -> Block {
    Block::assemble(
        BlockHeader {
            version: 1,
            prev_digest: Digest::ZERO,
            merkle_root: Digest::ZERO,
            timestamp: GENESIS_TIMESTAMP,
            nonce: 0,
            difficulty: 1,
            height: 0,
            tx_count: 0,
        },
        Seal::Work,
        vec![],
    )
}

/// A PoW chain at difficulty 1 over shared in-memory storage, with the
/// event bus it publishes to.
pub fn test_chain() -> (Arc<Blockchain>, Arc<InMemoryEventBus>) {
    test_chain_with_rule(ForkChoiceRule::LongestChain)
}

/// Same, selecting the fork-choice rule.
pub fn test_chain_with_rule(rule: ForkChoiceRule) -> (Arc<Blockchain>, Arc<InMemoryEventBus>) {
    let engine = Arc::new(RwLock::new(Engine::ProofOfWork(Arc::new(PowEngine::new(
        PowConfig {
            initial_difficulty: 1,
            target_block_time_secs: 10,
            retarget_interval: 1_000,
        },
    )))));
    let bus = Arc::new(InMemoryEventBus::new());
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let chain = Arc::new(Blockchain::new(
        ChainConfig {
            fork_choice: rule,
            ..ChainConfig::default()
        },
        BlockStore::new(kv.clone()),
        StateStore::new(kv),
        Box::new(TransferVm::new()),
        engine,
        bus.clone(),
    ));
    chain.initialize(genesis_block()).expect("genesis bootstrap");
    (chain, bus)
}

/// A work-sealed child of `parent`; difficulty 1 accepts any digest, so
/// no search is needed. `salt` differentiates sibling candidates.
pub fn child_block(parent: &Block, transactions: Vec<Transaction>, salt: u64) -> Block {
    Block::assemble(
        BlockHeader {
            version: 1,
            prev_digest: parent.identity(),
            merkle_root: Digest::ZERO,
            timestamp: parent.header.timestamp + 1 + salt,
            nonce: salt,
            difficulty: 1,
            height: parent.height() + 1,
            tx_count: 0,
        },
        Seal::Work,
        transactions,
    )
}

/// A coinbase minting `value` to `recipient`'s address.
pub fn coinbase(recipient: &Keypair, value: u64, salt: u64) -> Transaction {
    Transaction::coinbase(recipient.address(), value, GENESIS_TIMESTAMP * 1000 + salt)
}

/// A signed single-input transfer consuming `funding` (the outpoint's
/// full value) and paying `amount` to `to`, with change back to `from`
/// minus `fee`.
pub fn transfer(
    from: &Keypair,
    to: &Keypair,
    funding: OutPoint,
    funding_value: u64,
    amount: u64,
    fee: u64,
) -> Transaction {
    let change = funding_value - amount - fee;
    let mut outputs = vec![TxOutput {
        value: amount,
        recipient: to.address(),
        script: vec![],
        index: 0,
    }];
    if change > 0 {
        outputs.push(TxOutput {
            value: change,
            recipient: from.address(),
            script: vec![],
            index: 1,
        });
    }
    let mut tx = Transaction::new(
        vec![TxInput::unsigned(funding, from.public_key())],
        outputs,
        GENESIS_TIMESTAMP * 1000,
    );
    tx.sign(from);
    tx
}

/// The outpoint of a transaction's single (or first) output.
pub fn outpoint_of(tx: &Transaction) -> OutPoint {
    OutPoint {
        tx: tx.identity(),
        index: 0,
    }
}
