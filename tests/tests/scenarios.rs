//! End-to-end scenarios: a node's chain, mempool, and peer machinery
//! exercised together, from genesis acceptance through reorganization,
//! peer banning, and mempool eviction.

use std::sync::Arc;

use ferrite_bus::{EventFilter, NodeEvent};
use ferrite_chain::{ApplyOutcome, ChainError, ForkChoiceRule};
use ferrite_mempool::{
    spawn_validation_worker, AdmissionVerdict, MempoolConfig, TransactionPool, TxValidator,
};
use ferrite_network::{PeerRegistry, PeerRegistryConfig};
use ferrite_tests::*;
use ferrite_types::{Address, Digest, OutPoint, PeerKey, TxError, TxOutput};

// =============================================================================
// SCENARIO 1: GENESIS ACCEPTANCE
// =============================================================================

#[test]
fn genesis_acceptance() {
    let (chain, _bus) = test_chain();

    let state = chain.chain_state().unwrap();
    assert_eq!(state.height, 0);

    let genesis = chain.get_block_by_height(0).unwrap().unwrap();
    assert_eq!(genesis.identity(), state.genesis_digest);
    assert_eq!(genesis.header.prev_digest, Digest::ZERO);
    assert_eq!(genesis.header.timestamp, GENESIS_TIMESTAMP);
    assert_eq!(genesis.header.merkle_root, Digest::ZERO);
}

// =============================================================================
// SCENARIO 2: SINGLE-TRANSACTION BLOCK
// =============================================================================

#[test]
fn single_transaction_block() {
    let (chain, _bus) = test_chain();
    let alice = keypair(0xA1);
    let bob = keypair(0xB1);
    let miner = keypair(0xC1);
    let genesis = chain.genesis().unwrap();

    // Seed A with 1,000,000 in a coinbase at height 1.
    let seed = coinbase(&alice, 1_000_000, 0);
    let seed_outpoint = outpoint_of(&seed);
    let b1 = child_block(&genesis, vec![seed], 0);
    chain.try_apply(b1.clone()).unwrap();

    // A -> B of 100 with fee 10; produce block at height 2.
    let spend = transfer(&alice, &bob, seed_outpoint, 1_000_000, 100, 10);
    let reward = chain.config().block_reward;
    let b2 = child_block(&b1, vec![coinbase(&miner, reward + 10, 1), spend], 0);
    chain.try_apply(b2).unwrap();

    assert_eq!(chain.balance(&alice.address()), 999_890);
    assert_eq!(chain.balance(&bob.address()), 100);
    assert_eq!(chain.chain_state().unwrap().height, 2);
}

// =============================================================================
// SCENARIO 3: DOUBLE-SPEND REJECTION
// =============================================================================

struct ChainView(Arc<ferrite_chain::Blockchain>);

impl TxValidator for ChainView {
    fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.0.utxo(outpoint)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn double_spend_rejection() {
    let (chain, bus) = test_chain();
    let alice = keypair(0xA1);
    let mallory = keypair(0xEE);
    let genesis = chain.genesis().unwrap();

    let seed = coinbase(&alice, 1_000, 0);
    let seed_outpoint = outpoint_of(&seed);
    let b1 = child_block(&genesis, vec![seed], 0);
    chain.try_apply(b1.clone()).unwrap();

    // tx1 consumes the seed output inside block 2.
    let tx1 = transfer(&alice, &mallory, seed_outpoint, 1_000, 500, 0);
    let reward = chain.config().block_reward;
    let b2 = child_block(&b1, vec![coinbase(&alice, reward, 1), tx1], 0);
    chain.try_apply(b2.clone()).unwrap();

    // tx2 consumes the same outpoint. Admission may succeed; validation
    // against the UTXO view must reject it.
    let tx2 = transfer(&alice, &keypair(0x99), seed_outpoint, 1_000, 400, 0);
    let tx2_digest = tx2.identity();

    let pool = Arc::new(TransactionPool::with_defaults());
    let mut events = bus.subscribe(EventFilter::all());
    let (handle, worker) = spawn_validation_worker(
        pool.clone(),
        Arc::new(ChainView(chain.clone())),
        bus.clone(),
        64,
    );
    let peer = PeerKey::new("10.0.0.66", 30333);
    handle.submit(tx2, 1_000, Some(peer.clone())).unwrap();

    // The worker removes the entry and reports the supplying peer.
    let mut rejected = false;
    let mut scored = false;
    for _ in 0..2 {
        match events.recv().await.unwrap() {
            NodeEvent::TransactionRejected { tx, .. } => {
                assert_eq!(tx, tx2_digest);
                rejected = true;
            }
            NodeEvent::MisbehaviorObserved { peer: p, .. } => {
                assert_eq!(p, peer);
                scored = true;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(rejected && scored);
    assert!(!pool.contains(&tx2_digest));
    drop(handle);
    worker.await.unwrap();

    // If tx2 arrives in a block from a peer, the block is rejected and
    // the peer gains +20 bad score.
    let tx2_again = transfer(&alice, &keypair(0x98), seed_outpoint, 1_000, 300, 0);
    let bad_block = child_block(&b2, vec![coinbase(&alice, reward, 2), tx2_again], 0);
    let err = chain.handle_new_tip(bad_block).unwrap_err();
    assert!(matches!(
        err,
        ChainError::Tx {
            source: TxError::UnknownUtxo(_),
            ..
        }
    ));

    let registry = PeerRegistry::with_defaults();
    registry.observe(&peer, 0);
    registry.record_misbehavior(&peer, ferrite_gossip::INVALID_BLOCK_SCORE, 0);
    assert_eq!(registry.get(&peer).unwrap().bad_score, 20);
}

// =============================================================================
// SCENARIO 4: REORGANIZATION
// =============================================================================

#[test]
fn reorganization_across_partition() {
    // Node A mines 1,2,3; partitioned node B mines 1',2',3',4'. On heal,
    // A reorganizes to B's tip under longest-chain.
    let (chain_a, _bus) = test_chain_with_rule(ForkChoiceRule::LongestChain);
    let alice = keypair(0xA1);
    let miner_a = keypair(0x0A);
    let miner_b = keypair(0x0B);
    let genesis = chain_a.genesis().unwrap();

    // A's branch carries a spend in block 2 that B never sees.
    let seed = coinbase(&alice, 10_000, 0);
    let seed_outpoint = outpoint_of(&seed);
    let a1 = child_block(&genesis, vec![seed], 0);
    chain_a.try_apply(a1.clone()).unwrap();

    let spend = transfer(&alice, &miner_a, seed_outpoint, 10_000, 9_000, 0);
    let spend_digest = spend.identity();
    let a2 = child_block(&a1, vec![coinbase(&miner_a, 10, 1), spend], 0);
    chain_a.try_apply(a2.clone()).unwrap();
    let a3 = child_block(&a2, vec![coinbase(&miner_a, 10, 2)], 0);
    chain_a.try_apply(a3).unwrap();
    assert_eq!(chain_a.chain_state().unwrap().height, 3);

    // B's partitioned branch: four blocks from genesis.
    let b1 = child_block(&genesis, vec![coinbase(&miner_b, 20, 3)], 9);
    let b2 = child_block(&b1, vec![coinbase(&miner_b, 20, 4)], 9);
    let b3 = child_block(&b2, vec![coinbase(&miner_b, 20, 5)], 9);
    let b4 = child_block(&b3, vec![coinbase(&miner_b, 20, 6)], 9);

    // Heal the partition: B's blocks arrive at A.
    assert!(matches!(
        chain_a.handle_new_tip(b1.clone()).unwrap(),
        ApplyOutcome::SideBranch { .. }
    ));
    assert!(matches!(
        chain_a.handle_new_tip(b2.clone()).unwrap(),
        ApplyOutcome::SideBranch { .. }
    ));
    assert!(matches!(
        chain_a.handle_new_tip(b3.clone()).unwrap(),
        ApplyOutcome::SideBranch { .. }
    ));
    let outcome = chain_a.handle_new_tip(b4.clone()).unwrap();
    let ApplyOutcome::Reorganized { returned, new_tip, .. } = outcome else {
        panic!("expected reorganization, got {outcome:?}");
    };

    assert_eq!(new_tip, b4.identity());
    assert_eq!(chain_a.chain_state().unwrap().height, 4);

    // Transactions from A's reverted blocks that are not on B's branch
    // return for readmission.
    assert!(returned.iter().any(|tx| tx.identity() == spend_digest));

    // World state equals a fresh replay from genesis through 4'.
    let replay = chain_a.replay_block(&b4.identity()).unwrap();
    assert!(replay.verdict);
    assert_eq!(chain_a.balance(&miner_b.address()), 80);
    assert_eq!(chain_a.balance(&alice.address()), 0);
    chain_a.verify_chain().unwrap();
}

// =============================================================================
// SCENARIO 5: PEER BAN
// =============================================================================

#[test]
fn peer_ban_and_readmission() {
    let ban_ms = 1_000;
    let registry = PeerRegistry::new(PeerRegistryConfig {
        ban_duration_ms: ban_ms,
        ..PeerRegistryConfig::default()
    });
    let peer = PeerKey::new("203.0.113.7", 30333);
    registry.observe(&peer, 0);

    // Six structurally invalid blocks at +20 each.
    let mut banned = false;
    for _ in 0..6 {
        banned = registry.record_misbehavior(&peer, 20, 0) || banned;
    }
    assert!(banned);
    assert!(registry.get(&peer).unwrap().bad_score >= 100);

    // Connection attempts are refused until the ban elapses.
    assert!(!registry.admit_connection(&peer, 500));
    assert!(!registry.admit_connection(&peer, ban_ms - 1));

    // Then a reconnection is admitted with the score reset to 0.
    assert!(registry.admit_connection(&peer, ban_ms + 1));
    let record = registry.get(&peer).unwrap();
    assert_eq!(record.bad_score, 0);
    assert_eq!(record.good_score, 0);
    assert!(record.connected);
}

// =============================================================================
// SCENARIO 6: MEMPOOL EVICTION
// =============================================================================

#[test]
fn mempool_eviction_at_capacity() {
    let capacity = 50;
    let pool = TransactionPool::new(MempoolConfig {
        capacity,
        ..MempoolConfig::default()
    });

    // Fill to capacity; the first admission is the oldest.
    let mut first = None;
    for i in 0..capacity {
        let tx = coinbase(&keypair((i % 250 + 1) as u8), 1_000 + i as u64, i as u64);
        if first.is_none() {
            first = Some(tx.identity());
        }
        pool.add_tx(tx, 1_000 + i as u64, None).unwrap();
    }
    assert_eq!(pool.len(), capacity);
    let oldest = first.unwrap();

    // One more: size stays at capacity, the oldest is gone, the newest
    // is present.
    let newest = coinbase(&keypair(0xFE), 9_999, 9_999);
    let newest_digest = newest.identity();
    let verdict = pool.add_tx(newest, 99_999, None).unwrap();

    assert_eq!(verdict, AdmissionVerdict::CapacityEvicted(oldest));
    assert_eq!(pool.len(), capacity);
    assert!(!pool.contains(&oldest));
    assert!(pool.contains(&newest_digest));
}

// =============================================================================
// ROUND-TRIP AND IDEMPOTENCE PROPERTIES
// =============================================================================

#[test]
fn block_encoding_round_trip_preserves_identity() {
    let (chain, _bus) = test_chain();
    let genesis = chain.genesis().unwrap();
    let block = child_block(&genesis, vec![coinbase(&keypair(1), 5, 0)], 0);

    let bytes = bincode::serialize(&block).unwrap();
    let decoded: ferrite_types::Block = bincode::deserialize(&bytes).unwrap();
    assert_eq!(decoded, block);
    assert_eq!(decoded.identity(), block.identity());
}

#[test]
fn at_most_once_inclusion_holds_on_canonical_chain() {
    let (chain, _bus) = test_chain();
    let miner = keypair(0x01);
    let genesis = chain.genesis().unwrap();

    let mut parent = genesis;
    for salt in 0..5 {
        let block = child_block(&parent, vec![coinbase(&miner, 5, salt)], 0);
        chain.try_apply(block.clone()).unwrap();
        parent = block;
    }
    // verify_chain enforces parent links, Merkle roots, and at-most-once
    // inclusion across the whole canonical path.
    chain.verify_chain().unwrap();
}

#[test]
fn canonical_blocks_link_and_heights_increment() {
    let (chain, _bus) = test_chain();
    let miner = keypair(0x01);
    let genesis = chain.genesis().unwrap();

    let b1 = child_block(&genesis, vec![coinbase(&miner, 5, 0)], 0);
    chain.try_apply(b1.clone()).unwrap();
    let b2 = child_block(&b1, vec![coinbase(&miner, 5, 1)], 0);
    chain.try_apply(b2.clone()).unwrap();

    for height in 1..=2u64 {
        let block = chain.get_block_by_height(height).unwrap().unwrap();
        let parent = chain
            .get_block_by_digest(&block.header.prev_digest)
            .unwrap()
            .unwrap();
        assert_eq!(block.header.height, parent.header.height + 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn admitted_transaction_leaves_pool_once_included() {
    let (chain, bus) = test_chain();
    let alice = keypair(0xA1);
    let bob = keypair(0xB1);
    let genesis = chain.genesis().unwrap();

    let seed = coinbase(&alice, 1_000, 0);
    let seed_outpoint = outpoint_of(&seed);
    let b1 = child_block(&genesis, vec![seed], 0);
    chain.try_apply(b1.clone()).unwrap();

    let pool = Arc::new(TransactionPool::with_defaults());
    let mut events = bus.subscribe(EventFilter::all());
    let (handle, worker) = spawn_validation_worker(
        pool.clone(),
        Arc::new(ChainView(chain.clone())),
        bus.clone(),
        64,
    );

    let spend = transfer(&alice, &bob, seed_outpoint, 1_000, 100, 10);
    let spend_digest = spend.identity();
    handle.submit(spend.clone(), 1_000, None).unwrap();

    // Wait for validation to pass.
    loop {
        match events.recv().await.unwrap() {
            NodeEvent::TransactionAdmitted { tx, .. } if tx == spend_digest => break,
            _ => continue,
        }
    }
    assert_eq!(pool.take_for_block(10, 1 << 20, u64::MAX).len(), 1);

    // Include it in a block, then purge as the runtime does on apply.
    let reward = chain.config().block_reward;
    let b2 = child_block(&b1, vec![coinbase(&keypair(0xC1), reward + 10, 1), spend], 0);
    chain.try_apply(b2).unwrap();
    loop {
        match events.recv().await.unwrap() {
            NodeEvent::BlockApplied { included, .. } => {
                pool.purge_included(&included);
                break;
            }
            _ => continue,
        }
    }
    assert!(pool.is_empty());

    drop(handle);
    worker.await.unwrap();
}

#[test]
fn equal_length_fork_keeps_current_tip() {
    let (chain, _bus) = test_chain_with_rule(ForkChoiceRule::LongestChain);
    let genesis = chain.genesis().unwrap();
    let miner = keypair(0x01);

    let b1 = child_block(&genesis, vec![coinbase(&miner, 1, 0)], 0);
    chain.try_apply(b1.clone()).unwrap();

    let rival = child_block(&genesis, vec![coinbase(&miner, 2, 1)], 7);
    let outcome = chain.handle_new_tip(rival).unwrap();
    assert!(matches!(outcome, ApplyOutcome::SideBranch { .. }));
    assert_eq!(chain.chain_state().unwrap().tip_digest, b1.identity());
}

#[test]
fn balance_is_utxo_sum() {
    let (chain, _bus) = test_chain();
    let alice = keypair(0xA1);
    let genesis = chain.genesis().unwrap();

    let b1 = child_block(&genesis, vec![coinbase(&alice, 600, 0)], 0);
    chain.try_apply(b1.clone()).unwrap();
    let b2 = child_block(&b1, vec![coinbase(&alice, 400, 1)], 0);
    chain.try_apply(b2).unwrap();

    assert_eq!(chain.balance(&alice.address()), 1_000);
    assert_eq!(chain.unspent_outputs(&alice.address()).len(), 2);
    assert_eq!(chain.balance(&Address([0xFF; 20])), 0);
}
