//! # Block Production Loop
//!
//! At most one producer task. Each round drains a snapshot of validated
//! transactions from the mempool, assembles a candidate on the current
//! tip, seals it through the consensus engine, and applies it through the
//! chain. Sealing is cancellable: a tip change or shutdown flips the
//! cancel flag, the in-flight seal aborts, and the loop restarts against
//! the new parent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferrite_bus::{EventFilter, EventTopic};
use ferrite_chain::ChainError;
use ferrite_consensus::ConsensusError;
use ferrite_network::{Envelope, Payload};
use ferrite_types::{Block, BlockHeader, Digest, Transaction, PROTOCOL_VERSION};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::now_unix_ms;
use crate::runtime::NodeContext;

/// Transactions drained per candidate.
const MAX_TXS_PER_BLOCK: usize = 1_000;
/// Body-size headroom left for the header and coinbase.
const BLOCK_HEADROOM_BYTES: usize = 4 * 1024;

/// Run the producer until shutdown.
pub async fn run(ctx: Arc<NodeContext>, mut shutdown: watch::Receiver<bool>) {
    info!("Producer loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if !ctx.mining.load(Ordering::Relaxed) {
            if wait_or_shutdown(&mut shutdown, 1).await {
                break;
            }
            continue;
        }

        match produce_one(&ctx, &shutdown).await {
            Ok(true) => {}
            Ok(false) => {
                // Cancelled or paced; yield briefly before retrying.
                if wait_or_shutdown(&mut shutdown, 0).await {
                    break;
                }
            }
            Err(error) => {
                warn!(%error, "Production round failed");
                if wait_or_shutdown(&mut shutdown, 1).await {
                    break;
                }
            }
        }
    }
    info!("Producer loop stopped");
}

/// Sleep `secs` (or just yield when zero); true means shutdown fired.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, secs: u64) -> bool {
    if secs == 0 {
        tokio::task::yield_now().await;
        return *shutdown.borrow();
    }
    tokio::select! {
        _ = shutdown.changed() => *shutdown.borrow(),
        _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => false,
    }
}

async fn produce_one(
    ctx: &Arc<NodeContext>,
    shutdown: &watch::Receiver<bool>,
) -> Result<bool, String> {
    let parent = ctx.chain.tip_header().map_err(|e| e.to_string())?;
    let parent_digest = parent.identity();
    let now_secs = now_unix_ms() / 1000;

    // Signature rules enforce a block time; wait out the spacing.
    let spacing = ctx.engine.read().spacing_secs();
    let earliest = parent.timestamp + spacing.max(1);
    if spacing > 0 && now_secs < earliest {
        tokio::time::sleep(std::time::Duration::from_secs(earliest - now_secs)).await;
        return Ok(false);
    }

    // Snapshot the mempool; anything admitted later waits for the next
    // candidate.
    let drained = ctx.pool.take_for_block(
        MAX_TXS_PER_BLOCK,
        ctx.config.block_size_limit.saturating_sub(BLOCK_HEADROOM_BYTES),
        ctx.config.block_gas_limit,
    );

    // Resolve fees against the tip; stale entries drop out here.
    let mut fees = 0u64;
    let mut included: Vec<Transaction> = Vec::with_capacity(drained.len() + 1);
    for tx in drained {
        match tx.fee(|outpoint| ctx.chain.utxo(outpoint).map(|output| output.value)) {
            Some(fee) => {
                fees += fee;
                included.push(tx);
            }
            None => {
                debug!(tx = %tx.identity(), "Dropping stale mempool entry from candidate");
            }
        }
    }

    let reward = ctx.chain.config().block_reward;
    let coinbase = Transaction::coinbase(ctx.producer_address, reward + fees, now_unix_ms());
    let mut body = Vec::with_capacity(included.len() + 1);
    body.push(coinbase);
    body.extend(included);

    let candidate = Block::assemble(
        BlockHeader {
            version: PROTOCOL_VERSION,
            prev_digest: parent_digest,
            merkle_root: Digest::ZERO,
            timestamp: now_secs.max(parent.timestamp + 1),
            nonce: 0,
            difficulty: ctx.chain.next_difficulty(),
            height: parent.height + 1,
            tx_count: 0,
        },
        ferrite_types::Seal::Work,
        body,
    );

    // Seal. The engine lock is held only for the synchronous start; PoW
    // mining runs on the job handle with the cancel flag.
    let job = ctx
        .engine
        .read()
        .begin_seal(candidate.header.clone())
        .map_err(|e| e.to_string())?;

    let cancel = Arc::new(AtomicBool::new(false));
    let watcher = tokio::spawn(cancel_on_tip_change(
        ctx.clone(),
        parent_digest,
        cancel.clone(),
        shutdown.clone(),
    ));

    let outcome = job.finish(now_secs, cancel).await;
    watcher.abort();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(ConsensusError::Cancelled) => {
            debug!("Seal cancelled; restarting with new parent");
            return Ok(false);
        }
        Err(error) => return Err(error.to_string()),
    };

    let block = Block {
        header: outcome.header,
        seal: outcome.seal,
        transactions: candidate.transactions,
    };
    let digest = block.identity();

    match ctx.chain.try_apply(block.clone()) {
        Ok(_) => {
            info!(block = %digest, height = block.height(), "Produced block");
            push_new_block(ctx, block).await;
            Ok(true)
        }
        Err(ChainError::Orphan { .. }) => {
            // The tip moved between sealing and applying.
            Ok(false)
        }
        Err(error) => Err(error.to_string()),
    }
}

/// Watch chain events; flip the cancel flag when the tip leaves the
/// parent we are sealing against.
async fn cancel_on_tip_change(
    ctx: Arc<NodeContext>,
    parent: Digest,
    cancel: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut subscription = ctx.bus.subscribe(EventFilter::topics(vec![EventTopic::Chain]));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    cancel.store(true, Ordering::Relaxed);
                    break;
                }
            }
            event = subscription.recv() => {
                if event.is_err() {
                    break;
                }
                let tip = ctx
                    .chain
                    .chain_state()
                    .map(|state| state.tip_digest)
                    .unwrap_or(parent);
                if tip != parent {
                    debug!("Tip changed mid-seal; cancelling");
                    cancel.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
    }
}

/// Push a freshly produced block once to the best peers, then rely on
/// inventory flood for the rest of the network.
async fn push_new_block(ctx: &Arc<NodeContext>, block: Block) {
    let digest = block.identity();
    let now = now_unix_ms();
    ctx.relay.note_received(&digest, None, now);

    let best = ctx.registry.best_peers(ctx.relay.config().fanout);
    let targets = ctx.relay.relay_targets(&digest, &best, None);
    if targets.is_empty() {
        return;
    }
    let envelope = Envelope::new(Payload::Block(Box::new(block)), now);
    ctx.transport.send_many(&targets, &envelope).await;
    ctx.relay.mark_relayed(&digest, &targets, now);
}
