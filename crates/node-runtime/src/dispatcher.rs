//! # Message Dispatcher
//!
//! Consumes the shared inbound queue and drives the protocol: handshake,
//! liveness, address exchange, inventory flood, data serving, block and
//! transaction ingestion, and headers-first sync. Every receipt is rate
//! limited and scored; structural garbage scores the peer, semantic
//! garbage scores harder, transport failures just drop the connection.

use std::sync::Arc;

use ferrite_chain::{ApplyOutcome, ChainError};
use ferrite_gossip::{SyncRequest, INVALID_BLOCK_SCORE};
use ferrite_mempool::MempoolError;
use ferrite_network::{Envelope, InboundMessage, InvKind, Payload};
use ferrite_types::{Block, Digest, PeerKey, Severity, Transaction, PROTOCOL_VERSION};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::now_unix_ms;
use crate::runtime::NodeContext;
use crate::USER_AGENT;

/// Bad score for a message that fails structural decoding rules.
const STRUCTURAL_SCORE: i32 = 5;
/// Bad score for blowing the rate limit.
const RATE_LIMIT_SCORE: i32 = 1;
/// Addresses accepted from one ADDR message.
const ADDR_ACCEPT_MAX: usize = 10;
/// Cap on blocks served per GETBLOCKS.
const GETBLOCKS_MAX: u32 = 500;
/// Cap on headers served per GETHEADERS.
const GETHEADERS_MAX: u32 = 2_000;

/// Drive the dispatcher until the transport closes or shutdown drops the
/// queue.
pub async fn run(ctx: Arc<NodeContext>, mut inbound: mpsc::Receiver<InboundMessage>) {
    info!("Message dispatcher started");
    while let Some(message) = inbound.recv().await {
        match message {
            InboundMessage::Connected { peer, outbound } => {
                on_connected(&ctx, &peer, outbound).await;
            }
            InboundMessage::Disconnected { peer } => {
                ctx.registry.mark_disconnected(&peer, now_unix_ms());
                ctx.limiter.forget_peer(&peer);
                ctx.bus.publish_sync(ferrite_bus::NodeEvent::PeerDisconnected(peer));
            }
            InboundMessage::Message { peer, envelope } => {
                handle_message(&ctx, &peer, envelope).await;
            }
        }
    }
    info!("Message dispatcher stopped");
}

async fn on_connected(ctx: &Arc<NodeContext>, peer: &PeerKey, outbound: bool) {
    let now = now_unix_ms();
    if !ctx.registry.admit_connection(peer, now) {
        debug!(peer = %peer, "Dropping connection from banned peer");
        ctx.transport.disconnect(peer);
        return;
    }
    ctx.bus
        .publish_sync(ferrite_bus::NodeEvent::PeerConnected(peer.clone()));

    if outbound {
        send(ctx, peer, hello_payload(ctx)).await;
    }
}

fn hello_payload(ctx: &Arc<NodeContext>) -> Payload {
    let height = ctx
        .chain
        .chain_state()
        .map(|state| state.height)
        .unwrap_or(0);
    Payload::Hello {
        node_id: ctx.node_id,
        protocol_version: PROTOCOL_VERSION,
        capabilities: vec!["full".to_string(), "relay".to_string()],
        user_agent: USER_AGENT.to_string(),
        best_height: height,
        listen_port: ctx.config.p2p_port,
    }
}


/// Publish a misbehavior observation; the event pump applies it to the
/// registry and handles the resulting ban.
async fn score_peer(ctx: &Arc<NodeContext>, peer: &PeerKey, score: i32, reason: &str) {
    ctx.bus.publish_sync(ferrite_bus::NodeEvent::MisbehaviorObserved {
        peer: peer.clone(),
        score,
        reason: reason.to_string(),
    });
}

async fn send(ctx: &Arc<NodeContext>, peer: &PeerKey, payload: Payload) {
    let envelope = Envelope::new(payload, now_unix_ms());
    if let Err(error) = ctx.transport.send(peer, &envelope).await {
        debug!(peer = %peer, %error, "Send failed");
    }
}

/// Send a REJECT for an item a peer delivered.
pub async fn send_reject(ctx: &Arc<NodeContext>, peer: &PeerKey, subject: Digest, reason: &str) {
    send(
        ctx,
        peer,
        Payload::Reject {
            reason: reason.to_string(),
            subject,
        },
    )
    .await;
}

/// Announce an item to the best peers that have not seen it, and record
/// the propagation.
pub async fn announce_inventory(
    ctx: &Arc<NodeContext>,
    kind: InvKind,
    item: Digest,
    exclude: Option<&PeerKey>,
) {
    let best = ctx.registry.best_peers(ctx.relay.config().fanout);
    let targets = ctx.relay.relay_targets(&item, &best, exclude);
    if targets.is_empty() {
        return;
    }

    let envelope = Envelope::new(
        Payload::Inv {
            kind,
            items: vec![item],
        },
        now_unix_ms(),
    );
    ctx.transport.send_many(&targets, &envelope).await;
    let now = now_unix_ms();
    ctx.relay.mark_relayed(&item, &targets, now);
    if kind == InvKind::Transaction {
        ctx.pool.record_propagation(&item, &targets, now);
    }
}

async fn handle_message(ctx: &Arc<NodeContext>, peer: &PeerKey, envelope: Envelope) {
    let now = now_unix_ms();
    let message_type = envelope.message_type();
    ctx.registry.record_activity(peer, now);

    if ctx.registry.is_banned(peer, now) {
        ctx.transport.disconnect(peer);
        return;
    }
    if !ctx.limiter.check_and_record(peer, message_type, now) {
        debug!(peer = %peer, ?message_type, "Rate limited");
        score_peer(ctx, peer, RATE_LIMIT_SCORE, "rate limit exceeded").await;
        return;
    }

    match envelope.payload {
        // =====================================================================
        // HANDSHAKE AND LIVENESS
        // =====================================================================
        Payload::Hello {
            user_agent,
            best_height,
            listen_port,
            ..
        } => {
            ctx.registry.record_handshake(peer, &user_agent, best_height);
            // The peer's canonical dialable identity.
            let canonical = PeerKey::new(peer.addr.clone(), listen_port);
            ctx.registry.observe(&canonical, now);
            ctx.registry.update_height(peer, best_height);

            send(ctx, peer, hello_payload(ctx)).await;
            send(ctx, peer, Payload::Verack).await;
            maybe_sync(ctx, peer, best_height).await;
        }
        Payload::Version {
            user_agent,
            best_height,
            ..
        } => {
            ctx.registry.record_handshake(peer, &user_agent, best_height);
            send(ctx, peer, Payload::Verack).await;
        }
        Payload::Verack => {
            send(ctx, peer, Payload::GetAddr).await;
        }
        Payload::Ping { nonce } => {
            send(ctx, peer, Payload::Pong { nonce }).await;
        }
        Payload::Pong { .. } => {
            // Activity already recorded.
        }

        // =====================================================================
        // ADDRESS EXCHANGE
        // =====================================================================
        Payload::GetAddr => {
            let peers = ctx.registry.addresses_for_gossip(ADDR_ACCEPT_MAX, now);
            send(ctx, peer, Payload::Addr { peers }).await;
        }
        Payload::Addr { peers } => {
            for key in peers.into_iter().take(ADDR_ACCEPT_MAX) {
                ctx.registry.observe(&key, now);
            }
        }

        // =====================================================================
        // INVENTORY AND DATA
        // =====================================================================
        Payload::Inv { kind, items } => {
            let wanted: Vec<Digest> = items
                .into_iter()
                .filter(|item| match kind {
                    InvKind::Transaction => {
                        !ctx.pool.contains(item) && !ctx.relay.has_seen(item)
                    }
                    InvKind::Block => {
                        !ctx.block_pool.contains(item)
                            && !matches!(ctx.chain.get_block_by_digest(item), Ok(Some(_)))
                    }
                })
                .collect();
            if !wanted.is_empty() {
                send(ctx, peer, Payload::GetData { kind, items: wanted }).await;
            }
        }
        Payload::GetData { kind, items } => {
            let mut missing = Vec::new();
            for item in items {
                match kind {
                    InvKind::Transaction => match ctx.pool.get_transaction(&item) {
                        Some(tx) => send(ctx, peer, Payload::Tx(Box::new(tx))).await,
                        None => missing.push(item),
                    },
                    InvKind::Block => match ctx.chain.get_block_by_digest(&item) {
                        Ok(Some(block)) => {
                            send(ctx, peer, Payload::Block(Box::new(block))).await
                        }
                        _ => missing.push(item),
                    },
                }
            }
            if !missing.is_empty() {
                send(ctx, peer, Payload::NotFound { items: missing }).await;
            }
        }

        // =====================================================================
        // TRANSACTIONS AND BLOCKS
        // =====================================================================
        Payload::Tx(tx) => {
            handle_transaction(ctx, peer, *tx, now).await;
        }
        Payload::Block(block) => {
            handle_block(ctx, peer, *block, now).await;
        }

        // =====================================================================
        // SYNC
        // =====================================================================
        Payload::GetHeaders { from_height, count } => {
            let count = count.min(GETHEADERS_MAX);
            let mut headers = Vec::new();
            for height in from_height..from_height + u64::from(count) {
                match ctx.chain.get_block_by_height(height) {
                    Ok(Some(block)) => headers.push(block.signed_header()),
                    _ => break,
                }
            }
            send(ctx, peer, Payload::Headers { headers }).await;
        }
        Payload::Headers { headers } => {
            let fetch_peers = ctx.registry.best_peers(ctx.relay.config().fanout);
            match ctx.sync.on_headers(peer, &headers, &fetch_peers) {
                Ok(requests) => {
                    for request in requests {
                        send_sync_request(ctx, request).await;
                    }
                }
                Err(error) => {
                    warn!(peer = %peer, %error, "Header batch rejected");
                    score_peer(ctx, peer, INVALID_BLOCK_SCORE, "invalid header batch").await;
                    ctx.sync.abort();
                }
            }
        }
        Payload::GetBlocks { from_height, count } => {
            let count = count.min(GETBLOCKS_MAX);
            for height in from_height..from_height + u64::from(count) {
                match ctx.chain.get_block_by_height(height) {
                    Ok(Some(block)) => {
                        send(ctx, peer, Payload::Block(Box::new(block))).await
                    }
                    _ => break,
                }
            }
        }

        // =====================================================================
        // MEMPOOL AND ERRORS
        // =====================================================================
        Payload::Mempool => {
            let items = ctx.pool.digests();
            if !items.is_empty() {
                send(
                    ctx,
                    peer,
                    Payload::Inv {
                        kind: InvKind::Transaction,
                        items,
                    },
                )
                .await;
            }
        }
        Payload::Reject { reason, subject } => {
            debug!(peer = %peer, %subject, %reason, "Peer rejected our item");
        }
        Payload::NotFound { items } => {
            debug!(peer = %peer, count = items.len(), "Peer lacks requested items");
        }
    }
}

async fn maybe_sync(ctx: &Arc<NodeContext>, peer: &PeerKey, peer_height: u64) {
    let local = ctx
        .chain
        .chain_state()
        .map(|state| state.height)
        .unwrap_or(0);
    if let Some(request) = ctx.sync.maybe_start(local, peer, peer_height) {
        send_sync_request(ctx, request).await;
    }
}

async fn send_sync_request(ctx: &Arc<NodeContext>, request: SyncRequest) {
    match request {
        SyncRequest::Headers {
            peer,
            from_height,
            count,
        } => {
            send(ctx, &peer, Payload::GetHeaders { from_height, count }).await;
        }
        SyncRequest::Bodies { peer, items } => {
            send(
                ctx,
                &peer,
                Payload::GetData {
                    kind: InvKind::Block,
                    items,
                },
            )
            .await;
        }
    }
}

async fn handle_transaction(ctx: &Arc<NodeContext>, peer: &PeerKey, tx: Transaction, now: u64) {
    let digest = tx.identity();
    if !ctx.relay.note_received(&digest, Some(peer), now) {
        return;
    }

    match ctx.validation.submit(tx, now, Some(peer.clone())) {
        Ok(_) => {
            // Propagation happens when validation passes, via the
            // admission event.
        }
        Err(MempoolError::Busy) => {
            debug!(peer = %peer, tx = %digest, "Validation queue full; dropped");
        }
        Err(MempoolError::Invalid { reason, .. }) => {
            score_peer(ctx, peer, STRUCTURAL_SCORE, &reason).await;
            send_reject(ctx, peer, digest, &reason).await;
        }
        Err(error) => {
            debug!(peer = %peer, tx = %digest, %error, "Admission failed");
        }
    }
}

async fn handle_block(ctx: &Arc<NodeContext>, peer: &PeerKey, block: Block, now: u64) {
    let digest = block.identity();
    if !ctx.relay.note_received(&digest, Some(peer), now) {
        return;
    }
    ctx.registry.update_height(peer, block.height());

    // Apply this block, then any buffered children it unblocks.
    let mut queue: Vec<(Block, Option<PeerKey>)> = vec![(block, Some(peer.clone()))];
    while let Some((next, source)) = queue.pop() {
        let next_digest = next.identity();
        match ctx.chain.handle_new_tip(next.clone()) {
            Ok(outcome) => {
                let landed = match &outcome {
                    ApplyOutcome::Extended { block, .. } => *block,
                    ApplyOutcome::SideBranch { block } => *block,
                    ApplyOutcome::Reorganized { new_tip, .. } => *new_tip,
                };
                if let ApplyOutcome::Reorganized { returned, .. } = outcome {
                    // Reverted transactions go back through admission;
                    // re-validation runs against the new tip.
                    for tx in returned {
                        let _ = ctx.validation.submit(tx, now, None);
                    }
                }
                for child in ctx.block_pool.take_children(&landed) {
                    queue.push((child, None));
                }
            }
            Err(ChainError::Orphan { missing_parent, .. }) => {
                debug!(block = %next_digest, parent = %missing_parent, "Buffered orphan block");
                ctx.block_pool.add_block(next, now);
                if let Some(source) = &source {
                    send(
                        ctx,
                        source,
                        Payload::GetData {
                            kind: InvKind::Block,
                            items: vec![missing_parent],
                        },
                    )
                    .await;
                }
            }
            Err(ChainError::AlreadyKnown(_)) => {}
            Err(error) => {
                let score = match error.severity() {
                    Severity::Structural | Severity::Semantic => INVALID_BLOCK_SCORE,
                    _ => 0,
                };
                warn!(block = %next_digest, %error, "Block rejected");
                if let Some(source) = &source {
                    if score > 0 {
                        score_peer(ctx, source, score, "invalid block").await;
                    }
                    send_reject(ctx, source, next_digest, &error.to_string()).await;
                }
                ctx.bus.publish_sync(ferrite_bus::NodeEvent::BlockRejected {
                    block: next_digest,
                    source: source.clone(),
                    reason: error.to_string(),
                });
                if ctx.sync.is_syncing() {
                    ctx.sync.abort();
                }
            }
        }
    }
}
