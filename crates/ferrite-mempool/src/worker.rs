//! # Validation Worker
//!
//! Single consumer of the admission queue. Admission inserts an
//! unvalidated entry and enqueues its identity; the worker verifies
//! signatures and the UTXO view, then either marks the entry validated
//! (publishing the admission event for gossip) or removes it and reports
//! the supplying peer.

use std::sync::Arc;

use ferrite_bus::{EventPublisher, InMemoryEventBus, NodeEvent};
use ferrite_types::{Digest, OutPoint, PeerKey, Transaction, TxOutput};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{AdmissionVerdict, MempoolError};
use crate::pool::TransactionPool;

/// Misbehavior score charged to a peer that supplied an invalid
/// transaction.
pub const INVALID_TX_SCORE: i32 = 10;

/// UTXO view the worker validates against; a snapshot consistent with the
/// current tip.
pub trait TxValidator: Send + Sync {
    /// The unspent output an input references, if it exists.
    fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput>;
}

/// Admission front-end: bounded queue plus the pool.
#[derive(Clone)]
pub struct ValidationHandle {
    pool: Arc<TransactionPool>,
    queue: mpsc::Sender<Digest>,
}

impl ValidationHandle {
    /// Admit a transaction and queue it for validation.
    ///
    /// Returns `Busy` without inserting when the validation queue is full.
    pub fn submit(
        &self,
        tx: Transaction,
        now_ms: u64,
        source: Option<PeerKey>,
    ) -> Result<AdmissionVerdict, MempoolError> {
        let permit = self.queue.try_reserve().map_err(|_| MempoolError::Busy)?;
        let digest = tx.identity();

        let verdict = self.pool.add_tx(tx, now_ms, source)?;
        match verdict {
            AdmissionVerdict::DuplicateDropped => {
                // Nothing new to validate; release the slot.
                drop(permit);
            }
            AdmissionVerdict::Accepted | AdmissionVerdict::CapacityEvicted(_) => {
                permit.send(digest);
            }
        }
        Ok(verdict)
    }

    /// The pool behind this handle.
    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }
}

/// Validate one pooled transaction against signatures and the UTXO view.
///
/// Returns the fee on success.
fn validate_entry(
    tx: &Transaction,
    validator: &dyn TxValidator,
) -> Result<u64, String> {
    if !tx.verify_signatures() {
        return Err("invalid signature".to_string());
    }

    let mut input_total: u64 = 0;
    for input in &tx.inputs {
        let outpoint = input.previous_output;
        let consumed = validator
            .utxo(&outpoint)
            .ok_or_else(|| format!("unknown utxo {}:{}", outpoint.tx, outpoint.index))?;
        let owner = input
            .public_key
            .to_address()
            .map_err(|_| "invalid public key".to_string())?;
        if owner != consumed.recipient {
            return Err(format!("input {}:{} not owned by signer", outpoint.tx, outpoint.index));
        }
        input_total = input_total
            .checked_add(consumed.value)
            .ok_or_else(|| "input value overflow".to_string())?;
    }

    let output_total = tx.output_total();
    if tx.is_coinbase() {
        return Ok(0);
    }
    input_total
        .checked_sub(output_total)
        .ok_or_else(|| format!("outputs {output_total} exceed inputs {input_total}"))
}

/// Spawn the validation worker.
///
/// The worker exits when every [`ValidationHandle`] clone is dropped.
pub fn spawn_validation_worker(
    pool: Arc<TransactionPool>,
    validator: Arc<dyn TxValidator>,
    bus: Arc<InMemoryEventBus>,
    queue_capacity: usize,
) -> (ValidationHandle, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<Digest>(queue_capacity);
    let handle = ValidationHandle {
        pool: pool.clone(),
        queue: sender,
    };

    let join = tokio::spawn(async move {
        info!("Mempool validation worker started");
        while let Some(digest) = receiver.recv().await {
            let Some(tx) = pool.get_transaction(&digest) else {
                // Evicted or purged while queued.
                continue;
            };

            match validate_entry(&tx, validator.as_ref()) {
                Ok(fee) => {
                    if pool.mark_validated(&digest, fee).is_ok() {
                        debug!(tx = %digest, fee, "Transaction validated");
                        bus.publish(NodeEvent::TransactionAdmitted {
                            tx: digest,
                            source: pool.source_of(&digest),
                        })
                        .await;
                    }
                }
                Err(reason) => {
                    let source = pool.remove(&digest).and_then(|entry| entry.source);
                    warn!(tx = %digest, %reason, "Transaction rejected by validation");
                    if let Some(peer) = source.clone() {
                        bus.publish(NodeEvent::MisbehaviorObserved {
                            peer,
                            score: INVALID_TX_SCORE,
                            reason: reason.clone(),
                        })
                        .await;
                    }
                    bus.publish(NodeEvent::TransactionRejected {
                        tx: digest,
                        source,
                        reason,
                    })
                    .await;
                }
            }
        }
        info!("Mempool validation worker stopped");
    });

    (handle, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_bus::EventFilter;
    use ferrite_crypto::Keypair;
    use ferrite_types::{Address, TxInput};
    use std::collections::HashMap;

    struct MapValidator {
        utxos: HashMap<OutPoint, TxOutput>,
    }

    impl TxValidator for MapValidator {
        fn utxo(&self, outpoint: &OutPoint) -> Option<TxOutput> {
            self.utxos.get(outpoint).cloned()
        }
    }

    fn funded_transfer(kp: &Keypair, value: u64, funding: u64) -> (Transaction, MapValidator) {
        let outpoint = OutPoint {
            tx: Digest([0x77; 32]),
            index: 0,
        };
        let mut tx = Transaction::new(
            vec![TxInput::unsigned(outpoint, kp.public_key())],
            vec![TxOutput {
                value,
                recipient: Address([0xBB; 20]),
                script: vec![],
                index: 0,
            }],
            1,
        );
        tx.sign(kp);

        let mut utxos = HashMap::new();
        utxos.insert(
            outpoint,
            TxOutput {
                value: funding,
                recipient: kp.address(),
                script: vec![],
                index: 0,
            },
        );
        (tx, MapValidator { utxos })
    }

    #[tokio::test]
    async fn test_valid_tx_is_marked_and_announced() {
        let kp = Keypair::from_bytes([1; 32]).unwrap();
        let (tx, validator) = funded_transfer(&kp, 100, 110);
        let digest = tx.identity();

        let pool = Arc::new(TransactionPool::with_defaults());
        let bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe(EventFilter::all());

        let (handle, join) =
            spawn_validation_worker(pool.clone(), Arc::new(validator), bus.clone(), 16);
        assert_eq!(
            handle.submit(tx, 1_000, None).unwrap(),
            AdmissionVerdict::Accepted
        );

        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event,
            NodeEvent::TransactionAdmitted { tx, .. } if tx == digest
        ));

        // Fee 10 resolved during validation.
        let drained = pool.take_for_block(10, 1 << 20, u64::MAX);
        assert_eq!(drained.len(), 1);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_double_spend_view_rejects_and_scores_peer() {
        let kp = Keypair::from_bytes([1; 32]).unwrap();
        let (tx, _) = funded_transfer(&kp, 100, 110);
        let digest = tx.identity();

        // Validator with an empty UTXO view: every input is unknown.
        let validator = MapValidator {
            utxos: HashMap::new(),
        };
        let pool = Arc::new(TransactionPool::with_defaults());
        let bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe(EventFilter::all());

        let peer = PeerKey::new("10.0.0.9", 30333);
        let (handle, join) =
            spawn_validation_worker(pool.clone(), Arc::new(validator), bus.clone(), 16);
        handle.submit(tx, 1_000, Some(peer.clone())).unwrap();

        let mut saw_misbehavior = false;
        let mut saw_reject = false;
        for _ in 0..2 {
            match sub.recv().await.unwrap() {
                NodeEvent::MisbehaviorObserved { peer: p, score, .. } => {
                    assert_eq!(p, peer);
                    assert_eq!(score, INVALID_TX_SCORE);
                    saw_misbehavior = true;
                }
                NodeEvent::TransactionRejected { tx, .. } => {
                    assert_eq!(tx, digest);
                    saw_reject = true;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_misbehavior && saw_reject);
        assert!(!pool.contains(&digest));

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_returns_busy() {
        let kp = Keypair::from_bytes([1; 32]).unwrap();
        let pool = Arc::new(TransactionPool::with_defaults());
        let (sender, receiver) = mpsc::channel::<Digest>(1);
        // Keep the receiver alive but never drain it.
        let handle = ValidationHandle {
            pool: pool.clone(),
            queue: sender,
        };

        let (tx1, _) = funded_transfer(&kp, 1, 2);
        handle.submit(tx1, 1_000, None).unwrap();

        let kp2 = Keypair::from_bytes([2; 32]).unwrap();
        let (tx2, _) = funded_transfer(&kp2, 1, 2);
        assert!(matches!(
            handle.submit(tx2, 1_000, None),
            Err(MempoolError::Busy)
        ));

        drop(receiver);
    }

    #[test]
    fn test_validate_entry_fee() {
        let kp = Keypair::from_bytes([1; 32]).unwrap();
        let (tx, validator) = funded_transfer(&kp, 100, 110);
        assert_eq!(validate_entry(&tx, &validator), Ok(10));
    }

    #[test]
    fn test_validate_entry_wrong_owner() {
        let kp = Keypair::from_bytes([1; 32]).unwrap();
        let (tx, mut validator) = funded_transfer(&kp, 100, 110);
        for utxo in validator.utxos.values_mut() {
            utxo.recipient = Address([0xEE; 20]);
        }
        assert!(validate_entry(&tx, &validator).is_err());
    }
}
