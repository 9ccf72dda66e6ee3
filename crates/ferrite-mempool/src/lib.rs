//! # Ferrite Mempool
//!
//! The thread-safe pending-transaction pool feeding the block producer,
//! plus the orphan block buffer used by gossip to reorder out-of-order
//! deliveries.
//!
//! ## Flow
//!
//! Admission inserts an unvalidated entry and enqueues its identity to the
//! validation worker; the worker checks signatures and the UTXO view, then
//! either marks the entry validated or removes it and reports the
//! supplying peer. Only validated entries are eligible for
//! [`TransactionPool::take_for_block`], whose ordering is deterministic
//! given the pool contents: fee-per-byte descending, ties broken by
//! earliest arrival, then by identity.

pub mod block_pool;
pub mod entry;
pub mod errors;
pub mod pool;
pub mod worker;

pub use block_pool::{BlockPool, BlockPoolConfig};
pub use entry::{MempoolConfig, MempoolEntry, MempoolStats};
pub use errors::{AdmissionVerdict, MempoolError};
pub use pool::TransactionPool;
pub use worker::{spawn_validation_worker, TxValidator, ValidationHandle};
