//! # Ferrite Chain
//!
//! The canonical chain and everything that decides it: the block index,
//! the UTXO set, block application with atomic persistence, the
//! fork-choice rule, the reorganization protocol, and PoS finality.
//!
//! ## Ownership
//!
//! Blocks live in the owned block store and are addressed by digest;
//! "parent" is a lookup, never a held pointer, so the block graph cannot
//! form reference cycles. The chain owns every block on the canonical
//! path; competing branches stay in the store as side blocks until fork
//! choice promotes or gossip's block pool expires them.
//!
//! ## Concurrency
//!
//! All mutation (apply and reorganize) serializes behind one chain-mutator
//! lock; readers take a shared snapshot and never observe a partially
//! applied block.

pub mod chain;
pub mod errors;
pub mod finality;
pub mod fork_choice;

pub use chain::{ApplyOutcome, Blockchain, ChainConfig, ReplayReport};
pub use errors::ChainError;
pub use finality::FinalityTracker;
pub use fork_choice::{chain_weight, ForkChoiceRule, HeaderMeta};
