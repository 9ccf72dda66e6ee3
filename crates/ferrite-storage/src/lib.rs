//! # Ferrite Storage
//!
//! Durable persistence behind one narrow contract: an ordered key-value
//! store with prefix scans and atomic write batches. Three backends
//! implement it: an in-memory map for tests, a JSON file store for
//! dependency-light deployments, and RocksDB behind the `rocksdb` feature
//! for production.
//!
//! ## Layout
//!
//! The [`BlockStore`] and [`StateStore`] are namespaced views over one
//! shared backend, so a block application commits accounts, UTXO changes,
//! the block itself, and the tip pointer in a single atomic batch. Crash
//! recovery trusts only the tip pointer: anything not reachable from it is
//! garbage, never truth.

pub mod block_store;
pub mod errors;
pub mod file;
pub mod kv;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod state_store;

pub use block_store::BlockStore;
pub use errors::StorageError;
pub use file::JsonFileStore;
pub use kv::{BatchOperation, KeyValueStore};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksDbConfig, RocksDbStore};
pub use state_store::StateStore;
