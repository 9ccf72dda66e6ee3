//! # Ferrite Node Runtime
//!
//! Construction and supervision of the whole node: configuration,
//! storage, genesis bootstrap, subsystem wiring, the message dispatcher,
//! the block-production loop, periodic maintenance, and graceful
//! shutdown.
//!
//! ## Wiring rules
//!
//! Subsystems never hold each other; they share the event bus and typed
//! channels owned here. Long-running work is a supervised task with a
//! cancellation signal and a stored join handle; shutdown signals every
//! task and drains joins in dependency order (producer → gossip →
//! mempool → storage).

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod genesis;
pub mod producer;
pub mod runtime;

pub use backend::RuntimeBackend;
pub use config::{ConsensusKind, NodeConfig, StorageBackend};
pub use genesis::build_genesis;
pub use runtime::{Node, NodeError};

/// Client identification advertised in handshakes and `web3_clientVersion`.
pub const USER_AGENT: &str = concat!("ferrite/", env!("CARGO_PKG_VERSION"));

/// Unix milliseconds from the system clock.
pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
