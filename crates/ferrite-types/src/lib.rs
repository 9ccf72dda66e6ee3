//! # Ferrite Core Domain Entities
//!
//! Defines the chain data model shared by every subsystem.
//!
//! ## Clusters
//!
//! - **Chain**: [`Transaction`], [`Block`], [`BlockHeader`], [`Seal`]
//! - **Value**: [`OutPoint`], [`TxOutput`] (the UTXO unit)
//! - **State**: [`AccountRecord`], [`ChainState`]
//! - **Errors**: the failure taxonomy shared across subsystem boundaries
//!
//! Cross-subsystem types live here so no subsystem crate depends on another
//! for its data model; behavior stays in the owning subsystem.

pub mod block;
pub mod entities;
pub mod errors;
pub mod transaction;

pub use block::{Block, BlockHeader, Seal, SignedHeader};
pub use entities::{AccountRecord, ChainState, PeerKey};
pub use errors::{BlockError, Severity, TxError};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput, TxType};

// Re-export the primitive identifier types so downstream crates can name
// them without a direct ferrite-crypto dependency.
pub use ferrite_crypto::{Address, Digest, PublicKeyBytes, SignatureBytes};

/// Protocol version carried in headers, transactions, and the wire envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum serialized transaction size in bytes.
pub const MAX_TX_BYTES: usize = 128 * 1024;

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_BYTES: usize = 1024 * 1024;

/// Maximum tolerated clock skew for header timestamps, in seconds.
pub const MAX_CLOCK_SKEW_SECS: u64 = 2 * 60 * 60;

/// Block subsidy paid to the coinbase, in base units.
pub const BLOCK_REWARD: u64 = 50 * 100_000_000;
