//! # Failure Taxonomy
//!
//! Shared severity classes plus the transaction and block validation
//! errors. Subsystem-specific errors live with their subsystem; everything
//! that crosses a component boundary classifies itself into a [`Severity`]
//! so gossip paths can decide between scoring, banning, and dropping.

use ferrite_crypto::Digest;
use thiserror::Error;

use crate::transaction::OutPoint;

/// Classification of a failure for propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Malformed input: parse failures, bad sizes, wrong types. Scored
    /// negatively on gossip paths.
    Structural,
    /// Valid shape, invalid content: bad signature, double spend, wrong
    /// Merkle root. Ban-worthy on gossip paths.
    Semantic,
    /// Capacity, rate limit, or timeout. Retriable.
    Resource,
    /// Socket disconnect, partial read. Peer dropped, not banned.
    Transient,
    /// Storage invariants broken. Fatal; the node exits.
    Corruption,
    /// Reorganization attempted past a finalized block.
    Finality,
}

/// Transaction validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// At least one input signature does not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Input values do not cover output values.
    #[error("Input total {input_total} below output total {output_total}")]
    InputOutputMismatch {
        input_total: u64,
        output_total: u64,
    },

    /// A non-coinbase transaction must consume at least one output.
    #[error("Non-coinbase transaction has no inputs")]
    EmptyInputsNonCoinbase,

    /// A coinbase transaction must not consume outputs.
    #[error("Coinbase transaction has inputs")]
    CoinbaseWithInputs,

    /// Every transaction must produce at least one output.
    #[error("Transaction has no outputs")]
    NoOutputs,

    /// Serialized size exceeds the configured maximum.
    #[error("Transaction size {size} exceeds maximum {max}")]
    Oversized { size: usize, max: usize },

    /// The same outpoint is consumed twice.
    #[error("Duplicate input {0:?}")]
    DuplicateInput(OutPoint),

    /// Output index field disagrees with its position.
    #[error("Output at position {position} declares index {index}")]
    BadOutputIndex { position: usize, index: u32 },

    /// Output values overflow u64.
    #[error("Output value overflow")]
    ValueOverflow,

    /// Input index passed to a per-input operation is out of range.
    #[error("Input index {0} out of range")]
    InputIndexOutOfRange(usize),

    /// An input references an outpoint absent from the UTXO set.
    #[error("Unknown UTXO {0:?}")]
    UnknownUtxo(OutPoint),

    /// An input's public key does not own the referenced output.
    #[error("Input {0:?} signed by a key that does not own the output")]
    WrongOwner(OutPoint),
}

impl TxError {
    /// Taxonomy class of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            TxError::EmptyInputsNonCoinbase
            | TxError::CoinbaseWithInputs
            | TxError::NoOutputs
            | TxError::Oversized { .. }
            | TxError::DuplicateInput(_)
            | TxError::BadOutputIndex { .. }
            | TxError::ValueOverflow
            | TxError::InputIndexOutOfRange(_) => Severity::Structural,
            TxError::InvalidSignature
            | TxError::InputOutputMismatch { .. }
            | TxError::UnknownUtxo(_)
            | TxError::WrongOwner(_) => Severity::Semantic,
        }
    }
}

/// Block validation failures (structural; consensus failures live with the
/// consensus engine).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// Header transaction count disagrees with the body.
    #[error("Header declares {declared} transactions, body has {actual}")]
    TxCountMismatch { declared: u32, actual: usize },

    /// Header Merkle root disagrees with the body.
    #[error("Merkle root mismatch: header {declared}, computed {computed}")]
    MerkleRootMismatch { declared: Digest, computed: Digest },

    /// Non-genesis block without a leading coinbase.
    #[error("First transaction is not a coinbase")]
    MissingCoinbase,

    /// Genesis must not carry a coinbase.
    #[error("Genesis block carries a coinbase")]
    CoinbaseInGenesis,

    /// A coinbase appears after the first position.
    #[error("Coinbase transaction outside the first position")]
    MisplacedCoinbase,

    /// Header timestamp too far past the validator's clock.
    #[error("Timestamp {timestamp} too far in the future of {now}")]
    TimestampTooFarInFuture { timestamp: u64, now: u64 },

    /// Serialized size exceeds the configured maximum.
    #[error("Block size {size} exceeds maximum {max}")]
    Oversized { size: usize, max: usize },

    /// A body transaction failed validation.
    #[error("Invalid transaction {tx}: {source}")]
    InvalidTransaction {
        tx: Digest,
        #[source]
        source: TxError,
    },
}

impl BlockError {
    /// Taxonomy class of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            BlockError::TxCountMismatch { .. }
            | BlockError::MissingCoinbase
            | BlockError::CoinbaseInGenesis
            | BlockError::MisplacedCoinbase
            | BlockError::Oversized { .. } => Severity::Structural,
            BlockError::MerkleRootMismatch { .. }
            | BlockError::TimestampTooFarInFuture { .. } => Severity::Semantic,
            BlockError::InvalidTransaction { source, .. } => source.severity(),
        }
    }
}
