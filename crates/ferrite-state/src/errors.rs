//! # State Error Types

use ferrite_types::{Address, Digest};
use thiserror::Error;

/// Errors from world-state mutation and VM execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Debit larger than the account balance.
    #[error("Insufficient balance for {address}: have {balance}, need {needed}")]
    InsufficientBalance {
        address: Address,
        balance: u64,
        needed: u64,
    },

    /// Credit would overflow the account balance.
    #[error("Balance overflow for {address}")]
    BalanceOverflow { address: Address },

    /// Execution exceeded the gas allowance.
    #[error("Out of gas executing {tx}: limit {limit}")]
    OutOfGas { tx: Digest, limit: u64 },

    /// Transaction shape the executor cannot run.
    #[error("Unsupported transaction {tx}: {reason}")]
    Unsupported { tx: Digest, reason: String },
}
