//! # Virtual Machine Interface
//!
//! The seam the embedded VM executes through. The chain resolves each
//! input to its consumed output before calling the executor, so execution
//! is a pure function of `(transaction, resolved inputs, state, context)`
//! and replays deterministically.

use ferrite_types::{Address, Digest, Transaction, TxOutput, TxType};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::StateError;
use crate::world_state::{StateDelta, WorldState};

/// Per-block execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Height of the block being executed.
    pub block_height: u64,
    /// Header timestamp of the block being executed.
    pub block_timestamp: u64,
    /// Recipient of the block reward and fees.
    pub coinbase: Address,
    /// Gas allowance for the whole block.
    pub block_gas_limit: u64,
}

/// Outcome of executing one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Identity of the executed transaction.
    pub tx: Digest,
    /// Gas consumed.
    pub gas_used: u64,
    /// Whether execution succeeded.
    pub accepted: bool,
    /// Failure description when not accepted.
    pub error: Option<String>,
}

/// Executor contract consumed by the chain.
///
/// Implementations must be deterministic: identical inputs produce
/// identical receipts and identical state mutations, or replay breaks.
pub trait VirtualMachine: Send + Sync {
    /// Execute one transaction against the state.
    ///
    /// `resolved_inputs` holds the consumed output for each of the
    /// transaction's inputs, in input order; empty for coinbase.
    fn execute(
        &self,
        tx: &Transaction,
        resolved_inputs: &[TxOutput],
        state: &mut WorldState,
        delta: &mut StateDelta,
        ctx: &ExecutionContext,
    ) -> Result<Receipt, StateError>;
}

/// Built-in executor for plain value movement.
///
/// Handles `Coinbase` and `Regular` transactions; `Contract` transactions
/// are debited and credited like transfers and their payload is handed to
/// nothing; a real VM replaces this executor at node construction.
pub struct TransferVm {
    /// Flat gas charged per transaction.
    pub gas_per_tx: u64,
}

impl TransferVm {
    /// Executor with the default flat gas cost.
    pub fn new() -> Self {
        Self { gas_per_tx: 21_000 }
    }
}

impl Default for TransferVm {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine for TransferVm {
    fn execute(
        &self,
        tx: &Transaction,
        resolved_inputs: &[TxOutput],
        state: &mut WorldState,
        delta: &mut StateDelta,
        ctx: &ExecutionContext,
    ) -> Result<Receipt, StateError> {
        let identity = tx.identity();

        match tx.tx_type {
            TxType::Coinbase => {
                // Mint: credit outputs with no debit.
                for output in &tx.outputs {
                    state.credit(output.recipient, output.value, delta)?;
                }
            }
            TxType::Regular | TxType::Contract => {
                if resolved_inputs.len() != tx.inputs.len() {
                    return Err(StateError::Unsupported {
                        tx: identity,
                        reason: "unresolved inputs".to_string(),
                    });
                }

                // Debit each consumed output's owner; input order mirrors
                // the UTXO mutation the chain applies alongside.
                for consumed in resolved_inputs {
                    state.debit(consumed.recipient, consumed.value, delta)?;
                }
                for output in &tx.outputs {
                    state.credit(output.recipient, output.value, delta)?;
                }

                // The fee accrues to the coinbase of the including block;
                // it was already minted there, so nothing moves here.
            }
        }

        trace!(tx = %identity, height = ctx.block_height, "Executed transfer");
        Ok(Receipt {
            tx: identity,
            gas_used: self.gas_per_tx,
            accepted: true,
            error: None,
        })
    }
}
