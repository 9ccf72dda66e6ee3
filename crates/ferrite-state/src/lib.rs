//! # Ferrite World State
//!
//! The account map mutated by transaction execution, its deterministic
//! root accumulation, and the seam the embedded virtual machine plugs
//! into. The VM itself is an external collaborator: this crate specifies
//! the contract it executes against and ships the built-in transfer
//! executor used for plain value movements.

pub mod errors;
pub mod vm;
pub mod world_state;

pub use errors::StateError;
pub use vm::{ExecutionContext, Receipt, TransferVm, VirtualMachine};
pub use world_state::{AccountDelta, StateDelta, WorldState};
