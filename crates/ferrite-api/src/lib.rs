//! # Ferrite API Gateway
//!
//! The external request/response surface: one JSON-RPC 2.0 POST endpoint
//! carrying the node's native methods plus web3-style compatibility
//! aliases. The gateway talks to the core through the [`NodeBackend`]
//! trait; the runtime provides the implementation, so this crate never
//! holds the subsystems directly.
//!
//! Transport authentication is optional HTTP Basic; numeric returns on
//! `eth_*` methods are `0x`-prefixed hex.

pub mod backend;
pub mod error;
pub mod rpc;
pub mod server;

pub use backend::{NodeBackend, NodeInfo};
pub use error::ApiError;
pub use rpc::{dispatch, RpcRequest, RpcResponse};
pub use server::{serve, ApiConfig};
