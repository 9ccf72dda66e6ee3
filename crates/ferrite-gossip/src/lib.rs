//! # Ferrite Gossip
//!
//! Flood with deduplication: every received or locally originated item
//! (transaction or block) is tracked in a seen-set mapping its digest to
//! the peers known to have it; forwarding targets are the best peers
//! minus that set. Inventory announcement precedes data delivery, and a
//! peer only receives a body it asked for, except newly produced items,
//! which are pushed once.
//!
//! Chain sync is headers-first: when a peer advertises a materially
//! better height, headers are fetched in batches and validated as a
//! chain, then bodies are fetched in parallel across peers and applied in
//! order. Out-of-order arrivals wait in the block pool for their parent.

pub mod errors;
pub mod relay;
pub mod sync;

pub use errors::GossipError;
pub use relay::{GossipConfig, GossipStats, Relay};
pub use sync::{SyncManager, SyncRequest, SyncStatus, INVALID_BLOCK_SCORE};
