//! # Ferrite Network
//!
//! The peer-to-peer transport layer: length-prefixed frames over TCP, the
//! typed message envelope with its wire codepoints, and the peer registry
//! with behavior scoring, bans, and per-message-type rate limits.
//!
//! ## Tasks
//!
//! One reader task per live connection feeds the shared inbound queue;
//! writes serialize behind a per-connection lock. Gossip and sync logic
//! live a crate above; this crate moves bytes and tracks peers.

pub mod errors;
pub mod frame;
pub mod message;
pub mod peer;
pub mod rate_limiter;
pub mod transport;

pub use errors::NetworkError;
pub use frame::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use message::{Envelope, InvKind, MessageType, Payload};
pub use peer::{PeerRecord, PeerRegistry, PeerRegistryConfig, PeerStats, BAN_SCORE_THRESHOLD};
pub use rate_limiter::RollingWindowLimiter;
pub use transport::{Connection, InboundMessage, Transport, TransportConfig};
