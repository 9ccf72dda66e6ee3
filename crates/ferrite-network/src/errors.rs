//! # Network Error Types

use ferrite_types::{PeerKey, Severity};
use thiserror::Error;

/// Failures from framing, transport, and peer management.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Frame longer than the protocol maximum.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Payload failed to decode, or codepoint disagrees with content.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Unknown message-type codepoint.
    #[error("Unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Socket-level failure; the peer is dropped, not banned.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Connection closed by {0}")]
    ConnectionClosed(PeerKey),

    /// No live connection to the peer.
    #[error("Not connected to {0}")]
    NotConnected(PeerKey),

    /// The peer is banned.
    #[error("Peer {0} is banned")]
    Banned(PeerKey),

    /// Rolling-window rate limit tripped.
    #[error("Rate limit exceeded for {peer} on {message_type:?}")]
    RateLimited {
        peer: PeerKey,
        message_type: crate::message::MessageType,
    },

    /// Listener could not bind.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl NetworkError {
    /// Taxonomy class of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            NetworkError::FrameTooLarge { .. }
            | NetworkError::Malformed(_)
            | NetworkError::UnknownMessageType(_) => Severity::Structural,
            NetworkError::Io(_) | NetworkError::ConnectionClosed(_) => Severity::Transient,
            NetworkError::NotConnected(_)
            | NetworkError::Banned(_)
            | NetworkError::RateLimited { .. }
            | NetworkError::Bind { .. } => Severity::Resource,
        }
    }
}
