//! # Wire Messages
//!
//! The message envelope and every payload the protocol speaks. On the
//! wire a message is one frame whose first byte is the message-type
//! codepoint, followed by the bincode-encoded envelope; the codepoint is
//! re-derived from the payload on decode and must agree, so a frame
//! cannot claim one type and carry another.

use ferrite_types::{
    Block, Digest, PeerKey, SignedHeader, Transaction, PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};

use crate::errors::NetworkError;

/// Wire codepoints for every message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake: node identity and capabilities.
    Hello = 0x01,
    /// Inventory announcement by digest.
    Inv = 0x02,
    /// Request for specific items by digest.
    GetData = 0x03,
    /// Full block delivery.
    Block = 0x04,
    /// Transaction delivery.
    Tx = 0x05,
    /// Liveness probe.
    Ping = 0x06,
    /// Liveness reply echoing the probe nonce.
    Pong = 0x07,
    /// Request for full blocks by height range.
    GetBlocks = 0x08,
    /// Request for headers by height range.
    GetHeaders = 0x09,
    /// Header batch.
    Headers = 0x0A,
    /// Rejection notice for a previously delivered item.
    Reject = 0x0B,
    /// Request for the remote mempool's inventory.
    Mempool = 0x0C,
    /// Protocol version negotiation.
    Version = 0x12,
    /// Version acknowledgement; completes the handshake.
    Verack = 0x13,
    /// Peer-list exchange.
    Addr = 0x14,
    /// Request for the remote peer list.
    GetAddr = 0x15,
    /// Requested data is not available.
    NotFound = 0x16,
}

impl MessageType {
    /// Codepoint → type.
    pub fn from_code(code: u8) -> Result<Self, NetworkError> {
        Ok(match code {
            0x01 => MessageType::Hello,
            0x02 => MessageType::Inv,
            0x03 => MessageType::GetData,
            0x04 => MessageType::Block,
            0x05 => MessageType::Tx,
            0x06 => MessageType::Ping,
            0x07 => MessageType::Pong,
            0x08 => MessageType::GetBlocks,
            0x09 => MessageType::GetHeaders,
            0x0A => MessageType::Headers,
            0x0B => MessageType::Reject,
            0x0C => MessageType::Mempool,
            0x12 => MessageType::Version,
            0x13 => MessageType::Verack,
            0x14 => MessageType::Addr,
            0x15 => MessageType::GetAddr,
            0x16 => MessageType::NotFound,
            other => return Err(NetworkError::UnknownMessageType(other)),
        })
    }
}

/// What kind of items an inventory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    /// Transactions by identity.
    Transaction,
    /// Blocks by identity.
    Block,
}

/// Every payload the protocol carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// Handshake introduction.
    Hello {
        /// Peer-chosen node identifier.
        node_id: Digest,
        /// Protocol version spoken.
        protocol_version: u32,
        /// Capability strings.
        capabilities: Vec<String>,
        /// Client software identification.
        user_agent: String,
        /// The sender's best chain height.
        best_height: u64,
        /// Port the sender accepts inbound connections on.
        listen_port: u16,
    },
    /// Version negotiation (same shape as Hello, pre-handshake).
    Version {
        /// Protocol version spoken.
        protocol_version: u32,
        /// Client software identification.
        user_agent: String,
        /// The sender's best chain height.
        best_height: u64,
    },
    /// Handshake acknowledgement.
    Verack,
    /// Liveness probe.
    Ping {
        /// Echoed by the matching pong.
        nonce: u64,
    },
    /// Liveness reply.
    Pong {
        /// Nonce of the probe being answered.
        nonce: u64,
    },
    /// Request for the remote peer list.
    GetAddr,
    /// Known-peer advertisement (capped at 10 per message).
    Addr {
        /// Advertised peers.
        peers: Vec<PeerKey>,
    },
    /// Inventory announcement.
    Inv {
        /// Item kind.
        kind: InvKind,
        /// Item identities.
        items: Vec<Digest>,
    },
    /// Request for announced items.
    GetData {
        /// Item kind.
        kind: InvKind,
        /// Item identities.
        items: Vec<Digest>,
    },
    /// Full block delivery.
    Block(Box<Block>),
    /// Transaction delivery.
    Tx(Box<Transaction>),
    /// Request for full blocks starting at a height.
    GetBlocks {
        /// First height wanted.
        from_height: u64,
        /// Maximum number of blocks.
        count: u32,
    },
    /// Request for headers starting at a height.
    GetHeaders {
        /// First height wanted.
        from_height: u64,
        /// Maximum number of headers.
        count: u32,
    },
    /// Header batch answering a GetHeaders.
    Headers {
        /// Sealed headers in ascending height order.
        headers: Vec<SignedHeader>,
    },
    /// Rejection of a delivered transaction or block.
    Reject {
        /// Human-readable reason.
        reason: String,
        /// Identity of the rejected item.
        subject: Digest,
    },
    /// Request for the remote mempool's transaction inventory.
    Mempool,
    /// Requested items the sender does not have.
    NotFound {
        /// The missing identities.
        items: Vec<Digest>,
    },
}

impl Payload {
    /// The wire codepoint for this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Hello { .. } => MessageType::Hello,
            Payload::Version { .. } => MessageType::Version,
            Payload::Verack => MessageType::Verack,
            Payload::Ping { .. } => MessageType::Ping,
            Payload::Pong { .. } => MessageType::Pong,
            Payload::GetAddr => MessageType::GetAddr,
            Payload::Addr { .. } => MessageType::Addr,
            Payload::Inv { .. } => MessageType::Inv,
            Payload::GetData { .. } => MessageType::GetData,
            Payload::Block(_) => MessageType::Block,
            Payload::Tx(_) => MessageType::Tx,
            Payload::GetBlocks { .. } => MessageType::GetBlocks,
            Payload::GetHeaders { .. } => MessageType::GetHeaders,
            Payload::Headers { .. } => MessageType::Headers,
            Payload::Reject { .. } => MessageType::Reject,
            Payload::Mempool => MessageType::Mempool,
            Payload::NotFound { .. } => MessageType::NotFound,
        }
    }
}

/// One message: type, version, timestamp, payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version of the sender.
    pub version: u32,
    /// Sender clock, unix milliseconds.
    pub timestamp_ms: u64,
    /// The message body.
    pub payload: Payload,
}

impl Envelope {
    /// Wrap a payload with the current protocol version.
    pub fn new(payload: Payload, timestamp_ms: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            timestamp_ms,
            payload,
        }
    }

    /// The wire codepoint.
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Encode: codepoint byte followed by the bincode body.
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        let body = bincode::serialize(self)
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(self.message_type() as u8);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode and verify the codepoint agrees with the payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let (&code, body) = bytes
            .split_first()
            .ok_or_else(|| NetworkError::Malformed("empty message".to_string()))?;
        let declared = MessageType::from_code(code)?;
        let envelope: Envelope = bincode::deserialize(body)
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;
        if envelope.message_type() != declared {
            return Err(NetworkError::Malformed(format!(
                "codepoint {declared:?} disagrees with payload {:?}",
                envelope.message_type()
            )));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codepoints() {
        assert_eq!(MessageType::Hello as u8, 0x01);
        assert_eq!(MessageType::Inv as u8, 0x02);
        assert_eq!(MessageType::GetData as u8, 0x03);
        assert_eq!(MessageType::Block as u8, 0x04);
        assert_eq!(MessageType::Tx as u8, 0x05);
        assert_eq!(MessageType::Ping as u8, 0x06);
        assert_eq!(MessageType::Pong as u8, 0x07);
        assert_eq!(MessageType::GetBlocks as u8, 0x08);
        assert_eq!(MessageType::GetHeaders as u8, 0x09);
        assert_eq!(MessageType::Headers as u8, 0x0A);
        assert_eq!(MessageType::Reject as u8, 0x0B);
        assert_eq!(MessageType::Mempool as u8, 0x0C);
        assert_eq!(MessageType::Version as u8, 0x12);
        assert_eq!(MessageType::Verack as u8, 0x13);
        assert_eq!(MessageType::Addr as u8, 0x14);
        assert_eq!(MessageType::GetAddr as u8, 0x15);
        assert_eq!(MessageType::NotFound as u8, 0x16);
    }

    #[test]
    fn test_from_code_round_trip() {
        for code in [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x12,
            0x13, 0x14, 0x15, 0x16,
        ] {
            let message_type = MessageType::from_code(code).unwrap();
            assert_eq!(message_type as u8, code);
        }
        assert!(matches!(
            MessageType::from_code(0x7F),
            Err(NetworkError::UnknownMessageType(0x7F))
        ));
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::new(Payload::Ping { nonce: 42 }, 1_700_000_000_000);
        let bytes = envelope.encode().unwrap();
        assert_eq!(bytes[0], 0x06);

        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert!(matches!(decoded.payload, Payload::Ping { nonce: 42 }));
    }

    #[test]
    fn test_lying_codepoint_rejected() {
        let envelope = Envelope::new(Payload::Ping { nonce: 1 }, 0);
        let mut bytes = envelope.encode().unwrap();
        // Claim the ping is a pong.
        bytes[0] = MessageType::Pong as u8;
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(NetworkError::Malformed(_))
        ));
    }

    #[test]
    fn test_inventory_round_trip() {
        let envelope = Envelope::new(
            Payload::Inv {
                kind: InvKind::Block,
                items: vec![Digest([1; 32]), Digest([2; 32])],
            },
            0,
        );
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        let Payload::Inv { kind, items } = decoded.payload else {
            panic!("wrong payload");
        };
        assert_eq!(kind, InvKind::Block);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(matches!(
            Envelope::decode(&[]),
            Err(NetworkError::Malformed(_))
        ));
    }
}
