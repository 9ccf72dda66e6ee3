//! # Crypto Error Types

use thiserror::Error;

/// Errors from hashing, key handling, and Merkle proofs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// A digest must be exactly 32 bytes.
    #[error("Invalid digest length: {0} bytes, expected 32")]
    InvalidDigestLength(usize),

    /// An address must be exactly 20 bytes.
    #[error("Invalid address length: {0} bytes, expected 20")]
    InvalidAddressLength(usize),

    /// Hex decoding failed.
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    /// Public key is not a valid compressed secp256k1 point.
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Secret key bytes are out of range for the curve.
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Signature bytes are malformed.
    #[error("Invalid signature encoding")]
    InvalidSignature,

    /// Signature does not verify against the public key.
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Merkle proof index out of range for the tree.
    #[error("Merkle leaf index {index} out of range for {leaf_count} leaves")]
    LeafIndexOutOfRange { index: usize, leaf_count: usize },
}
