//! # ECDSA Signatures (secp256k1)
//!
//! Transaction and block-header signatures use the secp256k1 curve with
//! RFC 6979 deterministic nonces, so signing carries no RNG dependency.
//!
//! ## Use Cases
//!
//! - Transaction input signatures
//! - PoA/PoS block producer signatures
//! - Address derivation (Keccak-256 over the uncompressed public key)

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha3::{Digest as _, Keccak256};

use crate::digest::Address;
use crate::errors::CryptoError;

/// Compressed secp256k1 public key (33 bytes).
#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde_as(as = "Bytes")] pub [u8; 33]);

impl PublicKeyBytes {
    /// Create from compressed bytes (33 bytes, starting with 0x02 or 0x03).
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Get raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::from_slice(&signature.0).map_err(|_| CryptoError::InvalidSignature)?;
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Derive the 20-byte account address.
    ///
    /// Keccak-256 over the uncompressed SEC1 point body (the 64 coordinate
    /// bytes, without the 0x04 tag), keeping the low 20 bytes.
    pub fn to_address(&self) -> Result<Address, CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let point = verifying_key.to_encoded_point(false);
        let body = &point.as_bytes()[1..];
        let hash = Keccak256::digest(body);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        Ok(Address(out))
    }
}

/// ECDSA signature (64 bytes, r||s format).
#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(#[serde_as(as = "Bytes")] pub [u8; 64]);

impl SignatureBytes {
    /// The all-zero placeholder used before a record is signed.
    pub const EMPTY: SignatureBytes = SignatureBytes([0u8; 64]);

    /// Create from bytes (64 bytes).
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// True if this is the unsigned placeholder.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 64]
    }
}

/// secp256k1 ECDSA keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Get the public key (compressed, 33 bytes).
    pub fn public_key(&self) -> PublicKeyBytes {
        let verifying_key = self.signing_key.verifying_key();
        let sec1_bytes = verifying_key.to_sec1_bytes();
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&sec1_bytes[..33]);
        PublicKeyBytes(bytes)
    }

    /// Derive the account address for this keypair.
    pub fn address(&self) -> Address {
        // A key we hold is always a valid curve point.
        self.public_key()
            .to_address()
            .unwrap_or(Address([0u8; 20]))
    }

    /// Sign a message (deterministic RFC 6979).
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let sig: Signature = self.signing_key.sign(message);
        let bytes: [u8; 64] = sig.to_bytes().into();
        SignatureBytes(bytes)
    }

    /// Get secret key bytes (for serialization).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::generate();
        let message = b"Hello, secp256k1!";

        let signature = keypair.sign(message);
        assert!(keypair.public_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = Keypair::generate();

        let signature = keypair.sign(b"message1");
        assert!(keypair
            .public_key()
            .verify(b"message2", &signature)
            .is_err());
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = Keypair::from_bytes([0xABu8; 32]).unwrap();
        let message = b"deterministic test";

        assert_eq!(
            keypair.sign(message).as_bytes(),
            keypair.sign(message).as_bytes()
        );
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let keypair = Keypair::from_bytes([0x11u8; 32]).unwrap();
        let a1 = keypair.address();
        let a2 = keypair.public_key().to_address().unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_different_keys_different_addresses() {
        let k1 = Keypair::from_bytes([0x11u8; 32]).unwrap();
        let k2 = Keypair::from_bytes([0x22u8; 32]).unwrap();
        assert_ne!(k1.address(), k2.address());
    }

    #[test]
    fn test_roundtrip_bytes() {
        let original = Keypair::generate();
        let restored = Keypair::from_bytes(original.to_bytes()).unwrap();
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn test_empty_signature_placeholder() {
        assert!(SignatureBytes::EMPTY.is_empty());
        let keypair = Keypair::generate();
        assert!(!keypair.sign(b"x").is_empty());
    }
}
