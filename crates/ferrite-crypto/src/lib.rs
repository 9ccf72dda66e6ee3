//! # Ferrite Cryptographic Primitives
//!
//! Digest and address types, SHA-256 hashing, secp256k1 ECDSA signatures,
//! and the ordered-leaf Merkle tree used to commit block bodies.
//!
//! ## Design Principles
//!
//! - **One digest type**: every 32-byte identifier in the system is a
//!   [`Digest`], ordered lexically and rendered as lowercase hex.
//! - **One curve**: transaction and header signatures are secp256k1 ECDSA
//!   in 64-byte compact form; addresses derive from the public key via
//!   Keccak-256.
//! - **Determinism**: all hashing is over caller-supplied bytes; nothing in
//!   this crate reads clocks or ambient entropy except explicit keygen.

pub mod digest;
pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod merkle;

pub use digest::{Address, Digest};
pub use ecdsa::{Keypair, PublicKeyBytes, SignatureBytes};
pub use errors::CryptoError;
pub use hashing::{sha256, sha256_concat, Sha256Hasher};
pub use merkle::{MerkleProof, MerkleTree};
