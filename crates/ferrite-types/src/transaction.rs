//! # Transactions
//!
//! A transaction transfers value from referenced unspent outputs to new
//! outputs. Coinbase transactions have no inputs and mint the block reward.
//!
//! ## Identity and signatures
//!
//! Transaction identity is the SHA-256 digest of the canonical serialization
//! of the **complete** record, input signatures included. The signing
//! preimage is the same serialization with signatures elided. The asymmetry
//! is deliberate and versioned with `version = 1`: signatures cover the
//! pre-sign image, identity covers the post-sign record, so two differently
//! signed copies of the same transfer have different identities.
//!
//! Canonical serialization is field-ordered, length-prefixed, and
//! little-endian for scalars; it is hand-written here so the digest preimage
//! does not depend on any serde encoder.

use ferrite_crypto::{sha256, Address, Digest, Keypair, PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};

use crate::errors::TxError;
use crate::MAX_TX_BYTES;

/// Reference to a transaction output: `(tx identity, output index)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OutPoint {
    /// Identity of the transaction that produced the output.
    pub tx: Digest,
    /// Index of the output within that transaction.
    pub index: u32,
}

/// Transaction classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    /// Regular value transfer.
    Regular = 0,
    /// Coinbase transaction (block reward); always first in a block.
    Coinbase = 1,
    /// Smart contract deployment or call.
    Contract = 2,
}

/// An input consuming a previously produced output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The consumed output.
    pub previous_output: OutPoint,
    /// Signature over the transaction's signing preimage.
    pub signature: SignatureBytes,
    /// Public key of the output owner; its derived address must match the
    /// consumed output's recipient.
    pub public_key: PublicKeyBytes,
    /// Sequence number for replacement signalling.
    pub sequence: u32,
}

impl TxInput {
    /// Default sequence: replacement disabled.
    pub const FINAL_SEQUENCE: u32 = 0xFFFF_FFFF;

    /// Create an unsigned input for the given outpoint.
    pub fn unsigned(previous_output: OutPoint, public_key: PublicKeyBytes) -> Self {
        Self {
            previous_output,
            signature: SignatureBytes::EMPTY,
            public_key,
            sequence: Self::FINAL_SEQUENCE,
        }
    }
}

/// An output assigning value to a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units.
    pub value: u64,
    /// Recipient address.
    pub recipient: Address,
    /// Opaque spending script (empty for plain transfers).
    pub script: Vec<u8>,
    /// Index of this output within the transaction.
    pub index: u32,
}

/// Whether canonical serialization includes input signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigMode {
    /// Full record; the identity preimage.
    WithSignatures,
    /// Signatures elided; the signing preimage.
    WithoutSignatures,
}

/// A transfer of value, signed per input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Format version; pins the identity convention.
    pub version: u32,
    /// Ordered inputs; empty only for coinbase.
    pub inputs: Vec<TxInput>,
    /// Ordered outputs.
    pub outputs: Vec<TxOutput>,
    /// Earliest height or time at which the transaction is valid.
    pub lock_time: u32,
    /// Transaction class.
    pub tx_type: TxType,
    /// Creation time, unix milliseconds.
    pub timestamp_ms: u64,
}

impl Transaction {
    /// Create an unsigned regular transaction.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, timestamp_ms: u64) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
            tx_type: TxType::Regular,
            timestamp_ms,
        }
    }

    /// Create a coinbase transaction minting `value` to `recipient`.
    pub fn coinbase(recipient: Address, value: u64, timestamp_ms: u64) -> Self {
        Self {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput {
                value,
                recipient,
                script: vec![],
                index: 0,
            }],
            lock_time: 0,
            tx_type: TxType::Coinbase,
            timestamp_ms,
        }
    }

    /// True for coinbase transactions.
    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Transaction identity: digest over the complete signed record.
    pub fn identity(&self) -> Digest {
        sha256(&self.canonical_bytes(SigMode::WithSignatures))
    }

    /// The signing preimage shared by every input signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        self.canonical_bytes(SigMode::WithoutSignatures)
    }

    /// Sign every input with `keypair`, setting its public key.
    ///
    /// All inputs of a transaction built by one wallet spend outputs owned
    /// by the same key; multi-key transactions sign per input via
    /// [`Transaction::sign_input`].
    pub fn sign(&mut self, keypair: &Keypair) {
        let payload = self.signing_payload();
        let signature = keypair.sign(&payload);
        let public_key = keypair.public_key();
        for input in &mut self.inputs {
            input.signature = signature;
            input.public_key = public_key;
        }
    }

    /// Sign a single input with `keypair`.
    pub fn sign_input(&mut self, index: usize, keypair: &Keypair) -> Result<(), TxError> {
        let payload = self.signing_payload();
        let input = self
            .inputs
            .get_mut(index)
            .ok_or(TxError::InputIndexOutOfRange(index))?;
        input.signature = keypair.sign(&payload);
        input.public_key = keypair.public_key();
        Ok(())
    }

    /// Verify every input signature against its public key.
    ///
    /// Coinbase transactions have no inputs and trivially verify. Matching
    /// each public key against the consumed output's recipient needs the
    /// UTXO set and happens at chain validation.
    pub fn verify_signatures(&self) -> bool {
        let payload = self.signing_payload();
        self.inputs
            .iter()
            .all(|input| input.public_key.verify(&payload, &input.signature).is_ok())
    }

    /// Structural validation: shape only, no UTXO context.
    pub fn validate_structural(&self) -> Result<(), TxError> {
        if self.inputs.is_empty() && !self.is_coinbase() {
            return Err(TxError::EmptyInputsNonCoinbase);
        }
        if self.is_coinbase() && !self.inputs.is_empty() {
            return Err(TxError::CoinbaseWithInputs);
        }
        if self.outputs.is_empty() {
            return Err(TxError::NoOutputs);
        }

        // Duplicate-input scan: a transaction may not consume the same
        // outpoint twice.
        for (i, input) in self.inputs.iter().enumerate() {
            if self.inputs[..i]
                .iter()
                .any(|other| other.previous_output == input.previous_output)
            {
                return Err(TxError::DuplicateInput(input.previous_output));
            }
        }

        // Output indices must match positions; output total must not wrap.
        let mut total: u64 = 0;
        for (i, output) in self.outputs.iter().enumerate() {
            if output.index as usize != i {
                return Err(TxError::BadOutputIndex {
                    position: i,
                    index: output.index,
                });
            }
            total = total
                .checked_add(output.value)
                .ok_or(TxError::ValueOverflow)?;
        }

        let size = self.size_bytes();
        if size > MAX_TX_BYTES {
            return Err(TxError::Oversized {
                size,
                max: MAX_TX_BYTES,
            });
        }

        Ok(())
    }

    /// Serialized size of the complete record in bytes.
    pub fn size_bytes(&self) -> usize {
        self.canonical_bytes(SigMode::WithSignatures).len()
    }

    /// Sum of output values. Structural validation guarantees no overflow
    /// for validated transactions; this saturates otherwise.
    pub fn output_total(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.value))
    }

    /// Fee given a resolver for consumed output values.
    ///
    /// Returns `None` if any input cannot be resolved or input total does
    /// not cover output total. Coinbase transactions have no fee.
    pub fn fee<F>(&self, mut resolve: F) -> Option<u64>
    where
        F: FnMut(&OutPoint) -> Option<u64>,
    {
        if self.is_coinbase() {
            return Some(0);
        }
        let mut input_total: u64 = 0;
        for input in &self.inputs {
            input_total = input_total.checked_add(resolve(&input.previous_output)?)?;
        }
        input_total.checked_sub(self.output_total())
    }

    /// Canonical serialization: field-ordered, length-prefixed, LE scalars.
    fn canonical_bytes(&self, mode: SigMode) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&self.version.to_le_bytes());

        out.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            out.extend_from_slice(input.previous_output.tx.as_bytes());
            out.extend_from_slice(&input.previous_output.index.to_le_bytes());
            if mode == SigMode::WithSignatures {
                out.extend_from_slice(input.signature.as_bytes());
            }
            out.extend_from_slice(input.public_key.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            out.extend_from_slice(output.recipient.as_bytes());
            out.extend_from_slice(&(output.script.len() as u32).to_le_bytes());
            out.extend_from_slice(&output.script);
            out.extend_from_slice(&output.index.to_le_bytes());
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out.push(self.tx_type as u8);
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out
    }
}
