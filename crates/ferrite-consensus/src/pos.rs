//! # Proof of Stake
//!
//! Validators lock stake to earn proposal rights; delegators back
//! validators for a share of rewards minus commission. The proposer for a
//! height is a stake-weighted pseudo-random draw seeded by the parent
//! digest, the height, and the epoch seed, so every honest node elects
//! the same proposer without communication.
//!
//! ## Epoch seed
//!
//! `seed(0)` is the genesis digest; at each epoch boundary (every
//! `epoch_length` blocks) the seed folds forward as
//! `SHA-256(seed(e-1) ∥ e)`. The fold is one-way: proposers for past
//! epochs are not recomputable from a later seed, which is fine because
//! validation always moves forward with the chain.
//!
//! ## Slashing
//!
//! Producing two different blocks at the same height is equivocation;
//! evidence is the pair of signed headers. A verified offender loses
//! `slashing_percentage` of self-stake and drops out of the active set if
//! that takes it below the minimum.

use std::collections::BTreeMap;

use ferrite_crypto::{sha256_concat, Keypair, PublicKeyBytes, SignatureBytes};
use ferrite_types::{Address, Block, BlockHeader, Digest, Seal, SignedHeader};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConsensusError;

/// Proof-of-stake configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosConfig {
    /// Minimum self-stake to register as a validator.
    pub min_stake: u64,
    /// Maximum validator-set size.
    pub max_validators: usize,
    /// Blocks per epoch; the selection seed is constant within an epoch.
    pub epoch_length: u64,
    /// Percent of self-stake slashed per proven equivocation.
    pub slashing_percentage: u32,
    /// Minimum seconds between parent and child.
    pub block_time_secs: u64,
}

impl Default for PosConfig {
    fn default() -> Self {
        Self {
            min_stake: 1_000_000,
            max_validators: 100,
            epoch_length: 100,
            slashing_percentage: 5,
            block_time_secs: 5,
        }
    }
}

/// A registered validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Validator account.
    pub address: Address,
    /// Key the validator seals and attests with.
    pub public_key: PublicKeyBytes,
    /// Stake locked by the validator itself.
    pub self_stake: u64,
    /// Stake delegated by others.
    pub delegated_stake: u64,
    /// Commission on delegator rewards, in basis points.
    pub commission_bps: u32,
    /// Whether the validator is in the active set.
    pub active: bool,
    /// Equivocations proven against it.
    pub slash_count: u32,
    /// Lifetime rewards credited.
    pub total_rewards: u64,
    /// Blocks proposed.
    pub blocks_proposed: u64,
}

impl ValidatorInfo {
    /// Voting weight: self-stake plus delegations.
    pub fn total_stake(&self) -> u64 {
        self.self_stake.saturating_add(self.delegated_stake)
    }
}

/// One delegation from an account to a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationInfo {
    /// The delegating account.
    pub delegator: Address,
    /// The backed validator.
    pub validator: Address,
    /// Delegated amount.
    pub amount: u64,
    /// Height the delegation started at.
    pub since_height: u64,
}

/// A proven equivocation and its penalty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingEvent {
    /// The offending validator.
    pub validator: Address,
    /// Self-stake destroyed.
    pub amount: u64,
    /// Height of the duplicated slot.
    pub height: u64,
}

/// A validator's vote that a block is part of its canonical view.
///
/// Votes back PoS finality: a block backed by two thirds of the validator
/// set is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// The attested block.
    pub block: Digest,
    /// Its height.
    pub height: u64,
    /// The voting validator.
    pub validator: Address,
    /// Signature over `SHA-256(block ∥ height)`.
    pub signature: SignatureBytes,
}

impl Attestation {
    /// The signed payload.
    pub fn payload(block: &Digest, height: u64) -> Digest {
        sha256_concat(&[block.as_bytes(), &height.to_le_bytes()])
    }
}

/// Two signed headers claiming the same slot: equivocation evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivocationEvidence {
    /// First signed header.
    pub first: SignedHeader,
    /// Second signed header, same height and producer, different identity.
    pub second: SignedHeader,
}

/// Proof-of-stake engine.
pub struct PosEngine {
    config: PosConfig,
    /// Registered validators, address-ordered for deterministic draws.
    validators: BTreeMap<Address, ValidatorInfo>,
    delegations: Vec<DelegationInfo>,
    slashing_log: Vec<SlashingEvent>,
    /// Seed of the epoch `epoch_index`.
    epoch_seed: Digest,
    epoch_index: u64,
    /// Key for the local validator, when this node produces.
    signer: Option<Keypair>,
}

impl PosEngine {
    /// Engine over a configuration; pass a signer to enable production.
    pub fn new(config: PosConfig, signer: Option<Keypair>) -> Self {
        Self {
            config,
            validators: BTreeMap::new(),
            delegations: Vec::new(),
            slashing_log: Vec::new(),
            epoch_seed: Digest::ZERO,
            epoch_index: 0,
            signer,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &PosConfig {
        &self.config
    }

    /// Initialize the epoch seed from the genesis digest.
    pub fn initialize(&mut self, genesis_digest: Digest) {
        self.epoch_seed = genesis_digest;
        self.epoch_index = 0;
    }

    // =========================================================================
    // STAKING
    // =========================================================================

    /// Register a validator locking `stake`.
    pub fn register_validator(
        &mut self,
        public_key: PublicKeyBytes,
        stake: u64,
        commission_bps: u32,
    ) -> Result<Address, ConsensusError> {
        if stake < self.config.min_stake {
            return Err(ConsensusError::StakeBelowMinimum {
                stake,
                min_stake: self.config.min_stake,
            });
        }
        if self.validators.len() >= self.config.max_validators {
            return Err(ConsensusError::ValidatorSetFull {
                max: self.config.max_validators,
            });
        }
        let address = public_key
            .to_address()
            .map_err(|_| ConsensusError::CannotProduce("invalid validator key".to_string()))?;

        let entry = self.validators.entry(address).or_insert(ValidatorInfo {
            address,
            public_key,
            self_stake: 0,
            delegated_stake: 0,
            commission_bps,
            active: true,
            slash_count: 0,
            total_rewards: 0,
            blocks_proposed: 0,
        });
        entry.self_stake = entry.self_stake.saturating_add(stake);
        entry.active = true;
        info!(validator = %address, stake, "Validator registered");
        Ok(address)
    }

    /// Delegate stake to a validator.
    pub fn delegate(
        &mut self,
        delegator: Address,
        validator: Address,
        amount: u64,
        height: u64,
    ) -> Result<(), ConsensusError> {
        let info = self
            .validators
            .get_mut(&validator)
            .ok_or(ConsensusError::UnknownValidator(validator))?;
        info.delegated_stake = info.delegated_stake.saturating_add(amount);
        self.delegations.push(DelegationInfo {
            delegator,
            validator,
            amount,
            since_height: height,
        });
        Ok(())
    }

    /// Withdraw a delegation (fully or partially).
    pub fn undelegate(
        &mut self,
        delegator: Address,
        validator: Address,
        amount: u64,
    ) -> Result<u64, ConsensusError> {
        let info = self
            .validators
            .get_mut(&validator)
            .ok_or(ConsensusError::UnknownValidator(validator))?;

        let mut remaining = amount;
        for delegation in self
            .delegations
            .iter_mut()
            .filter(|d| d.delegator == delegator && d.validator == validator)
        {
            let taken = delegation.amount.min(remaining);
            delegation.amount -= taken;
            remaining -= taken;
            if remaining == 0 {
                break;
            }
        }
        self.delegations.retain(|d| d.amount > 0);

        let withdrawn = amount - remaining;
        info.delegated_stake = info.delegated_stake.saturating_sub(withdrawn);
        Ok(withdrawn)
    }

    /// A validator's record.
    pub fn validator(&self, address: &Address) -> Option<&ValidatorInfo> {
        self.validators.get(address)
    }

    /// Active validators in address order.
    pub fn active_validators(&self) -> Vec<&ValidatorInfo> {
        self.validators.values().filter(|v| v.active).collect()
    }

    /// Size of the active set.
    pub fn active_validator_count(&self) -> usize {
        self.validators.values().filter(|v| v.active).count()
    }

    /// Total active stake.
    pub fn total_stake(&self) -> u64 {
        self.validators
            .values()
            .filter(|v| v.active)
            .map(ValidatorInfo::total_stake)
            .sum()
    }

    /// Proven slashings so far.
    pub fn slashing_log(&self) -> &[SlashingEvent] {
        &self.slashing_log
    }

    // =========================================================================
    // PROPOSER ELECTION
    // =========================================================================

    /// Epoch of a height.
    pub fn epoch_of(&self, height: u64) -> u64 {
        if self.config.epoch_length == 0 {
            return 0;
        }
        height / self.config.epoch_length
    }

    /// Seed for the epoch containing `height`, folding forward from the
    /// committed seed. Heights in already-passed epochs are not
    /// recomputable; the chain advances epochs monotonically.
    fn seed_for(&self, height: u64) -> Option<Digest> {
        let target = self.epoch_of(height);
        if target < self.epoch_index {
            return None;
        }
        let mut seed = self.epoch_seed;
        let mut epoch = self.epoch_index;
        while epoch < target {
            epoch += 1;
            seed = sha256_concat(&[seed.as_bytes(), &epoch.to_le_bytes()]);
        }
        Some(seed)
    }

    /// Advance the committed epoch seed up to the epoch containing
    /// `height`. Called by the chain as blocks apply.
    pub fn commit_epoch(&mut self, height: u64) {
        let target = self.epoch_of(height);
        while self.epoch_index < target {
            self.epoch_index += 1;
            self.epoch_seed = sha256_concat(&[
                self.epoch_seed.as_bytes(),
                &self.epoch_index.to_le_bytes(),
            ]);
        }
    }

    /// Stake-weighted proposer draw for a height.
    pub fn next_proposer(&self, height: u64, parent_digest: &Digest) -> Option<Address> {
        let total = self.total_stake();
        if total == 0 {
            return None;
        }
        let seed = self.seed_for(height)?;
        let draw_digest = sha256_concat(&[
            parent_digest.as_bytes(),
            &height.to_le_bytes(),
            seed.as_bytes(),
        ]);
        let draw =
            (U256::from_big_endian(draw_digest.as_bytes()) % U256::from(total)).as_u64();

        let mut cursor = 0u64;
        for validator in self.validators.values().filter(|v| v.active) {
            cursor += validator.total_stake();
            if draw < cursor {
                return Some(validator.address);
            }
        }
        None
    }

    // =========================================================================
    // VALIDATION AND SEALING
    // =========================================================================

    /// Consensus validation of a sealed block against its parent.
    pub fn validate_block(&self, block: &Block, parent: &BlockHeader) -> Result<(), ConsensusError> {
        let identity = block.identity();

        if block.header.prev_digest != parent.identity() || block.header.height != parent.height + 1
        {
            return Err(ConsensusError::BadParent {
                block: identity,
                expected_parent: parent.identity(),
            });
        }
        if block.header.timestamp < parent.timestamp {
            return Err(ConsensusError::TimestampViolation {
                block_timestamp: block.header.timestamp,
                parent_timestamp: parent.timestamp,
            });
        }

        let Seal::Signed { producer, .. } = &block.seal else {
            return Err(ConsensusError::SealMismatch);
        };

        let expected = self
            .next_proposer(block.header.height, &block.header.prev_digest)
            .ok_or_else(|| ConsensusError::CannotProduce("no active stake".to_string()))?;
        if *producer != expected {
            return Err(ConsensusError::UnauthorizedProducer {
                producer: *producer,
                height: block.header.height,
            });
        }

        if !block.signed_header().verify_seal() {
            return Err(ConsensusError::InvalidSeal(identity));
        }
        Ok(())
    }

    /// Seal a candidate header with the local validator key.
    pub fn seal(&self, header: BlockHeader) -> Result<(BlockHeader, Seal), ConsensusError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ConsensusError::CannotProduce("no signer configured".to_string()))?;
        let producer = signer.address();

        let expected = self
            .next_proposer(header.height, &header.prev_digest)
            .ok_or_else(|| ConsensusError::CannotProduce("no active stake".to_string()))?;
        if producer != expected {
            return Err(ConsensusError::UnauthorizedProducer {
                producer,
                height: header.height,
            });
        }

        let identity = header.identity();
        let seal = Seal::Signed {
            producer,
            public_key: signer.public_key(),
            signature: signer.sign(identity.as_bytes()),
        };
        Ok((header, seal))
    }

    /// Credit a proposal to a validator once its block lands on the chain.
    pub fn record_proposal(&mut self, producer: &Address) {
        if let Some(info) = self.validators.get_mut(producer) {
            info.blocks_proposed += 1;
        }
    }

    // =========================================================================
    // ATTESTATIONS AND SLASHING
    // =========================================================================

    /// Attest a block with the local validator key.
    pub fn attest(&self, block: Digest, height: u64) -> Result<Attestation, ConsensusError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ConsensusError::CannotProduce("no signer configured".to_string()))?;
        let payload = Attestation::payload(&block, height);
        Ok(Attestation {
            block,
            height,
            validator: signer.address(),
            signature: signer.sign(payload.as_bytes()),
        })
    }

    /// Verify an attestation against the registered validator key.
    pub fn verify_attestation(&self, attestation: &Attestation) -> bool {
        let Some(info) = self.validators.get(&attestation.validator) else {
            return false;
        };
        let payload = Attestation::payload(&attestation.block, attestation.height);
        info.public_key
            .verify(payload.as_bytes(), &attestation.signature)
            .is_ok()
    }

    /// Apply equivocation evidence: verify it and slash the offender.
    pub fn slash(&mut self, evidence: &EquivocationEvidence) -> Result<SlashingEvent, ConsensusError> {
        let first = &evidence.first;
        let second = &evidence.second;

        if first.header.height != second.header.height {
            return Err(ConsensusError::InvalidEvidence("different heights".to_string()));
        }
        if first.header.identity() == second.header.identity() {
            return Err(ConsensusError::InvalidEvidence("identical headers".to_string()));
        }
        let (Some(p1), Some(p2)) = (first.seal.producer(), second.seal.producer()) else {
            return Err(ConsensusError::InvalidEvidence("unsigned seal".to_string()));
        };
        if p1 != p2 {
            return Err(ConsensusError::InvalidEvidence("different producers".to_string()));
        }
        if !first.verify_seal() || !second.verify_seal() {
            return Err(ConsensusError::InvalidEvidence("bad signature".to_string()));
        }

        let info = self
            .validators
            .get_mut(&p1)
            .ok_or(ConsensusError::UnknownValidator(p1))?;

        let amount = info.self_stake * u64::from(self.config.slashing_percentage) / 100;
        info.self_stake -= amount;
        info.slash_count += 1;
        if info.self_stake < self.config.min_stake {
            info.active = false;
        }
        warn!(validator = %p1, amount, height = first.header.height, "Validator slashed");

        let event = SlashingEvent {
            validator: p1,
            amount,
            height: first.header.height,
        };
        self.slashing_log.push(event.clone());
        Ok(event)
    }

    // =========================================================================
    // REWARDS
    // =========================================================================

    /// Split a block reward between the producer and its delegators.
    ///
    /// The validator takes its commission off the top plus the share
    /// proportional to self-stake; each delegator gets the share
    /// proportional to its delegation. Rounding dust goes to the
    /// validator. Returns the payouts; the chain credits them.
    pub fn distribute_reward(
        &mut self,
        producer: Address,
        reward: u64,
    ) -> Result<Vec<(Address, u64)>, ConsensusError> {
        let info = self
            .validators
            .get_mut(&producer)
            .ok_or(ConsensusError::UnknownValidator(producer))?;

        let total = info.total_stake();
        if total == 0 {
            return Ok(vec![(producer, reward)]);
        }

        let commission = reward * u64::from(info.commission_bps) / 10_000;
        let distributable = reward - commission;

        let mut payouts: Vec<(Address, u64)> = Vec::new();
        let mut paid = 0u64;
        for delegation in self.delegations.iter().filter(|d| d.validator == producer) {
            let share = distributable * delegation.amount / total;
            if share > 0 {
                payouts.push((delegation.delegator, share));
                paid += share;
            }
        }

        let validator_cut = commission + (distributable - paid);
        info.total_rewards = info.total_rewards.saturating_add(validator_cut);
        payouts.push((producer, validator_cut));
        Ok(payouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_bytes([seed; 32]).unwrap()
    }

    fn engine_with_validators(seeds: &[(u8, u64)]) -> PosEngine {
        let mut engine = PosEngine::new(PosConfig::default(), Some(keypair(seeds[0].0)));
        engine.initialize(Digest([0x47; 32]));
        for &(seed, stake) in seeds {
            engine
                .register_validator(keypair(seed).public_key(), stake, 1_000)
                .unwrap();
        }
        engine
    }

    // =========================================================================
    // STAKING
    // =========================================================================

    #[test]
    fn test_register_requires_min_stake() {
        let mut engine = PosEngine::new(PosConfig::default(), None);
        let result = engine.register_validator(keypair(1).public_key(), 10, 0);
        assert!(matches!(
            result,
            Err(ConsensusError::StakeBelowMinimum { .. })
        ));
    }

    #[test]
    fn test_register_and_delegate() {
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        let validator = keypair(1).address();
        engine
            .delegate(keypair(9).address(), validator, 500_000, 10)
            .unwrap();

        let info = engine.validator(&validator).unwrap();
        assert_eq!(info.self_stake, 2_000_000);
        assert_eq!(info.delegated_stake, 500_000);
        assert_eq!(engine.total_stake(), 2_500_000);
    }

    #[test]
    fn test_undelegate() {
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        let validator = keypair(1).address();
        let delegator = keypair(9).address();
        engine.delegate(delegator, validator, 500_000, 10).unwrap();

        let withdrawn = engine.undelegate(delegator, validator, 300_000).unwrap();
        assert_eq!(withdrawn, 300_000);
        assert_eq!(engine.validator(&validator).unwrap().delegated_stake, 200_000);
    }

    // =========================================================================
    // PROPOSER ELECTION
    // =========================================================================

    #[test]
    fn test_proposer_draw_is_deterministic() {
        let engine = engine_with_validators(&[(1, 2_000_000), (2, 2_000_000), (3, 2_000_000)]);
        let parent = Digest([0x42; 32]);
        let a = engine.next_proposer(7, &parent);
        let b = engine.next_proposer(7, &parent);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_proposer_varies_with_height() {
        let engine = engine_with_validators(&[(1, 2_000_000), (2, 2_000_000), (3, 2_000_000)]);
        let parent = Digest([0x42; 32]);
        let proposers: std::collections::HashSet<_> =
            (0..32).filter_map(|h| engine.next_proposer(h, &parent)).collect();
        // With three equal validators over 32 slots, more than one should
        // be elected.
        assert!(proposers.len() > 1);
    }

    #[test]
    fn test_sole_staker_always_proposes() {
        let engine = engine_with_validators(&[(1, 2_000_000)]);
        let expected = keypair(1).address();
        for height in 0..10 {
            assert_eq!(
                engine.next_proposer(height, &Digest([height as u8; 32])),
                Some(expected)
            );
        }
    }

    #[test]
    fn test_no_stake_no_proposer() {
        let engine = PosEngine::new(PosConfig::default(), None);
        assert_eq!(engine.next_proposer(1, &Digest::ZERO), None);
    }

    #[test]
    fn test_epoch_seed_rolls_forward() {
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        let e0 = engine.seed_for(0).unwrap();
        let e1 = engine.seed_for(engine.config.epoch_length).unwrap();
        assert_ne!(e0, e1);

        engine.commit_epoch(engine.config.epoch_length);
        assert_eq!(engine.seed_for(engine.config.epoch_length), Some(e1));
        // Past epochs are no longer derivable.
        assert_eq!(engine.seed_for(0), None);
    }

    // =========================================================================
    // SEALING AND VALIDATION
    // =========================================================================

    fn header(height: u64, prev: Digest, timestamp: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_digest: prev,
            merkle_root: Digest::ZERO,
            timestamp,
            nonce: 0,
            difficulty: 0,
            height,
            tx_count: 0,
        }
    }

    #[test]
    fn test_seal_and_validate_round_trip() {
        let engine = engine_with_validators(&[(1, 2_000_000)]);
        let parent = header(0, Digest::ZERO, 1_000);
        let candidate = header(1, parent.identity(), 1_010);

        let (sealed, seal) = engine.seal(candidate).unwrap();
        let block = Block {
            header: sealed,
            seal,
            transactions: vec![],
        };
        assert!(engine.validate_block(&block, &parent).is_ok());
    }

    #[test]
    fn test_non_proposer_cannot_seal() {
        // Signer 9 is not registered.
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        engine.signer = Some(keypair(9));
        let candidate = header(1, Digest::ZERO, 1_010);
        assert!(matches!(
            engine.seal(candidate),
            Err(ConsensusError::UnauthorizedProducer { .. })
        ));
    }

    // =========================================================================
    // ATTESTATIONS AND SLASHING
    // =========================================================================

    #[test]
    fn test_attestation_round_trip() {
        let engine = engine_with_validators(&[(1, 2_000_000)]);
        let attestation = engine.attest(Digest([0x11; 32]), 5).unwrap();
        assert!(engine.verify_attestation(&attestation));

        let mut forged = attestation;
        forged.height = 6;
        assert!(!engine.verify_attestation(&forged));
    }

    fn signed_header_by(keypair: &Keypair, height: u64, nonce: u64) -> SignedHeader {
        let header = BlockHeader {
            version: 1,
            prev_digest: Digest([0x01; 32]),
            merkle_root: Digest::ZERO,
            timestamp: 1_000,
            nonce,
            difficulty: 0,
            height,
            tx_count: 0,
        };
        let identity = header.identity();
        SignedHeader {
            seal: Seal::Signed {
                producer: keypair.address(),
                public_key: keypair.public_key(),
                signature: keypair.sign(identity.as_bytes()),
            },
            header,
        }
    }

    #[test]
    fn test_slash_on_equivocation() {
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        let offender = keypair(1);

        let evidence = EquivocationEvidence {
            first: signed_header_by(&offender, 5, 0),
            second: signed_header_by(&offender, 5, 1),
        };
        let event = engine.slash(&evidence).unwrap();

        // 5% of 2,000,000.
        assert_eq!(event.amount, 100_000);
        let info = engine.validator(&offender.address()).unwrap();
        assert_eq!(info.self_stake, 1_900_000);
        assert_eq!(info.slash_count, 1);
        assert!(info.active);
        assert_eq!(engine.slashing_log().len(), 1);
    }

    #[test]
    fn test_slash_deactivates_below_minimum() {
        let mut engine = PosEngine::new(
            PosConfig {
                min_stake: 1_000_000,
                slashing_percentage: 50,
                ..PosConfig::default()
            },
            None,
        );
        engine.initialize(Digest::ZERO);
        let offender = keypair(1);
        engine
            .register_validator(offender.public_key(), 1_000_000, 0)
            .unwrap();

        let evidence = EquivocationEvidence {
            first: signed_header_by(&offender, 5, 0),
            second: signed_header_by(&offender, 5, 1),
        };
        engine.slash(&evidence).unwrap();
        assert!(!engine.validator(&offender.address()).unwrap().active);
        assert_eq!(engine.active_validator_count(), 0);
    }

    #[test]
    fn test_slash_rejects_identical_headers() {
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        let offender = keypair(1);
        let header = signed_header_by(&offender, 5, 0);
        let evidence = EquivocationEvidence {
            first: header.clone(),
            second: header,
        };
        assert!(matches!(
            engine.slash(&evidence),
            Err(ConsensusError::InvalidEvidence(_))
        ));
    }

    #[test]
    fn test_slash_rejects_different_producers() {
        let mut engine = engine_with_validators(&[(1, 2_000_000), (2, 2_000_000)]);
        let evidence = EquivocationEvidence {
            first: signed_header_by(&keypair(1), 5, 0),
            second: signed_header_by(&keypair(2), 5, 1),
        };
        assert!(matches!(
            engine.slash(&evidence),
            Err(ConsensusError::InvalidEvidence(_))
        ));
    }

    // =========================================================================
    // REWARDS
    // =========================================================================

    #[test]
    fn test_reward_split_with_commission() {
        let mut engine = engine_with_validators(&[(1, 2_000_000)]);
        let validator = keypair(1).address();
        let delegator = keypair(9).address();
        engine.delegate(delegator, validator, 2_000_000, 1).unwrap();

        // Commission 10% (1000 bps); remainder split 50/50 by stake.
        let payouts = engine.distribute_reward(validator, 1_000).unwrap();
        let delegator_cut = payouts
            .iter()
            .find(|(a, _)| *a == delegator)
            .map(|(_, v)| *v)
            .unwrap();
        let validator_cut = payouts
            .iter()
            .find(|(a, _)| *a == validator)
            .map(|(_, v)| *v)
            .unwrap();

        assert_eq!(delegator_cut, 450);
        assert_eq!(validator_cut, 550);
        assert_eq!(delegator_cut + validator_cut, 1_000);
    }

    #[test]
    fn test_reward_unknown_validator() {
        let mut engine = PosEngine::new(PosConfig::default(), None);
        assert!(matches!(
            engine.distribute_reward(Address([9; 20]), 100),
            Err(ConsensusError::UnknownValidator(_))
        ));
    }
}
