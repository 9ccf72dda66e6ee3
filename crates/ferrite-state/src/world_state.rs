//! # World State
//!
//! The `Address → AccountRecord` map and its deterministic root.
//!
//! ## Root accumulation
//!
//! The root is the Merkle root over one leaf per account, in address
//! order, each leaf hashing the address and the record's canonical
//! serialization. Any accumulator would do as long as it is deterministic;
//! the ordered-leaf tree keeps the root recomputable from a plain scan.

use std::collections::BTreeMap;

use ferrite_crypto::{merkle::merkle_root, sha256_concat, Digest};
use ferrite_types::{AccountRecord, Address};
use serde::{Deserialize, Serialize};

use crate::errors::StateError;

/// Before/after pair for one account touched by execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDelta {
    /// The account.
    pub address: Address,
    /// Record before execution; `None` for created accounts.
    pub before: Option<AccountRecord>,
    /// Record after execution.
    pub after: AccountRecord,
}

/// Every account touched while applying one block, in touch order.
///
/// Reverting a block replays its deltas backwards, restoring each
/// account's `before` image; applying-then-reverting is byte-exact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Touched accounts with their before/after images.
    pub accounts: Vec<AccountDelta>,
}

impl StateDelta {
    /// Record a mutation, keeping only the first `before` per account.
    pub fn record(&mut self, address: Address, before: Option<AccountRecord>, after: AccountRecord) {
        if let Some(existing) = self
            .accounts
            .iter_mut()
            .find(|delta| delta.address == address)
        {
            existing.after = after;
        } else {
            self.accounts.push(AccountDelta {
                address,
                before,
                after,
            });
        }
    }
}

/// The account map. Deterministic: iteration order is address order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    accounts: BTreeMap<Address, AccountRecord>,
}

impl WorldState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records.
    pub fn from_accounts(accounts: impl IntoIterator<Item = (Address, AccountRecord)>) -> Self {
        Self {
            accounts: accounts.into_iter().collect(),
        }
    }

    /// Account record, if the account exists.
    pub fn get(&self, address: &Address) -> Option<&AccountRecord> {
        self.accounts.get(address)
    }

    /// Account record or the default empty record.
    pub fn get_or_default(&self, address: &Address) -> AccountRecord {
        self.accounts.get(address).cloned().unwrap_or_default()
    }

    /// Number of known accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// True when no accounts exist.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Iterate accounts in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AccountRecord)> {
        self.accounts.iter()
    }

    /// Overwrite an account record, recording the change in `delta`.
    pub fn put(&mut self, address: Address, record: AccountRecord, delta: &mut StateDelta) {
        let before = self.accounts.get(&address).cloned();
        delta.record(address, before, record.clone());
        self.accounts.insert(address, record);
    }

    /// Credit `amount` to an account, creating it if absent.
    pub fn credit(
        &mut self,
        address: Address,
        amount: u64,
        delta: &mut StateDelta,
    ) -> Result<(), StateError> {
        let before = self.accounts.get(&address).cloned();
        let mut record = before.clone().unwrap_or_default();
        record.balance = record
            .balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow { address })?;
        delta.record(address, before, record.clone());
        self.accounts.insert(address, record);
        Ok(())
    }

    /// Debit `amount` from an account and bump its nonce.
    pub fn debit(
        &mut self,
        address: Address,
        amount: u64,
        delta: &mut StateDelta,
    ) -> Result<(), StateError> {
        let before = self.accounts.get(&address).cloned();
        let mut record = before.clone().unwrap_or_default();
        record.balance = record
            .balance
            .checked_sub(amount)
            .ok_or(StateError::InsufficientBalance {
                address,
                balance: record.balance,
                needed: amount,
            })?;
        record.nonce += 1;
        delta.record(address, before, record.clone());
        self.accounts.insert(address, record);
        Ok(())
    }

    /// Undo a block's mutations by restoring each touched account's
    /// `before` image, newest first.
    pub fn revert(&mut self, delta: &StateDelta) {
        for change in delta.accounts.iter().rev() {
            match &change.before {
                Some(record) => {
                    self.accounts.insert(change.address, record.clone());
                }
                None => {
                    self.accounts.remove(&change.address);
                }
            }
        }
    }

    /// Deterministic root over the full account map.
    pub fn state_root(&self) -> Digest {
        let leaves: Vec<Digest> = self
            .accounts
            .iter()
            .map(|(address, record)| account_leaf(address, record))
            .collect();
        merkle_root(&leaves)
    }
}

fn account_leaf(address: &Address, record: &AccountRecord) -> Digest {
    let code = record.code_digest.unwrap_or(Digest::ZERO);
    sha256_concat(&[
        address.as_bytes(),
        &record.balance.to_le_bytes(),
        &record.nonce.to_le_bytes(),
        code.as_bytes(),
        record.storage_root.as_bytes(),
    ])
}
