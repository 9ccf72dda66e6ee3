//! # State Store
//!
//! Namespaced view over the shared backend holding the world state and the
//! persisted UTXO set.
//!
//! ## Key layout
//!
//! - `a:<address>` → bincode [`AccountRecord`]
//! - `s:<address>:<cell key>` → storage cell value
//! - `u:<tx digest><index BE>` → bincode [`TxOutput`]
//!
//! Mutations go through batch composers so a block application commits
//! account updates, UTXO additions, and UTXO removals together with the
//! block and tip pointer in one atomic write.

use std::sync::Arc;

use ferrite_types::{AccountRecord, Address, Digest, OutPoint, TxOutput};

use crate::errors::StorageError;
use crate::kv::{BatchOperation, KeyValueStore};

const ACCOUNT_PREFIX: &[u8] = b"a:";
const CELL_PREFIX: &[u8] = b"s:";
const UTXO_PREFIX: &[u8] = b"u:";

/// Persistent world-state and UTXO storage.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl StateStore {
    /// Wrap a backend.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn account_key(address: &Address) -> Vec<u8> {
        let mut key = ACCOUNT_PREFIX.to_vec();
        key.extend_from_slice(address.as_bytes());
        key
    }

    fn cell_key(address: &Address, cell: &[u8]) -> Vec<u8> {
        let mut key = CELL_PREFIX.to_vec();
        key.extend_from_slice(address.as_bytes());
        key.push(b':');
        key.extend_from_slice(cell);
        key
    }

    fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
        let mut key = UTXO_PREFIX.to_vec();
        key.extend_from_slice(outpoint.tx.as_bytes());
        key.extend_from_slice(&outpoint.index.to_be_bytes());
        key
    }

    /// Read an account record.
    pub fn get_account(&self, address: &Address) -> Result<Option<AccountRecord>, StorageError> {
        match self.kv.get(&Self::account_key(address))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(|_| {
                StorageError::Corruption(format!("undecodable account {address}"))
            })?)),
        }
    }

    /// All persisted accounts. Used to rebuild the world state at
    /// startup.
    pub fn scan_accounts(&self) -> Result<Vec<(Address, AccountRecord)>, StorageError> {
        let mut out = Vec::new();
        for (key, value) in self.kv.prefix_scan(ACCOUNT_PREFIX)? {
            let body = &key[ACCOUNT_PREFIX.len()..];
            let address = Address::from_slice(body)
                .map_err(|_| StorageError::Corruption("malformed account key".to_string()))?;
            let record: AccountRecord = bincode::deserialize(&value)
                .map_err(|_| StorageError::Corruption(format!("undecodable account {address}")))?;
            out.push((address, record));
        }
        Ok(out)
    }

    /// Read a contract storage cell.
    pub fn get_cell(&self, address: &Address, cell: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.kv.get(&Self::cell_key(address, cell))
    }

    /// Read a persisted UTXO.
    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<TxOutput>, StorageError> {
        match self.kv.get(&Self::utxo_key(outpoint))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(|_| {
                StorageError::Corruption(format!("undecodable utxo {outpoint:?}"))
            })?)),
        }
    }

    /// All persisted UTXOs. Used to rebuild the in-memory set at startup.
    pub fn scan_utxos(&self) -> Result<Vec<(OutPoint, TxOutput)>, StorageError> {
        let mut out = Vec::new();
        for (key, value) in self.kv.prefix_scan(UTXO_PREFIX)? {
            let body = &key[UTXO_PREFIX.len()..];
            if body.len() != 36 {
                return Err(StorageError::Corruption("malformed utxo key".to_string()));
            }
            let tx = Digest::from_slice(&body[..32])
                .map_err(|_| StorageError::Corruption("malformed utxo key".to_string()))?;
            let index = u32::from_be_bytes(
                body[32..]
                    .try_into()
                    .map_err(|_| StorageError::Corruption("malformed utxo key".to_string()))?,
            );
            let output: TxOutput = bincode::deserialize(&value)
                .map_err(|_| StorageError::Corruption("undecodable utxo".to_string()))?;
            out.push((OutPoint { tx, index }, output));
        }
        Ok(out)
    }

    /// Batch op writing an account record.
    pub fn batch_put_account(
        &self,
        address: &Address,
        record: &AccountRecord,
        batch: &mut Vec<BatchOperation>,
    ) -> Result<(), StorageError> {
        let bytes = bincode::serialize(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        batch.push(BatchOperation::put(Self::account_key(address), bytes));
        Ok(())
    }

    /// Batch op removing an account (reorg revert of a created account).
    pub fn batch_delete_account(&self, address: &Address, batch: &mut Vec<BatchOperation>) {
        batch.push(BatchOperation::delete(Self::account_key(address)));
    }

    /// Batch op writing a contract storage cell.
    pub fn batch_put_cell(
        &self,
        address: &Address,
        cell: &[u8],
        value: &[u8],
        batch: &mut Vec<BatchOperation>,
    ) {
        batch.push(BatchOperation::put(
            Self::cell_key(address, cell),
            value.to_vec(),
        ));
    }

    /// Batch op adding a UTXO.
    pub fn batch_put_utxo(
        &self,
        outpoint: &OutPoint,
        output: &TxOutput,
        batch: &mut Vec<BatchOperation>,
    ) -> Result<(), StorageError> {
        let bytes = bincode::serialize(output)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        batch.push(BatchOperation::put(Self::utxo_key(outpoint), bytes));
        Ok(())
    }

    /// Batch op removing a consumed UTXO.
    pub fn batch_delete_utxo(&self, outpoint: &OutPoint, batch: &mut Vec<BatchOperation>) {
        batch.push(BatchOperation::delete(Self::utxo_key(outpoint)));
    }

    /// Apply a composed batch atomically.
    pub fn commit(&self, batch: Vec<BatchOperation>) -> Result<(), StorageError> {
        self.kv.atomic_batch_write(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_account_round_trip() {
        let store = store();
        let address = Address([0xAA; 20]);
        let record = AccountRecord {
            balance: 1_000,
            nonce: 3,
            code_digest: None,
            storage_root: Digest::ZERO,
        };

        let mut batch = Vec::new();
        store.batch_put_account(&address, &record, &mut batch).unwrap();
        store.commit(batch).unwrap();

        assert_eq!(store.get_account(&address).unwrap(), Some(record));
    }

    #[test]
    fn test_utxo_lifecycle() {
        let store = store();
        let outpoint = OutPoint {
            tx: Digest([0x11; 32]),
            index: 2,
        };
        let output = TxOutput {
            value: 77,
            recipient: Address([0xBB; 20]),
            script: vec![],
            index: 2,
        };

        let mut batch = Vec::new();
        store.batch_put_utxo(&outpoint, &output, &mut batch).unwrap();
        store.commit(batch).unwrap();
        assert_eq!(store.get_utxo(&outpoint).unwrap(), Some(output));

        let mut batch = Vec::new();
        store.batch_delete_utxo(&outpoint, &mut batch);
        store.commit(batch).unwrap();
        assert_eq!(store.get_utxo(&outpoint).unwrap(), None);
    }

    #[test]
    fn test_scan_utxos() {
        let store = store();
        let mut batch = Vec::new();
        for i in 0..3u32 {
            let outpoint = OutPoint {
                tx: Digest([i as u8; 32]),
                index: i,
            };
            let output = TxOutput {
                value: u64::from(i),
                recipient: Address([0xCC; 20]),
                script: vec![],
                index: i,
            };
            store.batch_put_utxo(&outpoint, &output, &mut batch).unwrap();
        }
        store.commit(batch).unwrap();

        assert_eq!(store.scan_utxos().unwrap().len(), 3);
    }

    #[test]
    fn test_storage_cells() {
        let store = store();
        let address = Address([0x01; 20]);
        let mut batch = Vec::new();
        store.batch_put_cell(&address, b"slot0", b"value0", &mut batch);
        store.commit(batch).unwrap();

        assert_eq!(
            store.get_cell(&address, b"slot0").unwrap(),
            Some(b"value0".to_vec())
        );
    }
}
