//! # In-Memory Backend
//!
//! `BTreeMap` behind a lock: ordered scans for free, atomic batches by
//! construction. The default backend for tests and ephemeral nodes.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::errors::StorageError;
use crate::kv::{BatchOperation, KeyValueStore};

/// In-memory ordered key-value store.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, for tests and stats.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
        let mut data = self.data.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));

        store.delete(b"key1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), None);
    }

    #[test]
    fn test_prefix_scan_is_ordered() {
        let store = MemoryStore::new();
        store.put(b"a:2", b"two").unwrap();
        store.put(b"a:1", b"one").unwrap();
        store.put(b"b:1", b"other").unwrap();

        let scanned = store.prefix_scan(b"a:").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"a:1".to_vec());
        assert_eq!(scanned[1].0, b"a:2".to_vec());
    }

    #[test]
    fn test_batch_write() {
        let store = MemoryStore::new();
        store.put(b"gone", b"x").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".as_slice(), b"1".as_slice()),
                BatchOperation::put(b"b".as_slice(), b"2".as_slice()),
                BatchOperation::delete(b"gone".as_slice()),
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"gone").unwrap(), None);
    }

    #[test]
    fn test_exists() {
        let store = MemoryStore::new();
        store.put(b"k", b"v").unwrap();
        assert!(store.exists(b"k").unwrap());
        assert!(!store.exists(b"missing").unwrap());
    }
}
