//! # JSON File Backend
//!
//! A single JSON document of hex-encoded pairs, rewritten atomically on
//! every batch commit (write temp file, then rename). Slow and simple; the
//! `"json"` storage backend for small deployments and inspectable test
//! fixtures. An advisory lock on the data directory keeps a second node
//! process out.

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::errors::StorageError;
use crate::kv::{BatchOperation, KeyValueStore};

const STORE_FILE: &str = "store.json";
const LOCK_FILE: &str = "store.lock";

/// File-backed ordered key-value store.
#[derive(Debug)]
pub struct JsonFileStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    path: PathBuf,
    // Serializes rewrites; held across the temp-write + rename pair.
    write_guard: Mutex<()>,
    _lock_file: File,
}

impl JsonFileStore {
    /// Open or create a store in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(dir.display().to_string()))?;

        let path = dir.join(STORE_FILE);
        let data = if path.exists() {
            Self::load(&path)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            data: RwLock::new(data),
            path,
            write_guard: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| StorageError::Corruption(format!("{}: {e}", path.display())))?;

        let mut data = BTreeMap::new();
        for (key, value) in entries {
            let key = hex::decode(&key)
                .map_err(|_| StorageError::Corruption(format!("bad key hex: {key}")))?;
            let value = hex::decode(&value)
                .map_err(|_| StorageError::Corruption("bad value hex".to_string()))?;
            data.insert(key, value);
        }
        Ok(data)
    }

    fn persist(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StorageError> {
        let _guard = self.write_guard.lock();

        let entries: BTreeMap<String, String> = data
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        let raw = serde_json::to_string_pretty(&entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write();
        data.insert(key.to_vec(), value.to_vec());
        self.persist(&data)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write();
        data.remove(key);
        self.persist(&data)
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
        // One rewrite for the whole batch; the rename makes it atomic on
        // crash.
        self.persist(&data)
    }

    fn flush(&self) -> Result<(), StorageError> {
        let data = self.data.read();
        self.persist(&data)
    }
}
