//! # Block Store
//!
//! Namespaced view over the shared key-value backend holding every block
//! ever accepted, the height → digest index for the canonical path, and
//! the tip pointer.
//!
//! ## Key layout
//!
//! - `b:<digest>` → bincode [`Block`]
//! - `h:<height BE>` → digest (canonical path only)
//! - `meta:tip` → digest
//! - `meta:genesis` → digest
//!
//! Heights are big-endian so the ordered scan walks the chain in order.

use std::sync::Arc;

use ferrite_types::{Block, Digest};
use tracing::debug;

use crate::errors::StorageError;
use crate::kv::{BatchOperation, KeyValueStore};

const BLOCK_PREFIX: &[u8] = b"b:";
const HEIGHT_PREFIX: &[u8] = b"h:";
const TX_PREFIX: &[u8] = b"t:";
const TIP_KEY: &[u8] = b"meta:tip";
const GENESIS_KEY: &[u8] = b"meta:genesis";

/// Persistent block storage with a height index and tip pointer.
#[derive(Clone)]
pub struct BlockStore {
    kv: Arc<dyn KeyValueStore>,
}

impl BlockStore {
    /// Wrap a backend.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// The shared backend, for composing cross-store batches.
    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        self.kv.clone()
    }

    fn block_key(digest: &Digest) -> Vec<u8> {
        let mut key = BLOCK_PREFIX.to_vec();
        key.extend_from_slice(digest.as_bytes());
        key
    }

    fn height_key(height: u64) -> Vec<u8> {
        let mut key = HEIGHT_PREFIX.to_vec();
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    fn tx_key(tx: &Digest) -> Vec<u8> {
        let mut key = TX_PREFIX.to_vec();
        key.extend_from_slice(tx.as_bytes());
        key
    }

    /// Fetch a block by digest.
    pub fn get_block(&self, digest: &Digest) -> Result<Option<Block>, StorageError> {
        match self.kv.get(&Self::block_key(digest))? {
            None => Ok(None),
            Some(bytes) => {
                let block: Block = bincode::deserialize(&bytes).map_err(|_| {
                    StorageError::Corruption(format!("undecodable block {digest}"))
                })?;
                Ok(Some(block))
            }
        }
    }

    /// Whether a block is stored.
    pub fn contains(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.kv.exists(&Self::block_key(digest))
    }

    /// Digest on the canonical path at `height`.
    pub fn digest_at_height(&self, height: u64) -> Result<Option<Digest>, StorageError> {
        match self.kv.get(&Self::height_key(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Digest::from_slice(&bytes).map_err(|_| {
                StorageError::Corruption(format!("bad digest in height index {height}"))
            })?)),
        }
    }

    /// Block on the canonical path at `height`.
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        match self.digest_at_height(height)? {
            None => Ok(None),
            Some(digest) => self.get_block(&digest),
        }
    }

    /// Current tip digest, if a chain exists.
    pub fn tip(&self) -> Result<Option<Digest>, StorageError> {
        match self.kv.get(TIP_KEY)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Digest::from_slice(&bytes).map_err(|_| {
                StorageError::Corruption("bad tip pointer".to_string())
            })?)),
        }
    }

    /// Genesis digest, if initialized.
    pub fn genesis(&self) -> Result<Option<Digest>, StorageError> {
        match self.kv.get(GENESIS_KEY)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Digest::from_slice(&bytes).map_err(|_| {
                StorageError::Corruption("bad genesis pointer".to_string())
            })?)),
        }
    }

    /// Block digest a canonical transaction was committed in.
    pub fn tx_location(&self, tx: &Digest) -> Result<Option<Digest>, StorageError> {
        match self.kv.get(&Self::tx_key(tx))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Digest::from_slice(&bytes).map_err(|_| {
                StorageError::Corruption(format!("bad digest in tx index for {tx}"))
            })?)),
        }
    }

    /// Store a block outside the canonical path (no index update). Used
    /// for competing branches awaiting fork choice.
    pub fn put_side_block(&self, block: &Block) -> Result<(), StorageError> {
        let bytes = bincode::serialize(block)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.kv.put(&Self::block_key(&block.identity()), &bytes)
    }

    /// Batch ops persisting a block on the canonical path: the block body,
    /// its height-index entry, and the tip pointer.
    pub fn batch_commit_canonical(
        &self,
        block: &Block,
        batch: &mut Vec<BatchOperation>,
    ) -> Result<(), StorageError> {
        let digest = block.identity();
        let bytes = bincode::serialize(block)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        batch.push(BatchOperation::put(Self::block_key(&digest), bytes));
        batch.push(BatchOperation::put(
            Self::height_key(block.height()),
            digest.as_bytes().to_vec(),
        ));
        for tx in &block.transactions {
            batch.push(BatchOperation::put(
                Self::tx_key(&tx.identity()),
                digest.as_bytes().to_vec(),
            ));
        }
        batch.push(BatchOperation::put(TIP_KEY.to_vec(), digest.as_bytes().to_vec()));
        if block.is_genesis() {
            batch.push(BatchOperation::put(
                GENESIS_KEY.to_vec(),
                digest.as_bytes().to_vec(),
            ));
        }
        Ok(())
    }

    /// Batch ops demoting a block off the canonical path during a
    /// reorganization: the height-index and tx-index entries go, the body
    /// stays.
    pub fn batch_demote(&self, block: &Block, batch: &mut Vec<BatchOperation>) {
        batch.push(BatchOperation::delete(Self::height_key(block.height())));
        for tx in &block.transactions {
            batch.push(BatchOperation::delete(Self::tx_key(&tx.identity())));
        }
    }

    /// Batch op rewriting the tip pointer.
    pub fn batch_set_tip(&self, tip: &Digest, batch: &mut Vec<BatchOperation>) {
        batch.push(BatchOperation::put(TIP_KEY.to_vec(), tip.as_bytes().to_vec()));
    }

    /// Apply a composed batch atomically.
    pub fn commit(&self, batch: Vec<BatchOperation>) -> Result<(), StorageError> {
        self.kv.atomic_batch_write(batch)
    }

    /// Startup consistency check: the tip pointer must resolve to a stored
    /// block whose height index points back at it. Anything else is
    /// corruption the node refuses to run on.
    pub fn recover(&self) -> Result<Option<Block>, StorageError> {
        let Some(tip_digest) = self.tip()? else {
            return Ok(None);
        };
        let tip = self.get_block(&tip_digest)?.ok_or_else(|| {
            StorageError::Corruption(format!("tip {tip_digest} points to an absent block"))
        })?;
        match self.digest_at_height(tip.height())? {
            Some(indexed) if indexed == tip_digest => {
                debug!(height = tip.height(), %tip_digest, "Block store recovered");
                Ok(Some(tip))
            }
            _ => Err(StorageError::Corruption(format!(
                "height index at {} does not point at tip {tip_digest}",
                tip.height()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use ferrite_types::{Block, BlockHeader, Seal};

    fn store() -> BlockStore {
        BlockStore::new(Arc::new(MemoryStore::new()))
    }

    fn block_at(height: u64, prev: Digest) -> Block {
        Block::assemble(
            BlockHeader {
                version: 1,
                prev_digest: prev,
                merkle_root: Digest::ZERO,
                timestamp: 1_700_000_000 + height,
                nonce: 0,
                difficulty: 1,
                height,
                tx_count: 0,
            },
            Seal::Work,
            vec![],
        )
    }

    fn commit(store: &BlockStore, block: &Block) {
        let mut batch = Vec::new();
        store.batch_commit_canonical(block, &mut batch).unwrap();
        store.commit(batch).unwrap();
    }

    #[test]
    fn test_commit_and_fetch() {
        let store = store();
        let genesis = block_at(0, Digest::ZERO);
        commit(&store, &genesis);

        assert_eq!(store.tip().unwrap(), Some(genesis.identity()));
        assert_eq!(store.genesis().unwrap(), Some(genesis.identity()));
        assert_eq!(
            store.get_block_by_height(0).unwrap().unwrap().identity(),
            genesis.identity()
        );
    }

    #[test]
    fn test_recover_round_trip() {
        let store = store();
        let genesis = block_at(0, Digest::ZERO);
        commit(&store, &genesis);
        let child = block_at(1, genesis.identity());
        commit(&store, &child);

        let tip = store.recover().unwrap().unwrap();
        assert_eq!(tip.identity(), child.identity());
    }

    #[test]
    fn test_recover_empty_store() {
        assert!(store().recover().unwrap().is_none());
    }

    #[test]
    fn test_recover_detects_dangling_tip() {
        let store = store();
        let genesis = block_at(0, Digest::ZERO);
        commit(&store, &genesis);

        // Point the tip at a digest with no stored block.
        let mut batch = Vec::new();
        store.batch_set_tip(&Digest([0xEE; 32]), &mut batch);
        store.commit(batch).unwrap();

        let err = store.recover().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_side_block_not_indexed() {
        let store = store();
        let genesis = block_at(0, Digest::ZERO);
        commit(&store, &genesis);

        let side = block_at(1, genesis.identity());
        store.put_side_block(&side).unwrap();

        assert!(store.contains(&side.identity()).unwrap());
        assert!(store.get_block_by_height(1).unwrap().is_none());
        assert_eq!(store.tip().unwrap(), Some(genesis.identity()));
    }
}
