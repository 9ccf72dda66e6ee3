//! # Block Pool
//!
//! Buffer for blocks that cannot be applied yet: competing-branch blocks
//! awaiting fork choice and out-of-order deliveries awaiting their parent.
//! Bounded and expiring; the chain owns canonical blocks, this pool owns
//! everything else until promotion or discard.

use std::collections::HashMap;

use ferrite_types::{Block, Digest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Block pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPoolConfig {
    /// Maximum buffered blocks.
    pub capacity: usize,
    /// Per-block lifetime in milliseconds.
    pub expiry_ms: u64,
}

impl Default for BlockPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            expiry_ms: 48 * 60 * 60 * 1000,
        }
    }
}

struct PooledBlock {
    block: Block,
    received_at: u64,
}

/// Counters surfaced through `get_mempool_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPoolStats {
    /// Blocks currently buffered.
    pub total_blocks: usize,
    /// Admissions dropped as already-known.
    pub duplicates_filtered: u64,
    /// Blocks dropped by the expiry sweep.
    pub expired: u64,
}

/// Bounded buffer of off-chain blocks.
pub struct BlockPool {
    config: BlockPoolConfig,
    inner: RwLock<Inner>,
}

struct Inner {
    blocks: HashMap<Digest, PooledBlock>,
    stats: BlockPoolStats,
}

impl BlockPool {
    /// Create an empty pool.
    pub fn new(config: BlockPoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                blocks: HashMap::new(),
                stats: BlockPoolStats::default(),
            }),
        }
    }

    /// Pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BlockPoolConfig::default())
    }

    /// Number of buffered blocks.
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().blocks.is_empty()
    }

    /// Whether a digest is buffered.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.inner.read().blocks.contains_key(digest)
    }

    /// Buffer a block. Returns false for duplicates. At capacity the
    /// oldest buffered block is dropped first.
    pub fn add_block(&self, block: Block, now_ms: u64) -> bool {
        let digest = block.identity();
        let mut inner = self.inner.write();

        if inner.blocks.contains_key(&digest) {
            inner.stats.duplicates_filtered += 1;
            return false;
        }

        if inner.blocks.len() >= self.config.capacity {
            if let Some(oldest) = inner
                .blocks
                .iter()
                .map(|(d, b)| (b.received_at, *d))
                .min()
                .map(|(_, d)| d)
            {
                inner.blocks.remove(&oldest);
            }
        }

        inner.blocks.insert(
            digest,
            PooledBlock {
                block,
                received_at: now_ms,
            },
        );
        true
    }

    /// Fetch a buffered block.
    pub fn get_block(&self, digest: &Digest) -> Option<Block> {
        self.inner.read().blocks.get(digest).map(|b| b.block.clone())
    }

    /// Remove and return a buffered block.
    pub fn take_block(&self, digest: &Digest) -> Option<Block> {
        self.inner.write().blocks.remove(digest).map(|b| b.block)
    }

    /// Remove and return every buffered child of `parent`, for promotion
    /// once the parent arrives.
    pub fn take_children(&self, parent: &Digest) -> Vec<Block> {
        let mut inner = self.inner.write();
        let children: Vec<Digest> = inner
            .blocks
            .iter()
            .filter(|(_, b)| b.block.header.prev_digest == *parent)
            .map(|(d, _)| *d)
            .collect();
        children
            .into_iter()
            .filter_map(|d| inner.blocks.remove(&d).map(|b| b.block))
            .collect()
    }

    /// Expiry sweep.
    pub fn expire(&self, now_ms: u64) -> Vec<Digest> {
        let expiry_ms = self.config.expiry_ms;
        let mut inner = self.inner.write();
        let expired: Vec<Digest> = inner
            .blocks
            .iter()
            .filter(|(_, b)| now_ms.saturating_sub(b.received_at) > expiry_ms)
            .map(|(d, _)| *d)
            .collect();
        for digest in &expired {
            inner.blocks.remove(digest);
            inner.stats.expired += 1;
        }
        expired
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BlockPoolStats {
        let inner = self.inner.read();
        let mut stats = inner.stats.clone();
        stats.total_blocks = inner.blocks.len();
        stats
    }
}
