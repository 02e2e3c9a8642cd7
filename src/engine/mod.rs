//! # LSM Storage Engine
//!
//! The top-level façade tying the layers together: a [`Memtable`] for
//! recent writes, a registry of L0 [`SSTable`]s for flushed data, and a
//! shared [`BlockCache`] for disk reads.
//!
//! ## Write path
//!
//! ```text
//! put/remove → memtable.current
//!                └─ current > per-table limit → freeze
//!                     └─ total ≥ total limit → flush()
//!                          └─ oldest frozen → SstBuilder → sst_XXXX file
//!                               └─ registered as the newest L0 table
//! ```
//!
//! ## Read path
//!
//! `get` consults the current table, then frozen tables newest-first,
//! then L0 tables newest-first (block reads going through the cache).
//! The first layer that knows the key wins; an empty value is a
//! tombstone and answers "not found". Scans materialize a point-in-time
//! snapshot of every layer and fuse them through a [`MergeIterator`],
//! yielding each live key once, newest version first.
//!
//! ## Concurrency Model
//!
//! The memtable carries its own two locks (see [`crate::memtable`]).
//! One reader-writer lock guards the L0 registry: reads and scans take
//! it shared, flush publication takes it exclusive. Flushes themselves
//! are serialized by a dedicated mutex, which also makes id allocation
//! race-free.
//!
//! ## Durability
//!
//! There is no write-ahead log: data is durable once flushed. Dropping
//! the engine flushes everything still in memory; corruption detected
//! when reading a table back (checksum mismatch, truncated file) is
//! surfaced as an error and is not repairable by the engine.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::BlockCache;
use crate::iterator::{HeapIterator, MergeIterator, SearchItem};
use crate::memtable::{Memtable, MemtableError};
use crate::sstable::{collect_range, FileObject, SSTable, SSTableError, SstBuilder};

#[cfg(test)]
mod tests;

/// L0 file name prefix; ids are zero-padded to four digits.
const SST_FILE_PREFIX: &str = "sst_";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tunables for an [`Engine`] instance.
///
/// The defaults match the intended production shape; tests shrink the
/// limits to force freezes and flushes with little data.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Total memtable bytes (current + frozen) that trigger a flush.
    pub total_mem_size_limit: usize,

    /// Bytes in the current table that trigger an automatic freeze.
    pub per_mem_size_limit: usize,

    /// Soft cap of one SSTable block, in bytes.
    pub block_size: usize,

    /// Number of blocks the cache holds.
    pub block_cache_capacity: usize,

    /// `K` of the cache's LRU-K policy.
    pub block_cache_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_mem_size_limit: 64 * 1024 * 1024,
            per_mem_size_limit: 4 * 1024 * 1024,
            block_size: 32 * 1024,
            block_cache_capacity: 1024,
            block_cache_k: 8,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// Newest-first registry of the on-disk tables.
struct TableRegistry {
    /// L0 ids, newest (largest) first.
    l0_sst_ids: Vec<u64>,

    /// Open table handles by id.
    ssts: HashMap<u64, Arc<SSTable>>,
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
pub struct EngineStats {
    /// Bytes currently buffered in memory (current + frozen tables).
    pub mem_bytes: usize,

    /// Number of L0 tables on disk.
    pub sstables_count: usize,
}

/// The main storage engine handle.
pub struct Engine {
    data_dir: PathBuf,
    config: EngineConfig,
    memtable: Memtable,
    tables: RwLock<TableRegistry>,
    block_cache: Arc<BlockCache>,

    /// Serializes flushes; the new table id is allocated under it.
    flush_lock: Mutex<()>,
}

impl Engine {
    /// Opens (or creates) an engine over `path` with default tunables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::open_with_config(path, EngineConfig::default())
    }

    /// Opens (or creates) an engine over `path`.
    ///
    /// An existing directory is scanned for `sst_XXXX` files; each is
    /// opened, registered, and ordered newest-first. Files that do not
    /// match the naming scheme are ignored.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let data_dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let block_cache = Arc::new(BlockCache::new(
            config.block_cache_capacity,
            config.block_cache_k,
        ));

        let mut l0_sst_ids = Vec::new();
        let mut ssts = HashMap::new();

        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(sst_id) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(SST_FILE_PREFIX))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                warn!(?file_name, "ignoring unrecognized file in data dir");
                continue;
            };

            let file = FileObject::open(entry.path())?;
            let sst = SSTable::open(sst_id, file, Arc::clone(&block_cache))?;
            ssts.insert(sst_id, Arc::new(sst));
            l0_sst_ids.push(sst_id);
        }

        l0_sst_ids.sort_unstable_by(|a, b| b.cmp(a));
        info!(
            data_dir = %data_dir.display(),
            sst_count = l0_sst_ids.len(),
            "engine opened"
        );

        Ok(Self {
            data_dir,
            memtable: Memtable::new(config.per_mem_size_limit),
            config,
            tables: RwLock::new(TableRegistry { l0_sst_ids, ssts }),
            block_cache,
            flush_lock: Mutex::new(()),
        })
    }

    fn lock_poisoned<T>(_: T) -> EngineError {
        error!("engine registry lock poisoned");
        EngineError::Internal("RwLock poisoned".into())
    }

    fn sst_path(&self, sst_id: u64) -> PathBuf {
        self.data_dir.join(format!("{SST_FILE_PREFIX}{sst_id:04}"))
    }

    /// Inserts a key-value pair, flushing when the memtable passes its
    /// total size limit.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError> {
        self.memtable.put(key, value)?;
        self.maybe_flush()
    }

    /// Inserts a batch of pairs; the flush check runs once at the end.
    pub fn put_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), EngineError> {
        self.memtable.put_batch(batch)?;
        self.maybe_flush()
    }

    /// Deletes a key by writing a tombstone.
    pub fn remove(&self, key: Vec<u8>) -> Result<(), EngineError> {
        self.memtable.remove(key)?;
        Ok(())
    }

    /// Tombstones a batch of keys.
    pub fn remove_batch(&self, keys: Vec<Vec<u8>>) -> Result<(), EngineError> {
        self.memtable.remove_batch(keys)?;
        Ok(())
    }

    fn maybe_flush(&self) -> Result<(), EngineError> {
        if self.memtable.total_size()? >= self.config.total_mem_size_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Looks up a key across all layers, newest first.
    ///
    /// Returns `Ok(None)` when the key was never written or its newest
    /// version is a tombstone. A table whose key span does not cover the
    /// key is skipped.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        if let Some(value) = self.memtable.get(key)? {
            if value.is_empty() {
                return Ok(None);
            }
            return Ok(Some(value));
        }

        let tables = self.tables.read().map_err(Self::lock_poisoned)?;
        for sst_id in &tables.l0_sst_ids {
            let sst = tables
                .ssts
                .get(sst_id)
                .ok_or_else(|| EngineError::Internal(format!("unregistered SSTable {sst_id}")))?;

            let iter = match sst.get(key) {
                Ok(iter) => iter,
                // Key span does not cover this key: not in this table.
                Err(SSTableError::OutOfRange) => continue,
                Err(e) => return Err(e.into()),
            };

            if iter.key() == Some(key) {
                return match iter.value() {
                    Some([]) | None => Ok(None),
                    Some(value) => Ok(Some(value.to_vec())),
                };
            }
        }

        Ok(None)
    }

    /// Serializes the oldest frozen memtable into a new L0 table.
    ///
    /// Flushes are serialized engine-wide; the new table id (newest + 1,
    /// or 0 on an empty registry) is allocated while holding the flush
    /// lock, so concurrent callers cannot collide. A no-op when the
    /// memtable holds no bytes.
    pub fn flush(&self) -> Result<(), EngineError> {
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.memtable.total_size()? == 0 {
            return Ok(());
        }

        let new_sst_id = {
            let tables = self.tables.read().map_err(Self::lock_poisoned)?;
            tables.l0_sst_ids.first().map(|id| id + 1).unwrap_or(0)
        };

        let builder = SstBuilder::new(self.config.block_size);
        let path = self.sst_path(new_sst_id);
        let Some(sst) = self.memtable.flush_last(
            builder,
            &path,
            new_sst_id,
            Arc::clone(&self.block_cache),
        )?
        else {
            return Ok(());
        };

        info!(
            sst_id = new_sst_id,
            path = %path.display(),
            "flushed memtable to L0"
        );

        let mut tables = self.tables.write().map_err(Self::lock_poisoned)?;
        tables.l0_sst_ids.insert(0, new_sst_id);
        tables.ssts.insert(new_sst_id, Arc::new(sst));
        Ok(())
    }

    /// Flushes until the memtable is empty.
    pub fn flush_all(&self) -> Result<(), EngineError> {
        while self.memtable.total_size()? > 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Ordered scan over every live key in the store.
    ///
    /// The scan observes the memtable contents and the L0 set as of this
    /// call; later writes and flushes are not reflected.
    pub fn iter(&self) -> Result<MergeIterator, EngineError> {
        let mem_iter = self.memtable.iter()?;

        let tables = self.tables.read().map_err(Self::lock_poisoned)?;
        let mut items = Vec::new();
        for sst_id in &tables.l0_sst_ids {
            let sst = tables
                .ssts
                .get(sst_id)
                .ok_or_else(|| EngineError::Internal(format!("unregistered SSTable {sst_id}")))?;

            let mut iter = sst.iter()?;
            loop {
                if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
                    // Negated id: the newest (largest-id) table must win
                    // key ties in the heap.
                    items.push(SearchItem::new(
                        key.to_vec(),
                        value.to_vec(),
                        -(*sst_id as i64),
                    ));
                } else {
                    break;
                }
                iter.advance()?;
            }
        }

        Ok(MergeIterator::new(mem_iter, HeapIterator::new(items)))
    }

    /// Ordered scan over the contiguous key run accepted by a monotone
    /// predicate (sign convention as in
    /// [`crate::skiplist::SkipList::predicate_range`]).
    ///
    /// Returns `Ok(None)` when no layer holds an accepted key.
    pub fn predicate_range<F>(&self, predicate: F) -> Result<Option<MergeIterator>, EngineError>
    where
        F: Fn(&[u8]) -> i32,
    {
        let mem_iter = self.memtable.predicate_iters(&predicate)?;

        let tables = self.tables.read().map_err(Self::lock_poisoned)?;
        let mut items = Vec::new();
        for sst_id in &tables.l0_sst_ids {
            let sst = tables
                .ssts
                .get(sst_id)
                .ok_or_else(|| EngineError::Internal(format!("unregistered SSTable {sst_id}")))?;

            if let Some((begin, end)) = sst.predicate_range(&predicate)? {
                collect_range(begin, &end, -(*sst_id as i64), &mut items)?;
            }
        }

        if mem_iter.is_none() && items.is_empty() {
            return Ok(None);
        }

        Ok(Some(MergeIterator::new(
            mem_iter.unwrap_or_else(HeapIterator::empty),
            HeapIterator::new(items),
        )))
    }

    /// Fraction of block reads served from the cache.
    pub fn cache_hit_rate(&self) -> f64 {
        self.block_cache.hit_rate()
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let tables = self.tables.read().map_err(Self::lock_poisoned)?;
        Ok(EngineStats {
            mem_bytes: self.memtable.total_size()?,
            sstables_count: tables.l0_sst_ids.len(),
        })
    }
}

impl Drop for Engine {
    /// Persists whatever is still buffered. Failures are logged rather
    /// than panicked: a drop has nowhere to propagate them.
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!(?e, "flush on engine drop failed; unflushed data is lost");
        }
    }
}
