//! # Memtable Module
//!
//! The in-memory write buffer of the storage engine: a writable
//! **current** skip list plus a newest-first queue of immutable
//! **frozen** skip lists awaiting flush.
//!
//! ## Design Invariants
//!
//! - All writes land in `current`; frozen tables are never mutated.
//! - A remove is a put of the empty value (tombstone). Readers receive
//!   the tombstone as-is — translating it into "not found" is the
//!   engine's job, because a tombstone must shadow older versions living
//!   in frozen tables and SSTables.
//! - When `current` outgrows the per-table limit it is pushed onto the
//!   **front** of the frozen queue and a fresh table is installed, so the
//!   queue is ordered newest-first and flushing pops from the back.
//! - `frozen_bytes` equals the sum of `used_bytes` over the queue.
//!
//! ## Locking
//!
//! Two independent reader-writer locks, one over `current` and one over
//! the frozen queue. Whenever both are needed they are acquired in the
//! fixed order **current, then frozen**. Writes take `current`
//! exclusively and only touch `frozen` when freezing; point reads take
//! each lock shared, one after the other; snapshots take both shared.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::mem;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use thiserror::Error;
use tracing::{error, trace};

use crate::cache::BlockCache;
use crate::iterator::{HeapIterator, SearchItem};
use crate::skiplist::SkipList;
use crate::sstable::{SSTable, SSTableError, SstBuilder};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Failure while building the SSTable during a flush.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Frozen queue
// ------------------------------------------------------------------------------------------------

struct FrozenTables {
    /// Immutable tables, newest at the front.
    tables: VecDeque<Arc<SkipList>>,

    /// Sum of `used_bytes` across the queue.
    bytes: usize,
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Current-plus-frozen write buffer with size-triggered freezing.
pub struct Memtable {
    current: RwLock<SkipList>,
    frozen: RwLock<FrozenTables>,

    /// `current` is frozen once its `used_bytes` exceeds this.
    per_table_size_limit: usize,
}

impl Memtable {
    /// Creates an empty memtable that freezes its current table past
    /// `per_table_size_limit` bytes.
    pub fn new(per_table_size_limit: usize) -> Self {
        Self {
            current: RwLock::new(SkipList::new()),
            frozen: RwLock::new(FrozenTables {
                tables: VecDeque::new(),
                bytes: 0,
            }),
            per_table_size_limit,
        }
    }

    fn lock_poisoned<T>(_: T) -> MemtableError {
        error!("memtable lock poisoned");
        MemtableError::Internal("RwLock poisoned".into())
    }

    /// Inserts or updates a key, freezing the current table when it
    /// outgrows the per-table limit.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), MemtableError> {
        trace!(key = ?KeyDisplay(&key), "memtable put");

        let mut current = self.current.write().map_err(Self::lock_poisoned)?;
        current.put(key, value);
        self.maybe_freeze(&mut current)
    }

    /// Inserts a batch of entries under one `current` lock acquisition;
    /// the freeze check runs once, after the whole batch.
    pub fn put_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), MemtableError> {
        let mut current = self.current.write().map_err(Self::lock_poisoned)?;
        for (key, value) in batch {
            current.put(key, value);
        }
        self.maybe_freeze(&mut current)
    }

    /// Marks a key deleted by storing the empty tombstone value.
    pub fn remove(&self, key: Vec<u8>) -> Result<(), MemtableError> {
        trace!(key = ?KeyDisplay(&key), "memtable remove");

        let mut current = self.current.write().map_err(Self::lock_poisoned)?;
        current.put(key, Vec::new());
        Ok(())
    }

    /// Tombstones a batch of keys under one lock acquisition.
    pub fn remove_batch(&self, keys: Vec<Vec<u8>>) -> Result<(), MemtableError> {
        let mut current = self.current.write().map_err(Self::lock_poisoned)?;
        for key in keys {
            current.put(key, Vec::new());
        }
        Ok(())
    }

    /// Looks up a key in `current`, then in the frozen queue
    /// newest-first. The returned value may be the empty tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MemtableError> {
        {
            let current = self.current.read().map_err(Self::lock_poisoned)?;
            if let Some(value) = current.get(key) {
                return Ok(Some(value.to_vec()));
            }
        }

        let frozen = self.frozen.read().map_err(Self::lock_poisoned)?;
        for table in &frozen.tables {
            if let Some(value) = table.get(key) {
                return Ok(Some(value.to_vec()));
            }
        }
        Ok(None)
    }

    /// Drops every table, current and frozen.
    pub fn clear(&self) -> Result<(), MemtableError> {
        let mut current = self.current.write().map_err(Self::lock_poisoned)?;
        let mut frozen = self.frozen.write().map_err(Self::lock_poisoned)?;
        current.clear();
        frozen.tables.clear();
        frozen.bytes = 0;
        Ok(())
    }

    /// Manually freezes the current table, regardless of size.
    pub fn freeze_current(&self) -> Result<(), MemtableError> {
        let mut current = self.current.write().map_err(Self::lock_poisoned)?;
        let mut frozen = self.frozen.write().map_err(Self::lock_poisoned)?;
        Self::freeze_locked(&mut current, &mut frozen);
        Ok(())
    }

    /// Freeze step shared by the auto and manual paths; the caller holds
    /// `current` exclusively and acquires `frozen` here.
    fn maybe_freeze(
        &self,
        current: &mut RwLockWriteGuard<'_, SkipList>,
    ) -> Result<(), MemtableError> {
        if current.used_bytes() > self.per_table_size_limit {
            let mut frozen = self.frozen.write().map_err(Self::lock_poisoned)?;
            Self::freeze_locked(current, &mut frozen);
        }
        Ok(())
    }

    fn freeze_locked(current: &mut SkipList, frozen: &mut FrozenTables) {
        if current.is_empty() {
            return;
        }
        trace!(bytes = current.used_bytes(), "freezing current table");
        frozen.bytes += current.used_bytes();
        let sealed = mem::replace(current, SkipList::new());
        frozen.tables.push_front(Arc::new(sealed));
    }

    /// Serializes the **oldest** frozen table into an SSTable.
    ///
    /// When the queue is empty but `current` holds data, `current` is
    /// frozen first. Returns `Ok(None)` when there is nothing to flush.
    /// The flushed bytes leave `frozen_bytes` as the table is taken; the
    /// engine republishes the data as an SSTable right after.
    pub fn flush_last(
        &self,
        mut builder: SstBuilder,
        path: impl AsRef<Path>,
        sst_id: u64,
        block_cache: Arc<BlockCache>,
    ) -> Result<Option<SSTable>, MemtableError> {
        let table = {
            let mut current = self.current.write().map_err(Self::lock_poisoned)?;
            let mut frozen = self.frozen.write().map_err(Self::lock_poisoned)?;

            if frozen.tables.is_empty() {
                if current.is_empty() {
                    return Ok(None);
                }
                Self::freeze_locked(&mut current, &mut frozen);
            }

            let Some(table) = frozen.tables.pop_back() else {
                return Ok(None);
            };
            frozen.bytes -= table.used_bytes();
            table
        };

        for (key, value) in table.iter() {
            builder.add(key, value);
        }
        let sst = builder.build(sst_id, path, block_cache)?;
        Ok(Some(sst))
    }

    /// Snapshot of every entry across current and frozen tables, merged
    /// into a single heap iterator. The current table is tagged `0`,
    /// frozen tables `1..` newest-first, so newer versions win key ties.
    pub fn iter(&self) -> Result<HeapIterator, MemtableError> {
        let current = self.current.read().map_err(Self::lock_poisoned)?;
        let frozen = self.frozen.read().map_err(Self::lock_poisoned)?;

        let mut items = Vec::new();
        collect_tagged(current.iter(), 0, &mut items);
        for (age, table) in frozen.tables.iter().enumerate() {
            collect_tagged(table.iter(), age as i64 + 1, &mut items);
        }
        Ok(HeapIterator::new(items))
    }

    /// Snapshot restricted to keys starting with `prefix`.
    pub fn prefix_iters(&self, prefix: &[u8]) -> Result<HeapIterator, MemtableError> {
        let current = self.current.read().map_err(Self::lock_poisoned)?;
        let frozen = self.frozen.read().map_err(Self::lock_poisoned)?;

        let mut items = Vec::new();
        collect_tagged(current.prefix_range(prefix), 0, &mut items);
        for (age, table) in frozen.tables.iter().enumerate() {
            collect_tagged(table.prefix_range(prefix), age as i64 + 1, &mut items);
        }
        Ok(HeapIterator::new(items))
    }

    /// Snapshot restricted to the keys accepted by a monotone predicate
    /// (sign convention as in [`SkipList::predicate_range`]). `None`
    /// when every table rejects.
    pub fn predicate_iters<F>(&self, predicate: F) -> Result<Option<HeapIterator>, MemtableError>
    where
        F: Fn(&[u8]) -> i32,
    {
        let current = self.current.read().map_err(Self::lock_poisoned)?;
        let frozen = self.frozen.read().map_err(Self::lock_poisoned)?;

        let mut matched = false;
        let mut items = Vec::new();
        if let Some(range) = current.predicate_range(&predicate) {
            matched = true;
            collect_tagged(range, 0, &mut items);
        }
        for (age, table) in frozen.tables.iter().enumerate() {
            if let Some(range) = table.predicate_range(&predicate) {
                matched = true;
                collect_tagged(range, age as i64 + 1, &mut items);
            }
        }

        if !matched {
            return Ok(None);
        }
        Ok(Some(HeapIterator::new(items)))
    }

    /// Bytes held by the current table.
    pub fn cur_size(&self) -> Result<usize, MemtableError> {
        let current = self.current.read().map_err(Self::lock_poisoned)?;
        Ok(current.used_bytes())
    }

    /// Bytes held by the frozen queue.
    pub fn frozen_size(&self) -> Result<usize, MemtableError> {
        let frozen = self.frozen.read().map_err(Self::lock_poisoned)?;
        Ok(frozen.bytes)
    }

    /// Bytes held across all tables.
    pub fn total_size(&self) -> Result<usize, MemtableError> {
        let current = self.current.read().map_err(Self::lock_poisoned)?;
        let frozen = self.frozen.read().map_err(Self::lock_poisoned)?;
        Ok(current.used_bytes() + frozen.bytes)
    }
}

/// Copies a table range into the snapshot vector under one source tag.
fn collect_tagged<'a, I>(range: I, idx: i64, items: &mut Vec<SearchItem>)
where
    I: Iterator<Item = (&'a [u8], &'a [u8])>,
{
    for (key, value) in range {
        items.push(SearchItem::new(key.to_vec(), value.to_vec(), idx));
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing helper
// ------------------------------------------------------------------------------------------------

/// Debug rendering of a key: hex, truncated past 16 bytes.
struct KeyDisplay<'a>(&'a [u8]);

impl std::fmt::Debug for KeyDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.0.len().min(16);
        for byte in &self.0[..shown] {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > shown {
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
