//! # Iterator Module
//!
//! The k-way merge machinery that fuses every storage layer into a single
//! ordered, deduplicated key stream.
//!
//! ## Version precedence
//!
//! Every input entry is tagged with a source index; **smaller indices are
//! newer sources**. The memtable tags the current table `0` and frozen
//! tables `1..` newest-first; the engine tags SSTable entries with the
//! negated table id so that the newest (largest-id) table sorts first.
//! Ordering is `(key ASC, idx ASC)`, so when several sources carry the
//! same key, the newest version surfaces first and the rest are popped
//! without being yielded.
//!
//! ## Tombstones
//!
//! An entry with an empty value marks a deleted key. [`HeapIterator`]
//! suppresses the whole key group whenever the newest surviving version
//! of a key is a tombstone, so consumers only ever observe live entries.
//!
//! ## Snapshots
//!
//! Both iterators own their data outright: construction materializes a
//! point-in-time snapshot and later mutations of the memtable or table
//! registry are not observed.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

// ------------------------------------------------------------------------------------------------
// SearchItem
// ------------------------------------------------------------------------------------------------

/// One candidate entry in the merge, tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,

    /// Source tag; smaller means newer.
    pub idx: i64,
}

impl SearchItem {
    pub fn new(key: Vec<u8>, value: Vec<u8>, idx: i64) -> Self {
        Self { key, value, idx }
    }
}

impl Ord for SearchItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for SearchItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ------------------------------------------------------------------------------------------------
// HeapIterator
// ------------------------------------------------------------------------------------------------

/// Min-heap merger over tagged entries from any number of sources.
///
/// After construction and after every advance, either the heap is empty
/// or its top carries a key distinct from everything yielded before and a
/// non-empty value.
pub struct HeapIterator {
    heap: BinaryHeap<Reverse<SearchItem>>,
}

impl Default for HeapIterator {
    fn default() -> Self {
        Self::empty()
    }
}

impl HeapIterator {
    /// Builds the merger over a snapshot of items and drains any
    /// tombstone groups sitting at the front.
    pub fn new(items: Vec<SearchItem>) -> Self {
        let mut iter = Self {
            heap: items.into_iter().map(Reverse).collect(),
        };
        iter.drain_deleted();
        iter
    }

    /// An exhausted iterator; serves as the end marker.
    pub fn empty() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn is_end(&self) -> bool {
        self.heap.is_empty()
    }

    /// Current entry without consuming it.
    pub fn peek(&self) -> Option<(&[u8], &[u8])> {
        self.heap
            .peek()
            .map(|Reverse(item)| (item.key.as_slice(), item.value.as_slice()))
    }

    /// Pops the current entry, then pops every older version of the same
    /// key and any tombstone groups that surface behind it.
    pub fn advance(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let Reverse(top) = self.heap.pop()?;
        self.pop_key_group(&top.key);
        self.drain_deleted();
        Some((top.key, top.value))
    }

    /// While the top of the heap is a tombstone, pop its entire key group.
    fn drain_deleted(&mut self) {
        loop {
            let deleted_key = match self.heap.peek() {
                Some(Reverse(item)) if item.value.is_empty() => item.key.clone(),
                _ => return,
            };
            self.pop_key_group(&deleted_key);
        }
    }

    /// Pops every item whose key equals `key`.
    fn pop_key_group(&mut self, key: &[u8]) {
        while let Some(Reverse(item)) = self.heap.peek() {
            if item.key.as_slice() != key {
                break;
            }
            self.heap.pop();
        }
    }
}

impl Iterator for HeapIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator
// ------------------------------------------------------------------------------------------------

/// Fuses the memtable stream with the L0 SSTable stream.
///
/// Both inputs already yield unique ascending keys; when their heads
/// collide the memtable side wins, since anything still in memory is
/// newer than anything flushed to disk.
pub struct MergeIterator {
    mem_iter: HeapIterator,
    sst_iter: HeapIterator,
}

impl MergeIterator {
    pub fn new(mem_iter: HeapIterator, sst_iter: HeapIterator) -> Self {
        let mut iter = Self { mem_iter, sst_iter };
        iter.skip_sst_duplicates();
        iter
    }

    pub fn is_end(&self) -> bool {
        self.mem_iter.is_end() && self.sst_iter.is_end()
    }

    /// Fast-forwards the SSTable side past any key equal to the current
    /// memtable head.
    fn skip_sst_duplicates(&mut self) {
        loop {
            let duplicated = matches!(
                (self.mem_iter.peek(), self.sst_iter.peek()),
                (Some((mem_key, _)), Some((sst_key, _))) if mem_key == sst_key
            );
            if !duplicated {
                break;
            }
            self.sst_iter.advance();
        }
    }
}

impl Iterator for MergeIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let choose_mem = match (self.mem_iter.peek(), self.sst_iter.peek()) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((mem_key, _)), Some((sst_key, _))) => mem_key < sst_key,
        };

        let item = if choose_mem {
            self.mem_iter.advance()
        } else {
            self.sst_iter.advance()
        };
        self.skip_sst_duplicates();
        item
    }
}
