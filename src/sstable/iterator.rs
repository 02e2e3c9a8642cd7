//! SSTable iterator — ordered traversal across block boundaries.
//!
//! [`SsTableIterator`] is positioned by a `(block index, block iterator)`
//! pair. Blocks load lazily through [`SSTable::read_block`] (and so
//! through the block cache); when a block is exhausted the iterator rolls
//! into the next one. Because block iterators hold `Arc<Block>`, a
//! positioned iterator stays valid even if the cache evicts the block or
//! the engine drops the table.
//!
//! The [`Iterator`] impl treats read or decode failures mid-scan as
//! exhaustion: the error is logged and the stream ends. Callers that need
//! the failure itself use [`SsTableIterator::advance`] directly.

use std::sync::Arc;

use crate::block::BlockIterator;
use crate::iterator::SearchItem;

use super::{SSTable, SSTableError};

/// Cursor over every entry of one SSTable, in ascending key order.
pub struct SsTableIterator {
    sst: Arc<SSTable>,
    block_idx: usize,

    /// `None` once the cursor moved past the final entry.
    block_iter: Option<BlockIterator>,
}

impl SsTableIterator {
    /// Iterator positioned at the table's first entry.
    pub(crate) fn new(sst: Arc<SSTable>) -> Result<Self, SSTableError> {
        let mut iter = Self {
            sst,
            block_idx: 0,
            block_iter: None,
        };
        iter.seek_first()?;
        Ok(iter)
    }

    /// Iterator positioned at the first entry with key `>= key`.
    pub(crate) fn new_seeked(sst: Arc<SSTable>, key: &[u8]) -> Result<Self, SSTableError> {
        let mut iter = Self {
            sst,
            block_idx: 0,
            block_iter: None,
        };
        iter.seek(key)?;
        Ok(iter)
    }

    /// Positions at `(block_idx, block_iter)`, normalizing a
    /// block-final position to the start of the following block (or to
    /// end-of-table when no block follows).
    pub(crate) fn at(
        sst: Arc<SSTable>,
        block_idx: usize,
        block_iter: BlockIterator,
    ) -> Result<Self, SSTableError> {
        let mut iter = Self {
            sst,
            block_idx,
            block_iter: Some(block_iter),
        };
        iter.roll_if_exhausted()?;
        Ok(iter)
    }

    /// Moves to the first entry of the table.
    pub fn seek_first(&mut self) -> Result<(), SSTableError> {
        self.block_idx = 0;
        let block = self.sst.read_block(0)?;
        self.block_iter = Some(block.iter());
        Ok(())
    }

    /// Moves to the first entry with key `>= key`.
    ///
    /// Propagates [`SSTableError::OutOfRange`] when `key` lies outside
    /// the table's key span.
    pub fn seek(&mut self, key: &[u8]) -> Result<(), SSTableError> {
        self.block_idx = self.sst.find_block_index(key)?;
        let block = self.sst.read_block(self.block_idx)?;
        self.block_iter = Some(block.iter_from(key));
        self.roll_if_exhausted()
    }

    pub fn is_end(&self) -> bool {
        self.block_iter.is_none()
    }

    /// Key under the cursor, or `None` at end.
    pub fn key(&self) -> Option<&[u8]> {
        self.block_iter.as_ref().and_then(|iter| iter.key())
    }

    /// Value under the cursor, or `None` at end.
    pub fn value(&self) -> Option<&[u8]> {
        self.block_iter.as_ref().and_then(|iter| iter.value())
    }

    /// Steps past the current entry, rolling into the next block when the
    /// current one is exhausted.
    pub fn advance(&mut self) -> Result<(), SSTableError> {
        if let Some(iter) = &mut self.block_iter {
            iter.advance();
        }
        self.roll_if_exhausted()
    }

    /// When the block cursor sits past its final entry, load the next
    /// block or mark the whole iterator as ended.
    fn roll_if_exhausted(&mut self) -> Result<(), SSTableError> {
        let exhausted = self
            .block_iter
            .as_ref()
            .map(|iter| iter.is_end())
            .unwrap_or(false);
        if !exhausted {
            return Ok(());
        }

        self.block_idx += 1;
        if self.block_idx < self.sst.num_blocks() {
            let block = self.sst.read_block(self.block_idx)?;
            self.block_iter = Some(block.iter());
        } else {
            self.block_iter = None;
        }
        Ok(())
    }
}

impl PartialEq for SsTableIterator {
    fn eq(&self, other: &Self) -> bool {
        if self.is_end() && other.is_end() {
            return true;
        }
        match (&self.block_iter, &other.block_iter) {
            (Some(a), Some(b)) => {
                Arc::ptr_eq(&self.sst, &other.sst) && self.block_idx == other.block_idx && a == b
            }
            _ => false,
        }
    }
}

impl Eq for SsTableIterator {}

impl Iterator for SsTableIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let item = match (self.key(), self.value()) {
            (Some(key), Some(value)) => (key.to_vec(), value.to_vec()),
            _ => return None,
        };
        if let Err(e) = self.advance() {
            tracing::warn!(sst_id = self.sst.sst_id(), ?e, "scan stopped on read error");
            self.block_iter = None;
        }
        Some(item)
    }
}

// ------------------------------------------------------------------------------------------------
// Predicate range
// ------------------------------------------------------------------------------------------------

impl SSTable {
    /// Half-open iterator pair over the keys of this table accepted by a
    /// monotone predicate (sign convention as in
    /// [`crate::skiplist::SkipList::predicate_range`]).
    ///
    /// Blocks are scanned in order. A block can hold accepted keys only
    /// when `predicate(first_key) >= 0` and `predicate(last_key) <= 0`;
    /// blocks entirely left of the run are skipped, and the scan breaks
    /// off as soon as the run has passed. The leftmost begin and the
    /// rightmost end found across admissible blocks form the result.
    pub fn predicate_range<F>(
        self: &Arc<Self>,
        predicate: F,
    ) -> Result<Option<(SsTableIterator, SsTableIterator)>, SSTableError>
    where
        F: Fn(&[u8]) -> i32,
    {
        let mut final_begin: Option<SsTableIterator> = None;
        let mut final_end: Option<SsTableIterator> = None;

        for block_idx in 0..self.num_blocks() {
            let meta = &self.meta()[block_idx];
            if predicate(&meta.first_key) < 0 {
                // The run lies strictly left of everything from here on.
                break;
            }
            if predicate(&meta.last_key) > 0 {
                // Block entirely left of the run.
                continue;
            }

            let block = self.read_block(block_idx)?;
            if let Some((begin, end)) = block.predicate_range(&predicate) {
                if final_begin.is_none() {
                    final_begin = Some(SsTableIterator::at(Arc::clone(self), block_idx, begin)?);
                }
                final_end = Some(SsTableIterator::at(Arc::clone(self), block_idx, end)?);
            }
        }

        match (final_begin, final_end) {
            (Some(begin), Some(end)) => Ok(Some((begin, end))),
            _ => Ok(None),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot helper
// ------------------------------------------------------------------------------------------------

/// Drains `[begin, end)` into tagged [`SearchItem`]s for the engine's
/// heap merge.
pub(crate) fn collect_range(
    mut begin: SsTableIterator,
    end: &SsTableIterator,
    idx: i64,
    items: &mut Vec<SearchItem>,
) -> Result<(), SSTableError> {
    while begin != *end {
        if let (Some(key), Some(value)) = (begin.key(), begin.value()) {
            items.push(SearchItem::new(key.to_vec(), value.to_vec(), idx));
        } else {
            break;
        }
        begin.advance()?;
    }
    Ok(())
}
