//! # Block Module
//!
//! A block is the smallest independently decodable unit of an SSTable: a
//! sorted run of key-value entries plus an offset index for binary search.
//!
//! ## Wire layout
//!
//! ```text
//! ---------------------------------------------------------------------------------------------
//! |           Data Section            |          Offset Section           |       Extra       |
//! ---------------------------------------------------------------------------------------------
//! | Entry #1 | Entry #2 | … | Entry #N | Offset #1 | … | Offset #N (u16) | num_entries (u16) |
//! ---------------------------------------------------------------------------------------------
//! ```
//!
//! Each entry:
//!
//! ```text
//! | key_len (u16) | key | value_len (u16) | value |
//! ```
//!
//! All integers are little-endian. A 4-byte CRC32 footer covering the
//! encoded bytes is appended **by the SSTable builder**, not by the block
//! itself; [`Block::decode`] verifies it when asked to.
//!
//! ## Invariants
//!
//! - Entries are appended in strictly ascending key order (the SSTable
//!   builder feeds sorted input).
//! - [`Block::add_entry`] refuses an entry only when it would push the
//!   encoded size past `capacity` **and** the block is non-empty; the
//!   first entry is always accepted.
//! - Offsets strictly increase and each points at an entry start inside
//!   the data section.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use thiserror::Error;

mod meta;
pub use meta::BlockMeta;

/// Width of a length / offset / count field.
const U16_SIZE: usize = mem::size_of::<u16>();

/// Width of a CRC32 footer.
const U32_SIZE: usize = mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding block or meta bytes.
#[derive(Debug, Error)]
pub enum BlockError {
    /// Truncated input, malformed offsets, or checksum mismatch.
    #[error("malformed block data: {0}")]
    BadFormat(String),
}

// ------------------------------------------------------------------------------------------------
// Block
// ------------------------------------------------------------------------------------------------

/// A sorted run of key-value entries with an offset index.
///
/// Built incrementally through [`Block::add_entry`] by the SSTable
/// builder, or materialized from disk through [`Block::decode`]. Decoded
/// blocks are shared behind `Arc` so that iterators stay valid
/// independently of the cache and of the SSTable that produced them.
#[derive(Debug)]
pub struct Block {
    /// Concatenated encoded entries.
    data: Vec<u8>,

    /// Start offset of each entry within `data`, in insertion order.
    offsets: Vec<u16>,

    /// Soft cap on the encoded size, in bytes.
    capacity: usize,
}

impl Block {
    /// Creates an empty block with the given soft size cap.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            capacity,
        }
    }

    /// Encoded size of the block as it stands: data, offset index, and
    /// the trailing entry count.
    pub fn current_size(&self) -> usize {
        self.data.len() + self.offsets.len() * U16_SIZE + U16_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Appends an entry. Returns `false` (leaving the block untouched)
    /// when the addition would exceed the capacity of a non-empty block.
    /// The first entry is accepted regardless of its size.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8]) -> bool {
        let entry_size = 2 * U16_SIZE + key.len() + value.len();
        if !self.offsets.is_empty() && self.current_size() + entry_size > self.capacity {
            return false;
        }

        let offset = self.data.len() as u16;
        // Writing into a Vec<u8> cannot fail.
        let _ = self.data.write_u16::<LittleEndian>(key.len() as u16);
        self.data.extend_from_slice(key);
        let _ = self.data.write_u16::<LittleEndian>(value.len() as u16);
        self.data.extend_from_slice(value);

        self.offsets.push(offset);
        true
    }

    /// Serializes to the wire layout: `data ‖ offsets ‖ num_entries`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.current_size());
        out.extend_from_slice(&self.data);
        for &offset in &self.offsets {
            let _ = out.write_u16::<LittleEndian>(offset);
        }
        let _ = out.write_u16::<LittleEndian>(self.offsets.len() as u16);
        out
    }

    /// Parses a block from its wire layout, reading the entry count and
    /// offset index from the tail.
    ///
    /// With `verify_hash`, the final 4 bytes are a CRC32 of everything
    /// before them and must match.
    pub fn decode(encoded: &[u8], verify_hash: bool) -> Result<Self, BlockError> {
        let mut payload = encoded;

        if verify_hash {
            if payload.len() < U32_SIZE {
                return Err(BlockError::BadFormat(
                    "block shorter than its checksum".into(),
                ));
            }
            let hash_pos = payload.len() - U32_SIZE;
            let stored = LittleEndian::read_u32(&payload[hash_pos..]);
            let mut hasher = Crc32::new();
            hasher.update(&payload[..hash_pos]);
            if hasher.finalize() != stored {
                return Err(BlockError::BadFormat("block checksum mismatch".into()));
            }
            payload = &payload[..hash_pos];
        }

        if payload.len() < U16_SIZE {
            return Err(BlockError::BadFormat(
                "block shorter than its entry count".into(),
            ));
        }
        let count_pos = payload.len() - U16_SIZE;
        let num_entries = LittleEndian::read_u16(&payload[count_pos..]) as usize;

        let offsets_size = num_entries * U16_SIZE;
        if count_pos < offsets_size {
            return Err(BlockError::BadFormat(
                "block shorter than its offset index".into(),
            ));
        }
        let offsets_pos = count_pos - offsets_size;

        let mut offsets = Vec::with_capacity(num_entries);
        for i in 0..num_entries {
            let offset = LittleEndian::read_u16(&payload[offsets_pos + i * U16_SIZE..]);
            if offset as usize >= offsets_pos {
                return Err(BlockError::BadFormat(format!(
                    "entry offset {offset} outside data section"
                )));
            }
            offsets.push(offset);
        }

        Ok(Self {
            data: payload[..offsets_pos].to_vec(),
            offsets,
            capacity: 0,
        })
    }

    /// Key and value slices of the entry at `index`.
    fn entry_at(&self, index: usize) -> (&[u8], &[u8]) {
        let offset = self.offsets[index] as usize;
        let key_len = LittleEndian::read_u16(&self.data[offset..]) as usize;
        let key_start = offset + U16_SIZE;
        let value_len = LittleEndian::read_u16(&self.data[key_start + key_len..]) as usize;
        let value_start = key_start + key_len + U16_SIZE;
        (
            &self.data[key_start..key_start + key_len],
            &self.data[value_start..value_start + value_len],
        )
    }

    fn key_at(&self, index: usize) -> &[u8] {
        self.entry_at(index).0
    }

    /// Binary search for an exact key match.
    pub fn find_entry_idx(&self, key: &[u8]) -> Option<usize> {
        let mut lo = 0;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(key) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Value stored under `key`, if present in this block.
    pub fn find_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.find_entry_idx(key)
            .map(|idx| self.entry_at(idx).1.to_vec())
    }

    /// Index of the first entry whose key is `>= key`; equals
    /// `num_entries` when every key is smaller.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        let mut lo = 0;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Half-open iterator pair over the keys accepted by a monotone
    /// predicate (see [`crate::skiplist::SkipList::predicate_range`] for
    /// the sign convention). `None` when no key in this block is accepted.
    pub fn predicate_range<F>(
        self: &Arc<Self>,
        predicate: F,
    ) -> Option<(BlockIterator, BlockIterator)>
    where
        F: Fn(&[u8]) -> i32,
    {
        if self.offsets.is_empty() {
            return None;
        }

        // First index where the predicate stops reporting "further right".
        let mut lo = 0;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if predicate(self.key_at(mid)) > 0 {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let begin = lo;
        if begin == self.offsets.len() || predicate(self.key_at(begin)) != 0 {
            return None;
        }

        // First index strictly past the accepted run.
        let mut lo = begin;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if predicate(self.key_at(mid)) >= 0 {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let end = lo;

        Some((
            BlockIterator::new_at(Arc::clone(self), begin),
            BlockIterator::new_at(Arc::clone(self), end),
        ))
    }

    /// Iterator positioned at the first entry.
    pub fn iter(self: &Arc<Self>) -> BlockIterator {
        BlockIterator::new_at(Arc::clone(self), 0)
    }

    /// Iterator positioned at the first entry with key `>= key`.
    pub fn iter_from(self: &Arc<Self>, key: &[u8]) -> BlockIterator {
        let idx = self.lower_bound(key);
        BlockIterator::new_at(Arc::clone(self), idx)
    }
}

// ------------------------------------------------------------------------------------------------
// Block Iterator
// ------------------------------------------------------------------------------------------------

/// Cursor over the entries of a shared block.
///
/// Holds an `Arc` to the block, so it remains valid after the cache
/// evicts the block or the owning SSTable is dropped. Two iterators are
/// equal when they reference the same block instance at the same index.
#[derive(Debug)]
pub struct BlockIterator {
    block: Arc<Block>,
    index: usize,
}

impl BlockIterator {
    fn new_at(block: Arc<Block>, index: usize) -> Self {
        Self { block, index }
    }

    /// True once the cursor has moved past the final entry.
    pub fn is_end(&self) -> bool {
        self.index >= self.block.num_entries()
    }

    /// Current position within the block.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Key under the cursor, or `None` at end.
    pub fn key(&self) -> Option<&[u8]> {
        if self.is_end() {
            return None;
        }
        Some(self.block.key_at(self.index))
    }

    /// Value under the cursor, or `None` at end.
    pub fn value(&self) -> Option<&[u8]> {
        if self.is_end() {
            return None;
        }
        Some(self.block.entry_at(self.index).1)
    }

    /// Advances past the current entry.
    pub fn advance(&mut self) {
        if !self.is_end() {
            self.index += 1;
        }
    }
}

impl Clone for BlockIterator {
    fn clone(&self) -> Self {
        Self {
            block: Arc::clone(&self.block),
            index: self.index,
        }
    }
}

impl PartialEq for BlockIterator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block) && self.index == other.index
    }
}

impl Eq for BlockIterator {}

impl Iterator for BlockIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let (key, value) = self.block.entry_at(self.index);
        let item = (key.to_vec(), value.to_vec());
        self.index += 1;
        Some(item)
    }
}
