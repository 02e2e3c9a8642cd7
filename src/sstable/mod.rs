//! # SSTable Module
//!
//! Immutable, sorted, on-disk tables. An SSTable stores a sequence of
//! checksummed data blocks followed by a meta section describing them;
//! block data is loaded lazily (through the block cache) while the meta
//! section is always resident.
//!
//! ## On-disk layout
//!
//! ```text
//! -------------------------------------------------------------------------------------------
//! |          Block Section          |          Meta Section         |         Extra         |
//! -------------------------------------------------------------------------------------------
//! | block ‖ crc32 | … | block ‖ crc32 |           metadata          | meta_offset (u32, LE) |
//! -------------------------------------------------------------------------------------------
//! ```
//!
//! Every stored block is immediately followed by the CRC32 of its encoded
//! bytes; [`crate::block::Block::decode`] verifies it on read. The meta
//! section layout (and its own hash) is documented in
//! [`crate::block::BlockMeta`].
//!
//! ## Guarantees
//!
//! - **Immutability** — a built SSTable file is never modified.
//! - **Integrity** — truncation or bit rot surfaces as
//!   [`SSTableError::BadFormat`] when the file is opened or a block is
//!   read; there is no partial recovery.
//! - **Shared blocks** — decoded blocks are handed out as `Arc<Block>`,
//!   so live iterators survive cache eviction and table drops.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::mem;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use thiserror::Error;

use crate::block::{Block, BlockError, BlockMeta};
use crate::cache::{BlockCache, CacheError};

mod builder;
mod iterator;

pub use builder::SstBuilder;
pub use iterator::SsTableIterator;

pub(crate) use iterator::collect_range;

/// Width of the trailing meta-offset field.
const U32_SIZE: usize = mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur while building or reading SSTables.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Truncated file, malformed framing, or checksum mismatch.
    #[error("malformed SSTable: {0}")]
    BadFormat(String),

    /// A data block failed to decode.
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// The requested key lies outside this table's `[first_key, last_key]`
    /// span, or a block index is out of bounds.
    #[error("key or index out of range for this SSTable")]
    OutOfRange,

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `build` was called without any entry added.
    #[error("cannot build an SSTable with no entries")]
    EmptyBuilder,

    /// Error originating from the block cache.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

// ------------------------------------------------------------------------------------------------
// FileObject
// ------------------------------------------------------------------------------------------------

/// Random-read file handle behind the SSTable reader.
///
/// The only polymorphism in the core: a plain sum over a positional-read
/// standard file and a memory map.
pub enum FileObject {
    Std(File),
    Mmap { map: Mmap },
}

impl FileObject {
    /// Opens an existing file for memory-mapped reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let file = File::open(path)?;
        // Safety: SSTable files are written once and never truncated or
        // rewritten while the engine holds them.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self::Mmap { map })
    }

    /// Creates `path`, writes `data` in one shot, fsyncs, and returns a
    /// positional-read handle over the fresh file.
    pub fn create_and_write(path: impl AsRef<Path>, data: &[u8]) -> Result<Self, SSTableError> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(Self::Std(file))
    }

    /// Total file size in bytes.
    pub fn size(&self) -> Result<u64, SSTableError> {
        match self {
            Self::Std(file) => Ok(file.metadata()?.len()),
            Self::Mmap { map } => Ok(map.len() as u64),
        }
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, SSTableError> {
        match self {
            Self::Std(file) => {
                let mut buf = vec![0u8; len];
                file.read_exact_at(&mut buf, offset)?;
                Ok(buf)
            }
            Self::Mmap { map } => {
                let start = offset as usize;
                let end = start
                    .checked_add(len)
                    .ok_or_else(|| SSTableError::BadFormat("read range overflow".into()))?;
                if end > map.len() {
                    return Err(SSTableError::BadFormat(format!(
                        "read past end of file: {end} > {}",
                        map.len()
                    )));
                }
                Ok(map[start..end].to_vec())
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable
// ------------------------------------------------------------------------------------------------

/// Descriptor of one on-disk sorted table.
///
/// Holds the file handle, the always-resident meta vector, and a shared
/// reference to the block cache through which block reads go.
pub struct SSTable {
    sst_id: u64,
    file: FileObject,
    meta: Vec<BlockMeta>,
    meta_offset: u32,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    block_cache: Arc<BlockCache>,
}

impl SSTable {
    /// Opens an existing SSTable file: reads the trailing meta offset,
    /// decodes and hash-verifies the meta section, and records the key
    /// span. Blocks themselves stay on disk until requested.
    pub fn open(
        sst_id: u64,
        file: FileObject,
        block_cache: Arc<BlockCache>,
    ) -> Result<Self, SSTableError> {
        let file_size = file.size()?;
        if file_size < U32_SIZE as u64 {
            return Err(SSTableError::BadFormat(
                "file shorter than its meta offset".into(),
            ));
        }

        let offset_bytes = file.read(file_size - U32_SIZE as u64, U32_SIZE)?;
        let meta_offset = LittleEndian::read_u32(&offset_bytes);

        if meta_offset as u64 + U32_SIZE as u64 > file_size {
            return Err(SSTableError::BadFormat(format!(
                "meta offset {meta_offset} past end of file"
            )));
        }

        let meta_len = file_size - meta_offset as u64 - U32_SIZE as u64;
        let meta_bytes = file.read(meta_offset as u64, meta_len as usize)?;
        let meta = BlockMeta::decode_meta(&meta_bytes)?;

        if meta.is_empty() {
            return Err(SSTableError::BadFormat("meta section has no blocks".into()));
        }

        let first_key = meta[0].first_key.clone();
        let last_key = meta[meta.len() - 1].last_key.clone();

        Ok(Self {
            sst_id,
            file,
            meta,
            meta_offset,
            first_key,
            last_key,
            block_cache,
        })
    }

    /// Assembles a descriptor for a table whose bytes were just written
    /// by the builder, skipping the re-open decode.
    pub(crate) fn from_parts(
        sst_id: u64,
        file: FileObject,
        meta: Vec<BlockMeta>,
        meta_offset: u32,
        block_cache: Arc<BlockCache>,
    ) -> Self {
        let first_key = meta[0].first_key.clone();
        let last_key = meta[meta.len() - 1].last_key.clone();
        Self {
            sst_id,
            file,
            meta,
            meta_offset,
            first_key,
            last_key,
            block_cache,
        }
    }

    /// Loads the block at `block_idx`, consulting the cache first. A miss
    /// reads the block span from disk, verifies its trailing CRC32, and
    /// populates the cache.
    pub fn read_block(&self, block_idx: usize) -> Result<Arc<Block>, SSTableError> {
        if block_idx >= self.meta.len() {
            return Err(SSTableError::OutOfRange);
        }

        if let Some(block) = self.block_cache.get(self.sst_id, block_idx) {
            return Ok(block);
        }

        let start = self.meta[block_idx].offset as u64;
        let end = if block_idx + 1 == self.meta.len() {
            self.meta_offset as u64
        } else {
            self.meta[block_idx + 1].offset as u64
        };

        let bytes = self.file.read(start, (end - start) as usize)?;
        let block = Arc::new(Block::decode(&bytes, true)?);
        self.block_cache
            .put(self.sst_id, block_idx, Arc::clone(&block))?;
        Ok(block)
    }

    /// The unique block index `i` with `key <= meta[i].last_key`.
    ///
    /// Fails with [`SSTableError::OutOfRange`] when `key` is outside
    /// `[first_key, last_key]`.
    pub fn find_block_index(&self, key: &[u8]) -> Result<usize, SSTableError> {
        if key < self.first_key.as_slice() || key > self.last_key.as_slice() {
            return Err(SSTableError::OutOfRange);
        }
        Ok(self
            .meta
            .partition_point(|meta| meta.last_key.as_slice() < key))
    }

    /// Iterator positioned at the first entry with key `>= key`.
    ///
    /// The caller decides whether a non-exact landing counts as a miss;
    /// the engine compares the iterator's current key against the lookup
    /// key.
    pub fn get(self: &Arc<Self>, key: &[u8]) -> Result<SsTableIterator, SSTableError> {
        SsTableIterator::new_seeked(Arc::clone(self), key)
    }

    /// Iterator over the whole table from its first entry.
    pub fn iter(self: &Arc<Self>) -> Result<SsTableIterator, SSTableError> {
        SsTableIterator::new(Arc::clone(self))
    }

    pub fn num_blocks(&self) -> usize {
        self.meta.len()
    }

    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    pub fn size(&self) -> Result<u64, SSTableError> {
        self.file.size()
    }

    pub fn sst_id(&self) -> u64 {
        self.sst_id
    }

    pub(crate) fn meta(&self) -> &[BlockMeta] {
        &self.meta
    }
}
