//! SSTable builder — serializes a sorted entry stream into a table file.
//!
//! The builder is fed strictly ascending keys (the memtable dump order).
//! Entries accumulate into the current block until it refuses an
//! addition, at which point the block is sealed: its encoded bytes plus
//! their CRC32 go into the output buffer and a [`BlockMeta`] entry
//! records its offset and key span. [`SstBuilder::build`] seals the tail
//! block, appends the encoded meta section and its start offset, and
//! writes the whole buffer to disk with a single create-and-write
//! followed by an fsync.

use std::mem;
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::block::{Block, BlockMeta};
use crate::cache::BlockCache;

use super::{FileObject, SSTable, SSTableError};

/// Streaming builder for one SSTable file.
pub struct SstBuilder {
    /// Block currently accepting entries.
    block: Block,

    /// Key span of the current block.
    first_key: Vec<u8>,
    last_key: Vec<u8>,

    /// Descriptors of the blocks sealed so far.
    meta: Vec<BlockMeta>,

    /// Encoded block section: `block ‖ crc32` per sealed block.
    data: Vec<u8>,

    /// Soft cap applied to every block.
    block_size: usize,
}

impl SstBuilder {
    /// Creates a builder whose blocks are capped at `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            block: Block::new(block_size),
            first_key: Vec::new(),
            last_key: Vec::new(),
            meta: Vec::new(),
            data: Vec::new(),
            block_size,
        }
    }

    /// Appends an entry. Keys must arrive in strictly ascending order.
    ///
    /// When the current block refuses the entry, it is sealed and a fresh
    /// block opens with this entry as its first key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        if self.block.is_empty() {
            self.first_key = key.to_vec();
        }

        if self.block.add_entry(key, value) {
            self.last_key = key.to_vec();
            return;
        }

        self.finish_block();
        // A fresh block accepts its first entry regardless of size.
        self.block.add_entry(key, value);
        self.first_key = key.to_vec();
        self.last_key = key.to_vec();
    }

    /// Bytes of block section produced so far.
    pub fn estimated_size(&self) -> usize {
        self.data.len()
    }

    /// Seals the current block: records its meta entry and appends its
    /// encoded bytes followed by their CRC32.
    fn finish_block(&mut self) {
        let sealed = mem::replace(&mut self.block, Block::new(self.block_size));
        let encoded = sealed.encode();

        self.meta.push(BlockMeta::new(
            self.data.len() as u32,
            mem::take(&mut self.first_key),
            mem::take(&mut self.last_key),
        ));

        let mut hasher = Crc32::new();
        hasher.update(&encoded);
        let hash = hasher.finalize();

        self.data.extend_from_slice(&encoded);
        let _ = self.data.write_u32::<LittleEndian>(hash);
    }

    /// Seals any pending block, appends the meta section and its start
    /// offset, writes the file, and returns the populated table.
    ///
    /// Fails with [`SSTableError::EmptyBuilder`] when nothing was added.
    pub fn build(
        mut self,
        sst_id: u64,
        path: impl AsRef<Path>,
        block_cache: Arc<BlockCache>,
    ) -> Result<SSTable, SSTableError> {
        if !self.block.is_empty() {
            self.finish_block();
        }
        if self.meta.is_empty() {
            return Err(SSTableError::EmptyBuilder);
        }

        let meta_offset = self.data.len() as u32;
        let meta_bytes = BlockMeta::encode_meta(&self.meta);
        self.data.extend_from_slice(&meta_bytes);
        let _ = self.data.write_u32::<LittleEndian>(meta_offset);

        let file = FileObject::create_and_write(path, &self.data)?;
        Ok(SSTable::from_parts(
            sst_id,
            file,
            self.meta,
            meta_offset,
            block_cache,
        ))
    }
}
