//! Block descriptors and the SSTable meta-section codec.
//!
//! The meta section is the trailing directory of an SSTable, enumerating
//! every data block:
//!
//! ```text
//! | num_entries (u32) | MetaEntry | … | MetaEntry | hash (u32) |
//! ```
//!
//! with each entry laid out as:
//!
//! ```text
//! | offset (u32) | first_key_len (u16) | first_key | last_key_len (u16) | last_key |
//! ```
//!
//! The CRC32 hash covers the bytes strictly between `num_entries` and the
//! hash itself. Across one SSTable's meta vector, offsets strictly
//! increase, `first_key <= last_key` within each entry, and successive
//! blocks are disjoint: `meta[i].last_key < meta[i + 1].first_key`.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use super::BlockError;

/// Field widths of the meta layout.
const U16_SIZE: usize = std::mem::size_of::<u16>();
const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Descriptor of a single data block within an SSTable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Byte offset of the block within the file's block section.
    pub offset: u32,

    /// First key stored in the block.
    pub first_key: Vec<u8>,

    /// Last key stored in the block.
    pub last_key: Vec<u8>,
}

impl BlockMeta {
    pub fn new(offset: u32, first_key: Vec<u8>, last_key: Vec<u8>) -> Self {
        Self {
            offset,
            first_key,
            last_key,
        }
    }

    /// Serializes a meta vector into the wire layout, including the
    /// leading entry count and the trailing CRC32.
    pub fn encode_meta(entries: &[BlockMeta]) -> Vec<u8> {
        let body_size: usize = entries
            .iter()
            .map(|e| U32_SIZE + U16_SIZE + e.first_key.len() + U16_SIZE + e.last_key.len())
            .sum();
        let mut out = Vec::with_capacity(2 * U32_SIZE + body_size);

        let _ = out.write_u32::<LittleEndian>(entries.len() as u32);
        for entry in entries {
            let _ = out.write_u32::<LittleEndian>(entry.offset);
            let _ = out.write_u16::<LittleEndian>(entry.first_key.len() as u16);
            out.extend_from_slice(&entry.first_key);
            let _ = out.write_u16::<LittleEndian>(entry.last_key.len() as u16);
            out.extend_from_slice(&entry.last_key);
        }

        let mut hasher = Crc32::new();
        hasher.update(&out[U32_SIZE..]);
        let hash = hasher.finalize();
        let _ = out.write_u32::<LittleEndian>(hash);

        out
    }

    /// Parses a meta section, verifying the trailing hash over the entry
    /// region.
    pub fn decode_meta(bytes: &[u8]) -> Result<Vec<BlockMeta>, BlockError> {
        if bytes.len() < 2 * U32_SIZE {
            return Err(BlockError::BadFormat(
                "meta section shorter than its framing".into(),
            ));
        }

        let num_entries = LittleEndian::read_u32(bytes) as usize;
        let mut pos = U32_SIZE;
        let hash_pos = bytes.len() - U32_SIZE;

        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            if pos + U32_SIZE + U16_SIZE > hash_pos {
                return Err(BlockError::BadFormat("truncated meta entry".into()));
            }
            let offset = LittleEndian::read_u32(&bytes[pos..]);
            pos += U32_SIZE;

            let first_key_len = LittleEndian::read_u16(&bytes[pos..]) as usize;
            pos += U16_SIZE;
            if pos + first_key_len + U16_SIZE > hash_pos {
                return Err(BlockError::BadFormat("truncated meta first key".into()));
            }
            let first_key = bytes[pos..pos + first_key_len].to_vec();
            pos += first_key_len;

            let last_key_len = LittleEndian::read_u16(&bytes[pos..]) as usize;
            pos += U16_SIZE;
            if pos + last_key_len > hash_pos {
                return Err(BlockError::BadFormat("truncated meta last key".into()));
            }
            let last_key = bytes[pos..pos + last_key_len].to_vec();
            pos += last_key_len;

            entries.push(BlockMeta::new(offset, first_key, last_key));
        }

        let stored = LittleEndian::read_u32(&bytes[hash_pos..]);
        let mut hasher = Crc32::new();
        hasher.update(&bytes[U32_SIZE..pos]);
        if hasher.finalize() != stored {
            return Err(BlockError::BadFormat("meta section hash mismatch".into()));
        }

        Ok(entries)
    }
}
