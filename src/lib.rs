//! # SiltDB
//!
//! An embeddable, persistent, **ordered** key-value store built on a
//! log-structured merge-tree (LSM) discipline. Optimized for write-heavy
//! workloads with ordered reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Engine                           │
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────┐   │
//! │  │  Current    │  │   Frozen     │  │   L0 SSTs    │   │
//! │  │  SkipList   │  │  SkipLists   │  │  (on disk)   │   │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬───────┘   │
//! │        │   freeze        │   flush         │           │
//! │        └─────────►       └────────►        │           │
//! │                                            │           │
//! │  ┌─────────────────────────────────────────┴────────┐  │
//! │  │        BlockCache (LRU-K over SST blocks)        │  │
//! │  └──────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Top-level store — open, put, get, remove, scan, flush |
//! | [`memtable`] | In-memory write buffer: current skip list + frozen queue |
//! | [`skiplist`] | Probabilistic ordered map backing the memtable |
//! | [`sstable`] | Immutable, sorted, on-disk tables with checksummed blocks |
//! | [`block`] | Smallest independently decodable SSTable unit + meta codec |
//! | [`cache`] | Bounded block cache with LRU-K eviction |
//! | [`iterator`] | Heap and merge iterators fusing all layers into one stream |
//!
//! ## Key Properties
//!
//! - **Ordered reads** — scans yield unique keys in ascending byte order,
//!   newest visible version per key.
//! - **Tombstone deletes** — a remove stores an empty value; readers and
//!   iterators translate it into "not found".
//! - **Bounded durability** — data becomes durable at flush time, when a
//!   frozen memtable is serialized into an L0 SSTable and fsynced. There
//!   is no write-ahead log.
//! - **Block-level integrity** — every on-disk block and the SSTable meta
//!   section carry CRC32 checksums, verified on read.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use siltdb::engine::Engine;
//!
//! let engine = Engine::open("/tmp/silt").unwrap();
//!
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.remove(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Ordered scan over every live key.
//! for (key, value) in engine.iter().unwrap() {
//!     println!("{:?} => {:?}", key, value);
//! }
//!
//! // Persist everything that is still in memory.
//! engine.flush_all().unwrap();
//! ```

pub mod block;
pub mod cache;
pub mod engine;
pub mod iterator;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
