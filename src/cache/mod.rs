//! # Block Cache Module
//!
//! A bounded cache over decoded SSTable blocks, keyed by
//! `(sst_id, block_idx)`, with an **LRU-K** eviction policy.
//!
//! ## Policy
//!
//! Every cached block remembers the timestamps of its last `K` accesses
//! (a monotonic counter serves as the clock). Blocks live in exactly one
//! of two lists:
//!
//! - **cold** — blocks with fewer than `K` recorded accesses, kept in
//!   plain LRU order (front = least recently used);
//! - **hot** — blocks with exactly `K` recorded accesses, kept sorted
//!   ascending by the *oldest* of their `K` timestamps.
//!
//! Eviction prefers the front of the cold list; only when no cold block
//! exists does it take the front of the hot list (the block whose K-th
//! most recent access is furthest in the past). Ranking hot blocks by
//! their oldest remembered access rather than the latest one makes the
//! cache resistant to one-off scans.
//!
//! ## Concurrency
//!
//! All state sits behind a single mutex; every operation is a short
//! critical section.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::block::Block;

/// Cache key: owning SSTable id plus block index within the table.
type CacheKey = (u64, usize);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by cache maintenance.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Eviction found both residency lists empty while the cache reports
    /// itself full. Indicates a bookkeeping bug and should be unreachable.
    #[error("cache invariant violation: no block available for eviction")]
    ExhaustedLists,
}

// ------------------------------------------------------------------------------------------------
// Cache node
// ------------------------------------------------------------------------------------------------

struct CacheNode {
    block: Arc<Block>,

    /// Up to `k` most recent access timestamps, oldest at the front.
    history: VecDeque<u64>,
}

// ------------------------------------------------------------------------------------------------
// BlockCache
// ------------------------------------------------------------------------------------------------

/// Thread-safe LRU-K cache of decoded blocks.
pub struct BlockCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    capacity: usize,
    k: usize,

    /// Monotonic access clock.
    timestamp: u64,

    entries: HashMap<CacheKey, CacheNode>,

    /// Keys with fewer than `k` recorded accesses, LRU order.
    cold: VecDeque<CacheKey>,

    /// Keys with exactly `k` recorded accesses, ascending by oldest
    /// remembered timestamp.
    hot: Vec<CacheKey>,

    total_requests: u64,
    hit_requests: u64,
}

impl BlockCache {
    /// Creates a cache holding at most `capacity` blocks, ranking hot
    /// blocks by their `k`-th most recent access.
    pub fn new(capacity: usize, k: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                capacity,
                k,
                timestamp: 0,
                entries: HashMap::new(),
                cold: VecDeque::new(),
                hot: Vec::new(),
                total_requests: 0,
                hit_requests: 0,
            }),
        }
    }

    /// Looks up a block, recording the access on a hit. Misses only
    /// count toward the request total.
    pub fn get(&self, sst_id: u64, block_idx: usize) -> Option<Arc<Block>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.total_requests += 1;

        let key = (sst_id, block_idx);
        let block = match inner.entries.get(&key) {
            Some(node) => Arc::clone(&node.block),
            None => return None,
        };

        inner.hit_requests += 1;
        inner.record_access(key);
        Some(block)
    }

    /// Inserts a block, evicting first when at capacity. Re-inserting a
    /// key that is already cached is a no-op.
    pub fn put(
        &self,
        sst_id: u64,
        block_idx: usize,
        block: Arc<Block>,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let key = (sst_id, block_idx);
        if inner.entries.contains_key(&key) {
            return Ok(());
        }

        if inner.entries.len() >= inner.capacity {
            inner.evict()?;
        }

        inner.entries.insert(
            key,
            CacheNode {
                block,
                history: VecDeque::new(),
            },
        );
        inner.cold.push_back(key);
        inner.record_access(key);
        Ok(())
    }

    /// Fraction of requests served from the cache; 0 before any request.
    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.total_requests == 0 {
            return 0.0;
        }
        inner.hit_requests as f64 / inner.total_requests as f64
    }
}

impl CacheInner {
    /// Oldest remembered timestamp of a cached key.
    fn oldest(&self, key: &CacheKey) -> u64 {
        self.entries
            .get(key)
            .and_then(|node| node.history.front().copied())
            .unwrap_or(0)
    }

    /// Stamps an access onto `key` and moves it to its new list position:
    /// under-`k` nodes go to the back of cold, nodes reaching or already
    /// at `k` are (re-)inserted into hot at their oldest-timestamp rank.
    fn record_access(&mut self, key: CacheKey) {
        let ts = self.timestamp;
        self.timestamp += 1;

        let Some(node) = self.entries.get_mut(&key) else {
            return;
        };
        let len_before = node.history.len();
        node.history.push_back(ts);
        if node.history.len() > self.k {
            node.history.pop_front();
        }

        if len_before + 1 >= self.k {
            // Promotion into hot (from cold) or re-ranking within hot.
            if len_before + 1 == self.k {
                self.remove_cold(&key);
            } else {
                self.remove_hot(&key);
            }
            let rank = self.oldest(&key);
            let pos = self.hot.partition_point(|other| self.oldest(other) < rank);
            self.hot.insert(pos, key);
        } else {
            // Still cold: plain LRU bump to the back.
            self.remove_cold(&key);
            self.cold.push_back(key);
        }
    }

    fn remove_cold(&mut self, key: &CacheKey) {
        if let Some(pos) = self.cold.iter().position(|k| k == key) {
            self.cold.remove(pos);
        }
    }

    fn remove_hot(&mut self, key: &CacheKey) {
        if let Some(pos) = self.hot.iter().position(|k| k == key) {
            self.hot.remove(pos);
        }
    }

    /// Drops one block: the LRU cold block when any exists, otherwise the
    /// hot block with the smallest oldest-of-`k` timestamp.
    fn evict(&mut self) -> Result<(), CacheError> {
        if let Some(key) = self.cold.pop_front() {
            self.entries.remove(&key);
            return Ok(());
        }
        if self.hot.is_empty() {
            return Err(CacheError::ExhaustedLists);
        }
        let key = self.hot.remove(0);
        self.entries.remove(&key);
        Ok(())
    }
}
