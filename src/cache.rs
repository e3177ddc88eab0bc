//! Decoded block cache shared by the readers of one dataset

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use dashmap::DashMap;
use crossbeam::queue::SegQueue;
use tracing::trace;

/// Cache key: `(ifd_index, block_index)`
pub type BlockKey = (usize, usize);

/// Stale queue entries tolerated per cached block before compaction
const QUEUE_SLACK: usize = 4;

struct Slot {
    data: Arc<Vec<u8>>,
    /// Clock value of the last insert or hit
    stamp: u64,
}

/// Bounded LRU cache of decompressed blocks
///
/// Lookups and inserts never take a global lock. Every insert or hit stamps
/// the block and queues `(key, stamp)`; eviction pops the queue and skips
/// entries whose stamp is no longer current, so the least recently used
/// block goes first. Under heavy contention the order is approximate.
pub struct BlockCache {
    blocks: Arc<DashMap<BlockKey, Slot>>,
    order: Arc<SegQueue<(BlockKey, u64)>>,
    clock: Arc<AtomicU64>,
    compacting: Arc<AtomicBool>,
    capacity: usize,
}

impl BlockCache {
    /// Creates a cache holding at most `capacity` blocks (minimum one)
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Arc::new(DashMap::new()),
            order: Arc::new(SegQueue::new()),
            clock: Arc::new(AtomicU64::new(0)),
            compacting: Arc::new(AtomicBool::new(false)),
            capacity: capacity.max(1),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, ifd_index: usize, block_index: usize) -> Option<Arc<Vec<u8>>> {
        let key = (ifd_index, block_index);
        let hit = self.blocks.get_mut(&key).map(|mut slot| {
            slot.stamp = self.tick();
            (Arc::clone(&slot.data), slot.stamp)
        });
        let (data, stamp) = hit?;
        self.order.push((key, stamp));
        self.compact_if_needed();
        Some(data)
    }

    /// Inserts a decoded block and returns the shared copy
    pub fn insert(&self, ifd_index: usize, block_index: usize, data: Vec<u8>) -> Arc<Vec<u8>> {
        let key = (ifd_index, block_index);
        let data = Arc::new(data);

        while !self.blocks.contains_key(&key) && self.blocks.len() >= self.capacity {
            match self.order.pop() {
                Some((old, stamp)) => {
                    if self.blocks.remove_if(&old, |_, slot| slot.stamp == stamp).is_some() {
                        trace!(ifd = old.0, block = old.1, "evicted block");
                    }
                }
                // Queue drained by a concurrent compaction; scan instead
                None => {
                    let oldest = self
                        .blocks
                        .iter()
                        .min_by_key(|entry| entry.value().stamp)
                        .map(|entry| (*entry.key(), entry.value().stamp));
                    match oldest {
                        Some((old, stamp)) => {
                            self.blocks.remove_if(&old, |_, slot| slot.stamp == stamp);
                        }
                        None => break,
                    }
                }
            }
        }

        let stamp = self.tick();
        self.blocks.insert(key, Slot { data: Arc::clone(&data), stamp });
        self.order.push((key, stamp));
        self.compact_if_needed();
        data
    }

    /// Drops queued entries that no longer match a cached block
    fn compact_if_needed(&self) {
        let limit = (self.capacity + 1) * QUEUE_SLACK;
        if self.order.len() <= limit {
            return;
        }
        if self.compacting.swap(true, Ordering::Acquire) {
            return;
        }
        let mut live = Vec::with_capacity(self.blocks.len());
        while let Some((key, stamp)) = self.order.pop() {
            if self.blocks.get(&key).is_some_and(|slot| slot.stamp == stamp) {
                live.push((key, stamp));
            }
        }
        live.sort_unstable_by_key(|&(_, stamp)| stamp);
        for entry in live {
            self.order.push(entry);
        }
        self.compacting.store(false, Ordering::Release);
    }

    /// Queued recency entries, live or stale
    pub fn queue_len(&self) -> usize {
        self.order.len()
    }

    /// Drops every cached block of one IFD
    pub fn invalidate(&self, ifd_index: usize) {
        self.blocks.retain(|key, _| key.0 != ifd_index);
    }

    pub fn clear(&self) {
        self.blocks.clear();
        while self.order.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|entry| entry.value().data.len()).sum()
    }
}

impl Clone for BlockCache {
    fn clone(&self) -> Self {
        Self {
            blocks: Arc::clone(&self.blocks),
            order: Arc::clone(&self.order),
            clock: Arc::clone(&self.clock),
            compacting: Arc::clone(&self.compacting),
            capacity: self.capacity,
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(crate::env::DEFAULT_BLOCK_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = BlockCache::new(2);
        let shared = cache.insert(0, 0, vec![1, 2, 3]);

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&shared, &cache.get(0, 0).unwrap()));
        assert!(cache.get(1, 0).is_none());
    }

    #[test]
    fn test_eviction_keeps_bound() {
        let cache = BlockCache::new(2);
        cache.insert(0, 0, vec![1]);
        cache.insert(0, 1, vec![2]);
        cache.insert(0, 2, vec![3]);

        assert!(cache.len() <= 2);
        assert!(cache.get(0, 2).is_some());
    }

    #[test]
    fn test_recently_used_block_survives() {
        let cache = BlockCache::new(2);
        cache.insert(0, 0, vec![0]);
        cache.insert(0, 1, vec![1]);
        assert!(cache.get(0, 0).is_some());
        cache.insert(0, 2, vec![2]);

        assert!(cache.get(0, 0).is_some());
        assert!(cache.get(0, 1).is_none());
        assert!(cache.get(0, 2).is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let cache = BlockCache::new(2);
        cache.insert(0, 0, vec![0]);
        cache.insert(0, 1, vec![1]);
        cache.insert(0, 1, vec![9]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(0, 1).unwrap().as_slice(), &[9]);
        assert!(cache.get(0, 0).is_some());
    }

    #[test]
    fn test_hits_keep_queue_bounded() {
        let cache = BlockCache::new(4);
        cache.insert(0, 0, vec![1]);
        for _ in 0..100_000 {
            assert!(cache.get(0, 0).is_some());
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.queue_len() <= (4 + 1) * QUEUE_SLACK);
    }

    #[test]
    fn test_invalidate_one_ifd() {
        let cache = BlockCache::new(8);
        cache.insert(0, 0, vec![1]);
        cache.insert(1, 0, vec![2]);
        cache.invalidate(0);

        assert!(cache.get(0, 0).is_none());
        assert!(cache.get(1, 0).is_some());
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = BlockCache::new(100);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        cache.insert(0, i * 100 + j, vec![i as u8, j as u8]);
                        let _ = cache.get(0, i * 100 + j);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 100);
    }

    #[test]
    fn test_clear_and_bytes() {
        let cache = BlockCache::new(10);
        cache.insert(0, 0, vec![1, 2, 3]);
        cache.insert(0, 1, vec![4, 5]);
        assert_eq!(cache.total_bytes(), 5);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 10);
    }
}
