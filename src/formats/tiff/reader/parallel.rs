//! Parallel block decoding

use std::sync::Arc;
use rayon::prelude::*;
use tracing::{debug, warn};
use crate::error::Result;
use super::blocks::BlockReader;

/// Where cache misses are decompressed
#[derive(Clone)]
pub enum DecodePool {
    /// On the calling thread
    Sequential,
    /// On rayon's global pool
    Global,
    /// On a pool sized by `NUM_THREADS`
    Dedicated(Arc<rayon::ThreadPool>),
}

impl DecodePool {
    /// Pool for `num_threads` workers; 0 means all CPUs
    pub fn new(num_threads: usize) -> Self {
        match num_threads {
            1 => DecodePool::Sequential,
            0 => DecodePool::Global,
            n => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => {
                    debug!(threads = n, "built block decode pool");
                    DecodePool::Dedicated(Arc::new(pool))
                }
                Err(e) => {
                    warn!(threads = n, error = %e, "falling back to the global decode pool");
                    DecodePool::Global
                }
            },
        }
    }

    /// Returns the blocks at `indices`, in order, decoding misses in parallel
    pub fn decode_blocks(&self, reader: &BlockReader, indices: &[usize]) -> Result<Vec<Arc<Vec<u8>>>> {
        let cache = reader.cache();
        let ifd = reader.ifd_index();

        let mut blocks: Vec<Option<Arc<Vec<u8>>>> = indices.iter().map(|&i| cache.get(ifd, i)).collect();
        let misses: Vec<(usize, usize)> = blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_none())
            .map(|(slot, _)| (slot, indices[slot]))
            .collect();

        if misses.is_empty() {
            return Ok(blocks.into_iter().flatten().collect());
        }

        let decode = |&(slot, index): &(usize, usize)| reader.load_block(index).map(|data| (slot, index, data));
        let decoded: Vec<Result<(usize, usize, Vec<u8>)>> = match self {
            DecodePool::Sequential => misses.iter().map(decode).collect(),
            _ if misses.len() == 1 => misses.iter().map(decode).collect(),
            DecodePool::Global => misses.par_iter().map(decode).collect(),
            DecodePool::Dedicated(pool) => pool.install(|| misses.par_iter().map(decode).collect()),
        };

        for result in decoded {
            let (slot, index, data) = result?;
            blocks[slot] = Some(cache.insert(ifd, index, data));
        }

        Ok(blocks.into_iter().flatten().collect())
    }

    pub fn is_parallel(&self) -> bool {
        !matches!(self, DecodePool::Sequential)
    }
}

impl std::fmt::Debug for DecodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodePool::Sequential => write!(f, "Sequential"),
            DecodePool::Global => write!(f, "Global"),
            DecodePool::Dedicated(pool) => write!(f, "Dedicated({})", pool.current_num_threads()),
        }
    }
}
