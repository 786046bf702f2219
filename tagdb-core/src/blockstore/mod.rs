//! Block store - the chain of blocks behind every `(series, resolution)`
//!
//! FULL and MINUTE keep their leading block in the cache tier and only
//! hand older samples down to the durable tier; HOUR and DAY are written
//! straight to the durable tier inside a series transaction.

mod read;
mod write;

pub use read::SeriesValues;

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::storage::DurableStore;
use crate::Resolution;
use std::sync::Arc;

/// How long a leading block may stay in the cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age in seconds after which the leading block is split
    pub max_age: i64,
    /// Seconds of recent samples kept in the cache after a split
    pub min_age: i64,
}

/// Block store configuration
#[derive(Debug, Clone)]
pub struct BlockStoreConfig {
    /// Payload cap; larger blocks are split in half
    pub max_block_bytes: usize,
    /// Cache policy of the FULL leading block
    pub full: CachePolicy,
    /// Cache policy of the MINUTE leading block
    pub minute: CachePolicy,
    /// Forward FULL writes to the downsample resolutions
    pub downsample: bool,
}

impl BlockStoreConfig {
    /// Cache policy for `resolution`, `None` when it bypasses the cache tier
    pub fn cache_policy(&self, resolution: Resolution) -> Option<CachePolicy> {
        match resolution {
            Resolution::Full => Some(self.full),
            Resolution::Minute => Some(self.minute),
            Resolution::Hour | Resolution::Day => None,
        }
    }
}

impl Default for BlockStoreConfig {
    fn default() -> Self {
        use crate::config::*;
        Self {
            max_block_bytes: MAX_BLOCK_BYTES,
            full: CachePolicy {
                max_age: FULL_CACHE_MAX_AGE,
                min_age: FULL_CACHE_MIN_AGE,
            },
            minute: CachePolicy {
                max_age: MINUTE_CACHE_MAX_AGE,
                min_age: MINUTE_CACHE_MIN_AGE,
            },
            downsample: true,
        }
    }
}

/// Cache namespace holding leading blocks of `resolution`
pub fn cache_namespace(resolution: Resolution) -> String {
    format!("TimeSeries:{}", resolution.name())
}

/// Appends to and reads from block chains across both tiers
pub struct BlockStore {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: BlockStoreConfig,
}

impl BlockStore {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: BlockStoreConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &BlockStoreConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub cache: Arc<MemoryCache>,
        pub clock: Arc<ManualClock>,
        pub blocks: BlockStore,
    }

    pub fn harness(config: BlockStoreConfig, now: i64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let clock = Arc::new(ManualClock::new(now));
        let blocks = BlockStore::new(store.clone(), cache.clone(), clock.clone(), config);
        Harness {
            store,
            cache,
            clock,
            blocks,
        }
    }
}
