//! In-memory cache provider using moka.
//!
//! Wraps `moka::future::Cache` with a byte-size weigher and the LRU
//! eviction policy. Moka applies eviction during its maintenance cycle, so
//! the size limit is soft until `gc()` (or moka's own housekeeping) runs.
//! Useful for tests and for callers that want a process-lifetime cache
//! without touching disk.

use std::time::Instant;

use moka::future::Cache as MokaCache;
use moka::policy::EvictionPolicy;

use crate::cache::traits::{BoxFuture, Cache, CacheError, GcResult};

/// In-memory LRU cache provider.
pub struct MemoryCacheProvider {
    cache: MokaCache<String, Vec<u8>>,
    max_size_bytes: u64,
}

impl MemoryCacheProvider {
    /// Create a new memory cache provider bounded to `max_size_bytes`.
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            // Weight each entry by its data size
            .weigher(|_key: &String, value: &Vec<u8>| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            max_size_bytes,
        }
    }
}

impl Cache for MemoryCacheProvider {
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let size = value.len() as u64;
            if size > self.max_size_bytes {
                return Err(CacheError::ValueTooLarge {
                    size,
                    max: self.max_size_bytes,
                });
            }
            self.cache.insert(key, value).await;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.cache.get(&key).await) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.cache.remove(&key).await.is_some()) })
    }

    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.cache.contains_key(&key)) })
    }

    fn size_bytes(&self) -> u64 {
        self.cache.weighted_size()
    }

    fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    fn gc(&self) -> BoxFuture<'_, Result<GcResult, CacheError>> {
        Box::pin(async move {
            let start = Instant::now();
            let size_before = self.cache.weighted_size();
            let count_before = self.cache.entry_count();

            self.cache.run_pending_tasks().await;

            Ok(GcResult {
                entries_removed: count_before.saturating_sub(self.cache.entry_count()) as usize,
                bytes_freed: size_before.saturating_sub(self.cache.weighted_size()),
                duration_ms: start.elapsed().as_millis() as u64,
            })
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<GcResult, CacheError>> {
        Box::pin(async move {
            let start = Instant::now();
            self.cache.run_pending_tasks().await;
            let size_before = self.cache.weighted_size();
            let count_before = self.cache.entry_count();

            self.cache.invalidate_all();
            self.cache.run_pending_tasks().await;

            Ok(GcResult {
                entries_removed: count_before as usize,
                bytes_freed: size_before,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        })
    }
}
