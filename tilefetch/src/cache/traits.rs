//! Core traits for the byte store underneath the response cache.
//!
//! The `Cache` trait is a domain-agnostic key-value interface. The response
//! cache maps URLs and HTTP metadata onto it; providers only see string keys
//! and opaque byte values.
//!
//! # Design Principles
//!
//! - **String keys**: the request URL, readable in logs
//! - **Vec<u8> values**: raw bytes, encoding is the caller's concern
//! - **Self-contained eviction**: providers keep themselves under their size limit
//! - **Dyn-compatible**: boxed futures so stores can be shared as `Arc<dyn Cache>`
//!
//! # Example
//!
//! ```ignore
//! use tilefetch::cache::{Cache, MemoryCacheProvider};
//!
//! let cache = MemoryCacheProvider::new(30 * 1024 * 1024);
//! cache.set("https://tiles.example/1/0/0.pbf", vec![1, 2, 3]).await?;
//! let value = cache.get("https://tiles.example/1/0/0.pbf").await?;
//! ```

use std::fmt;

use thiserror::Error;

pub use futures::future::BoxFuture;

/// Result of a garbage collection operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcResult {
    /// Number of entries removed during GC.
    pub entries_removed: usize,
    /// Total bytes freed during GC.
    pub bytes_freed: u64,
    /// Duration of the GC operation in milliseconds.
    pub duration_ms: u64,
}

impl fmt::Display for GcResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GC: removed {} entries, freed {} bytes in {}ms",
            self.entries_removed, self.bytes_freed, self.duration_ms
        )
    }
}

/// Errors that can occur during cache operations.
///
/// The dispatcher logs these and treats the lookup as a miss; they never
/// fail a request.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value exceeds the maximum cache size and can never be stored.
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: u64, max: u64 },

    /// A stored entry could not be decoded.
    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Failed to run a blocking task.
    #[error("Failed to spawn task: {0}")]
    SpawnError(String),
}

/// Generic byte store used by the response cache.
///
/// # Eviction
///
/// Each provider enforces its own size limit:
/// - The disk provider evicts least-recently-used files synchronously in `set`
/// - The memory provider relies on moka's LRU policy, applied during maintenance
/// - `gc()` forces pending eviction work to run
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` for use across async tasks.
pub trait Cache: Send + Sync {
    /// Store a value, replacing any existing value for the key.
    ///
    /// Eviction may occur if the store exceeds its size limit. A value larger
    /// than the limit is rejected with [`CacheError::ValueTooLarge`].
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Retrieve a value by key, marking it as recently used.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>>;

    /// Delete a value by key. Returns `true` if the key existed.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Check if a key exists without retrieving the value.
    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Current total size of stored values in bytes.
    fn size_bytes(&self) -> u64;

    /// Current number of entries.
    fn entry_count(&self) -> u64;

    /// Configured maximum size in bytes.
    fn max_size_bytes(&self) -> u64;

    /// Run pending eviction work.
    fn gc(&self) -> BoxFuture<'_, Result<GcResult, CacheError>>;

    /// Remove every entry.
    fn clear(&self) -> BoxFuture<'_, Result<GcResult, CacheError>>;
}
