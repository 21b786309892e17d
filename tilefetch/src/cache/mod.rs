//! Response caching.
//!
//! Two layers:
//!
//! ```text
//! ResponseCache ──────► Arc<dyn Cache> ──────► DiskCacheProvider
//! (HTTP semantics:      (bytes by key)         MemoryCacheProvider
//!  freshness, validators)
//! ```
//!
//! The dispatcher only talks to [`ResponseCache`]. Providers know nothing
//! about HTTP and can be swapped, which is how tests run without a disk.

pub mod control;
mod providers;
mod response;
mod traits;

pub use control::CacheControl;
pub use providers::{
    clear_disk_cache, disk_cache_stats, ClearResult, DiskCacheProvider, MemoryCacheProvider,
};
pub use response::{CacheEntry, FreshnessDirectives, ResponseCache};
pub use traits::{BoxFuture, Cache, CacheError, GcResult};
