//! Cache store implementations.
//!
//! Each provider implements the `Cache` trait and enforces its own size
//! limit.
//!
//! # Available Providers
//!
//! - [`DiskCacheProvider`]: one file per entry with a synchronous LRU index
//! - [`MemoryCacheProvider`]: in-memory LRU cache using moka

mod disk;
mod memory;

pub use disk::{clear_disk_cache, disk_cache_stats, ClearResult, DiskCacheProvider};
pub use memory::MemoryCacheProvider;
