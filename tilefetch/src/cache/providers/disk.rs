//! On-disk cache provider with a size-bounded LRU index.
//!
//! Each key is stored in its own file named after the SHA-256 of the key.
//! Writes go to a temporary file first and are renamed into place, so a
//! reader never sees a partial entry.
//!
//! # Recency
//!
//! An in-memory index tracks entry sizes and access order. It is rebuilt
//! from the directory at startup, ordered by file modification time; reads
//! touch the file's mtime so recency survives a restart.
//!
//! # Eviction
//!
//! `set` evicts least-recently-used entries synchronously until the total
//! size is back under the limit. A value larger than the limit is rejected.
//!
//! All filesystem work runs on tokio's blocking pool.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use filetime::FileTime;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::cache::traits::{BoxFuture, Cache, CacheError, GcResult};

/// Extension of committed cache entry files.
const ENTRY_EXTENSION: &str = "entry";

/// Extension of in-progress writes.
const TEMP_EXTENSION: &str = "tmp";

// =============================================================================
// LRU Index
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    tick: u64,
}

/// Size and recency bookkeeping, keyed by entry file name.
#[derive(Debug, Default)]
struct LruIndex {
    entries: HashMap<String, IndexEntry>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
    total_bytes: u64,
}

impl LruIndex {
    fn insert(&mut self, name: &str, size: u64) {
        self.remove(name);
        let tick = self.bump();
        self.entries.insert(name.to_string(), IndexEntry { size, tick });
        self.order.insert(tick, name.to_string());
        self.total_bytes += size;
    }

    fn touch(&mut self, name: &str) {
        let Some(old_tick) = self.entries.get(name).map(|e| e.tick) else {
            return;
        };
        let tick = self.bump();
        self.order.remove(&old_tick);
        self.order.insert(tick, name.to_string());
        if let Some(entry) = self.entries.get_mut(name) {
            entry.tick = tick;
        }
    }

    fn remove(&mut self, name: &str) -> Option<u64> {
        let entry = self.entries.remove(name)?;
        self.order.remove(&entry.tick);
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        Some(entry.size)
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn oldest(&self) -> Option<String> {
        self.order.values().next().cloned()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.total_bytes = 0;
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Disk-backed cache provider.
pub struct DiskCacheProvider {
    directory: PathBuf,
    max_size_bytes: u64,
    index: Arc<Mutex<LruIndex>>,
    temp_counter: Arc<AtomicU64>,
}

impl DiskCacheProvider {
    /// Opens (or creates) a cache in `directory` bounded to `max_size_bytes`.
    ///
    /// Fails if the directory cannot be created or written to. Leftover
    /// temporary files from an interrupted run are removed, and the index is
    /// rebuilt from the committed entries.
    pub fn open(directory: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        probe_writable(&directory)?;

        let index = scan_directory(&directory)?;
        let provider = Self {
            directory,
            max_size_bytes,
            index: Arc::new(Mutex::new(index)),
            temp_counter: Arc::new(AtomicU64::new(0)),
        };

        {
            let mut index = provider.index.lock();
            let evicted = evict_to_limit(&provider.directory, &mut index, max_size_bytes, None);
            debug!(
                directory = %provider.directory.display(),
                entries = index.entries.len(),
                size_bytes = index.total_bytes,
                max_size_bytes,
                evicted = evicted.entries_removed,
                "Opened disk cache"
            );
        }

        Ok(provider)
    }

    /// Returns the cache directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

/// File name for a cache key.
fn entry_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}.{}", hasher.finalize(), ENTRY_EXTENSION)
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION)
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION)
}

fn probe_writable(directory: &Path) -> io::Result<()> {
    let probe = directory.join(format!(".probe-{}.{}", std::process::id(), TEMP_EXTENSION));
    fs::File::create(&probe)?.write_all(b"probe")?;
    fs::remove_file(&probe)
}

/// Rebuilds the LRU index from file mtimes, oldest first.
fn scan_directory(directory: &Path) -> io::Result<LruIndex> {
    let mut found: Vec<(SystemTime, String, u64)> = Vec::new();

    for dir_entry in fs::read_dir(directory)? {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        let metadata = match dir_entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };

        if is_temp_file(&path) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
            }
            continue;
        }
        if !is_entry_file(&path) {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        found.push((modified, name, metadata.len()));
    }

    found.sort();

    let mut index = LruIndex::default();
    for (_, name, size) in found {
        index.insert(&name, size);
    }
    Ok(index)
}

/// Deletes least-recently-used entries until the total is within `max`.
///
/// `keep` is never evicted; it is the entry that was just written.
fn evict_to_limit(
    directory: &Path,
    index: &mut LruIndex,
    max: u64,
    keep: Option<&str>,
) -> GcResult {
    let start = Instant::now();
    let mut result = GcResult::default();

    while index.total_bytes > max {
        let Some(victim) = index.oldest() else {
            break;
        };
        if Some(victim.as_str()) == keep {
            break;
        }

        let size = index.remove(&victim).unwrap_or(0);
        match fs::remove_file(directory.join(&victim)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(entry = %victim, error = %e, "Failed to delete evicted cache entry"),
        }
        trace!(entry = %victim, size, "Evicted cache entry");

        result.entries_removed += 1;
        result.bytes_freed += size;
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}

async fn run_blocking<T, F>(f: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::SpawnError(e.to_string()))?
}

impl Cache for DiskCacheProvider {
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>> {
        let name = entry_name(key);
        let path = self.entry_path(&name);
        let temp = self.directory.join(format!(
            "{}.{}.{}",
            name,
            self.temp_counter.fetch_add(1, Ordering::Relaxed),
            TEMP_EXTENSION
        ));
        let directory = self.directory.clone();
        let index = Arc::clone(&self.index);
        let max = self.max_size_bytes;

        Box::pin(async move {
            let size = value.len() as u64;
            if size > max {
                return Err(CacheError::ValueTooLarge { size, max });
            }

            run_blocking(move || {
                if let Err(e) = fs::write(&temp, &value) {
                    let _ = fs::remove_file(&temp);
                    return Err(e.into());
                }

                let mut index = index.lock();
                if let Err(e) = fs::rename(&temp, &path) {
                    let _ = fs::remove_file(&temp);
                    return Err(e.into());
                }
                index.insert(&name, size);

                let evicted = evict_to_limit(&directory, &mut index, max, Some(&name));
                if evicted.entries_removed > 0 {
                    debug!(
                        entries = evicted.entries_removed,
                        bytes = evicted.bytes_freed,
                        size_bytes = index.total_bytes,
                        "Disk cache evicted entries"
                    );
                }
                Ok(())
            })
            .await
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
        let name = entry_name(key);
        let path = self.entry_path(&name);
        let index = Arc::clone(&self.index);

        Box::pin(async move {
            if !index.lock().contains(&name) {
                return Ok(None);
            }

            run_blocking(move || match fs::read(&path) {
                Ok(data) => {
                    if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
                        trace!(path = %path.display(), error = %e, "Failed to touch cache entry");
                    }
                    index.lock().touch(&name);
                    Ok(Some(data))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    index.lock().remove(&name);
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            })
            .await
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let name = entry_name(key);
        let path = self.entry_path(&name);
        let index = Arc::clone(&self.index);

        Box::pin(async move {
            run_blocking(move || {
                let mut index = index.lock();
                let existed = index.remove(&name).is_some();
                match fs::remove_file(&path) {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(existed),
                    Err(e) => Err(e.into()),
                }
            })
            .await
        })
    }

    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let name = entry_name(key);
        Box::pin(async move { Ok(self.index.lock().contains(&name)) })
    }

    fn size_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    fn entry_count(&self) -> u64 {
        self.index.lock().entries.len() as u64
    }

    fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    fn gc(&self) -> BoxFuture<'_, Result<GcResult, CacheError>> {
        let directory = self.directory.clone();
        let index = Arc::clone(&self.index);
        let max = self.max_size_bytes;

        Box::pin(async move {
            run_blocking(move || Ok(evict_to_limit(&directory, &mut index.lock(), max, None))).await
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<GcResult, CacheError>> {
        let directory = self.directory.clone();
        let index = Arc::clone(&self.index);

        Box::pin(async move {
            run_blocking(move || {
                let mut index = index.lock();
                let cleared = clear_disk_cache(&directory)?;
                index.clear();
                Ok(GcResult {
                    entries_removed: cleared.files_deleted as usize,
                    bytes_freed: cleared.bytes_freed,
                    duration_ms: cleared.duration_ms,
                })
            })
            .await
        })
    }
}

// =============================================================================
// Offline Helpers
// =============================================================================

/// Result of clearing a cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearResult {
    /// Entry files removed.
    pub files_deleted: u64,
    /// Bytes freed.
    pub bytes_freed: u64,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

/// Counts committed entries and their total size without opening a provider.
///
/// A missing directory reports an empty cache.
pub fn disk_cache_stats(directory: &Path) -> io::Result<(u64, u64)> {
    if !directory.exists() {
        return Ok((0, 0));
    }

    let mut files = 0;
    let mut bytes = 0;
    for dir_entry in fs::read_dir(directory)? {
        let dir_entry = dir_entry?;
        if !is_entry_file(&dir_entry.path()) {
            continue;
        }
        let metadata = dir_entry.metadata()?;
        if metadata.is_file() {
            files += 1;
            bytes += metadata.len();
        }
    }
    Ok((files, bytes))
}

/// Deletes every cache entry (and leftover temp file) in `directory`.
///
/// Other files are left alone.
pub fn clear_disk_cache(directory: &Path) -> io::Result<ClearResult> {
    let start = Instant::now();
    let mut result = ClearResult::default();
    if !directory.exists() {
        return Ok(result);
    }

    for dir_entry in fs::read_dir(directory)? {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        if !is_entry_file(&path) && !is_temp_file(&path) {
            continue;
        }
        let size = dir_entry.metadata().map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(&path) {
            Ok(()) => {
                if is_entry_file(&path) {
                    result.files_deleted += 1;
                    result.bytes_freed += size;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider(max: u64) -> (TempDir, DiskCacheProvider) {
        let dir = TempDir::new().unwrap();
        let provider = DiskCacheProvider::open(dir.path(), max).unwrap();
        (dir, provider)
    }

    #[test]
    fn test_entry_name_is_stable_hex() {
        let name = entry_name("https://tiles.example/0/0/0.pbf");
        assert_eq!(name, entry_name("https://tiles.example/0/0/0.pbf"));
        assert_ne!(name, entry_name("https://tiles.example/0/0/1.pbf"));
        assert!(name.ends_with(".entry"));
        assert_eq!(name.len(), 64 + ".entry".len());
    }

    #[test]
    fn test_lru_index_order() {
        let mut index = LruIndex::default();
        index.insert("a", 10);
        index.insert("b", 20);
        index.insert("c", 30);
        assert_eq!(index.total_bytes, 60);
        assert_eq!(index.oldest().as_deref(), Some("a"));

        index.touch("a");
        assert_eq!(index.oldest().as_deref(), Some("b"));

        index.insert("b", 5);
        assert_eq!(index.total_bytes, 45);
        assert_eq!(index.oldest().as_deref(), Some("c"));

        assert_eq!(index.remove("c"), Some(30));
        assert_eq!(index.remove("c"), None);
        assert_eq!(index.total_bytes, 15);
    }

    #[tokio::test]
    async fn test_disk_provider_set_and_get() {
        let (_dir, provider) = provider(1_000_000);

        provider.set("key1", vec![1, 2, 3]).await.unwrap();

        assert_eq!(provider.get("key1").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(provider.get("missing").await.unwrap().is_none());
        assert_eq!(provider.size_bytes(), 3);
        assert_eq!(provider.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_disk_provider_replace_updates_size() {
        let (_dir, provider) = provider(1_000_000);

        provider.set("key1", vec![0u8; 100]).await.unwrap();
        provider.set("key1", vec![0u8; 40]).await.unwrap();

        assert_eq!(provider.size_bytes(), 40);
        assert_eq!(provider.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_disk_provider_delete() {
        let (_dir, provider) = provider(1_000_000);

        provider.set("key1", vec![1]).await.unwrap();
        assert!(provider.contains("key1").await.unwrap());
        assert!(provider.delete("key1").await.unwrap());
        assert!(!provider.contains("key1").await.unwrap());
        assert!(!provider.delete("key1").await.unwrap());
        assert_eq!(provider.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_disk_provider_evicts_least_recently_used() {
        let (_dir, provider) = provider(250);

        provider.set("a", vec![0u8; 100]).await.unwrap();
        provider.set("b", vec![0u8; 100]).await.unwrap();
        // Touch a so b becomes the eviction candidate
        provider.get("a").await.unwrap();
        provider.set("c", vec![0u8; 100]).await.unwrap();

        assert!(provider.size_bytes() <= 250);
        assert!(provider.contains("a").await.unwrap());
        assert!(!provider.contains("b").await.unwrap());
        assert!(provider.contains("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_provider_rejects_oversized_value() {
        let (dir, provider) = provider(50);

        let err = provider.set("big", vec![0u8; 51]).await.unwrap_err();
        assert!(matches!(err, CacheError::ValueTooLarge { size: 51, max: 50 }));
        assert_eq!(disk_cache_stats(dir.path()).unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_disk_provider_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let provider = DiskCacheProvider::open(dir.path(), 1_000).unwrap();
            provider.set("old", vec![0u8; 100]).await.unwrap();
            provider.set("new", vec![0u8; 100]).await.unwrap();
        }

        // Pin mtimes so the restart order does not depend on clock resolution
        let base = FileTime::from_unix_time(1_700_000_000, 0);
        let later = FileTime::from_unix_time(1_700_000_100, 0);
        filetime::set_file_mtime(dir.path().join(entry_name("old")), base).unwrap();
        filetime::set_file_mtime(dir.path().join(entry_name("new")), later).unwrap();

        let provider = DiskCacheProvider::open(dir.path(), 150).unwrap();

        // Opening over the limit evicts the oldest entry
        assert_eq!(provider.entry_count(), 1);
        assert!(provider.get("old").await.unwrap().is_none());
        assert_eq!(provider.get("new").await.unwrap(), Some(vec![0u8; 100]));
    }

    #[tokio::test]
    async fn test_disk_provider_removes_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("abc.0.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("README"), b"keep me").unwrap();

        let provider = DiskCacheProvider::open(dir.path(), 1_000).unwrap();

        assert_eq!(provider.entry_count(), 0);
        assert!(!dir.path().join("abc.0.tmp").exists());
        assert!(dir.path().join("README").exists());
    }

    #[tokio::test]
    async fn test_disk_provider_clear() {
        let (dir, provider) = provider(1_000);
        provider.set("a", vec![0u8; 10]).await.unwrap();
        provider.set("b", vec![0u8; 20]).await.unwrap();

        let result = provider.clear().await.unwrap();

        assert_eq!(result.entries_removed, 2);
        assert_eq!(result.bytes_freed, 30);
        assert_eq!(provider.entry_count(), 0);
        assert_eq!(disk_cache_stats(dir.path()).unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_disk_provider_concurrent_writes() {
        let (_dir, provider) = provider(10_000);
        let provider = Arc::new(provider);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    provider.set(&format!("key{}", i), vec![0u8; 1000]).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(provider.size_bytes() <= 10_000);
        assert_eq!(provider.entry_count(), 10);
    }

    #[test]
    fn test_disk_cache_stats_missing_directory() {
        assert_eq!(
            disk_cache_stats(Path::new("/nonexistent/tilefetch-cache")).unwrap(),
            (0, 0)
        );
    }

    #[test]
    fn test_open_fails_on_file_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        assert!(DiskCacheProvider::open(&file, 1_000).is_err());
    }
}
