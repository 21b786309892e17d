//! HTTP-aware response cache layered over a [`Cache`] store.
//!
//! Entries are keyed by request URL. Each stored value carries the payload
//! together with the metadata needed to decide freshness and to revalidate
//! a stale entry with a conditional request.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::control::{self, CacheControl};
use super::providers::DiskCacheProvider;
use super::traits::{Cache, CacheError, GcResult};
use crate::transport::{HttpRequest, HttpResponse};

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached response with its caching metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Request URL the entry was stored under.
    pub url: String,
    /// Response body.
    pub payload: Bytes,
    /// Payload size in bytes.
    pub size: u64,
    /// When the response was received.
    pub stored_at: DateTime<Utc>,
    /// End of the freshness lifetime. `None` means stale on arrival.
    pub expires_at: Option<DateTime<Utc>>,
    /// `ETag` validator.
    pub etag: Option<String>,
    /// `Last-Modified` validator, verbatim.
    pub last_modified: Option<String>,
    /// Freshness directives of the stored response.
    pub directives: FreshnessDirectives,
}

impl CacheEntry {
    /// Returns true if the entry is fresh at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now < expires)
    }

    /// Returns true if the entry is fresh now.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// Returns true if a conditional request can be built for this entry.
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Adds `If-None-Match` / `If-Modified-Since` to `request`.
    pub fn conditional_request(&self, mut request: HttpRequest) -> HttpRequest {
        if let Some(value) = self.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            request = request.with_header(IF_NONE_MATCH, value);
        }
        if let Some(value) = self
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            request = request.with_header(IF_MODIFIED_SINCE, value);
        }
        request
    }

    /// Builds an entry from a response received at `received_at`.
    fn from_response(url: &str, response: &HttpResponse, received_at: DateTime<Utc>) -> Self {
        let mut entry = Self {
            url: url.to_string(),
            payload: response.body.clone(),
            size: response.body.len() as u64,
            stored_at: received_at,
            expires_at: None,
            etag: None,
            last_modified: None,
            directives: FreshnessDirectives::default(),
        };
        entry.apply_headers(response, received_at);
        entry
    }

    /// Updates metadata from response headers (a full response or a `304`).
    ///
    /// Directives the response omits keep their stored values, so a bare
    /// `304` renews the original freshness lifetime.
    fn apply_headers(&mut self, response: &HttpResponse, received_at: DateTime<Utc>) {
        if let Some(etag) = response.header("etag") {
            self.etag = Some(etag.to_string());
        }
        if let Some(last_modified) = response.header("last-modified") {
            self.last_modified = Some(last_modified.to_string());
        }

        let date = response
            .header("date")
            .and_then(control::parse_http_date)
            .unwrap_or(received_at);
        self.directives.update(response, date);

        let lifetime = control::freshness_lifetime(
            &self.directives.cache_control(),
            Some(date),
            self.directives.expires_from(date),
            self.last_modified.as_deref().and_then(control::parse_http_date),
            received_at,
        );

        self.stored_at = received_at;
        self.expires_at = if lifetime.is_zero() {
            None
        } else {
            chrono::Duration::from_std(lifetime)
                .ok()
                .and_then(|d| received_at.checked_add_signed(d))
        };
    }
}

/// Freshness inputs kept from the last response that carried them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessDirectives {
    /// `max-age` in seconds.
    pub max_age: Option<u64>,
    /// `no-cache` was present.
    pub no_cache: bool,
    /// `Expires` minus `Date`, in seconds.
    pub expires_after: Option<i64>,
}

impl FreshnessDirectives {
    /// Replaces the directives `response` carries and keeps the rest.
    fn update(&mut self, response: &HttpResponse, date: DateTime<Utc>) {
        if let Some(value) = response.header("cache-control") {
            let cache_control = CacheControl::parse(value);
            self.max_age = cache_control.max_age;
            self.no_cache = cache_control.no_cache;
        }
        if let Some(value) = response.header("expires") {
            // An unparseable Expires means already expired
            self.expires_after = Some(
                control::parse_http_date(value)
                    .map_or(0, |expires| (expires - date).num_seconds()),
            );
        }
    }

    fn cache_control(&self) -> CacheControl {
        CacheControl {
            max_age: self.max_age,
            no_cache: self.no_cache,
            ..CacheControl::default()
        }
    }

    fn expires_from(&self, date: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_after
            .and_then(chrono::Duration::try_seconds)
            .and_then(|after| date.checked_add_signed(after))
    }
}

/// Serialized form of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    stored_at: i64,
    expires_at: Option<i64>,
    etag: Option<String>,
    last_modified: Option<String>,
    directives: FreshnessDirectives,
    payload: Vec<u8>,
}

impl StoredEntry {
    fn encode(entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let stored = StoredEntry {
            stored_at: entry.stored_at.timestamp(),
            expires_at: entry.expires_at.map(|e| e.timestamp()),
            etag: entry.etag.clone(),
            last_modified: entry.last_modified.clone(),
            directives: entry.directives.clone(),
            payload: entry.payload.to_vec(),
        };
        bincode::serialize(&stored).map_err(|e| CacheError::Corrupt {
            key: entry.url.clone(),
            reason: e.to_string(),
        })
    }

    fn decode(url: &str, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            key: url.to_string(),
            reason,
        };

        let stored: StoredEntry = bincode::deserialize(bytes).map_err(|e| corrupt(e.to_string()))?;
        let stored_at = control::from_unix(stored.stored_at)
            .ok_or_else(|| corrupt("invalid timestamp".to_string()))?;

        Ok(CacheEntry {
            url: url.to_string(),
            size: stored.payload.len() as u64,
            payload: Bytes::from(stored.payload),
            stored_at,
            expires_at: stored.expires_at.and_then(control::from_unix),
            etag: stored.etag,
            last_modified: stored.last_modified,
            directives: stored.directives,
        })
    }
}

// =============================================================================
// Response Cache
// =============================================================================

/// Size-bounded HTTP response cache.
///
/// Cheap to clone; clones share the underlying store. Store failures are
/// logged and reported as misses, so a broken cache never fails a request.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn Cache>,
}

impl ResponseCache {
    /// Enables a disk cache in `directory` bounded to `max_bytes`.
    ///
    /// Returns `None` when caching is not requested (no directory or a zero
    /// size) or when the directory cannot be created or written to. The
    /// latter is logged as a warning; the dispatcher then runs uncached.
    pub fn configure(directory: Option<&Path>, max_bytes: u64) -> Option<Self> {
        let Some(directory) = directory else {
            debug!("Response cache disabled: no directory configured");
            return None;
        };
        if max_bytes == 0 {
            debug!(directory = %directory.display(), "Response cache disabled: zero size");
            return None;
        }

        match DiskCacheProvider::open(directory, max_bytes) {
            Ok(provider) => {
                info!(
                    directory = %directory.display(),
                    max_bytes,
                    entries = provider.entry_count(),
                    size_bytes = provider.size_bytes(),
                    "Response cache enabled"
                );
                Some(Self::with_store(Arc::new(provider)))
            }
            Err(e) => {
                warn!(
                    directory = %directory.display(),
                    error = %e,
                    "Response cache unavailable, continuing without cache"
                );
                None
            }
        }
    }

    /// Uses an arbitrary store.
    pub fn with_store(store: Arc<dyn Cache>) -> Self {
        Self { store }
    }

    /// Returns the stored entry for `url` regardless of freshness.
    ///
    /// Undecodable entries are deleted and reported as a miss.
    pub async fn entry(&self, url: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(url).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(url, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match StoredEntry::decode(url, &bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(url, error = %e, "Dropping undecodable cache entry");
                if let Err(e) = self.store.delete(url).await {
                    debug!(url, error = %e, "Failed to delete undecodable cache entry");
                }
                None
            }
        }
    }

    /// Returns the entry for `url` if it is present and fresh.
    pub async fn lookup(&self, url: &str) -> Option<CacheEntry> {
        self.entry(url).await.filter(CacheEntry::is_fresh)
    }

    /// Returns the entry for `url` if it is stale but can be revalidated.
    pub async fn lookup_stale(&self, url: &str) -> Option<CacheEntry> {
        self.entry(url)
            .await
            .filter(|entry| !entry.is_fresh() && entry.has_validators())
    }

    /// Stores a successful response.
    ///
    /// Returns `Ok(false)` without storing when the response is not
    /// cacheable: a status other than `200`, `no-store`, no freshness and no
    /// validators, or a size above the cache limit.
    pub async fn store(&self, url: &str, response: &HttpResponse) -> Result<bool, CacheError> {
        if response.status != 200 {
            return Ok(false);
        }

        let cache_control = response
            .header("cache-control")
            .map(CacheControl::parse)
            .unwrap_or_default();
        if !cache_control.is_storable() {
            debug!(url, "Not caching no-store response");
            return Ok(false);
        }

        let entry = CacheEntry::from_response(url, response, Utc::now());
        if entry.expires_at.is_none() && !entry.has_validators() {
            debug!(url, "Not caching response without freshness or validators");
            return Ok(false);
        }

        self.put(&entry).await
    }

    /// Applies a `304 Not Modified` to a stale entry and persists the
    /// refreshed metadata. The refreshed entry is returned even if
    /// persisting it fails.
    pub async fn refresh(&self, mut entry: CacheEntry, not_modified: &HttpResponse) -> CacheEntry {
        entry.apply_headers(not_modified, Utc::now());
        if let Err(e) = self.put(&entry).await {
            warn!(url = %entry.url, error = %e, "Failed to persist revalidated cache entry");
        }
        entry
    }

    async fn put(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let encoded = StoredEntry::encode(entry)?;
        let max = self.store.max_size_bytes();
        if encoded.len() as u64 > max {
            debug!(
                url = %entry.url,
                size = encoded.len(),
                max,
                "Response larger than cache, not storing"
            );
            return Ok(false);
        }

        self.store.set(&entry.url, encoded).await?;
        Ok(true)
    }

    /// Current size of the cache in bytes.
    pub fn current_size(&self) -> u64 {
        self.store.size_bytes()
    }

    /// Configured maximum size in bytes.
    pub fn max_size(&self) -> u64 {
        self.store.max_size_bytes()
    }

    /// Number of cached responses.
    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }

    /// Removes every cached response.
    pub async fn clear(&self) -> Result<GcResult, CacheError> {
        self.store.clear().await
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("size_bytes", &self.current_size())
            .field("max_bytes", &self.max_size())
            .finish()
    }
}
