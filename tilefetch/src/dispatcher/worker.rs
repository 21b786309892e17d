//! The per-request fetch step run by worker tasks.
//!
//! ```text
//! fresh cache entry ──► Succeeded
//!        │ miss
//!        ▼
//! stale entry with validators? ──► conditional GET ──► 304 ──► refresh entry ──► Succeeded
//!        │ no                                  │
//!        ▼                                     ▼
//!       GET ───────────────────────────────► 200 ──► store if cacheable ──► Succeeded
//!                                             other ──► Failed
//! ```
//!
//! Cache I/O happens here, outside the dispatcher lock. Cancellation drops
//! this future at its next await point.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::request::{FetchResult, TerminalState};
use super::state::Launch;
use super::Inner;
use crate::error::FetchError;
use crate::transport::HttpRequest;

impl Inner {
    /// Fetches `url`, consulting and updating the cache.
    pub(super) async fn fetch(&self, url: &str) -> FetchResult {
        let stale = match &self.cache {
            Some(cache) => match cache.entry(url).await {
                Some(entry) if entry.is_fresh() => {
                    trace!(url, size = entry.size, "Cache hit");
                    self.metrics.cache_hit();
                    return Ok(entry.payload);
                }
                Some(entry) if entry.has_validators() => Some(entry),
                _ => None,
            },
            None => None,
        };

        let Some(transport) = self.transport() else {
            return Err(FetchError::ShutDown);
        };

        let mut request = HttpRequest::get(url);
        if let Some(entry) = &stale {
            trace!(url, etag = ?entry.etag, "Revalidating stale cache entry");
            request = entry.conditional_request(request);
        }

        let response = transport.execute(request).await?;
        self.metrics
            .network_fetch_completed(response.body.len() as u64);

        if response.is_not_modified() {
            return match (stale, &self.cache) {
                (Some(entry), Some(cache)) => {
                    let entry = cache.refresh(entry, &response).await;
                    self.metrics.cache_revalidated();
                    debug!(url, "Served revalidated cache entry");
                    Ok(entry.payload)
                }
                _ => Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: response.status,
                }),
            };
        }

        if !response.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        if let Some(cache) = &self.cache {
            match cache.store(url, &response).await {
                Ok(true) => trace!(url, size = response.body.len(), "Stored response in cache"),
                Ok(false) => {}
                Err(e) => warn!(url, error = %e, "Failed to store response in cache"),
            }
        }

        Ok(response.body)
    }
}

/// Runs a promoted request until it completes or its token is cancelled.
pub(super) async fn run(inner: Arc<Inner>, launch: Launch) {
    let Launch {
        id,
        url,
        token,
        waited,
    } = launch;

    trace!(request = %id, url = %url, waited_ms = waited.as_millis() as u64, "Request started");

    let result = tokio::select! {
        biased;

        _ = token.cancelled() => None,
        result = inner.fetch(&url) => Some(result),
    };

    // Whoever removes the request from the Running set delivers its result.
    let (finished, launches) = {
        let mut state = inner.state.lock();
        let finished = state.finish(id);
        let launches = state.promote(inner.config.max_requests, inner.config.max_requests_per_host);
        (finished, launches)
    };
    inner.launch(launches);

    let Some(finished) = finished else {
        trace!(request = %id, url = %url, "Request already cancelled, dropping result");
        return;
    };

    let result = result.unwrap_or_else(|| Err(FetchError::cancelled(&url)));
    let elapsed_ms = finished.started_at.elapsed().as_millis() as u64;
    match TerminalState::of(&result) {
        TerminalState::Succeeded => {
            inner.metrics.request_succeeded();
            debug!(request = %id, url = %url, elapsed_ms, "Request succeeded");
        }
        TerminalState::Failed => {
            inner.metrics.request_failed();
            if let Err(e) = &result {
                debug!(request = %id, url = %url, elapsed_ms, error = %e, "Request failed");
            }
        }
        TerminalState::Cancelled => {
            inner.metrics.requests_cancelled(1);
            debug!(request = %id, url = %url, "Request cancelled");
        }
    }

    finished.completion.deliver(result);
}
