//! Atomic counters for dispatcher activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::TelemetrySnapshot;

/// Lock-free counters updated by the dispatcher and its workers.
///
/// All updates use relaxed ordering; counters are independent and only
/// read for reporting.
#[derive(Debug)]
pub struct DispatcherMetrics {
    started_at: Instant,
    submitted: AtomicU64,
    rejected: AtomicU64,
    cache_hits: AtomicU64,
    revalidated: AtomicU64,
    network_fetches: AtomicU64,
    bytes_received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Default for DispatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            revalidated: AtomicU64::new(0),
            network_fetches: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// A request was accepted.
    pub fn request_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A request was refused after shutdown.
    pub fn request_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A request was served from a fresh cache entry.
    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale entry was confirmed by a `304 Not Modified`.
    pub fn cache_revalidated(&self) {
        self.revalidated.fetch_add(1, Ordering::Relaxed);
    }

    /// A network round trip finished with `bytes` of body.
    pub fn network_fetch_completed(&self, bytes: u64) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A request reached the Succeeded state.
    pub fn request_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// A request reached the Failed state.
    pub fn request_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` requests reached the Cancelled state.
    pub fn requests_cancelled(&self, count: u64) {
        self.cancelled.fetch_add(count, Ordering::Relaxed);
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Number of accepted requests.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Number of requests that reached a terminal state.
    pub fn completed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            uptime: self.started_at.elapsed(),
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            revalidated: self.revalidated.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_metrics_are_zero() {
        let snapshot = DispatcherMetrics::new().snapshot();
        assert_eq!(snapshot.submitted, 0);
        assert_eq!(snapshot.succeeded, 0);
        assert_eq!(snapshot.bytes_received, 0);
    }

    #[test]
    fn test_lifecycle_counters() {
        let metrics = DispatcherMetrics::new();
        metrics.request_submitted();
        metrics.request_submitted();
        metrics.request_submitted();
        metrics.network_fetch_completed(100);
        metrics.request_succeeded();
        metrics.request_failed();
        metrics.requests_cancelled(1);

        assert_eq!(metrics.submitted(), 3);
        assert_eq!(metrics.completed(), 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.network_fetches, 1);
        assert_eq!(snapshot.bytes_received, 100);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[test]
    fn test_thread_safe_counting() {
        let metrics = Arc::new(DispatcherMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.request_submitted();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.submitted(), 800);
    }
}
