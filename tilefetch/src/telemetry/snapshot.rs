//! Point-in-time view of dispatcher counters.

use std::fmt;
use std::time::Duration;

/// Copy of the dispatcher counters at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Time since the metrics were created.
    pub uptime: Duration,
    /// Accepted requests.
    pub submitted: u64,
    /// Requests refused after shutdown.
    pub rejected: u64,
    /// Requests served from a fresh cache entry.
    pub cache_hits: u64,
    /// Stale entries confirmed by `304 Not Modified`.
    pub revalidated: u64,
    /// Completed network round trips.
    pub network_fetches: u64,
    /// Response body bytes received from the network.
    pub bytes_received: u64,
    /// Requests that succeeded.
    pub succeeded: u64,
    /// Requests that failed.
    pub failed: u64,
    /// Requests that were cancelled.
    pub cancelled: u64,
}

impl TelemetrySnapshot {
    /// Accepted requests without a terminal result yet.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.succeeded + self.failed + self.cancelled)
    }

    /// Fraction of successful requests served without a full download.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.succeeded == 0 {
            return 0.0;
        }
        (self.cache_hits + self.revalidated) as f64 / self.succeeded as f64
    }

    /// Average download throughput since start.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / secs
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} submitted, {} succeeded, {} failed, {} cancelled ({} cache hits, {} revalidated, {} bytes downloaded)",
            self.submitted,
            self.succeeded,
            self.failed,
            self.cancelled,
            self.cache_hits,
            self.revalidated,
            self.bytes_received
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_rate() {
        let snapshot = TelemetrySnapshot {
            succeeded: 4,
            cache_hits: 1,
            revalidated: 1,
            ..Default::default()
        };
        assert!((snapshot.cache_hit_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(TelemetrySnapshot::default().cache_hit_rate(), 0.0);
    }

    #[test]
    fn test_bytes_per_second() {
        let snapshot = TelemetrySnapshot {
            uptime: Duration::from_secs(2),
            bytes_received: 1000,
            ..Default::default()
        };
        assert!((snapshot.bytes_per_second() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display() {
        let snapshot = TelemetrySnapshot {
            submitted: 3,
            succeeded: 2,
            cancelled: 1,
            ..Default::default()
        };
        let text = snapshot.to_string();
        assert!(text.starts_with("3 submitted, 2 succeeded, 0 failed, 1 cancelled"));
    }
}
