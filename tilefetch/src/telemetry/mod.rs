//! Dispatcher telemetry.
//!
//! Lock-free atomic counters record request lifecycle events; a snapshot
//! gives a consistent-enough point-in-time copy for display.
//!
//! ```text
//! Dispatcher ─────► DispatcherMetrics ─────► TelemetrySnapshot ─────► CLI
//!                   (atomic counters)        (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tilefetch::telemetry::DispatcherMetrics;
//!
//! let metrics = DispatcherMetrics::new();
//! metrics.request_submitted();
//! metrics.network_fetch_completed(4096);
//! metrics.request_succeeded();
//!
//! let snapshot = metrics.snapshot();
//! println!("Fetched {} bytes", snapshot.bytes_received);
//! ```

mod metrics;
mod snapshot;

pub use metrics::DispatcherMetrics;
pub use snapshot::TelemetrySnapshot;
