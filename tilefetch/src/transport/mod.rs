//! Outbound transport: the HTTP client and the TLS hardening applied to it.
//!
//! # Architecture
//!
//! ```text
//! TransportConfig ──► ReqwestTransport::new()
//!                       │
//!                       ├── timeouts, pool limits, user agent
//!                       └── SecureTransport::configure()
//!                             └── TlsPlan::negotiate(minimum, TlsCapabilities::detect())
//! ```
//!
//! The dispatcher depends only on the [`HttpTransport`] trait, so tests and
//! embedders can substitute their own transport.

mod http;
mod tls;

pub use http::{host_of, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use tls::{
    ParseTlsVersionError, SecureTransport, TlsCapabilities, TlsPlan, TlsSetupError, TlsVersion,
};

#[cfg(test)]
pub use http::tests::MockTransport;
