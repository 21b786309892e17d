//! Transport configuration.
//!
//! [`TransportConfig`] is set once when the dispatcher is built and is
//! immutable afterwards. It can be assembled with builder methods or loaded
//! from an INI file via [`ConfigFile`].
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tilefetch::config::TransportConfig;
//!
//! let config = TransportConfig::default()
//!     .with_cache("/var/cache/tiles", 30 * 1024 * 1024)
//!     .with_read_timeout(Duration::from_secs(20));
//! ```

mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::transport::TlsVersion;

pub use file::{format_size, parse_size, ConfigFile};

/// Default connect timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default write timeout (seconds).
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Default read timeout (seconds).
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default limit on concurrently running requests.
pub const DEFAULT_MAX_REQUESTS: usize = 64;

/// Default limit on concurrently running requests to a single host.
pub const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 5;

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("tilefetch/", env!("CARGO_PKG_VERSION"));

/// Configuration of the outbound transport and response cache.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportConfig {
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// Timeout for sending the request.
    pub write_timeout: Duration,

    /// Timeout between reads of the response.
    pub read_timeout: Duration,

    /// Directory for the on-disk response cache. `None` disables caching.
    pub cache_directory: Option<PathBuf>,

    /// Maximum cache size in bytes. Zero disables caching.
    pub cache_max_bytes: u64,

    /// Minimum acceptable TLS protocol version.
    pub minimum_tls_version: TlsVersion,

    /// Maximum number of requests running at once.
    pub max_requests: usize,

    /// Maximum number of requests running at once against one host.
    pub max_requests_per_host: usize,

    /// User-Agent sent with every request.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            cache_directory: None,
            cache_max_bytes: 0,
            minimum_tls_version: TlsVersion::Tls12,
            max_requests: DEFAULT_MAX_REQUESTS,
            max_requests_per_host: DEFAULT_MAX_REQUESTS_PER_HOST,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TransportConfig {
    /// Enable the disk cache in `directory`, bounded to `max_bytes`.
    pub fn with_cache(mut self, directory: impl Into<PathBuf>, max_bytes: u64) -> Self {
        self.cache_directory = Some(directory.into());
        self.cache_max_bytes = max_bytes;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the minimum TLS version.
    pub fn with_minimum_tls_version(mut self, version: TlsVersion) -> Self {
        self.minimum_tls_version = version;
        self
    }

    /// Set the global concurrency limit.
    pub fn with_max_requests(mut self, max: usize) -> Self {
        self.max_requests = max;
        self
    }

    /// Set the per-host concurrency limit.
    pub fn with_max_requests_per_host(mut self, max: usize) -> Self {
        self.max_requests_per_host = max;
        self
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Upper bound on a whole request: connect, then write, then read.
    ///
    /// The HTTP client has no separate write timeout, so the write budget is
    /// folded into this overall deadline.
    pub fn total_timeout(&self) -> Duration {
        self.connect_timeout + self.write_timeout + self.read_timeout
    }

    /// Returns true if the configuration asks for a response cache.
    pub fn cache_requested(&self) -> bool {
        self.cache_directory.is_some() && self.cache_max_bytes > 0
    }

    /// Checks values that would make the dispatcher unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, timeout) in [
            ("connect_timeout", self.connect_timeout),
            ("write_timeout", self.write_timeout),
            ("read_timeout", self.read_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        if self.max_requests == 0 {
            return Err(ConfigError::invalid(
                "max_requests",
                "must be greater than zero",
            ));
        }

        if self.max_requests_per_host == 0 {
            return Err(ConfigError::invalid(
                "max_requests_per_host",
                "must be greater than zero",
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("user_agent", "must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.minimum_tls_version, TlsVersion::Tls12);
        assert_eq!(config.max_requests, 64);
        assert_eq!(config.max_requests_per_host, 5);
        assert!(!config.cache_requested());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::default()
            .with_cache("/tmp/tiles", 30 * 1024 * 1024)
            .with_connect_timeout(Duration::from_secs(5))
            .with_max_requests(10)
            .with_max_requests_per_host(2)
            .with_minimum_tls_version(TlsVersion::Tls13);

        assert_eq!(config.cache_directory, Some(PathBuf::from("/tmp/tiles")));
        assert_eq!(config.cache_max_bytes, 30 * 1024 * 1024);
        assert!(config.cache_requested());
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.max_requests_per_host, 2);
        assert_eq!(config.minimum_tls_version, TlsVersion::Tls13);
        assert_eq!(config.total_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_zero_cache_size_is_not_requested() {
        let config = TransportConfig::default().with_cache("/tmp/tiles", 0);
        assert!(!config.cache_requested());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = TransportConfig::default().with_read_timeout(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("read_timeout"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        assert!(TransportConfig::default()
            .with_max_requests(0)
            .validate()
            .is_err());
        assert!(TransportConfig::default()
            .with_max_requests_per_host(0)
            .validate()
            .is_err());
    }
}
