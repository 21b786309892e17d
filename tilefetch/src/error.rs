//! Error types shared across the fetch pipeline.
//!
//! Failures of individual requests are never raised to the caller directly;
//! they travel through the request's completion as a [`FetchError`]. Only
//! invalid configuration is reported synchronously, as a [`ConfigError`],
//! when the dispatcher is constructed.

use std::path::PathBuf;

use thiserror::Error;

/// Terminal failure of a single resource request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// DNS, connect, TLS handshake or I/O failure.
    #[error("transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    /// A connect, write or read timeout expired.
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The request was cancelled before or during transmission.
    #[error("cancelled")]
    Cancelled { url: String },

    /// The dispatcher refused the request because it has been shut down.
    #[error("dispatcher is shut down")]
    ShutDown,
}

impl FetchError {
    /// Creates a transport error for the given URL.
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a cancellation error for the given URL.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns true if the request was aborted intentionally.
    ///
    /// Refused submissions after shutdown count as cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::ShutDown)
    }

    /// Returns true if a configured timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the URL the error refers to, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. }
            | Self::Timeout { url }
            | Self::HttpStatus { url, .. }
            | Self::Cancelled { url } => Some(url),
            Self::ShutDown => None,
        }
    }
}

impl FetchError {
    /// Maps a reqwest error onto the fetch error taxonomy.
    pub(crate) fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }
        Self::transport(url, err)
    }
}

/// Invalid configuration detected while building the dispatcher.
///
/// This is the only error that crosses the core boundary synchronously.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configuration file could not be read or parsed.
    #[error("failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// No Tokio runtime was available and creating one failed.
    #[error("failed to create Tokio runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_displays_plain_reason() {
        let err = FetchError::cancelled("https://tiles.example/1/2/3.pbf");
        assert_eq!(err.to_string(), "cancelled");
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_http_status_display() {
        let err = FetchError::HttpStatus {
            url: "https://tiles.example/a".to_string(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HTTP 404 from https://tiles.example/a");
        assert_eq!(err.url(), Some("https://tiles.example/a"));
    }

    #[test]
    fn test_shutdown_has_no_url() {
        assert_eq!(FetchError::ShutDown.url(), None);
        assert!(FetchError::ShutDown.is_cancelled());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("max_requests", "must be greater than zero");
        assert!(err.to_string().contains("max_requests"));
        assert!(err.to_string().contains("greater than zero"));
    }
}
