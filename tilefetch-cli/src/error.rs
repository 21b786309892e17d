//! CLI error type.

use std::fmt;

use tilefetch::logging::LoggingError;
use tilefetch::ConfigError;

/// Errors that end a CLI command with a non-zero exit code.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    Config(String),
    /// Logging could not be initialized.
    Logging(LoggingError),
    /// The dispatcher refused to start.
    Dispatcher(ConfigError),
    /// Writing a fetched payload failed.
    Output(String),
    /// Some requests did not succeed.
    Incomplete { failed: usize, cancelled: usize },
    /// Reading cache statistics failed.
    CacheStats(String),
    /// Clearing the cache failed.
    CacheClear(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Dispatcher(e) => write!(f, "Failed to start dispatcher: {}", e),
            CliError::Output(msg) => write!(f, "Failed to write output: {}", msg),
            CliError::Incomplete { failed, cancelled } => write!(
                f,
                "{} request(s) failed, {} cancelled",
                failed, cancelled
            ),
            CliError::CacheStats(msg) => write!(f, "Failed to read cache statistics: {}", msg),
            CliError::CacheClear(msg) => write!(f, "Failed to clear cache: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Dispatcher(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}
