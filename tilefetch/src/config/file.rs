//! INI configuration file support.
//!
//! ```ini
//! [http]
//! connect_timeout = 10
//! write_timeout = 10
//! read_timeout = 30
//! max_requests = 64
//! max_requests_per_host = 5
//!
//! [cache]
//! directory = ~/.cache/tilefetch
//! max_size = 30MB
//!
//! [tls]
//! minimum_version = 1.2
//!
//! [logging]
//! level = info
//! ```
//!
//! Missing sections and keys keep their defaults. Values that are present
//! but malformed are rejected.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::TransportConfig;
use crate::error::ConfigError;
use crate::logging::LoggingConfig;

/// Configuration file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Parsed configuration file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigFile {
    /// Transport and cache settings.
    pub transport: TransportConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Default location: `<config dir>/tilefetch/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tilefetch").join(CONFIG_FILE_NAME))
    }

    /// Default cache location: `<cache dir>/tilefetch`.
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("tilefetch"))
    }

    /// Loads the file at the default location, or defaults if it is absent.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Load {
            path: PathBuf::from("<string>"),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let transport = &mut config.transport;

        if let Some(http) = ini.section(Some("http")) {
            if let Some(secs) = parse_key::<u64>(http, "connect_timeout", "http.connect_timeout")? {
                transport.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_key::<u64>(http, "write_timeout", "http.write_timeout")? {
                transport.write_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = parse_key::<u64>(http, "read_timeout", "http.read_timeout")? {
                transport.read_timeout = Duration::from_secs(secs);
            }
            if let Some(max) = parse_key::<usize>(http, "max_requests", "http.max_requests")? {
                transport.max_requests = max;
            }
            if let Some(max) =
                parse_key::<usize>(http, "max_requests_per_host", "http.max_requests_per_host")?
            {
                transport.max_requests_per_host = max;
            }
            if let Some(agent) = http.get("user_agent") {
                transport.user_agent = agent.trim().to_string();
            }
        }

        if let Some(cache) = ini.section(Some("cache")) {
            if let Some(dir) = cache.get("directory").map(str::trim).filter(|d| !d.is_empty()) {
                transport.cache_directory = Some(expand_home(dir));
            }
            if let Some(size) = cache.get("max_size") {
                transport.cache_max_bytes = parse_size(size)
                    .ok_or_else(|| ConfigError::invalid("cache.max_size", size.to_string()))?;
            }
        }

        if let Some(tls) = ini.section(Some("tls")) {
            if let Some(version) = tls.get("minimum_version") {
                transport.minimum_tls_version = version
                    .parse()
                    .map_err(|e: crate::transport::ParseTlsVersionError| {
                        ConfigError::invalid("tls.minimum_version", e.to_string())
                    })?;
            }
        }

        if let Some(logging) = ini.section(Some("logging")) {
            if let Some(level) = logging.get("level") {
                config.logging.level = level.trim().to_string();
            }
            if let Some(dir) = logging.get("directory").map(str::trim).filter(|d| !d.is_empty()) {
                config.logging.directory = Some(expand_home(dir));
            }
        }

        config.transport.validate()?;
        Ok(config)
    }
}

fn parse_key<T: FromStr>(
    section: &Properties,
    key: &str,
    field: &'static str,
) -> Result<Option<T>, ConfigError> {
    match section.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(field, format!("'{}' is not a valid number", raw))),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Parses a human-readable size such as `512`, `64KB`, `30MB` or `2 GiB`.
///
/// Units are binary (1 KB = 1024 bytes).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    if number < 0.0 {
        return None;
    }

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        _ => return None,
    };

    Some((number * multiplier as f64) as u64)
}

/// Formats a byte count for display, e.g. `30.0 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
