//! CLI subcommands.

use std::path::PathBuf;

use tilefetch::config::ConfigFile;

pub mod cache;
pub mod fetch;

/// Cache size used when the configuration sets no limit.
pub const DEFAULT_CACHE_SIZE: u64 = 30 * 1024 * 1024;

/// Cache directory shared by `fetch` and `cache`: the command line, then
/// `[cache] directory`, then `<cache dir>/tilefetch`.
pub fn resolve_cache_dir(cli: Option<PathBuf>, config: &ConfigFile) -> Option<PathBuf> {
    cli.or_else(|| config.transport.cache_directory.clone())
        .or_else(ConfigFile::default_cache_dir)
}

/// Cache size limit: `[cache] max_size`, or [`DEFAULT_CACHE_SIZE`] when unset.
pub fn resolve_cache_size(config: &ConfigFile) -> u64 {
    match config.transport.cache_max_bytes {
        0 => DEFAULT_CACHE_SIZE,
        max => max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_dir_prefers_command_line() {
        let config = ConfigFile::parse("[cache]\ndirectory = /srv/config-cache\n").unwrap();
        assert_eq!(
            resolve_cache_dir(Some(PathBuf::from("/tmp/cli-cache")), &config),
            Some(PathBuf::from("/tmp/cli-cache"))
        );
    }

    #[test]
    fn test_cache_dir_falls_back_to_config_then_default() {
        let config = ConfigFile::parse("[cache]\ndirectory = /srv/config-cache\n").unwrap();
        assert_eq!(
            resolve_cache_dir(None, &config),
            Some(PathBuf::from("/srv/config-cache"))
        );

        let empty = ConfigFile::parse("").unwrap();
        assert_eq!(resolve_cache_dir(None, &empty), ConfigFile::default_cache_dir());
    }

    #[test]
    fn test_cache_size_default_when_unset() {
        let empty = ConfigFile::parse("").unwrap();
        assert_eq!(resolve_cache_size(&empty), DEFAULT_CACHE_SIZE);

        let config = ConfigFile::parse("[cache]\nmax_size = 1MB\n").unwrap();
        assert_eq!(resolve_cache_size(&config), 1024 * 1024);
    }
}
