//! Cache management CLI commands.

use std::path::PathBuf;

use clap::Subcommand;
use tilefetch::cache::{clear_disk_cache, disk_cache_stats};
use tilefetch::config::{format_size, ConfigFile};

use super::{resolve_cache_dir, resolve_cache_size};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing all cached responses
    Clear,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(
    action: CacheAction,
    cache_dir: Option<PathBuf>,
    config: &ConfigFile,
) -> Result<(), CliError> {
    let cache_dir = resolve_cache_dir(cache_dir, config).ok_or_else(|| {
        CliError::Config(
            "No cache directory. Set directory in [cache] of config.ini or use --cache-dir"
                .to_string(),
        )
    })?;

    match action {
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", cache_dir.display());

            match clear_disk_cache(&cache_dir) {
                Ok(result) => {
                    println!(
                        "Deleted {} files, freed {}",
                        result.files_deleted,
                        format_size(result.bytes_freed)
                    );
                    Ok(())
                }
                Err(e) => Err(CliError::CacheClear(e.to_string())),
            }
        }
        CacheAction::Stats => {
            println!("Disk cache: {}", cache_dir.display());

            match disk_cache_stats(&cache_dir) {
                Ok((files, bytes)) => {
                    println!("  Entries: {}", files);
                    println!("  Size:    {}", format_size(bytes));
                    println!("  Limit:   {}", format_size(resolve_cache_size(config)));
                    Ok(())
                }
                Err(e) => Err(CliError::CacheStats(e.to_string())),
            }
        }
    }
}
