//! tilefetch CLI - Command-line interface
//!
//! Fetches map resources through the tilefetch dispatcher and manages the
//! on-disk response cache.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tilefetch::logging::init_logging;
use tilefetch::ConfigFile;
use tracing::debug;

use commands::cache::CacheAction;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "tilefetch", version, about = "Fetch and cache map tiles over HTTP")]
struct Cli {
    /// Configuration file (default: <config dir>/tilefetch/config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level filter, e.g. "debug" or "tilefetch=trace"
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one or more URLs
    Fetch(FetchArgs),
    /// Inspect or clear the disk cache
    Cache {
        /// Cache directory (default: from config, then <cache dir>/tilefetch)
        #[arg(long, global = true, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let _guard = init_logging(&config.logging)?;
    debug!(config = ?cli.config, "Configuration loaded");

    match cli.command {
        Command::Fetch(args) => commands::fetch::run(args, config),
        Command::Cache { cache_dir, action } => commands::cache::run(action, cache_dir, &config),
    }
}
