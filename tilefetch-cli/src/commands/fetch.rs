//! Fetch command - download URLs through the dispatcher.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tilefetch::config::{format_size, parse_size, ConfigFile};
use tilefetch::telemetry::DispatcherMetrics;
use tilefetch::{Dispatcher, FetchError, FetchResult, TerminalState};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{resolve_cache_dir, resolve_cache_size};
use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Directory to write payloads into
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Response cache directory (default: from config, then <cache dir>/tilefetch)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Response cache size, e.g. 30MB (overrides config)
    #[arg(long, value_name = "SIZE")]
    pub cache_size: Option<String>,

    /// Disable the response cache
    #[arg(long, conflicts_with_all = ["cache_dir", "cache_size"])]
    pub no_cache: bool,

    /// Cancel this URL right after submitting (repeatable)
    #[arg(long, value_name = "URL")]
    pub cancel: Vec<String>,
}

/// Run the fetch command.
pub fn run(args: FetchArgs, config: ConfigFile) -> Result<(), CliError> {
    let cache_directory = resolve_cache_dir(args.cache_dir.clone(), &config);
    let cache_max_bytes = resolve_cache_size(&config);
    let mut transport = config.transport;
    if args.no_cache {
        transport.cache_directory = None;
    } else {
        transport.cache_directory = cache_directory;
        transport.cache_max_bytes = cache_max_bytes;
    }
    if let Some(size) = &args.cache_size {
        transport.cache_max_bytes = parse_size(size)
            .ok_or_else(|| CliError::Config(format!("Invalid cache size: {}", size)))?;
    }

    if let Some(dir) = &args.output {
        fs::create_dir_all(dir)
            .map_err(|e| CliError::Output(format!("{}: {}", dir.display(), e)))?;
    }

    let metrics = Arc::new(DispatcherMetrics::new());
    let dispatcher = Arc::new(
        Dispatcher::builder(transport)
            .with_metrics(Arc::clone(&metrics))
            .build()?,
    );

    match dispatcher.cache() {
        Some(cache) => println!(
            "Cache: Enabled ({} of {} used)",
            format_size(cache.current_size()),
            format_size(cache.max_size())
        ),
        None => println!("Cache: Disabled"),
    }

    // Ctrl-C cancels everything still pending
    let weak = Arc::downgrade(&dispatcher);
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received shutdown signal, cancelling requests...");
        if let Some(dispatcher) = weak.upgrade() {
            dispatcher.shutdown();
        }
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, FetchResult)>();
    let mut submitted = 0;
    for url in &args.urls {
        let tx = tx.clone();
        let key = url.clone();
        let accepted = dispatcher.submit(url, move |result| {
            let _ = tx.send((key, result));
        });
        if accepted {
            submitted += 1;
        } else {
            warn!(url = %url, "Request rejected");
        }
    }
    drop(tx);

    for url in &args.cancel {
        let cancelled = dispatcher.cancel(url);
        info!(url = %url, cancelled, "Cancelled on request");
    }

    let progress = ProgressBar::new(submitted as u64);
    progress.set_style(progress_style());
    progress.enable_steady_tick(Duration::from_millis(200));

    let mut failed = 0;
    let mut cancelled = 0;
    while let Some((url, result)) = rx.blocking_recv() {
        match TerminalState::of(&result) {
            TerminalState::Succeeded => {}
            TerminalState::Failed => failed += 1,
            TerminalState::Cancelled => cancelled += 1,
        }
        let line = report(&url, result, args.output.as_deref());
        progress.println(line);
        progress.set_message(format!(
            "{} received",
            format_size(metrics.snapshot().bytes_received)
        ));
        progress.inc(1);
    }
    progress.finish_and_clear();

    let snapshot = dispatcher.metrics();
    println!();
    println!("{}", style("Summary").bold());
    println!("  {}", snapshot);
    println!(
        "  Cache hits: {} ({:.0}%), revalidated: {}",
        snapshot.cache_hits,
        snapshot.cache_hit_rate() * 100.0,
        snapshot.revalidated
    );

    dispatcher.shutdown();

    if failed + cancelled > 0 {
        return Err(CliError::Incomplete { failed, cancelled });
    }
    Ok(())
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Writes the payload if requested and returns a one-line report.
fn report(url: &str, result: FetchResult, output: Option<&Path>) -> String {
    match result {
        Ok(payload) => {
            let size = format_size(payload.len() as u64);
            match output {
                Some(dir) => {
                    let path = dir.join(output_name(url));
                    match fs::write(&path, &payload) {
                        Ok(()) => format!(
                            "{} {} ({}) -> {}",
                            style("ok").green(),
                            url,
                            size,
                            path.display()
                        ),
                        Err(e) => format!("{} {}: {}", style("write failed").red(), url, e),
                    }
                }
                None => format!("{} {} ({})", style("ok").green(), url, size),
            }
        }
        Err(FetchError::Cancelled { .. }) | Err(FetchError::ShutDown) => {
            format!("{} {}", style("cancelled").yellow(), url)
        }
        Err(e) => format!("{} {}: {}", style("failed").red(), url, e),
    }
}

/// File name for a fetched URL: scheme dropped, separators flattened.
fn output_name(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let name: String = without_scheme
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '&' | '=' | ':' | '#' => '_',
            c => c,
        })
        .collect();
    let name = name.trim_matches('_');
    if name.is_empty() {
        "index".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_name_flattens_path() {
        assert_eq!(
            output_name("https://tiles.example/14/8192/5461.pbf"),
            "tiles.example_14_8192_5461.pbf"
        );
    }

    #[test]
    fn test_output_name_flattens_query() {
        assert_eq!(
            output_name("https://tiles.example/style.json?key=abc"),
            "tiles.example_style.json_key_abc"
        );
    }

    #[test]
    fn test_output_name_empty() {
        assert_eq!(output_name("https://"), "index");
    }

    #[test]
    fn test_report_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let line = report(
            "https://tiles.example/a.pbf",
            Ok(b"tile".to_vec().into()),
            Some(dir.path()),
        );

        assert!(line.contains("tiles.example_a.pbf"));
        assert_eq!(
            fs::read(dir.path().join("tiles.example_a.pbf")).unwrap(),
            b"tile"
        );
    }

    #[test]
    fn test_report_cancelled() {
        let line = report(
            "https://tiles.example/a.pbf",
            Err(FetchError::cancelled("https://tiles.example/a.pbf")),
            None,
        );
        assert!(line.contains("cancelled"));
    }
}
