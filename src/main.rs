//! Tidemark main entry point
//!
//! This is the command-line interface for the Tidemark crawl engine.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tidemark::config::{load_config_with_hash, Config};
use tidemark::crawler::Coordinator;
use tidemark::output::{load_statistics, print_statistics};
use tidemark::storage::{SqliteStorage, Storage};
use tracing_subscriber::EnvFilter;

/// Tidemark: an incremental, resumable crawl engine
///
/// Tidemark paginates through the posts of profiles, hashtags and places,
/// deduplicating and bounding output per entity, backing off when rate
/// limited, and checkpointing progress so an interrupted run picks up where
/// it stopped.
#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(version = "1.0.0")]
#[command(about = "An incremental, resumable crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an unfinished run (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh run, ignoring previous state
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics of the latest run and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tidemark=info,warn"),
            1 => EnvFilter::new("tidemark=debug,info"),
            2 => EnvFilter::new("tidemark=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration and seeds
fn handle_dry_run(config: &Config) {
    println!("=== Tidemark Dry Run ===\n");

    println!("Scheduler:");
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!("  Max request retries: {}", config.crawler.max_request_retries);
    println!("  Item timeout: {}s", config.crawler.item_timeout_secs);
    match config.crawler.results_limit {
        Some(limit) => println!("  Results limit: {} per entity", limit),
        None => println!("  Results limit: none"),
    }
    println!(
        "  Require credentials: {}",
        config.crawler.require_credentials
    );
    println!("  Results type: {}", config.crawler.results_type);

    println!("\nPagination:");
    println!("  Stall attempts: {}", config.scroll.stall_attempts);
    println!("  Retry delay: {}ms", config.scroll.retry_delay_ms);
    match config.scroll.max_duplicate_batches {
        Some(max) => println!("  Max duplicate batches: {}", max),
        None => println!("  Max duplicate batches: unlimited"),
    }
    println!("  Pacing: {}", config.scroll.pacing);
    println!(
        "  Backoff: {}ms x attempt, {} retries",
        config.backoff.base_delay_ms, config.backoff.max_retries
    );

    println!("\nTime range:");
    println!(
        "  Min: {}",
        config.time_range.min.as_deref().unwrap_or("-")
    );
    println!(
        "  Max: {}",
        config.time_range.max.as_deref().unwrap_or("-")
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Results: {}", config.output.results_path);
    if let Some(fields) = &config.output.pick_fields {
        println!("  Fields: {}", fields.join(", "));
    }

    println!("\nAdapters ({}):", config.adapters.len());
    for adapter in &config.adapters {
        println!("  - {} ({})", adapter.page_type, adapter.detect_pointer);
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        match &seed.label {
            Some(label) => println!("  - {} ({})", seed.url, label),
            None => println!("  - {}", seed.url),
        }
    }

    if let Some(search) = &config.search {
        println!("\nSearch:");
        println!("  Query: {}", search.query);
        println!("  Type: {}", search.search_type.as_str());
        println!("  Limit: {}", search.limit);
        if !config.seeds.is_empty() {
            println!("  (ignored, seeds are configured)");
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics of the latest run
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let run = storage
        .get_latest_run()?
        .context("the database holds no runs yet")?;

    let stats = load_statistics(&storage, run.id)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh run (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume an unfinished run if one exists)");
    }

    let coordinator = Coordinator::new(config, config_hash, fresh)?;

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next batch boundary");
            cancel.cancel();
        }
    });

    match coordinator.run_replay().await {
        Ok(summary) => {
            tracing::info!(
                "Crawl finished: {} handled, {} failed, {} interrupted",
                summary.handled,
                summary.failed,
                summary.interrupted
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
