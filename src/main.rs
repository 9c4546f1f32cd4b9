//! Crag-Harvest main entry point
//!
//! This is the command-line interface for the Crag-Harvest route harvester.

use anyhow::{bail, Context};
use clap::Parser;
use crag_harvest::config::{load_config_with_hash, Config, SourceKind};
use crag_harvest::crawler::{Coordinator, HttpSource, RateLimiter};
use crag_harvest::extract::{Extractor, RouteExtractor, StatsExtractor};
use crag_harvest::frontier::{DiscoverySource, SitemapDiscovery, StaticFrontier};
use crag_harvest::storage::{SqliteStorage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Crag-Harvest: an incremental route harvester
///
/// Crag-Harvest enumerates route pages from a sitemap, fetches only the ones
/// that are new or stale under a shared rate limit, and stores the extracted
/// records in SQLite one batch at a time.
#[derive(Parser, Debug)]
#[command(name = "crag-harvest")]
#[command(version = "1.0.0")]
#[command(about = "An incremental, rate-limited route harvester", long_about = None)]
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

    /// Re-read the sitemap into the frontier table before harvesting
    #[arg(long)]
    discover: bool,

    /// Drop existing watermarks so every item is fetched again
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without fetching records
    #[arg(long, conflicts_with_all = ["stats", "check_stats"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "check_stats"])]
    stats: bool,

    /// Compare reported stat totals with stored entries and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    check_stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.check_stats {
        handle_check_stats(&config)?;
    } else {
        handle_harvest(config, config_hash, cli.discover, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crag_harvest=info,warn"),
            1 => EnvFilter::new("crag_harvest=debug,info"),
            2 => EnvFilter::new("crag_harvest=trace,debug"),
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

fn open_database(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.output.database_path);
    SqliteStorage::new(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let harvest = &config.harvest;

    println!("=== Crag-Harvest Dry Run ===\n");

    println!("Harvest Configuration:");
    println!(
        "  Rate limit: {} calls / {}s",
        harvest.rate_limit.calls, harvest.rate_limit.period_seconds
    );
    println!("  Batch size: {}", harvest.batch_size);
    println!("  Concurrency: {}", harvest.concurrency());
    println!(
        "  Staleness threshold: {} days",
        harvest.staleness_threshold_days
    );
    println!("  Retries per item: {}", harvest.max_retries_per_item);
    println!("  Not found policy: {:?}", harvest.not_found_policy);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nSource:");
    println!("  Kind: {}", config.source.kind.as_str());
    println!("  Sitemap: {}", config.source.sitemap_url);
    println!("  Skipped groups: {}", config.source.skip_groups);
    if let Some(filter) = &config.source.locator_filter {
        println!("  Locator filter: {}", filter);
    }
    if let Some(api_base) = &config.source.api_base {
        println!("  API base: {}", api_base);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let storage = open_database(config)?;
    let kind = config.source.kind.as_str();
    let frontier = storage.load_frontier_items(config.source.locator_filter.as_deref())?;
    let watermarks = storage.load_watermarks(kind)?;

    println!("\n✓ Configuration is valid");
    if frontier.is_empty() {
        println!("✓ Frontier is empty, a harvest would start with discovery");
    } else {
        let plan = crag_harvest::diff(
            &frontier,
            &watermarks,
            harvest.staleness_threshold(),
            chrono::Utc::now(),
        );
        println!(
            "✓ Would fetch {} items ({} fresh, {} to retire)",
            plan.to_fetch.len(),
            plan.skipped,
            plan.to_retire.len()
        );
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use crag_harvest::output::{load_statistics, print_statistics};

    println!("Database: {}\n", config.output.database_path);

    let storage = open_database(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --check-stats mode: stats consistency report
fn handle_check_stats(config: &Config) -> anyhow::Result<()> {
    use crag_harvest::output::{check_stats, print_stats_check};

    let mut storage = open_database(config)?;
    let rows = check_stats(&mut storage)?;
    print_stats_check(&rows);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: Config,
    config_hash: String,
    discover: bool,
    fresh: bool,
) -> anyhow::Result<()> {
    let kind = config.source.kind;

    match kind {
        SourceKind::Routes => {
            let extractor = RouteExtractor::from_config(&config.classify)?;
            harvest_with(config, config_hash, discover, fresh, Arc::new(extractor)).await
        }
        SourceKind::Stats => {
            let Some(api_base) = config.source.api_base.clone() else {
                bail!("source.api-base is required for stats harvesting");
            };
            let extractor = StatsExtractor::new(api_base);
            harvest_with(config, config_hash, discover, fresh, Arc::new(extractor)).await
        }
    }
}

async fn harvest_with<E: Extractor>(
    config: Config,
    config_hash: String,
    discover: bool,
    fresh: bool,
    extractor: Arc<E>,
) -> anyhow::Result<()> {
    let mut storage = open_database(&config)?;
    let source = Arc::new(HttpSource::from_config(&config.user_agent)?);
    let limiter = Arc::new(RateLimiter::from_config(&config.harvest.rate_limit));

    if fresh {
        let cleared = storage.clear_watermarks(extractor.kind())?;
        tracing::info!("Starting fresh harvest, cleared {} watermarks", cleared);
    }

    let filter = config.source.locator_filter.as_deref();
    let stored = storage.load_frontier_items(filter)?;

    if discover || stored.is_empty() {
        let sitemap = SitemapDiscovery::new(
            source.clone(),
            limiter.clone(),
            config.source.sitemap_url.clone(),
        )
        .skip_groups(config.source.skip_groups)
        .locator_filter(config.source.locator_filter.clone());

        let discovered = sitemap.discover().await?;
        let written = storage.upsert_frontier_items(&discovered)?;
        tracing::info!("Frontier table refreshed with {} items", written);
    } else {
        tracing::info!(
            "Using {} stored frontier items (pass --discover to refresh)",
            stored.len()
        );
    }

    let frontier = StaticFrontier::new(storage.load_frontier_items(filter)?);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, abandoning the batch in flight");
            ctrl_c.cancel();
        }
    });

    let coordinator = Coordinator::with_limiter(config.harvest.clone(), source, extractor, limiter)
        .with_cancellation(cancel)
        .with_config_hash(config_hash);

    match coordinator.run(&frontier, &mut storage).await {
        Ok(summary) => {
            tracing::info!("Harvest finished: {}", summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
