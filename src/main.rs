//! Site-Indexer main entry point
//!
//! This is the command-line interface for the Site-Indexer crawler.

use clap::Parser;
use site_indexer::config::{resolve_config, Config, ConfigOverrides};
use site_indexer::crawler::{
    build_http_client, Admission, Coordinator, CrawlSettings, Frontier, HttpFetcher,
};
use site_indexer::output::{
    load_dead_letters, load_statistics, print_dead_letters, print_statistics,
};
use site_indexer::publish::{BlobStore, IndexingPipeline, SqliteSearchIndex};
use site_indexer::queue::SqliteQueue;
use site_indexer::robots::{fetch_robots, ParsedRobots};
use site_indexer::storage::{open_ledger, Ledger, LedgerHandle, RunStatus};
use site_indexer::url::ScopePolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Site-Indexer: crawl one website into a search index
///
/// Site-Indexer crawls a single site to a bounded depth, extracts page text
/// and publishes it to a document store and a full-text index. Interrupted
/// crawls resume where they stopped.
#[derive(Parser, Debug)]
#[command(name = "site-indexer")]
#[command(version = "1.0.0")]
#[command(about = "A bounded single-site crawler and indexer", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Seed URL (overrides crawler.seed-url)
    #[arg(long)]
    seed: Option<String>,

    /// Maximum link distance from the seed
    #[arg(long)]
    max_depth: Option<u32>,

    /// Number of concurrent workers
    #[arg(long)]
    concurrency: Option<u32>,

    /// Path regex a URL must match (repeatable)
    #[arg(long)]
    allow: Vec<String>,

    /// Path regex that excludes a URL (repeatable)
    #[arg(long)]
    deny: Vec<String>,

    /// Fetch attempts per URL before dead-lettering
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Base retry delay in milliseconds
    #[arg(long)]
    backoff_base_ms: Option<u64>,

    /// Maximum retry delay in milliseconds
    #[arg(long)]
    backoff_max_ms: Option<u64>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, discarding the ledger, queue and index
    #[arg(long, conflicts_with_all = ["stats", "dead_letters"])]
    fresh: bool,

    /// Show statistics from the ledger and exit
    #[arg(long, conflicts_with = "dead_letters")]
    stats: bool,

    /// List dead-lettered URLs with their last error and exit
    #[arg(long)]
    dead_letters: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            seed_url: self.seed.clone(),
            max_depth: self.max_depth,
            concurrency: self.concurrency,
            allow: self.allow.clone(),
            deny: self.deny.clone(),
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    let (config, config_hash) = match resolve_config(cli.config.as_deref(), &cli.overrides()) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.stats {
        handle_stats(&config)?;
    } else if cli.dead_letters {
        handle_dead_letters(&config)?;
    } else {
        handle_crawl(config, config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("site_indexer=info,warn"),
            1 => EnvFilter::new("site_indexer=debug,info"),
            2 => EnvFilter::new("site_indexer=trace,debug"),
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

/// Handles the --stats mode: shows statistics from the ledger
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Ledger: {}\n", config.output.ledger_path);

    let ledger = LedgerHandle::new(open_ledger(Path::new(&config.output.ledger_path))?);
    let stats = load_statistics(&ledger)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --dead-letters mode
fn handle_dead_letters(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = LedgerHandle::new(open_ledger(Path::new(&config.output.ledger_path))?);
    print_dead_letters(&load_dead_letters(&ledger)?);
    Ok(())
}

/// Creates the directories the output files live in
fn prepare_output_dirs(config: &Config) -> std::io::Result<()> {
    for file in [
        &config.output.ledger_path,
        &config.output.queue_path,
        &config.output.index_path,
    ] {
        if let Some(parent) = Path::new(file).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    std::fs::create_dir_all(&config.output.blob_path)
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: String,
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    prepare_output_dirs(&config)?;

    let ledger = LedgerHandle::new(open_ledger(Path::new(&config.output.ledger_path))?);
    let queue = Arc::new(SqliteQueue::open(Path::new(&config.output.queue_path))?);
    let blobs = BlobStore::new(&config.output.blob_path);
    let index = Arc::new(SqliteSearchIndex::open(Path::new(&config.output.index_path))?);

    // Create or resume run
    let run_id = if fresh {
        tracing::info!("Starting fresh crawl (discarding previous state)");
        let cleared = ledger.with(|l| l.clear_records())?;
        queue.purge()?;
        blobs.clear().await?;
        index.clear()?;
        tracing::info!("Cleared {} URL records", cleared);
        ledger.with(|l| l.create_run(&config_hash))?
    } else {
        match ledger.with(|l| l.get_latest_run())? {
            Some(run) if matches!(run.status, RunStatus::Running | RunStatus::Interrupted) => {
                if run.config_hash != config_hash {
                    tracing::warn!(
                        "Configuration changed since run {} started; resuming anyway",
                        run.id
                    );
                }
                tracing::info!("Resuming interrupted run {}", run.id);
                ledger.with(|l| l.update_run_status(run.id, RunStatus::Running))?;
                run.id
            }
            Some(run) => {
                tracing::info!(
                    "Previous run {} finished; URLs already done are not crawled again (use --fresh)",
                    run.id
                );
                ledger.with(|l| l.create_run(&config_hash))?
            }
            None => {
                tracing::info!("No previous runs found, starting new run");
                ledger.with(|l| l.create_run(&config_hash))?
            }
        }
    };

    // Build HTTP client and scope
    let client = build_http_client(&config.user_agent)?;
    let seed = Url::parse(&config.crawler.seed_url)?;

    let robots = if config.scope.respect_robots {
        fetch_robots(&client, &seed).await
    } else {
        ParsedRobots::allow_all()
    };
    let scope = ScopePolicy::new(&seed, &config.scope, config.crawler.max_depth)?
        .with_robots(robots, &config.user_agent.crawler_name);

    let frontier = Arc::new(Frontier::new(
        ledger.clone(),
        queue,
        scope,
        config.canonical.clone(),
        run_id,
    ));

    if frontier.admit_seed(&config.crawler.seed_url).await? != Admission::Enqueued {
        let resumed = frontier.resume().await?;
        if resumed.refused() > 0 {
            tracing::warn!(
                "{} unfinished URLs not re-enqueued yet; workers will retry",
                resumed.refused()
            );
        }
    }

    let coordinator = Coordinator::new(
        frontier,
        Arc::new(HttpFetcher::with_client(client)),
        Arc::new(IndexingPipeline::new(blobs, index)),
        CrawlSettings::from_config(&config),
    );

    let shutdown = coordinator.shutdown_token();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight jobs");
            interrupt.cancel();
        }
    });

    let summary = match coordinator.run().await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            ledger.with(|l| l.update_run_status(run_id, RunStatus::Failed))?;
            return Err(e.into());
        }
    };

    if shutdown.is_cancelled() {
        ledger.with(|l| l.update_run_status(run_id, RunStatus::Interrupted))?;
        tracing::info!("Run {} interrupted; run again to resume", run_id);
    } else if !summary.is_complete() {
        ledger.with(|l| l.update_run_status(run_id, RunStatus::Interrupted))?;
        tracing::warn!(
            "Run {} stopped with {} URLs unfinished; run again to resume",
            run_id,
            summary.in_progress
        );
    } else {
        ledger.with(|l| l.complete_run(run_id))?;
    }

    println!("{}", summary);

    let threshold = config.summary.dead_letter_threshold;
    if summary.exceeds_threshold(threshold) {
        return Err(format!(
            "{} URLs dead-lettered (threshold {}); see --dead-letters",
            summary.dead_lettered, threshold
        )
        .into());
    }

    Ok(())
}
