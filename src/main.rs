//! subrelay main entry point
//!
//! This is the command-line interface for the subrelay pipeline.

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use subrelay::config::{load_config_with_hash, relay_credentials};
use subrelay::crawler::HttpFetcher;
use subrelay::relay::{DisabledSink, RelaySink, TelegramSink};
use subrelay::runner::{open_ledger, print_dry_run, select_sources};
use subrelay::{RunMode, RunOptions, Runner};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// subrelay: subtitle discovery and relay pipeline
///
/// Crawls the configured sites for subtitle pages, downloads every new
/// artifact once per content identity and relays it to a Telegram chat.
/// Interrupted runs resume from the stored checkpoint and queue.
#[derive(Parser, Debug)]
#[command(name = "subrelay")]
#[command(version)]
#[command(about = "Subtitle discovery and relay pipeline", long_about = None)]
#[command(group(ArgGroup::new("mode").multiple(false)))]
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

    /// Only run the named sources (repeatable)
    #[arg(long = "source", value_name = "NAME")]
    sources: Vec<String>,

    /// Crawl listing pages only, do not process the queue
    #[arg(long, group = "mode")]
    crawl_only: bool,

    /// Process the pending queue only, do not crawl
    #[arg(long, group = "mode")]
    process_only: bool,

    /// Check the newest listing pages for new items, then process them
    #[arg(long, group = "mode")]
    monitor: bool,

    /// Show ledger statistics and exit
    #[arg(long, group = "mode")]
    stats: bool,

    /// Return failed items to the pending queue and exit
    #[arg(long, group = "mode")]
    requeue_failed: bool,

    /// Clear the crawl checkpoint so the next crawl starts over
    #[arg(long, group = "mode")]
    reset_checkpoint: bool,

    /// Validate config and show what would be crawled
    #[arg(long, group = "mode")]
    dry_run: bool,

    /// Process at most this many items per source
    #[arg(long, value_name = "N")]
    limit: Option<u64>,

    /// Crawl at most this many listing pages per category
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    page_limit: Option<u32>,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.crawl_only {
            RunMode::CrawlOnly
        } else if self.process_only {
            RunMode::ProcessOnly
        } else if self.monitor {
            RunMode::Monitor
        } else if self.stats {
            RunMode::Stats
        } else if self.requeue_failed {
            RunMode::RequeueFailed
        } else if self.reset_checkpoint {
            RunMode::ResetCheckpoint
        } else if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Full
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let mode = cli.mode();
    let options = RunOptions {
        mode,
        limit: cli.limit,
        page_limit: cli.page_limit,
    };
    let sources: Vec<_> = select_sources(&config, &cli.sources)?
        .into_iter()
        .cloned()
        .collect();

    // A dry run stops before the ledger or the sink exists
    if mode == RunMode::DryRun {
        print_dry_run(&config, &sources);
        return Ok(());
    }

    let sink: Arc<dyn RelaySink> = if mode.relays() {
        let (token, chat_id) = relay_credentials(&config.relay)?;
        Arc::new(TelegramSink::with_api_base(
            &config.relay.api_base,
            &token,
            &chat_id,
        )?)
    } else {
        Arc::new(DisabledSink)
    };

    let ledger = open_ledger(&config.ledger)
        .await
        .context("Failed to open ledger")?;
    let fetcher = Arc::new(HttpFetcher::new(&config.http)?);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let runner = Runner::new(config, ledger, fetcher, sink, cancel.clone());
    for source in &sources {
        if cancel.is_cancelled() {
            break;
        }
        tracing::info!(source = %source.name, mode = mode.label(), "Starting source");
        runner
            .run_source(source, &options)
            .await
            .with_context(|| format!("Source '{}' failed", source.name))?;
    }

    if cancel.is_cancelled() {
        tracing::info!("Stopped on interrupt; progress is saved and the next run resumes");
    }
    Ok(())
}

/// Cancels the run on the first Ctrl-C; in-flight items finish first
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("subrelay=info,warn"),
            1 => EnvFilter::new("subrelay=debug,info"),
            2 => EnvFilter::new("subrelay=trace,debug"),
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
