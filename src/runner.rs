//! Run modes
//!
//! The [`Runner`] owns the shared collaborators (ledger, fetcher, sink) and
//! executes one [`RunMode`] per selected source, one source after another.

use crate::backoff::BackoffController;
use crate::config::{Config, LedgerBackend, LedgerConfig, SourceConfig};
use crate::crawler::{Crawler, LinkExtractor, PageFetcher};
use crate::ingest::IngestPool;
use crate::ledger::{D1Ledger, LedgerStore, SqliteLedger, D1_API_BASE};
use crate::output::{load_statistics, print_statistics, print_summary, RunSummary};
use crate::relay::RelaySink;
use crate::source::SourceContext;
use crate::{ConfigError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a run does for each selected source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Full crawl, then drain the queue
    Full,
    CrawlOnly,
    ProcessOnly,
    /// Shallow crawl of the newest listing pages, then drain the queue
    Monitor,
    Stats,
    RequeueFailed,
    ResetCheckpoint,
    DryRun,
}

impl RunMode {
    /// Modes that upload artifacts and therefore need sink credentials
    pub fn relays(&self) -> bool {
        matches!(self, Self::Full | Self::ProcessOnly | Self::Monitor)
    }

    pub fn crawls(&self) -> bool {
        matches!(self, Self::Full | Self::CrawlOnly | Self::Monitor)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::CrawlOnly => "Crawl",
            Self::ProcessOnly => "Process",
            Self::Monitor => "Monitor",
            Self::Stats => "Stats",
            Self::RequeueFailed => "Requeue",
            Self::ResetCheckpoint => "Reset",
            Self::DryRun => "Dry run",
        }
    }
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Items processed per source at most
    pub limit: Option<u64>,
    /// Listing pages per category at most; forces a checkpoint-free crawl
    pub page_limit: Option<u32>,
}

/// Picks the sources named on the command line, or all of them
pub fn select_sources<'a>(
    config: &'a Config,
    names: &[String],
) -> std::result::Result<Vec<&'a SourceConfig>, ConfigError> {
    if names.is_empty() {
        return Ok(config.sources.iter().collect());
    }

    names
        .iter()
        .map(|name| {
            config
                .sources
                .iter()
                .find(|source| source.name == *name)
                .ok_or_else(|| ConfigError::UnknownSource(name.clone()))
        })
        .collect()
}

/// Opens the configured ledger backend and makes sure its schema exists
pub async fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        LedgerBackend::Sqlite => {
            tracing::info!("Opening SQLite ledger at {}", config.database_path);
            let ledger = SqliteLedger::new(Path::new(&config.database_path))?;
            Ok(Arc::new(ledger))
        }
        LedgerBackend::D1 => {
            let missing = |name: &str| ConfigError::MissingCredential(name.to_string());
            let account = config
                .d1_account_id
                .as_deref()
                .ok_or_else(|| missing("d1-account-id"))?;
            let database = config
                .d1_database_id
                .as_deref()
                .ok_or_else(|| missing("d1-database-id"))?;
            let token = config
                .d1_api_token
                .as_deref()
                .ok_or_else(|| missing("d1-api-token"))?;
            let base = config.d1_api_base.as_deref().unwrap_or(D1_API_BASE);

            tracing::info!("Using D1 ledger {}", database);
            let ledger = D1Ledger::with_api_base(base, account, database, token)?;
            ledger.initialize().await?;
            Ok(Arc::new(ledger))
        }
    }
}

/// Executes run modes against shared collaborators
pub struct Runner {
    config: Config,
    ledger: Arc<dyn LedgerStore>,
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn RelaySink>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        config: Config,
        ledger: Arc<dyn LedgerStore>,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn RelaySink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            ledger,
            fetcher,
            sink,
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds the run-time context of one source
    pub async fn context(&self, source: &SourceConfig) -> Result<Arc<SourceContext>> {
        let extractor = LinkExtractor::new(source.site, &source.base_url)?;
        let backoff = BackoffController::new(
            self.config.fetch_backoff.settings(),
            self.config.relay_backoff.settings(),
        );

        let ctx = SourceContext::seeded(
            &source.name,
            extractor,
            source.categories.clone(),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.ledger),
            Arc::clone(&self.sink),
            Arc::new(backoff),
        )
        .await;
        Ok(Arc::new(ctx))
    }

    /// Runs `options.mode` for one source
    ///
    /// Returns a summary for the crawl and process modes.
    pub async fn run_source(
        &self,
        source: &SourceConfig,
        options: &RunOptions,
    ) -> Result<Option<RunSummary>> {
        let name = source.name.as_str();
        match options.mode {
            RunMode::Stats => {
                let stats = load_statistics(self.ledger.as_ref(), name).await?;
                print_statistics(&stats);
                Ok(None)
            }
            RunMode::RequeueFailed => {
                let requeued = self.ledger.requeue_failed(name).await?;
                println!("{}: {} failed items returned to pending", name, requeued);
                Ok(None)
            }
            RunMode::ResetCheckpoint => {
                self.ledger.clear_checkpoint(name).await?;
                println!("{}: checkpoint cleared", name);
                Ok(None)
            }
            RunMode::DryRun => {
                print_source_plan(source);
                Ok(None)
            }
            RunMode::Full | RunMode::CrawlOnly | RunMode::ProcessOnly | RunMode::Monitor => {
                self.pipeline(source, options).await.map(Some)
            }
        }
    }

    async fn pipeline(&self, source: &SourceConfig, options: &RunOptions) -> Result<RunSummary> {
        let started = Instant::now();
        let mode = options.mode;
        let ctx = self.context(source).await?;

        self.notify(&format!(
            "<b>{} run started: {}</b>",
            mode.label(),
            ctx.name
        ))
        .await;

        if mode.relays() {
            match self.ledger.release_stale_claims(&ctx.name).await {
                Ok(0) => {}
                Ok(released) => tracing::info!(
                    source = %ctx.name,
                    released = released,
                    "Returned stale claims to pending"
                ),
                Err(e) => tracing::warn!(source = %ctx.name, error = %e, "Could not release stale claims"),
            }
        }

        let mut interrupted = false;

        if mode.crawls() {
            let page_limit = match mode {
                RunMode::Monitor => Some(
                    options
                        .page_limit
                        .unwrap_or(self.config.crawler.monitor_page_limit),
                ),
                _ => options.page_limit,
            };
            let crawler = Crawler::new(
                Arc::clone(&ctx),
                self.config.crawler.clone(),
                self.cancel.clone(),
            );
            let report = crawler.crawl(&ctx.categories, page_limit).await;
            interrupted |= !report.completed;
        }

        if mode.relays() && !self.cancel.is_cancelled() {
            let pool = IngestPool::new(
                Arc::clone(&ctx),
                self.config.worker.clone(),
                self.cancel.clone(),
            );
            pool.process_queue(options.limit).await;
        }
        interrupted |= self.cancel.is_cancelled();

        let pending = match self.ledger.pending_count(&ctx.name).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(source = %ctx.name, error = %e, "Could not count pending items");
                None
            }
        };

        let summary = RunSummary {
            source: ctx.name.clone(),
            mode: mode.label().to_string(),
            counters: ctx.stats.snapshot(),
            duration: started.elapsed(),
            pending,
            interrupted,
        };

        print_summary(&summary);
        self.notify(&summary.to_html()).await;
        Ok(summary)
    }

    async fn notify(&self, text: &str) {
        if !self.config.relay.notifications {
            return;
        }
        if let Err(e) = self.sink.notify(text).await {
            tracing::warn!(error = %e, "Notification failed");
        }
    }
}

/// Prints the resolved configuration and the plan of each selected source
/// (dry-run mode); touches neither the ledger nor the network
pub fn print_dry_run(config: &Config, sources: &[SourceConfig]) {
    println!("=== subrelay Dry Run ===\n");

    println!("Crawler:");
    println!(
        "  Page delay: {:.1}-{:.1}s",
        config.crawler.page_delay_min_secs, config.crawler.page_delay_max_secs
    );
    println!("  Stale page limit: {}", config.crawler.stale_page_limit);
    println!("  Monitor page limit: {}", config.crawler.monitor_page_limit);

    println!("\nWorkers:");
    println!("  Workers: {}", config.worker.workers);
    println!("  Batch size: {}", config.worker.batch_size);

    println!("\nLedger:");
    match config.ledger.backend {
        LedgerBackend::Sqlite => println!("  SQLite: {}", config.ledger.database_path),
        LedgerBackend::D1 => println!(
            "  D1 database: {}",
            config.ledger.d1_database_id.as_deref().unwrap_or("-")
        ),
    }

    println!("\nRelay:");
    println!(
        "  Credentials: {}",
        if config.relay.bot_token.is_some() && config.relay.chat_id.is_some() {
            "present"
        } else {
            "missing"
        }
    );
    println!("  Notifications: {}", config.relay.notifications);

    println!("\nSources:");
    for source in sources {
        print_source_plan(source);
    }
    println!();
}

fn print_source_plan(source: &SourceConfig) {
    println!("Source '{}' ({}): {}", source.name, source.site, source.base_url);
    for category in &source.categories {
        println!("  - {}", category);
    }
}
