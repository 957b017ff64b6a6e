//! Run counters and ledger statistics
//!
//! [`RunStats`] is shared by the crawler and the workers of one source and
//! counts what happened during this run. [`SourceStatistics`] is read from
//! the ledger and describes everything the source has accumulated.

use crate::ledger::LedgerStore;
use crate::state::ItemStatus;
use crate::SubrelayError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters for one run of one source
#[derive(Debug, Default)]
pub struct RunStats {
    discovered: AtomicU64,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
    relayed: AtomicU64,
    skipped: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_discovered(&self, count: u64) {
        self.discovered.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts a relayed item
    pub fn record_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        self.record_success();
    }

    /// Counts an item completed because its content was already relayed
    pub fn record_duplicate(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
        self.record_success();
    }

    /// Counts an item that was already processed before this run
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.record_success();
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> RunCounters {
        RunCounters {
            discovered: self.discovered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub discovered: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub deduplicated: u64,
    pub relayed: u64,
    pub skipped: u64,
}

/// End-of-run report for one source
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub source: String,
    pub mode: String,
    pub counters: RunCounters,
    pub duration: Duration,
    /// Items still pending when the run ended, if the ledger answered
    pub pending: Option<u64>,
    pub interrupted: bool,
}

impl RunSummary {
    /// Telegram-flavored HTML rendering used for notifications
    pub fn to_html(&self) -> String {
        let c = &self.counters;
        let mut text = format!(
            "<b>{} run finished: {}</b>\n\
             Discovered: {}\n\
             Processed: {}\n\
             Succeeded: {} (relayed {}, duplicates {}, skipped {})\n\
             Failed: {}\n\
             Duration: {}",
            self.mode,
            self.source,
            c.discovered,
            c.processed,
            c.succeeded,
            c.relayed,
            c.deduplicated,
            c.skipped,
            c.failed,
            format_duration(self.duration)
        );
        if let Some(pending) = self.pending {
            text.push_str(&format!("\nPending: {}", pending));
        }
        if self.interrupted {
            text.push_str("\n<i>Interrupted</i>");
        }
        text
    }
}

/// Prints a run summary to stdout
pub fn print_summary(summary: &RunSummary) {
    let c = &summary.counters;
    println!("=== {} run: {} ===", summary.mode, summary.source);
    println!("  Discovered:   {}", c.discovered);
    println!("  Processed:    {}", c.processed);
    println!("  Succeeded:    {}", c.succeeded);
    println!("    relayed:    {}", c.relayed);
    println!("    duplicates: {}", c.deduplicated);
    println!("    skipped:    {}", c.skipped);
    println!("  Failed:       {}", c.failed);
    if let Some(pending) = summary.pending {
        println!("  Pending:      {}", pending);
    }
    println!("  Duration:     {}", format_duration(summary.duration));
    if summary.interrupted {
        println!("  (interrupted)");
    }
    println!();
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Ledger-wide statistics for one source
#[derive(Debug, Clone)]
pub struct SourceStatistics {
    pub source: String,
    pub discovered: u64,
    pub items_by_status: HashMap<ItemStatus, u64>,
    pub processed: u64,
    pub identities: u64,
    /// Checkpoint as `(category, page)`, if a crawl is in progress
    pub checkpoint: Option<(String, u32)>,
}

/// Loads statistics for `source` from the ledger
///
/// # Arguments
///
/// * `ledger` - The ledger to query
/// * `source` - Source name
///
/// # Returns
///
/// * `Ok(SourceStatistics)` - Successfully loaded statistics
/// * `Err(SubrelayError)` - A ledger query failed
pub async fn load_statistics(
    ledger: &dyn LedgerStore,
    source: &str,
) -> Result<SourceStatistics, SubrelayError> {
    let discovered = ledger.discovered_count(source).await?;
    let items_by_status = ledger.status_counts(source).await?;
    let processed = ledger.processed_count(source).await?;
    let identities = ledger.identity_count(source).await?;
    let checkpoint = ledger
        .load_checkpoint(source)
        .await?
        .map(|cp| (cp.category, cp.page));

    Ok(SourceStatistics {
        source: source.to_string(),
        discovered,
        items_by_status,
        processed,
        identities,
        checkpoint,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &SourceStatistics) {
    println!("=== Ledger Statistics: {} ===\n", stats.source);

    println!("Overview:");
    println!("  Discovered items: {}", stats.discovered);
    println!("  Processed records: {}", stats.processed);
    println!("  Relayed identities: {}", stats.identities);
    match &stats.checkpoint {
        Some((category, page)) => println!("  Checkpoint: {} page {}", category, page),
        None => println!("  Checkpoint: none"),
    }
    println!();

    println!("Items by Status:");
    for status in ItemStatus::all_statuses() {
        let count = stats.items_by_status.get(&status).copied().unwrap_or(0);
        let percentage = if stats.discovered > 0 {
            (count as f64 / stats.discovered as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();
}
