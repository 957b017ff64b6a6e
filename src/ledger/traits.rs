//! Ledger store trait and error types

use crate::ledger::{ContentIdentity, CrawlCheckpoint, DiscoveredItem, ProcessedRecord};
use crate::state::ItemStatus;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store rejected query: {0}")]
    Remote(String),

    #[error("Unexpected row shape: {0}")]
    Decode(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Durable store behind the crawler and the ingestion pool
///
/// Every call may fail independently. Callers treat failures as
/// best-effort: they log and carry on with their in-memory view.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ===== Discovered Items =====

    /// Inserts a pending item unless its url is already known
    ///
    /// Returns true if a new row was created.
    async fn upsert_discovered(&self, item: &DiscoveredItem) -> LedgerResult<bool>;

    /// Claims up to `limit` pending items of `source`, marking them processing
    async fn claim_pending(&self, source: &str, limit: usize) -> LedgerResult<Vec<DiscoveredItem>>;

    /// Moves an item to `status` if that is a forward transition
    ///
    /// Returns false when the item is missing or the transition is refused.
    async fn set_status(&self, url: &str, status: ItemStatus) -> LedgerResult<bool>;

    /// Gets a discovered item by url
    async fn get_item(&self, url: &str) -> LedgerResult<Option<DiscoveredItem>>;

    // ===== Outcomes & Identities =====

    /// Records the outcome of processing a url, replacing any earlier one
    async fn record_processed(&self, record: &ProcessedRecord) -> LedgerResult<()>;

    async fn identity_exists(&self, source: &str, normalized_name: &str) -> LedgerResult<bool>;

    /// Records a relayed artifact; returns false if the identity already existed
    async fn record_identity(&self, identity: &ContentIdentity) -> LedgerResult<bool>;

    /// Urls of `source` that were processed successfully
    async fn successful_urls(&self, source: &str) -> LedgerResult<HashSet<String>>;

    /// Normalized names already relayed for `source`
    async fn known_identities(&self, source: &str) -> LedgerResult<HashSet<String>>;

    // ===== Checkpoints =====

    async fn save_checkpoint(&self, source: &str, category: &str, page: u32) -> LedgerResult<()>;

    async fn load_checkpoint(&self, source: &str) -> LedgerResult<Option<CrawlCheckpoint>>;

    async fn clear_checkpoint(&self, source: &str) -> LedgerResult<()>;

    // ===== Counts =====

    async fn pending_count(&self, source: &str) -> LedgerResult<u64>;

    async fn discovered_count(&self, source: &str) -> LedgerResult<u64>;

    async fn processed_count(&self, source: &str) -> LedgerResult<u64>;

    /// Number of relayed content identities for `source`
    async fn identity_count(&self, source: &str) -> LedgerResult<u64>;

    /// Discovered item counts per status (statuses with zero rows omitted)
    async fn status_counts(&self, source: &str) -> LedgerResult<HashMap<ItemStatus, u64>>;

    // ===== Recovery & Operator Actions =====

    /// Returns items left in processing by a crashed run to pending
    async fn release_stale_claims(&self, source: &str) -> LedgerResult<u64>;

    /// Returns failed items to pending so the next run retries them
    async fn requeue_failed(&self, source: &str) -> LedgerResult<u64>;
}
