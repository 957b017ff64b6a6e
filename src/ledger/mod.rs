//! Persistence ledger
//!
//! The ledger owns all durable state of the pipeline:
//! - discovered items and their work-queue status
//! - processed records (last outcome per url)
//! - content identities (dedup ledger, one row per normalized name and source)
//! - crawl checkpoints (one cursor per source)
//!
//! Two backends implement [`LedgerStore`]: a local SQLite file and a
//! Cloudflare D1 database reached over HTTP. Both use the same schema.

mod d1;
mod schema;
mod sqlite;
mod traits;

pub use d1::{D1Ledger, D1_API_BASE};
pub use schema::{initialize_schema, schema_statements, SCHEMA_SQL};
pub use sqlite::SqliteLedger;
pub use traits::{LedgerError, LedgerResult, LedgerStore};

use crate::state::ItemStatus;
use chrono::Utc;

/// Maximum stored title length for processed records
pub const MAX_RECORD_TITLE: usize = 200;

/// Maximum stored source url length for content identities
pub const MAX_SOURCE_URL: usize = 500;

/// A page found by the crawler that may hold a downloadable artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    pub url: String,
    pub source: String,
    pub category: String,
    pub page: u32,
    pub status: ItemStatus,
    pub discovered_at: String,
}

impl DiscoveredItem {
    /// Creates a pending item discovered now
    pub fn new(
        url: impl Into<String>,
        source: impl Into<String>,
        category: impl Into<String>,
        page: u32,
    ) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            category: category.into(),
            page,
            status: ItemStatus::Pending,
            discovered_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Last processing outcome for a url
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub url: String,
    pub source: String,
    pub success: bool,
    pub title: String,
    /// Failure reason, if any
    pub error: Option<String>,
    pub processed_at: String,
}

impl ProcessedRecord {
    pub fn success(url: &str, source: &str, title: &str) -> Self {
        Self::new(url, source, true, title, None)
    }

    pub fn failure(url: &str, source: &str, title: &str, error: impl Into<String>) -> Self {
        Self::new(url, source, false, title, Some(error.into()))
    }

    fn new(url: &str, source: &str, success: bool, title: &str, error: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            source: source.to_string(),
            success,
            title: truncate_chars(title, MAX_RECORD_TITLE),
            error,
            processed_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A relayed artifact, keyed by its normalized name within a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentity {
    pub normalized_name: String,
    /// Sink-assigned reference (file id)
    pub artifact_reference: String,
    pub size: u64,
    pub title: String,
    pub filename: String,
    pub source_url: String,
    pub source: String,
    pub uploaded_at: String,
}

/// Resumable crawl cursor for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCheckpoint {
    pub source: String,
    pub category: String,
    pub page: u32,
    pub last_updated: String,
}

/// `'a', 'b'` list of the statuses `status` may be entered from
///
/// None when the status can never be entered through a transition.
pub(crate) fn predecessor_list(status: ItemStatus) -> Option<String> {
    let predecessors = status.predecessors();
    if predecessors.is_empty() {
        return None;
    }
    Some(
        predecessors
            .iter()
            .map(|s| format!("'{}'", s.to_db_string()))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Truncates to at most `max` characters without splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
