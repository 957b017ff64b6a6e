//! Cloudflare D1 ledger implementation
//!
//! Every operation is one HTTP call to the D1 query endpoint. D1 has no
//! client-side transactions, so claims are a select followed by guarded
//! per-row updates; only rows whose update actually changed are returned.

use crate::ledger::schema::schema_statements;
use crate::ledger::traits::{LedgerError, LedgerResult, LedgerStore};
use crate::ledger::{
    predecessor_list, ContentIdentity, CrawlCheckpoint, DiscoveredItem, ProcessedRecord,
};
use crate::state::ItemStatus;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Default Cloudflare API base
pub const D1_API_BASE: &str = "https://api.cloudflare.com/client/v4";

type D1Row = Map<String, Value>;

#[derive(Debug, Deserialize)]
struct D1Envelope {
    success: bool,
    #[serde(default)]
    errors: Vec<D1Message>,
    #[serde(default)]
    result: Vec<D1Result>,
}

#[derive(Debug, Deserialize)]
struct D1Message {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct D1Result {
    #[serde(default)]
    results: Vec<D1Row>,
    #[serde(default)]
    meta: D1Meta,
}

#[derive(Debug, Default, Deserialize)]
struct D1Meta {
    #[serde(default)]
    changes: u64,
}

/// Ledger backed by a remote D1 database
pub struct D1Ledger {
    client: Client,
    endpoint: String,
    api_token: String,
}

impl D1Ledger {
    /// Creates a client for the given account and database
    pub fn new(account_id: &str, database_id: &str, api_token: &str) -> LedgerResult<Self> {
        Self::with_api_base(D1_API_BASE, account_id, database_id, api_token)
    }

    /// Creates a client against a custom API base (used by tests)
    pub fn with_api_base(
        api_base: &str,
        account_id: &str,
        database_id: &str,
        api_token: &str,
    ) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/accounts/{}/d1/database/{}/query",
                api_base.trim_end_matches('/'),
                account_id,
                database_id
            ),
            api_token: api_token.to_string(),
        })
    }

    /// Creates the ledger tables if they do not exist
    pub async fn initialize(&self) -> LedgerResult<()> {
        for statement in schema_statements() {
            self.query(&statement, Vec::new()).await?;
        }
        tracing::debug!("D1 schema initialized");
        Ok(())
    }

    async fn query(&self, sql: &str, params: Vec<Value>) -> LedgerResult<D1Result> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&json!({ "sql": sql, "params": params }))
            .send()
            .await?;

        let status = response.status();
        let envelope: D1Envelope = response.json().await.map_err(|e| {
            LedgerError::Decode(format!("D1 response (HTTP {}): {}", status, e))
        })?;

        if !envelope.success {
            let message = envelope
                .errors
                .iter()
                .map(|e| format!("[{}] {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(LedgerError::Remote(message));
        }

        Ok(envelope.result.into_iter().next().unwrap_or_default())
    }

    async fn rows(&self, sql: &str, params: Vec<Value>) -> LedgerResult<Vec<D1Row>> {
        Ok(self.query(sql, params).await?.results)
    }

    async fn changes(&self, sql: &str, params: Vec<Value>) -> LedgerResult<u64> {
        Ok(self.query(sql, params).await?.meta.changes)
    }

    async fn count(&self, sql: &str, source: &str) -> LedgerResult<u64> {
        let rows = self.rows(sql, vec![json!(source)]).await?;
        match rows.first() {
            Some(row) => Ok(integer(row, "n")? as u64),
            None => Ok(0),
        }
    }

    async fn string_set(&self, sql: &str, source: &str, column: &str) -> LedgerResult<HashSet<String>> {
        let rows = self.rows(sql, vec![json!(source)]).await?;
        rows.iter().map(|row| text(row, column)).collect()
    }
}

fn text(row: &D1Row, column: &str) -> LedgerResult<String> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Ok(String::new()),
        Some(other) => Ok(other.to_string()),
    }
}

fn integer(row: &D1Row, column: &str) -> LedgerResult<i64> {
    match row.get(column) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| LedgerError::Decode(format!("{} is not an integer", column))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| LedgerError::Decode(format!("{} is not an integer: {}", column, s))),
        _ => Err(LedgerError::Decode(format!("missing column {}", column))),
    }
}

fn row_to_item(row: &D1Row) -> LedgerResult<DiscoveredItem> {
    Ok(DiscoveredItem {
        url: text(row, "url")?,
        source: text(row, "source")?,
        category: text(row, "category")?,
        page: integer(row, "page")? as u32,
        status: ItemStatus::from_db_string(&text(row, "status")?).unwrap_or(ItemStatus::Pending),
        discovered_at: text(row, "discovered_at")?,
    })
}

const ITEM_COLUMNS: &str = "url, source, category, page, status, discovered_at";

#[async_trait]
impl LedgerStore for D1Ledger {
    // ===== Discovered Items =====

    async fn upsert_discovered(&self, item: &DiscoveredItem) -> LedgerResult<bool> {
        let changes = self
            .changes(
                "INSERT OR IGNORE INTO discovered_urls (url, source, category, page, status, discovered_at)
                 VALUES (?, ?, ?, ?, 'pending', ?)",
                vec![
                    json!(item.url),
                    json!(item.source),
                    json!(item.category),
                    json!(item.page),
                    json!(item.discovered_at),
                ],
            )
            .await?;
        Ok(changes > 0)
    }

    async fn claim_pending(&self, source: &str, limit: usize) -> LedgerResult<Vec<DiscoveredItem>> {
        let rows = self
            .rows(
                &format!(
                    "SELECT {} FROM discovered_urls WHERE source = ? AND status = 'pending' ORDER BY id LIMIT ?",
                    ITEM_COLUMNS
                ),
                vec![json!(source), json!(limit)],
            )
            .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut item = row_to_item(row)?;
            let changes = self
                .changes(
                    "UPDATE discovered_urls SET status = 'processing' WHERE url = ? AND status = 'pending'",
                    vec![json!(item.url)],
                )
                .await?;
            if changes > 0 {
                item.status = ItemStatus::Processing;
                claimed.push(item);
            }
        }
        Ok(claimed)
    }

    async fn set_status(&self, url: &str, status: ItemStatus) -> LedgerResult<bool> {
        let Some(allowed) = predecessor_list(status) else {
            return Ok(false);
        };

        let changes = self
            .changes(
                &format!(
                    "UPDATE discovered_urls SET status = ? WHERE url = ? AND status IN ({})",
                    allowed
                ),
                vec![json!(status.to_db_string()), json!(url)],
            )
            .await?;
        Ok(changes > 0)
    }

    async fn get_item(&self, url: &str) -> LedgerResult<Option<DiscoveredItem>> {
        let rows = self
            .rows(
                &format!("SELECT {} FROM discovered_urls WHERE url = ?", ITEM_COLUMNS),
                vec![json!(url)],
            )
            .await?;
        rows.first().map(row_to_item).transpose()
    }

    // ===== Outcomes & Identities =====

    async fn record_processed(&self, record: &ProcessedRecord) -> LedgerResult<()> {
        self.query(
            "INSERT INTO processed_urls (url, source, success, title, error, processed_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source, url) DO UPDATE SET
                success = excluded.success,
                title = excluded.title,
                error = excluded.error,
                processed_at = excluded.processed_at",
            vec![
                json!(record.url),
                json!(record.source),
                json!(if record.success { 1 } else { 0 }),
                json!(record.title),
                json!(record.error),
                json!(record.processed_at),
            ],
        )
        .await?;
        Ok(())
    }

    async fn identity_exists(&self, source: &str, normalized_name: &str) -> LedgerResult<bool> {
        let rows = self
            .rows(
                "SELECT 1 AS found FROM content_identities WHERE source = ? AND normalized_name = ? LIMIT 1",
                vec![json!(source), json!(normalized_name)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn record_identity(&self, identity: &ContentIdentity) -> LedgerResult<bool> {
        let changes = self
            .changes(
                "INSERT OR IGNORE INTO content_identities
                    (normalized_name, source, artifact_reference, size, title, filename, source_url, uploaded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    json!(identity.normalized_name),
                    json!(identity.source),
                    json!(identity.artifact_reference),
                    json!(identity.size),
                    json!(identity.title),
                    json!(identity.filename),
                    json!(identity.source_url),
                    json!(identity.uploaded_at),
                ],
            )
            .await?;
        Ok(changes > 0)
    }

    async fn successful_urls(&self, source: &str) -> LedgerResult<HashSet<String>> {
        self.string_set(
            "SELECT url FROM processed_urls WHERE source = ? AND success = 1",
            source,
            "url",
        )
        .await
    }

    async fn known_identities(&self, source: &str) -> LedgerResult<HashSet<String>> {
        self.string_set(
            "SELECT normalized_name FROM content_identities WHERE source = ?",
            source,
            "normalized_name",
        )
        .await
    }

    // ===== Checkpoints =====

    async fn save_checkpoint(&self, source: &str, category: &str, page: u32) -> LedgerResult<()> {
        self.query(
            "INSERT INTO crawl_checkpoints (source, category, page, last_updated)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(source) DO UPDATE SET
                category = excluded.category,
                page = excluded.page,
                last_updated = excluded.last_updated",
            vec![
                json!(source),
                json!(category),
                json!(page),
                json!(Utc::now().to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, source: &str) -> LedgerResult<Option<CrawlCheckpoint>> {
        let rows = self
            .rows(
                "SELECT source, category, page, last_updated FROM crawl_checkpoints WHERE source = ?",
                vec![json!(source)],
            )
            .await?;

        rows.first()
            .map(|row| {
                Ok(CrawlCheckpoint {
                    source: text(row, "source")?,
                    category: text(row, "category")?,
                    page: integer(row, "page")? as u32,
                    last_updated: text(row, "last_updated")?,
                })
            })
            .transpose()
    }

    async fn clear_checkpoint(&self, source: &str) -> LedgerResult<()> {
        self.query(
            "DELETE FROM crawl_checkpoints WHERE source = ?",
            vec![json!(source)],
        )
        .await?;
        Ok(())
    }

    // ===== Counts =====

    async fn pending_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) AS n FROM discovered_urls WHERE source = ? AND status = 'pending'",
            source,
        )
        .await
    }

    async fn discovered_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) AS n FROM discovered_urls WHERE source = ?",
            source,
        )
        .await
    }

    async fn processed_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) AS n FROM processed_urls WHERE source = ?",
            source,
        )
        .await
    }

    async fn identity_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) AS n FROM content_identities WHERE source = ?",
            source,
        )
        .await
    }

    async fn status_counts(&self, source: &str) -> LedgerResult<HashMap<ItemStatus, u64>> {
        let rows = self
            .rows(
                "SELECT status, COUNT(*) AS n FROM discovered_urls WHERE source = ? GROUP BY status",
                vec![json!(source)],
            )
            .await?;

        let mut counts = HashMap::new();
        for row in &rows {
            if let Some(status) = ItemStatus::from_db_string(&text(row, "status")?) {
                counts.insert(status, integer(row, "n")? as u64);
            }
        }
        Ok(counts)
    }

    // ===== Recovery & Operator Actions =====

    async fn release_stale_claims(&self, source: &str) -> LedgerResult<u64> {
        self.changes(
            "UPDATE discovered_urls SET status = 'pending' WHERE source = ? AND status = 'processing'",
            vec![json!(source)],
        )
        .await
    }

    async fn requeue_failed(&self, source: &str) -> LedgerResult<u64> {
        self.changes(
            "UPDATE discovered_urls SET status = 'pending' WHERE source = ? AND status = 'failed'",
            vec![json!(source)],
        )
        .await
    }
}
