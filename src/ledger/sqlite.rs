//! SQLite ledger implementation
//!
//! A single connection guarded by a mutex. Every call is short, so the
//! blocking work is done inline on the calling task.

use crate::ledger::schema::initialize_schema;
use crate::ledger::traits::{LedgerError, LedgerResult, LedgerStore};
use crate::ledger::{
    predecessor_list, ContentIdentity, CrawlCheckpoint, DiscoveredItem, ProcessedRecord,
};
use crate::state::ItemStatus;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite ledger backend
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Opens (or creates) a ledger database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteLedger)` - Successfully opened/created database
    /// * `Err(LedgerError)` - Failed to open database or create the schema
    pub fn new(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory ledger (for testing)
    pub fn new_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("ledger connection lock poisoned".to_string()))
    }

    fn count(&self, sql: &str, source: &str) -> LedgerResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(sql, params![source], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn string_set(&self, sql: &str, source: &str) -> LedgerResult<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let values = stmt
            .query_map(params![source], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(values)
    }
}

const ITEM_COLUMNS: &str = "url, source, category, page, status, discovered_at";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<DiscoveredItem> {
    Ok(DiscoveredItem {
        url: row.get(0)?,
        source: row.get(1)?,
        category: row.get(2)?,
        page: row.get(3)?,
        status: ItemStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(ItemStatus::Pending),
        discovered_at: row.get(5)?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    // ===== Discovered Items =====

    async fn upsert_discovered(&self, item: &DiscoveredItem) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO discovered_urls (url, source, category, page, status, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.url,
                item.source,
                item.category,
                item.page,
                ItemStatus::Pending.to_db_string(),
                item.discovered_at
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn claim_pending(&self, source: &str, limit: usize) -> LedgerResult<Vec<DiscoveredItem>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut items = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM discovered_urls WHERE source = ?1 AND status = 'pending' ORDER BY id LIMIT ?2",
                ITEM_COLUMNS
            ))?;
            let rows = stmt.query_map(params![source, limit as i64], row_to_item)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for item in &mut items {
            tx.execute(
                "UPDATE discovered_urls SET status = 'processing' WHERE url = ?1 AND status = 'pending'",
                params![item.url],
            )?;
            item.status = ItemStatus::Processing;
        }

        tx.commit()?;
        Ok(items)
    }

    async fn set_status(&self, url: &str, status: ItemStatus) -> LedgerResult<bool> {
        let Some(allowed) = predecessor_list(status) else {
            return Ok(false);
        };

        let conn = self.lock()?;
        let updated = conn.execute(
            &format!(
                "UPDATE discovered_urls SET status = ?1 WHERE url = ?2 AND status IN ({})",
                allowed
            ),
            params![status.to_db_string(), url],
        )?;
        Ok(updated > 0)
    }

    async fn get_item(&self, url: &str) -> LedgerResult<Option<DiscoveredItem>> {
        let conn = self.lock()?;
        let item = conn
            .query_row(
                &format!("SELECT {} FROM discovered_urls WHERE url = ?1", ITEM_COLUMNS),
                params![url],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    // ===== Outcomes & Identities =====

    async fn record_processed(&self, record: &ProcessedRecord) -> LedgerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO processed_urls (url, source, success, title, error, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source, url) DO UPDATE SET
                success = excluded.success,
                title = excluded.title,
                error = excluded.error,
                processed_at = excluded.processed_at",
            params![
                record.url,
                record.source,
                record.success,
                record.title,
                record.error,
                record.processed_at
            ],
        )?;
        Ok(())
    }

    async fn identity_exists(&self, source: &str, normalized_name: &str) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM content_identities WHERE source = ?1 AND normalized_name = ?2",
                params![source, normalized_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn record_identity(&self, identity: &ContentIdentity) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO content_identities
                (normalized_name, source, artifact_reference, size, title, filename, source_url, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                identity.normalized_name,
                identity.source,
                identity.artifact_reference,
                identity.size as i64,
                identity.title,
                identity.filename,
                identity.source_url,
                identity.uploaded_at
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn successful_urls(&self, source: &str) -> LedgerResult<HashSet<String>> {
        self.string_set(
            "SELECT url FROM processed_urls WHERE source = ?1 AND success = 1",
            source,
        )
    }

    async fn known_identities(&self, source: &str) -> LedgerResult<HashSet<String>> {
        self.string_set(
            "SELECT normalized_name FROM content_identities WHERE source = ?1",
            source,
        )
    }

    // ===== Checkpoints =====

    async fn save_checkpoint(&self, source: &str, category: &str, page: u32) -> LedgerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO crawl_checkpoints (source, category, page, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source) DO UPDATE SET
                category = excluded.category,
                page = excluded.page,
                last_updated = excluded.last_updated",
            params![source, category, page, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn load_checkpoint(&self, source: &str) -> LedgerResult<Option<CrawlCheckpoint>> {
        let conn = self.lock()?;
        let checkpoint = conn
            .query_row(
                "SELECT source, category, page, last_updated FROM crawl_checkpoints WHERE source = ?1",
                params![source],
                |row| {
                    Ok(CrawlCheckpoint {
                        source: row.get(0)?,
                        category: row.get(1)?,
                        page: row.get(2)?,
                        last_updated: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(checkpoint)
    }

    async fn clear_checkpoint(&self, source: &str) -> LedgerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM crawl_checkpoints WHERE source = ?1",
            params![source],
        )?;
        Ok(())
    }

    // ===== Counts =====

    async fn pending_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM discovered_urls WHERE source = ?1 AND status = 'pending'",
            source,
        )
    }

    async fn discovered_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM discovered_urls WHERE source = ?1",
            source,
        )
    }

    async fn processed_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM processed_urls WHERE source = ?1",
            source,
        )
    }

    async fn identity_count(&self, source: &str) -> LedgerResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM content_identities WHERE source = ?1",
            source,
        )
    }

    async fn status_counts(&self, source: &str) -> LedgerResult<HashMap<ItemStatus, u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM discovered_urls WHERE source = ?1 GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![source], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = ItemStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    // ===== Recovery & Operator Actions =====

    async fn release_stale_claims(&self, source: &str) -> LedgerResult<u64> {
        let conn = self.lock()?;
        let released = conn.execute(
            "UPDATE discovered_urls SET status = 'pending' WHERE source = ?1 AND status = 'processing'",
            params![source],
        )?;
        Ok(released as u64)
    }

    async fn requeue_failed(&self, source: &str) -> LedgerResult<u64> {
        let conn = self.lock()?;
        let requeued = conn.execute(
            "UPDATE discovered_urls SET status = 'pending' WHERE source = ?1 AND status = 'failed'",
            params![source],
        )?;
        Ok(requeued as u64)
    }
}
