//! Ledger schema definitions
//!
//! Plain SQLite DDL. The same statements are sent to D1, which speaks the
//! SQLite dialect.

use rusqlite::Connection;

/// SQL schema for the ledger
pub const SCHEMA_SQL: &str = r#"
-- Work queue: one row per discovered detail page
CREATE TABLE IF NOT EXISTS discovered_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    category TEXT NOT NULL,
    page INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    discovered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_discovered_status_source ON discovered_urls(status, source);

-- Last processing outcome per url
CREATE TABLE IF NOT EXISTS processed_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    source TEXT NOT NULL,
    success INTEGER NOT NULL,
    title TEXT NOT NULL,
    error TEXT,
    processed_at TEXT NOT NULL,
    UNIQUE(source, url)
);

CREATE INDEX IF NOT EXISTS idx_processed_source ON processed_urls(source);

-- Dedup ledger: relayed artifacts by normalized name
CREATE TABLE IF NOT EXISTS content_identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    normalized_name TEXT NOT NULL,
    source TEXT NOT NULL,
    artifact_reference TEXT NOT NULL,
    size INTEGER NOT NULL,
    title TEXT NOT NULL,
    filename TEXT NOT NULL,
    source_url TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    UNIQUE(source, normalized_name)
);

CREATE INDEX IF NOT EXISTS idx_identities_name ON content_identities(normalized_name);

-- Crawl cursor per source
CREATE TABLE IF NOT EXISTS crawl_checkpoints (
    source TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    page INTEGER NOT NULL,
    last_updated TEXT NOT NULL
)
"#;

/// Initializes the schema on a SQLite connection
///
/// Safe to call on an existing database.
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Splits the schema into individual statements, comments removed
pub fn schema_statements() -> Vec<String> {
    SCHEMA_SQL
        .split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}
