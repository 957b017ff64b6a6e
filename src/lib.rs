//! subrelay: a subtitle discovery and relay pipeline
//!
//! This crate crawls subtitle sites for detail pages, queues them in a
//! persistent ledger, downloads each artifact once per content identity and
//! relays it to a durable sink, resuming where an interrupted run stopped.

pub mod backoff;
pub mod config;
pub mod crawler;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod output;
pub mod relay;
pub mod runner;
pub mod source;
pub mod state;

use thiserror::Error;

/// Main error type for subrelay operations
#[derive(Debug, Error)]
pub enum SubrelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

/// Result type alias for subrelay operations
pub type Result<T> = std::result::Result<T, SubrelayError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use ledger::{LedgerError, LedgerStore};
pub use runner::{RunMode, RunOptions, Runner};
pub use state::ItemStatus;
