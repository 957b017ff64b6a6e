//! Configuration module for subrelay
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use subrelay::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("subrelay.toml")).unwrap();
//! println!("Sources: {}", config.sources.len());
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, FetchBackoffConfig, HttpConfig, LedgerBackend, LedgerConfig,
    RelayBackoffConfig, RelayConfig, SourceConfig, WorkerConfig,
};

pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
    ENV_BOT_TOKEN, ENV_CHAT_ID, ENV_D1_ACCOUNT_ID, ENV_D1_API_TOKEN, ENV_D1_DATABASE_ID,
};
pub use validation::{relay_credentials, validate, MAX_WORKERS};
