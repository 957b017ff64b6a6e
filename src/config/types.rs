use crate::backoff::{FetchBackoffSettings, RelayBackoffSettings};
use crate::crawler::SiteKind;
use crate::relay::TELEGRAM_API_BASE;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for subrelay
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "fetch-backoff", default)]
    pub fetch_backoff: FetchBackoffConfig,
    #[serde(rename = "relay-backoff", default)]
    pub relay_backoff: RelayBackoffConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

/// Listing crawl behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Random pause between listing pages, lower bound
    pub page_delay_min_secs: f64,
    pub page_delay_max_secs: f64,

    /// Consecutive pages without new items before a full crawl leaves a category
    pub stale_page_limit: u32,

    /// Pages per category scanned by a monitor crawl
    pub monitor_page_limit: u32,

    /// Consecutive failed listing pages before a category is abandoned
    pub max_consecutive_failures: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_delay_min_secs: 2.0,
            page_delay_max_secs: 4.0,
            stale_page_limit: 50,
            monitor_page_limit: 3,
            max_consecutive_failures: 5,
        }
    }
}

/// Ingestion pool behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkerConfig {
    /// Items claimed per batch
    pub batch_size: usize,

    /// Concurrent workers inside a batch
    pub workers: usize,

    /// Random pause between batches
    pub batch_cooldown_min_secs: f64,
    pub batch_cooldown_max_secs: f64,

    /// Log progress every N processed items
    pub progress_interval: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            workers: 3,
            batch_cooldown_min_secs: 5.0,
            batch_cooldown_max_secs: 10.0,
            progress_interval: 10,
        }
    }
}

/// HTTP client settings for the source sites
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HttpConfig {
    /// Whole-request timeout
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,

    /// Rotated per request; built-in browser agents when empty
    pub user_agents: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agents: Vec::new(),
        }
    }
}

/// Fetch (anti-bot) backoff tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchBackoffConfig {
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    /// Consecutive denials before the long cooldown
    pub cooldown_after: u32,
    pub cooldown_secs: f64,
    pub transient_min_secs: f64,
    pub transient_max_secs: f64,
    pub max_attempts: u32,
}

impl Default for FetchBackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5.0,
            max_delay_secs: 120.0,
            cooldown_after: 5,
            cooldown_secs: 300.0,
            transient_min_secs: 2.0,
            transient_max_secs: 5.0,
            max_attempts: 6,
        }
    }
}

impl FetchBackoffConfig {
    pub fn settings(&self) -> FetchBackoffSettings {
        FetchBackoffSettings {
            base_delay: secs(self.base_delay_secs),
            max_delay: secs(self.max_delay_secs),
            cooldown_after: self.cooldown_after,
            cooldown: secs(self.cooldown_secs),
            transient_min: secs(self.transient_min_secs),
            transient_max: secs(self.transient_max_secs),
            max_attempts: self.max_attempts,
        }
    }
}

/// Relay (rate-limit) backoff tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RelayBackoffConfig {
    pub min_interval_secs: f64,
    pub cooldown_base_secs: f64,
    pub max_exponent: u32,
    pub hint_padding_secs: f64,
    pub default_hint_secs: f64,
    pub retry_delay_secs: f64,
    pub max_attempts: u32,
    /// Total time one upload may spend throttled
    pub budget_secs: f64,
}

impl Default for RelayBackoffConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 1.0,
            cooldown_base_secs: 2.0,
            max_exponent: 5,
            hint_padding_secs: 2.0,
            default_hint_secs: 30.0,
            retry_delay_secs: 3.0,
            max_attempts: 5,
            budget_secs: 3600.0,
        }
    }
}

impl RelayBackoffConfig {
    pub fn settings(&self) -> RelayBackoffSettings {
        RelayBackoffSettings {
            min_interval: secs(self.min_interval_secs),
            cooldown_base: secs(self.cooldown_base_secs),
            max_exponent: self.max_exponent,
            hint_padding: secs(self.hint_padding_secs),
            default_hint: secs(self.default_hint_secs),
            retry_delay: secs(self.retry_delay_secs),
            max_attempts: self.max_attempts,
            budget: secs(self.budget_secs),
        }
    }
}

/// Which ledger backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Sqlite,
    D1,
}

/// Ledger location and credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,

    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    pub d1_account_id: Option<String>,
    pub d1_database_id: Option<String>,
    pub d1_api_token: Option<String>,
    /// Overrides the Cloudflare API host
    pub d1_api_base: Option<String>,
}

fn default_database_path() -> String {
    "subrelay.db".to_string()
}

/// Upload sink credentials
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RelayConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
    /// Send run start/finish messages through the sink
    pub notifications: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: TELEGRAM_API_BASE.to_string(),
            notifications: true,
        }
    }
}

/// One site to crawl and ingest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Partition key for every ledger row of this source
    pub name: String,
    pub site: SiteKind,
    pub base_url: String,
    /// Category paths, e.g. "/category/movies/"
    pub categories: Vec<String>,
}

/// Seconds to a duration; negative or non-finite values become zero
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
