use crate::config::types::{
    Config, CrawlerConfig, FetchBackoffConfig, LedgerBackend, LedgerConfig, RelayBackoffConfig,
    RelayConfig, SourceConfig, WorkerConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Largest worker pool accepted
pub const MAX_WORKERS: usize = 32;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_worker_config(&config.worker)?;
    validate_fetch_backoff(&config.fetch_backoff)?;
    validate_relay_backoff(&config.relay_backoff)?;
    validate_ledger_config(&config.ledger)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Bot token and chat id, required by every mode that relays
pub fn relay_credentials(relay: &RelayConfig) -> Result<(String, String), ConfigError> {
    let token = relay
        .bot_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCredential("relay bot token (TELEGRAM_BOT_TOKEN)".into()))?;
    let chat_id = relay
        .chat_id
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCredential("relay chat id (TELEGRAM_CHAT_ID)".into()))?;

    Url::parse(&relay.api_base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid relay api-base: {}", e)))?;

    Ok((token.to_string(), chat_id.to_string()))
}

fn validate_range(name: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    if !(min.is_finite() && max.is_finite()) || min < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be finite and non-negative, got {}..{}",
            name, min, max
        )));
    }
    if min > max {
        return Err(ConfigError::Validation(format!(
            "{} minimum ({}) exceeds maximum ({})",
            name, min, max
        )));
    }
    Ok(())
}

fn validate_attempts(name: &str, attempts: u32) -> Result<(), ConfigError> {
    if attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "{} must be >= 1, got {}",
            name, attempts
        )));
    }
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_range(
        "page-delay",
        config.page_delay_min_secs,
        config.page_delay_max_secs,
    )?;

    if config.stale_page_limit < 1 {
        return Err(ConfigError::Validation(
            "stale-page-limit must be >= 1".to_string(),
        ));
    }
    if config.monitor_page_limit < 1 {
        return Err(ConfigError::Validation(
            "monitor-page-limit must be >= 1".to_string(),
        ));
    }
    validate_attempts("max-consecutive-failures", config.max_consecutive_failures)
}

/// Validates worker pool configuration
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and {}, got {}",
            MAX_WORKERS, config.workers
        )));
    }
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1".to_string(),
        ));
    }
    validate_range(
        "batch-cooldown",
        config.batch_cooldown_min_secs,
        config.batch_cooldown_max_secs,
    )
}

fn validate_fetch_backoff(config: &FetchBackoffConfig) -> Result<(), ConfigError> {
    validate_range(
        "fetch-backoff delay",
        config.base_delay_secs,
        config.max_delay_secs,
    )?;
    validate_range(
        "fetch-backoff transient",
        config.transient_min_secs,
        config.transient_max_secs,
    )?;
    validate_range("fetch-backoff cooldown", 0.0, config.cooldown_secs)?;
    validate_attempts("fetch-backoff cooldown-after", config.cooldown_after)?;
    validate_attempts("fetch-backoff max-attempts", config.max_attempts)
}

fn validate_relay_backoff(config: &RelayBackoffConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("min-interval-secs", config.min_interval_secs),
        ("cooldown-base-secs", config.cooldown_base_secs),
        ("hint-padding-secs", config.hint_padding_secs),
        ("default-hint-secs", config.default_hint_secs),
        ("retry-delay-secs", config.retry_delay_secs),
        ("budget-secs", config.budget_secs),
    ] {
        validate_range(&format!("relay-backoff {}", name), 0.0, value)?;
    }
    validate_attempts("relay-backoff max-attempts", config.max_attempts)
}

/// Validates ledger configuration
fn validate_ledger_config(config: &LedgerConfig) -> Result<(), ConfigError> {
    match config.backend {
        LedgerBackend::Sqlite => {
            if config.database_path.is_empty() {
                return Err(ConfigError::Validation(
                    "database-path cannot be empty".to_string(),
                ));
            }
        }
        LedgerBackend::D1 => {
            for (name, value) in [
                ("d1-account-id (CF_ACCOUNT_ID)", &config.d1_account_id),
                ("d1-database-id (D1_DATABASE_ID)", &config.d1_database_id),
                ("d1-api-token (CF_API_TOKEN)", &config.d1_api_token),
            ] {
                if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    return Err(ConfigError::Validation(format!(
                        "D1 ledger requires {}",
                        name
                    )));
                }
            }
            if let Some(base) = &config.d1_api_base {
                Url::parse(base)
                    .map_err(|e| ConfigError::InvalidUrl(format!("Invalid d1-api-base: {}", e)))?;
            }
        }
    }
    Ok(())
}

/// Validates source entries
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    if sources.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[source]] is required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for source in sources {
        validate_source_name(&source.name)?;
        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }

        let url = Url::parse(&source.base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid base-url '{}': {}", source.base_url, e))
        })?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "base-url '{}' must use http or https",
                source.base_url
            )));
        }

        if source.categories.is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{}' must list at least one category",
                source.name
            )));
        }
        for category in &source.categories {
            if !category.starts_with('/') || category.trim_matches('/').is_empty() {
                return Err(ConfigError::Validation(format!(
                    "category '{}' of source '{}' must be a rooted path like '/category/movies/'",
                    category, source.name
                )));
            }
        }
    }

    Ok(())
}

/// Source names are ledger partition keys: alphanumerics, '-' and '_'
fn validate_source_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "source name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "source name must contain only alphanumerics, '-' and '_', got '{}'",
            name
        )));
    }

    Ok(())
}
