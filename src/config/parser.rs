use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variables that override credentials from the file
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_D1_ACCOUNT_ID: &str = "CF_ACCOUNT_ID";
pub const ENV_D1_API_TOKEN: &str = "CF_API_TOKEN";
pub const ENV_D1_DATABASE_ID: &str = "D1_DATABASE_ID";

/// Loads and parses a configuration file from the given path
///
/// Credentials found in the process environment replace the ones in the
/// file before validation runs.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parses configuration text, resolving overrides through `lookup`
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config, lookup);
    validate(&config)?;
    Ok(config)
}

/// Replaces credentials with non-empty values from `lookup`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(token) = get(ENV_BOT_TOKEN) {
        config.relay.bot_token = Some(token);
    }
    if let Some(chat_id) = get(ENV_CHAT_ID) {
        config.relay.chat_id = Some(chat_id);
    }
    if let Some(account) = get(ENV_D1_ACCOUNT_ID) {
        config.ledger.d1_account_id = Some(account);
    }
    if let Some(token) = get(ENV_D1_API_TOKEN) {
        config.ledger.d1_api_token = Some(token);
    }
    if let Some(database) = get(ENV_D1_DATABASE_ID) {
        config.ledger.d1_database_id = Some(database);
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
