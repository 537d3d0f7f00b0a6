//! Environment-backed configuration.
//!
//! A `.env` file is loaded (if present) before this module reads anything;
//! see `main`. Required variables fail startup, optional ones carry defaults,
//! and malformed numbers fall back with a warning.

use crate::notify::NotifyConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),
}

/// Everything the process needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub torn_api_key: String,
    pub faction_api_key: String,
    /// Comma-separated provider API keys; blanks are dropped.
    pub provider_keys: Vec<String>,
    pub spreadsheet_id: String,
    pub sheet_range: String,
    pub sheets_token: String,
    pub notify: NotifyConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            torn_api_key: required("TORN_API_KEY")?,
            faction_api_key: required("TORN_FACTION_API_KEY")?,
            provider_keys: split_keys(&env_or("PROVIDER_KEYS", "")),
            spreadsheet_id: required("SPREADSHEET_ID")?,
            sheet_range: env_or("SPREADSHEET_RANGE", "Test Sheet!A1"),
            sheets_token: required("SHEETS_TOKEN")?,
            notify: notify_from_env(),
        })
    }
}

fn notify_from_env() -> NotifyConfig {
    let config = NotifyConfig {
        enabled: env_or("NTFY_ENABLED", "false") == "true",
        base_url: env_or("NTFY_URL", "https://ntfy.sh"),
        topic: env_or("NTFY_TOPIC", "torn-oc-items"),
        batch_mode: env_or("NTFY_BATCH_MODE", "true") == "true",
        priority: env_or("NTFY_PRIORITY", "default"),
        max_retries: parse_env_or("NTFY_MAX_RETRIES", 3u32),
        base_delay: Duration::from_millis(parse_env_or("NTFY_BASE_DELAY_MS", 1000u64)),
        max_delay: Duration::from_millis(parse_env_or("NTFY_MAX_DELAY_MS", 30000u64)),
    };

    if config.enabled {
        tracing::info!(
            topic = %config.topic,
            mode = if config.batch_mode { "batch" } else { "individual" },
            priority = %config.priority,
            max_retries = config.max_retries,
            "notifications enabled"
        );
    } else {
        tracing::debug!("notifications disabled");
    }
    config
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',').map(|key| key.trim().to_string()).filter(|key| !key.is_empty()).collect()
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(key)),
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    let raw = match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => return default,
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, %default, "invalid integer value, using default");
            default
        }
    }
}
