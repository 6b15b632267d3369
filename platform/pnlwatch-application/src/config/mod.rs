use pnlwatch_domain::services::retention::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_RETENTION_HOURS: i64 = 24;
pub const API_KEY_ENV: &str = "PNLWATCH_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub poll: PollConfig,
    pub persistence: PersistenceConfig,
    pub retention: Option<RetentionConfig>,
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    pub state_dir: String,
    pub save_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    pub max_age_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub settle_asset: Option<String>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll
                .interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(
            self.persistence
                .save_interval_secs
                .unwrap_or(DEFAULT_SAVE_INTERVAL_SECS),
        )
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        let hours = self
            .retention
            .as_ref()
            .and_then(|r| r.max_age_hours)
            .unwrap_or(DEFAULT_RETENTION_HOURS)
            .max(1);
        RetentionPolicy::new(chrono::Duration::hours(hours))
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        match self.exchange.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(key.to_string()),
            _ => std::env::var(API_KEY_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn settle_asset(&self) -> &str {
        self.exchange.settle_asset.as_deref().unwrap_or("USDT")
    }
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))
}
