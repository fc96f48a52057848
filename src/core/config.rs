//! Workbench configuration loaded from `unitpass.toml` in the store root.
//!
//! A missing file means "all defaults"; a malformed one is a hard error.

use crate::core::error::UnitpassError;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UnitpassConfig {
    pub publication: PublicationConfig,
    pub content_store: ContentStoreConfig,
    pub ledger: LedgerConfig,
}

/// Retry policy and link rendering for the publication pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublicationConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub gateway_link_prefix: String,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            gateway_link_prefix: "https://gateway.ipfs.io/ipfs/".to_string(),
        }
    }
}

impl PublicationConfig {
    /// Exponential backoff before retry number `attempt` (1-based), capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2u64.pow(exp))
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContentStoreConfig {
    pub dir: PathBuf,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cas"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub network: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ledger.jsonl"),
            network: "local".to_string(),
        }
    }
}

/// Load config from `<store>/unitpass.toml`; no file = defaults.
pub fn load_config(store: &Store) -> Result<UnitpassConfig, UnitpassError> {
    let path = store.config_path();
    if !path.exists() {
        return Ok(UnitpassConfig::default());
    }
    let content = fs::read_to_string(&path).map_err(UnitpassError::IoError)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<UnitpassConfig, UnitpassError> {
    let config: UnitpassConfig = toml::from_str(content)?;
    if config.publication.max_attempts == 0 {
        return Err(UnitpassError::ConfigError(
            "publication.max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(config)
}

/// Write the default config unless one already exists. Returns true when written.
pub fn write_default_config(store: &Store) -> Result<bool, UnitpassError> {
    let path = store.config_path();
    if path.exists() {
        return Ok(false);
    }
    let body = toml::to_string_pretty(&UnitpassConfig::default())
        .map_err(|e| UnitpassError::ConfigError(e.to_string()))?;
    fs::write(&path, body).map_err(UnitpassError::IoError)?;
    Ok(true)
}
