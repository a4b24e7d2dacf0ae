//! Application configuration.
//!
//! Loaded from an optional TOML file; every field has a default, so an empty
//! file (or none) gives the standard policy:
//!
//! ```toml
//! [download]
//! data_root = "data"
//! period = "2y"
//! # max_age_secs = 3600      # absent: cached files never expire
//! checkpoint_every = 50
//! throttle_every = 100
//!
//! [retry]
//! max_attempts = 2
//! rate_limit_backoff = { min_ms = 20000, max_ms = 40000 }
//!
//! [markets.us]
//! workers = 5
//! request_timeout_secs = 30
//!
//! [markets.jp]
//! reference_list = "lists/tse.csv"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::dispatch::DispatchConfig;
use crate::data::fetch::{JitterRange, RetryPolicy};
use crate::data::freshness::{FreshnessPolicy, DEFAULT_MIN_FILE_BYTES};
use crate::data::provider::Period;
use crate::domain::{Market, MarketProfile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub data_root: PathBuf,
    pub period: Period,
    /// Cached series older than this are refetched. `None`: never expire.
    pub max_age_secs: Option<u64>,
    pub min_file_bytes: u64,
    /// Per-request timeout for history calls.
    pub request_timeout_secs: u64,
    /// Per-request timeout for catalog listings.
    pub catalog_timeout_secs: u64,
    /// Manifest checkpoint cadence, in completed units.
    pub checkpoint_every: usize,
    /// Pool throttle cadence, in completed units. 0 disables it.
    pub throttle_every: usize,
    pub throttle_pause: JitterRange,
    /// Append a record to `<data_root>/audit.jsonl` after each run.
    pub audit: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            period: Period::Year2,
            max_age_secs: None,
            min_file_bytes: DEFAULT_MIN_FILE_BYTES,
            request_timeout_secs: 20,
            catalog_timeout_secs: 15,
            checkpoint_every: 50,
            throttle_every: 100,
            throttle_pause: JitterRange::millis(5_000, 10_000),
            audit: true,
        }
    }
}

/// `[markets.<code>]` section. Unset fields inherit from `[download]` or the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketOverrides {
    pub workers: Option<usize>,
    pub period: Option<Period>,
    pub max_age_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    /// Replaces the bundled `code,name` dataset for JP and HK.
    pub reference_list: Option<PathBuf>,
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadSettings,
    pub retry: RetryPolicy,
    /// Keyed by market code (`tw` or `tw-share`).
    pub markets: BTreeMap<String, MarketOverrides>,
}

/// Effective settings for one market run.
#[derive(Debug, Clone)]
pub struct MarketSettings {
    pub profile: MarketProfile,
    pub data_root: PathBuf,
    pub period: Period,
    pub freshness: FreshnessPolicy,
    pub retry: RetryPolicy,
    pub dispatch: DispatchConfig,
    /// Per-request timeout for this market's history calls.
    pub request_timeout: Duration,
    pub checkpoint_every: usize,
    pub reference_list: Option<PathBuf>,
    pub audit: bool,
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.download.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("download.request_timeout_secs must be at least 1".into()));
        }
        if self.download.checkpoint_every == 0 {
            return Err(ConfigError::Invalid("download.checkpoint_every must be at least 1".into()));
        }
        for (key, overrides) in &self.markets {
            key.parse::<Market>()
                .map_err(|e| ConfigError::Invalid(format!("[markets.{key}]: {e}")))?;
            if overrides.workers == Some(0) {
                return Err(ConfigError::Invalid(format!("markets.{key}.workers must be at least 1")));
            }
            if overrides.request_timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "markets.{key}.request_timeout_secs must be at least 1"
                )));
            }
        }
        Ok(())
    }

    fn overrides_for(&self, market: Market) -> Option<&MarketOverrides> {
        self.markets
            .iter()
            .find(|(key, _)| key.parse::<Market>().ok() == Some(market))
            .map(|(_, o)| o)
    }

    /// Resolve the effective settings for `market`.
    pub fn market_settings(&self, market: Market) -> MarketSettings {
        let profile = market.profile();
        let overrides = self.overrides_for(market).cloned().unwrap_or_default();
        let d = &self.download;

        let max_age_secs = overrides.max_age_secs.or(d.max_age_secs);
        MarketSettings {
            data_root: d.data_root.clone(),
            period: overrides.period.unwrap_or(d.period),
            freshness: FreshnessPolicy {
                max_age: max_age_secs.map(Duration::from_secs),
                min_bytes: d.min_file_bytes,
            },
            retry: self.retry.clone(),
            dispatch: DispatchConfig {
                workers: overrides.workers.unwrap_or(profile.workers),
                throttle_every: d.throttle_every,
                throttle_pause: d.throttle_pause,
            },
            request_timeout: Duration::from_secs(
                overrides.request_timeout_secs.unwrap_or(d.request_timeout_secs),
            ),
            checkpoint_every: d.checkpoint_every,
            reference_list: overrides.reference_list,
            audit: d.audit,
            profile,
        }
    }
}
