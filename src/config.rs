use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "https://p1.parsely.com/mobileproxy";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the in-memory buffer spills into the durable store once it grows
/// past `queue_size_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowMode {
    /// Merge only the oldest in-memory event into the store.
    SpillOldest,
    /// Union the whole in-memory queue into the store (write-through
    /// snapshot); the flush de-duplicates the overlap.
    MirrorQueue,
}

impl Default for OverflowMode {
    fn default() -> Self {
        Self::SpillOldest
    }
}

impl FromStr for OverflowMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spill-oldest" | "spill_oldest" => Ok(Self::SpillOldest),
            "mirror-queue" | "mirror_queue" => Ok(Self::MirrorQueue),
            _ => Err(format!("unsupported overflow mode: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub site_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_queue_size_limit")]
    pub queue_size_limit: usize,
    #[serde(default = "default_storage_size_limit")]
    pub storage_size_limit: usize,
    #[serde(default = "default_base_engagement_interval_ms")]
    pub base_engagement_interval_ms: u64,
    /// Debug mode: flushes succeed without transmitting anything.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub overflow_mode: OverflowMode,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl TrackerConfig {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            endpoint: default_endpoint(),
            flush_interval_secs: default_flush_interval_secs(),
            queue_size_limit: default_queue_size_limit(),
            storage_size_limit: default_storage_size_limit(),
            base_engagement_interval_ms: default_base_engagement_interval_ms(),
            dry_run: false,
            overflow_mode: OverflowMode::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    /// Defaults plus environment overrides, loading a `.env` file first if
    /// one is present.
    pub fn from_env(site_id: impl Into<String>) -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::new(site_id);
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TRACKBUFFER_ENDPOINT") {
            if !value.trim().is_empty() {
                self.endpoint = value.trim().to_string();
            }
        }

        if let Ok(value) = std::env::var("TRACKBUFFER_FLUSH_INTERVAL_SECS") {
            match value.trim().parse::<u64>() {
                Ok(secs) => self.flush_interval_secs = secs,
                Err(e) => tracing::warn!("ignoring TRACKBUFFER_FLUSH_INTERVAL_SECS={value}: {e}"),
            }
        }

        if let Ok(value) = std::env::var("TRACKBUFFER_DRY_RUN") {
            self.dry_run = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        if let Ok(value) = std::env::var("TRACKBUFFER_OVERFLOW_MODE") {
            match OverflowMode::from_str(&value) {
                Ok(mode) => self.overflow_mode = mode,
                Err(e) => tracing::warn!("ignoring TRACKBUFFER_OVERFLOW_MODE: {e}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_id.trim().is_empty() {
            return Err(ConfigError::Invalid("site id cannot be empty".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint cannot be empty".to_string()));
        }
        reqwest::Url::parse(self.endpoint.trim()).map_err(|error| {
            ConfigError::Invalid(format!("invalid endpoint '{}': {error}", self.endpoint))
        })?;
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush interval must be greater than 0".to_string(),
            ));
        }
        if self.queue_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "queue size limit must be greater than 0".to_string(),
            ));
        }
        if self.storage_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "storage size limit must be greater than 0".to_string(),
            ));
        }
        if self.base_engagement_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "base engagement interval must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn base_engagement_interval(&self) -> Duration {
        Duration::from_millis(self.base_engagement_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_queue_size_limit() -> usize {
    50
}

fn default_storage_size_limit() -> usize {
    100
}

fn default_base_engagement_interval_ms() -> u64 {
    10_500
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
