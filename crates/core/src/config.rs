//! Bus configuration
//!
//! Every field has a default so a partial JSON file (or none at all) is
//! enough. `DATABASE_URL` in the environment overrides the file.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the store connection string
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Configuration shared by publishers and subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// PostgreSQL connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Size of the shared publishing pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Events fetched per delivery iteration
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Backoff between failed lock acquisitions (and transient store errors)
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,

    /// Upper bound on an idle wait; the store is re-polled after this even
    /// without a wake signal
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,

    /// Notification channel used as the wake signal
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_database_url() -> String {
    "postgres://localhost/eventbus".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_batch_size() -> u32 {
    5
}

fn default_lock_retry_interval_ms() -> u64 {
    5_000
}

fn default_idle_poll_interval_ms() -> u64 {
    10_000
}

fn default_channel() -> String {
    "events".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            channel: default_channel(),
        }
    }
}

impl BusConfig {
    /// Create a config pointing at the given database
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment overrides (`DATABASE_URL`)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.is_empty() {
                self.database_url = url;
            }
        }
        self
    }

    /// Reject values the delivery loop cannot work with
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.lock_retry_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "lock_retry_interval_ms must be positive".to_string(),
            ));
        }
        if self.idle_poll_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "idle_poll_interval_ms must be positive".to_string(),
            ));
        }
        // LISTEN takes an identifier, not a bind parameter
        let valid_channel = !self.channel.is_empty()
            && self.channel.len() <= 63
            && self
                .channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !self.channel.starts_with(|c: char| c.is_ascii_digit());
        if !valid_channel {
            return Err(CoreError::InvalidConfig(format!(
                "channel '{}' is not a plain identifier",
                self.channel
            )));
        }
        Ok(())
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }
}
