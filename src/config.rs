//! Application configuration.
//!
//! YAML-based configuration for the database, the feed endpoint and the
//! sync cadences. Durations use humantime strings ("30s", "12h").

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default poll interval for in-progress games.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-cycle feed timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default schedule sync interval.
pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default interval of the roster refresh pass.
pub const DEFAULT_ROSTER_PASS_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default minimum time between refreshes of one team's roster.
pub const DEFAULT_ROSTER_MIN_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default gap retry budget.
pub const DEFAULT_GAP_RETRY_BUDGET: u32 = 3;

fn default_pool_size() -> u32 {
    4
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_poll_timeout() -> Duration {
    DEFAULT_POLL_TIMEOUT
}

fn default_schedule_interval() -> Duration {
    DEFAULT_SCHEDULE_INTERVAL
}

fn default_roster_pass_interval() -> Duration {
    DEFAULT_ROSTER_PASS_INTERVAL
}

fn default_roster_min_interval() -> Duration {
    DEFAULT_ROSTER_MIN_INTERVAL
}

fn default_gap_retry_budget() -> u32 {
    DEFAULT_GAP_RETRY_BUDGET
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: String,

    /// Connection pool size for read operations (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "gridstore.db".to_string(), pool_size: default_pool_size() }
    }
}

/// Feed endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the feed.
    pub base_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:8080".to_string() }
    }
}

/// Sync cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between polls of one in-progress game.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-cycle feed timeout; an overrunning cycle is abandoned without
    /// commit.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Interval of the schedule sync pass.
    #[serde(with = "humantime_serde")]
    pub schedule_interval: Duration,

    /// Interval of the roster refresh pass.
    #[serde(with = "humantime_serde")]
    pub roster_pass_interval: Duration,

    /// Minimum time between refreshes of one team's roster.
    #[serde(with = "humantime_serde")]
    pub roster_min_interval: Duration,

    /// Consecutive gap cycles tolerated before the gap is fatal.
    pub gap_retry_budget: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            poll_timeout: default_poll_timeout(),
            schedule_interval: default_schedule_interval(),
            roster_pass_interval: default_roster_pass_interval(),
            roster_min_interval: default_roster_min_interval(),
            gap_retry_budget: default_gap_retry_budget(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err(ConfigError::Validation("database path must not be empty".to_string()));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Validation("database pool_size must be positive".to_string()));
        }
        if self.feed.base_url.is_empty() {
            return Err(ConfigError::Validation("feed base_url must not be empty".to_string()));
        }
        if self.sync.poll_interval.is_zero() {
            return Err(ConfigError::Validation("sync poll_interval must be positive".to_string()));
        }
        if self.sync.poll_timeout.is_zero() {
            return Err(ConfigError::Validation("sync poll_timeout must be positive".to_string()));
        }
        Ok(())
    }
}
