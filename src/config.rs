//! Configuration file parser for ~/.config/podcrawl/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{HttpSettings, RefreshSettings};
use crate::scheduler::SchedulerSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Cycle cadence for `--watch` when the config leaves it at 0.
const DEFAULT_CYCLE_MINUTES: u64 = 15;

/// Crawler configuration. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. Defaults to `podcasts.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Outbound `User-Agent` header.
    pub user_agent: String,

    /// Per-request timeout, covering the body download.
    pub fetch_timeout_secs: u64,

    /// Responses larger than this are discarded as network errors.
    pub max_feed_bytes: usize,

    /// Concurrent refreshes per cycle.
    pub workers: usize,

    /// Podcasts taken from the due queue per cycle.
    pub batch_limit: i64,

    /// Consecutive failures before a podcast is deactivated.
    pub max_consecutive_errors: i64,

    /// Publication gaps with a larger |z-score| are ignored when computing
    /// update intervals.
    pub outlier_zscore: f64,

    /// Minutes between refresh cycles. 0 = run a single cycle and exit,
    /// unless `--watch` asks for the default cadence.
    pub cycle_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        let http = HttpSettings::default();
        let refresh = RefreshSettings::default();
        Self {
            database_path: None,
            user_agent: http.user_agent,
            fetch_timeout_secs: http.timeout.as_secs(),
            max_feed_bytes: http.max_bytes,
            workers: refresh.workers,
            batch_limit: 360,
            max_consecutive_errors: refresh.max_consecutive_errors,
            outlier_zscore: refresh.scheduler.outlier_zscore,
            cycle_interval_minutes: 0,
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "database_path",
    "user_agent",
    "fetch_timeout_secs",
    "max_feed_bytes",
    "workers",
    "batch_limit",
    "max_consecutive_errors",
    "outlier_zscore",
    "cycle_interval_minutes",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing, empty or whitespace-only file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value types → `Err(ConfigError::Parse)`
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Removed between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            workers = config.workers,
            batch_limit = config.batch_limit,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_owned(),
            })
        };

        if self.user_agent.trim().is_empty() {
            return invalid("user_agent", "must not be empty");
        }
        if self.fetch_timeout_secs == 0 {
            return invalid("fetch_timeout_secs", "must be at least 1");
        }
        if self.max_feed_bytes == 0 {
            return invalid("max_feed_bytes", "must be at least 1");
        }
        if self.workers == 0 {
            return invalid("workers", "must be at least 1");
        }
        if self.batch_limit < 1 {
            return invalid("batch_limit", "must be at least 1");
        }
        if self.max_consecutive_errors < 1 {
            return invalid("max_consecutive_errors", "must be at least 1");
        }
        if !self.outlier_zscore.is_finite() || self.outlier_zscore <= 0.0 {
            return invalid("outlier_zscore", "must be a positive number");
        }
        Ok(())
    }

    /// Database file, falling back to `podcasts.db` under `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("podcasts.db"))
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            http: HttpSettings {
                user_agent: self.user_agent.clone(),
                timeout: Duration::from_secs(self.fetch_timeout_secs),
                max_bytes: self.max_feed_bytes,
            },
            scheduler: SchedulerSettings {
                outlier_zscore: self.outlier_zscore,
                ..SchedulerSettings::default()
            },
            max_consecutive_errors: self.max_consecutive_errors,
            workers: self.workers,
        }
    }

    /// Pause between refresh cycles, or `None` when only one cycle runs.
    pub fn cycle_interval(&self, watch: bool) -> Option<Duration> {
        match (self.cycle_interval_minutes, watch) {
            (0, false) => None,
            (0, true) => Some(Duration::from_secs(DEFAULT_CYCLE_MINUTES * 60)),
            (minutes, _) => Some(Duration::from_secs(minutes * 60)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
