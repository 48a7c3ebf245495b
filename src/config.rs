//! Configuration management for Chatkeep
//!
//! This module handles loading, parsing, and normalizing configuration
//! from files, environment variables, and CLI overrides. Invalid values are
//! never fatal: [`Config::normalize`] resets them to defaults.

use crate::error::{ChatkeepError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lowest accepted debounce delay (milliseconds)
pub const MIN_DEBOUNCE_DELAY_MS: u64 = 300;

/// Main configuration structure for Chatkeep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Capture, retention, and copy settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Snapshot database location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output format and destination
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Capture, retention, and copy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawBackupConfig")]
pub struct BackupConfig {
    /// Global cap on stored snapshots across all chats
    pub max_total_backups: usize,

    /// Quiet period before a debounced trigger captures (milliseconds)
    pub debounce_delay_ms: u64,

    /// How long to wait for the copy worker before copying inline (milliseconds)
    pub offload_timeout_ms: u64,

    /// Maximum characters kept in `last_message_preview`
    pub preview_length: usize,

    /// Verbose logging toggle
    pub debug: bool,
}

/// `backup` section as written, before type checks
///
/// Values of the wrong type or out of range fall back to the field default
/// instead of failing the whole load.
#[derive(Debug, Default, Deserialize)]
struct RawBackupConfig {
    #[serde(default)]
    max_total_backups: Option<serde_yaml::Value>,
    #[serde(default)]
    debounce_delay_ms: Option<serde_yaml::Value>,
    #[serde(default)]
    offload_timeout_ms: Option<serde_yaml::Value>,
    #[serde(default)]
    preview_length: Option<serde_yaml::Value>,
    #[serde(default)]
    debug: Option<serde_yaml::Value>,
}

fn lenient<T>(value: Option<serde_yaml::Value>, field: &str, default: T) -> T
where
    T: serde::de::DeserializeOwned + std::fmt::Debug,
{
    let Some(value) = value else {
        return default;
    };
    match serde_yaml::from_value::<T>(value.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(
                "Invalid backup.{} {:?} ({}), using {:?}",
                field,
                value,
                e,
                default
            );
            default
        }
    }
}

impl From<RawBackupConfig> for BackupConfig {
    fn from(raw: RawBackupConfig) -> Self {
        Self {
            max_total_backups: lenient(
                raw.max_total_backups,
                "max_total_backups",
                default_max_total_backups(),
            ),
            debounce_delay_ms: lenient(
                raw.debounce_delay_ms,
                "debounce_delay_ms",
                default_debounce_delay_ms(),
            ),
            offload_timeout_ms: lenient(
                raw.offload_timeout_ms,
                "offload_timeout_ms",
                default_offload_timeout_ms(),
            ),
            preview_length: lenient(raw.preview_length, "preview_length", default_preview_length()),
            debug: lenient(raw.debug, "debug", false),
        }
    }
}

fn default_max_total_backups() -> usize {
    10
}

fn default_debounce_delay_ms() -> u64 {
    1500
}

fn default_offload_timeout_ms() -> u64 {
    5000
}

fn default_preview_length() -> usize {
    100
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_total_backups: default_max_total_backups(),
            debounce_delay_ms: default_debounce_delay_ms(),
            offload_timeout_ms: default_offload_timeout_ms(),
            preview_length: default_preview_length(),
            debug: false,
        }
    }
}

impl BackupConfig {
    /// Debounce delay as a `Duration`
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    /// Offload timeout as a `Duration`
    pub fn offload_timeout(&self) -> Duration {
        Duration::from_millis(self.offload_timeout_ms)
    }
}

/// Snapshot database location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit database path; the platform data directory is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Log output format and destination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json_format: bool,

    /// Also append logs to this file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged. The returned configuration is already normalized.
    ///
    /// # Errors
    ///
    /// Returns `ChatkeepError::Config` if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);
        config.normalize();

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatkeepError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse a YAML document into a configuration (not normalized)
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ChatkeepError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(value) = std::env::var("CHATKEEP_MAX_TOTAL_BACKUPS") {
            match value.parse() {
                Ok(max) => self.backup.max_total_backups = max,
                Err(_) => tracing::warn!("Ignoring CHATKEEP_MAX_TOTAL_BACKUPS={}", value),
            }
        }

        if let Ok(value) = std::env::var("CHATKEEP_DEBOUNCE_MS") {
            match value.parse() {
                Ok(delay) => self.backup.debounce_delay_ms = delay,
                Err(_) => tracing::warn!("Ignoring CHATKEEP_DEBOUNCE_MS={}", value),
            }
        }

        if let Ok(value) = std::env::var("CHATKEEP_DEBUG") {
            self.backup.debug = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        }

        if let Ok(path) = std::env::var("CHATKEEP_DB") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.backup.debug = true;
        }
        if let Some(db) = &cli.db {
            self.storage.db_path = Some(db.clone());
        }
    }

    /// Reset out-of-range values to their defaults
    ///
    /// The debounce delay is raised to [`MIN_DEBOUNCE_DELAY_MS`] rather than
    /// reset. Each correction is logged at warn level.
    pub fn normalize(&mut self) {
        let backup = &mut self.backup;

        if backup.max_total_backups == 0 {
            tracing::warn!(
                "max_total_backups must be at least 1, using {}",
                default_max_total_backups()
            );
            backup.max_total_backups = default_max_total_backups();
        }

        if backup.debounce_delay_ms < MIN_DEBOUNCE_DELAY_MS {
            tracing::warn!(
                "debounce_delay_ms {} is below the {}ms floor",
                backup.debounce_delay_ms,
                MIN_DEBOUNCE_DELAY_MS
            );
            backup.debounce_delay_ms = MIN_DEBOUNCE_DELAY_MS;
        }

        if backup.offload_timeout_ms == 0 {
            backup.offload_timeout_ms = default_offload_timeout_ms();
        }

        if backup.preview_length == 0 {
            backup.preview_length = default_preview_length();
        }
    }

    /// Default tracing filter directive for this configuration
    pub fn log_filter(&self) -> &'static str {
        if self.backup.debug {
            "chatkeep=debug"
        } else {
            "chatkeep=info"
        }
    }
}
