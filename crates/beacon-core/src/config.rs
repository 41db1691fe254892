//! Configuration module for Beacon.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Beacon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub batching: BatchingConfig,
    pub session: SessionConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Number of pooled read connections (writes always use one connection).
    pub max_readers: u32,
    /// Seconds a connection waits on a locked database before failing.
    pub busy_timeout_secs: u64,
}

/// Batching and validation settings for logs and spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Buffered logs that trigger a flush.
    pub log_batch_size: usize,
    /// Buffered spans that trigger a flush.
    pub span_batch_size: usize,
    /// Milliseconds after the last flush before buffered records are flushed.
    pub flush_interval_ms: u64,
    /// Log bodies longer than this (in characters) are dropped.
    pub max_log_body_length: usize,
    /// Span names longer than this (in characters) are dropped.
    pub max_span_name_length: usize,
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds between heartbeats of the open session.
    pub heartbeat_interval_secs: u64,
    /// Seconds without heartbeat after which an open session of another
    /// process is considered abandoned.
    pub staleness_threshold_secs: u64,
    /// Start a new session right after `end_current_session`.
    pub restart_on_end: bool,
}

/// Unsent-data reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Run the reconciler when the SDK starts.
    pub reconcile_on_start: bool,
    /// Milliseconds to wait after start before reconciling.
    pub reconcile_delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/beacon/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("beacon")
            .join("config.yaml")
    }
}

impl BatchingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_secs as i64)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("beacon");
        Self {
            path: data_dir.join("db.sqlite"),
            max_readers: 4,
            busy_timeout_secs: 5,
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            log_batch_size: 20,
            span_batch_size: 20,
            flush_interval_ms: 2_000,
            max_log_body_length: 4_000,
            max_span_name_length: 128,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            staleness_threshold_secs: 30,
            restart_on_end: true,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            reconcile_on_start: true,
            reconcile_delay_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"session.heartbeat_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn must_be_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- storage ---
        if self.storage.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".into(),
                message: "must not be empty".into(),
            });
        }
        must_be_positive(&mut errors, "storage.max_readers", self.storage.max_readers.into());

        // --- batching ---
        must_be_positive(&mut errors, "batching.log_batch_size", self.batching.log_batch_size as u64);
        must_be_positive(&mut errors, "batching.span_batch_size", self.batching.span_batch_size as u64);
        must_be_positive(&mut errors, "batching.flush_interval_ms", self.batching.flush_interval_ms);
        must_be_positive(
            &mut errors,
            "batching.max_log_body_length",
            self.batching.max_log_body_length as u64,
        );
        must_be_positive(
            &mut errors,
            "batching.max_span_name_length",
            self.batching.max_span_name_length as u64,
        );

        // --- session ---
        must_be_positive(
            &mut errors,
            "session.heartbeat_interval_secs",
            self.session.heartbeat_interval_secs,
        );
        if self.session.staleness_threshold_secs <= self.session.heartbeat_interval_secs {
            errors.push(ValidationError {
                field: "session.staleness_threshold_secs".into(),
                message: format!(
                    "staleness_threshold_secs ({}) must exceed heartbeat_interval_secs ({})",
                    self.session.staleness_threshold_secs, self.session.heartbeat_interval_secs
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use beacon_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .storage_path(PathBuf::from("/tmp/beacon/db.sqlite"))
///     .heartbeat_interval_secs(2)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- storage ---

    pub fn storage_path(mut self, path: PathBuf) -> Self {
        self.config.storage.path = path;
        self
    }

    pub fn storage_max_readers(mut self, n: u32) -> Self {
        self.config.storage.max_readers = n;
        self
    }

    // --- batching ---

    pub fn log_batch_size(mut self, n: usize) -> Self {
        self.config.batching.log_batch_size = n;
        self
    }

    pub fn span_batch_size(mut self, n: usize) -> Self {
        self.config.batching.span_batch_size = n;
        self
    }

    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.batching.flush_interval_ms = ms;
        self
    }

    pub fn max_log_body_length(mut self, n: usize) -> Self {
        self.config.batching.max_log_body_length = n;
        self
    }

    pub fn max_span_name_length(mut self, n: usize) -> Self {
        self.config.batching.max_span_name_length = n;
        self
    }

    // --- session ---

    pub fn heartbeat_interval_secs(mut self, seconds: u64) -> Self {
        self.config.session.heartbeat_interval_secs = seconds;
        self
    }

    pub fn staleness_threshold_secs(mut self, seconds: u64) -> Self {
        self.config.session.staleness_threshold_secs = seconds;
        self
    }

    pub fn restart_on_end(mut self, restart: bool) -> Self {
        self.config.session.restart_on_end = restart;
        self
    }

    // --- upload ---

    pub fn reconcile_on_start(mut self, enabled: bool) -> Self {
        self.config.upload.reconcile_on_start = enabled;
        self
    }

    pub fn reconcile_delay_ms(mut self, ms: u64) -> Self {
        self.config.upload.reconcile_delay_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
