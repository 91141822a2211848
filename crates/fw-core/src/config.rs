use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.foldwise/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load config from `~/.foldwise/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reconcile.validate()?;
        self.admission.validate()?;
        self.worker.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        foldwise_home().join("config.toml")
    }
}

fn foldwise_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".foldwise")
}

fn nonzero(section: &str, field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!(
            "{section}.{field} must be greater than zero"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Human,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file holding the tree, event log and checkpoints.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// `path` with a leading `~/` expanded to the home directory.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

fn default_store_path() -> String {
    "~/.foldwise/foldwise.db".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Pending events above this count force a full-scan attempt.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_summary_lines")]
    pub summary_lines: usize,
    /// Executor rounds per attempt, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Capability invocations allowed per executor round.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            summary_lines: default_summary_lines(),
            max_attempts: default_max_attempts(),
            max_steps: default_max_steps(),
        }
    }
}

impl ReconcileConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        nonzero("reconcile", "max_events", self.max_events as u64)?;
        nonzero("reconcile", "max_attempts", self.max_attempts.into())?;
        nonzero("reconcile", "max_steps", self.max_steps.into())
    }
}

fn default_max_events() -> usize {
    crate::incremental::DEFAULT_MAX_EVENTS
}
fn default_summary_lines() -> usize {
    crate::summary::DEFAULT_SUMMARY_LINES
}
fn default_max_attempts() -> u32 {
    3
}
fn default_max_steps() -> u32 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Safety-net expiry for a lock whose worker died.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            lock_prefix: default_lock_prefix(),
            queue_name: default_queue_name(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

impl AdmissionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "admission.lock_prefix must not be empty".to_string(),
            ));
        }
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "admission.queue_name must not be empty".to_string(),
            ));
        }
        nonzero("admission", "lock_ttl_secs", self.lock_ttl_secs)
    }
}

fn default_lock_prefix() -> String {
    "organize:task:lock".into()
}
fn default_queue_name() -> String {
    "organize_file_queue".into()
}
fn default_lock_ttl() -> u64 {
    6 * 60 * 60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long an idle worker blocks on the queue before re-checking for
    /// shutdown.
    #[serde(default = "default_pop_timeout")]
    pub pop_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            pop_timeout_ms: default_pop_timeout(),
        }
    }
}

impl WorkerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        nonzero("worker", "workers", self.workers as u64)
    }
}

fn default_workers() -> usize {
    5
}
fn default_pop_timeout() -> u64 {
    1000
}
