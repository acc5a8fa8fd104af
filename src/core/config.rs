//! Engine configuration.
//!
//! Settings come from three layers, later ones winning:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `CVBATCH_*` environment variables

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of pool workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Environment variable overriding [`EngineConfig::max_workers`].
pub const ENV_MAX_WORKERS: &str = "CVBATCH_MAX_WORKERS";

/// Environment variable overriding [`EngineConfig::task_timeout`], in milliseconds.
/// `0` disables the deadline.
pub const ENV_TASK_TIMEOUT_MS: &str = "CVBATCH_TASK_TIMEOUT_MS";

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of threads in the worker pool.
    pub max_workers: usize,
    /// Deadline for a single task, measured from the moment it starts.
    pub task_timeout: Option<Duration>,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            task_timeout: None,
            thread_name_prefix: "cvbatch-worker".to_string(),
        }
    }
}

/// On-disk representation. Every field is optional so a file only needs
/// to mention what it changes.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    max_workers: Option<usize>,
    task_timeout_ms: Option<u64>,
    thread_name_prefix: Option<String>,
}

impl EngineConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of pool workers.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the per-task deadline.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Remove the per-task deadline.
    pub fn without_task_timeout(mut self) -> Self {
        self.task_timeout = None;
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut config = Self::default();
        if let Some(workers) = file.max_workers {
            config.max_workers = workers;
        }
        if let Some(ms) = file.task_timeout_ms {
            config.task_timeout = timeout_from_millis(ms);
        }
        if let Some(prefix) = file.thread_name_prefix {
            config.thread_name_prefix = prefix;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `CVBATCH_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Split out from
    /// [`with_env_overrides`](Self::with_env_overrides) so tests need not
    /// touch the process environment.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            self.max_workers = parse_env(ENV_MAX_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TASK_TIMEOUT_MS) {
            self.task_timeout = timeout_from_millis(parse_env(ENV_TASK_TIMEOUT_MS, &raw)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_workers".to_string(),
                error: "must be at least 1".to_string(),
            });
        }
        if self.task_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                key: "task_timeout".to_string(),
                error: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn timeout_from_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        error: format!("'{}': {}", raw, e),
    })
}
