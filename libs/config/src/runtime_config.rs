//! Runtime Configuration Module
//!
//! Provides configuration loading and validation for the actor runtime.
//! Supports loading from TOML files with environment variable overrides.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable prefix for overrides, e.g.
/// `ACTOR_RUNTIME__SCHEDULER__WORKER_THREADS=8`.
pub const ENV_PREFIX: &str = "ACTOR_RUNTIME";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool settings
    pub scheduler: SchedulerSettings,

    /// Remote actor settings
    pub remote: RemoteSettings,

    /// Logging output
    pub logging: LoggingSettings,

    /// Debug-only checks
    pub debug: DebugSettings,
}

/// Worker pool settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of worker threads; `None` uses the detected core count.
    pub worker_threads: Option<usize>,

    /// Lower bound applied to the detected core count.
    pub min_worker_threads: usize,

    /// Forces the number of efficiency-class workers, overriding detection.
    /// `Some(0)` forces a uniform pool.
    pub efficiency_workers: Option<usize>,

    /// Behaviors an actor may run per scheduling turn unless overridden.
    pub default_batch_size: usize,

    /// How long an idle worker parks before rechecking the ready lanes.
    pub park_timeout_ms: u64,

    /// How long the pool must stay idle before `wait_until_idle` returns.
    pub quiescence_ms: u64,
}

/// Remote actor settings
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RemoteSettings {
    /// Cores contributed by connected remote nodes.
    pub remote_cores: usize,
    pub listen: Option<String>,
    pub port: Option<u16>,
}

/// Logging output
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

/// Debug-only checks
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DebugSettings {
    /// Record argument type names on chained messages so that argument
    /// faults report the offending type.
    pub check_arguments: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_threads: None,
            min_worker_threads: 4,
            efficiency_workers: None,
            default_batch_size: 1000,
            park_timeout_ms: 10,
            quiescence_ms: 100,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            check_arguments: cfg!(debug_assertions),
        }
    }
}

impl SchedulerSettings {
    /// Resolve the worker count against the number of detected cores.
    pub fn resolve_worker_count(&self, detected_cores: usize) -> usize {
        match self.worker_threads {
            Some(n) => n,
            None => detected_cores.max(self.min_worker_threads),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file with environment overrides.
    ///
    /// Without a path only defaults and environment variables apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let expanded = expand_path(path)?;
            info!("Loading runtime config: {:?}", expanded);
            builder = builder.add_source(File::from(expanded).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;

        if scheduler.worker_threads == Some(0) {
            bail!("scheduler.worker_threads must be at least 1");
        }
        if scheduler.min_worker_threads == 0 {
            bail!("scheduler.min_worker_threads must be at least 1");
        }
        if scheduler.default_batch_size == 0 {
            bail!("scheduler.default_batch_size must be at least 1");
        }
        if let (Some(workers), Some(efficiency)) =
            (scheduler.worker_threads, scheduler.efficiency_workers)
        {
            if efficiency >= workers {
                bail!(
                    "scheduler.efficiency_workers ({}) must be smaller than worker_threads ({})",
                    efficiency,
                    workers
                );
            }
        }
        if self.remote.port == Some(0) {
            bail!("remote.port must be non-zero when set");
        }

        Ok(())
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw).context("Failed to expand config path")?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Convenience function to load configuration from an optional path
pub fn load_config(path: Option<&str>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(path.map(Path::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("runtime.toml");

        let config_content = r#"
[scheduler]
worker_threads = 6
efficiency_workers = 2
default_batch_size = 50

[remote]
remote_cores = 8

[logging]
level = "debug"

[debug]
check_arguments = true
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load(Some(&config_path)).unwrap();

        assert_eq!(config.scheduler.worker_threads, Some(6));
        assert_eq!(config.scheduler.efficiency_workers, Some(2));
        assert_eq!(config.scheduler.default_batch_size, 50);
        assert_eq!(config.scheduler.min_worker_threads, 4);
        assert_eq!(config.remote.remote_cores, 8);
        assert_eq!(config.logging.level, "debug");
        assert!(config.debug.check_arguments);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(RuntimeConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.scheduler.default_batch_size, 1000);
        assert_eq!(config.scheduler.resolve_worker_count(2), 4);
        assert_eq!(config.scheduler.resolve_worker_count(16), 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_workers = RuntimeConfig::from_toml("[scheduler]\nworker_threads = 0\n");
        assert!(zero_workers.is_err());

        let zero_batch = RuntimeConfig::from_toml("[scheduler]\ndefault_batch_size = 0\n");
        assert!(zero_batch.is_err());

        let all_efficiency = RuntimeConfig::from_toml(
            "[scheduler]\nworker_threads = 4\nefficiency_workers = 4\n",
        );
        assert!(all_efficiency.is_err());
    }

    #[test]
    fn test_explicit_worker_count_wins() {
        let config = RuntimeConfig::from_toml("[scheduler]\nworker_threads = 2\n").unwrap();
        assert_eq!(config.scheduler.resolve_worker_count(32), 2);
    }
}
