//! Service configuration
//!
//! Loaded from a YAML file or from `SCOUT_*` environment variables (a `.env`
//! file in the working directory is honored), then validated once and handed
//! to the service by value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::{FanOutMode, PipelineConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidVar { key: String, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Settings for [`crate::service::AnalysisService`]
///
/// # Example
///
/// ```
/// use scout_pipeline::service::ServiceConfig;
///
/// let config = ServiceConfig::from_yaml_str("max_concurrent_analyses: 2\nenable_caching: true\n").unwrap();
/// assert_eq!(config.max_concurrent_analyses, 2);
/// assert_eq!(config.cache_ttl_seconds, 3600);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub max_concurrent_analyses: usize,
    pub enable_caching: bool,
    pub cache_ttl_seconds: u64,
    /// Wall-clock limit per run
    pub run_timeout_seconds: u64,
    /// Events consumed per stream
    pub max_events: usize,
    pub fan_out: FanOutMode,
    pub channel_capacity: usize,
    /// SQLite file for analysis history; no history when unset
    pub history_db: Option<PathBuf>,
    pub history_max_entries: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: 5,
            enable_caching: false,
            cache_ttl_seconds: 3600,
            run_timeout_seconds: 300,
            max_events: 100,
            fan_out: FanOutMode::Merged,
            channel_capacity: 32,
            history_db: None,
            history_max_entries: 100,
        }
    }
}

impl ServiceConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Defaults overridden by `SCOUT_*` variables from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `SCOUT_*` key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "SCOUT_MAX_CONCURRENT_ANALYSES")? {
            config.max_concurrent_analyses = v;
        }
        if let Some(v) = lookup("SCOUT_ENABLE_CACHING") {
            config.enable_caching = parse_flag("SCOUT_ENABLE_CACHING", &v)?;
        }
        if let Some(v) = parse_var(&lookup, "SCOUT_CACHE_TTL_SECONDS")? {
            config.cache_ttl_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "SCOUT_RUN_TIMEOUT_SECONDS")? {
            config.run_timeout_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "SCOUT_MAX_EVENTS")? {
            config.max_events = v;
        }
        if let Some(v) = lookup("SCOUT_FAN_OUT") {
            config.fan_out = match v.trim().to_lowercase().as_str() {
                "merged" => FanOutMode::Merged,
                "per_worker" => FanOutMode::PerWorker,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        key: "SCOUT_FAN_OUT".to_string(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = parse_var(&lookup, "SCOUT_CHANNEL_CAPACITY")? {
            config.channel_capacity = v;
        }
        if let Some(v) = lookup("SCOUT_HISTORY_DB") {
            if !v.trim().is_empty() {
                config.history_db = Some(PathBuf::from(v.trim()));
            }
        }
        if let Some(v) = parse_var(&lookup, "SCOUT_HISTORY_MAX_ENTRIES")? {
            config.history_max_entries = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_analyses == 0 {
            return Err(ConfigError::Zero("max_concurrent_analyses"));
        }
        if self.run_timeout_seconds == 0 {
            return Err(ConfigError::Zero("run_timeout_seconds"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Zero("max_events"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        if self.enable_caching && self.cache_ttl_seconds == 0 {
            return Err(ConfigError::Zero("cache_ttl_seconds"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_events: self.max_events,
            run_timeout: Duration::from_secs(self.run_timeout_seconds),
            fan_out: self.fan_out,
            channel_capacity: self.channel_capacity,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar {
                key: key.to_string(),
                value,
            }),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVar {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
