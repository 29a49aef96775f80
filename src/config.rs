use crate::world::field::FieldSettings;
use crate::world::registry::RegistrySettings;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "fieldsim.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("usage: fieldsim <asset-root> [map_id ...]")]
    Usage,
    #[error("invalid map id '{0}'")]
    InvalidMapId(String),
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid {name} '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldServerConfig {
    pub tick_interval_ms: u64,
    pub empty_timeout_secs: u64,
    pub reclaim_interval_ms: u64,
    pub index_cache_capacity: usize,
    /// 0 runs until the process is killed.
    pub run_secs: u64,
    pub log_level: String,
}

impl Default for FieldServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            empty_timeout_secs: 300,
            reclaim_interval_ms: 1000,
            index_cache_capacity: 32,
            run_secs: 0,
            log_level: "info".to_string(),
        }
    }
}

impl FieldServerConfig {
    /// Reads `<root>/fieldsim.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(Self::default()),
            Ok(text) => serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path, source }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    /// Applies `FIELDSIM_*` overrides. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (name, value))
        };
        let number = |(name, value): (&'static str, String)| {
            value
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnv { name, value })
        };

        if let Some(entry) = var("FIELDSIM_TICK_MS") {
            self.tick_interval_ms = number(entry)?;
        }
        if let Some(entry) = var("FIELDSIM_EMPTY_TIMEOUT_SECS") {
            self.empty_timeout_secs = number(entry)?;
        }
        if let Some(entry) = var("FIELDSIM_RECLAIM_MS") {
            self.reclaim_interval_ms = number(entry)?;
        }
        if let Some(entry) = var("FIELDSIM_RUN_SECS") {
            self.run_secs = number(entry)?;
        }
        if let Some((_, level)) = var("FIELDSIM_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            field: FieldSettings {
                tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            },
            empty_timeout: Duration::from_secs(self.empty_timeout_secs),
            reclaim_interval: Duration::from_millis(self.reclaim_interval_ms.max(1)),
            index_cache_capacity: self.index_cache_capacity,
        }
    }

    pub fn run_for(&self) -> Option<Duration> {
        (self.run_secs > 0).then(|| Duration::from_secs(self.run_secs))
    }
}

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    /// Maps to open at startup; empty opens every map under `<root>/maps`.
    pub map_ids: Vec<i32>,
    pub server: FieldServerConfig,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        Self::from_args_with_env(args, |name| std::env::var(name).ok())
    }

    pub fn from_args_with_env<F>(args: &[String], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = args.get(1).map(PathBuf::from).ok_or(ConfigError::Usage)?;
        let map_ids = args[2..]
            .iter()
            .map(|arg| {
                arg.trim()
                    .parse::<i32>()
                    .map_err(|_| ConfigError::InvalidMapId(arg.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut server = FieldServerConfig::load(&root)?;
        server.apply_env(lookup)?;
        Ok(Self {
            root,
            map_ids,
            server,
        })
    }
}
