//! Soloist configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::key::DEFAULT_KEY;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordination key shared by every instance of the application
    pub key: String,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Coordination timeouts and retry behavior
    pub coordination: CoordinationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            log_level: None,
            coordination: CoordinationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .soloist.yml
        let local_config = PathBuf::from(".soloist.yml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        // User config: ~/.config/soloist/soloist.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("soloist").join("soloist.yml");
            if user_config.exists() {
                return Self::load_from_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

/// Coordination timeouts and retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Timeout for connecting to the owner
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for each reply from the owner
    #[serde(rename = "read-timeout-ms")]
    pub read_timeout_ms: u64,

    /// Claim attempts before giving up on enforcement
    #[serde(rename = "max-rounds")]
    pub max_rounds: u32,

    /// Pause before re-claiming after an unreachable owner
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// Directory holding the coordination sockets
    #[serde(rename = "runtime-dir")]
    pub runtime_dir: Option<PathBuf>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            read_timeout_ms: 10_000,
            max_rounds: 5,
            retry_backoff_ms: 100,
            runtime_dir: None,
        }
    }
}

impl CoordinationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Runtime directory, falling back to the per-user default
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(crate::key::default_runtime_dir)
    }
}
