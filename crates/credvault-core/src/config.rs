//! Application configuration management.
//!
//! Configuration is stored as JSON at `<config_dir>/credvault/config.json`.
//! A missing file means defaults. `CREDVAULT_BASE_DIR`, `CREDVAULT_BACKEND`
//! and `CREDVAULT_API_URL` override the file when set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vault::{normalize_base_dir, BackendPreference, VaultConfig, DEFAULT_SERVICE_NAME};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "credvault";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Log directory name under the vault base directory
const LOG_DIR: &str = "logs";

pub const ENV_BASE_DIR: &str = "CREDVAULT_BASE_DIR";
pub const ENV_BACKEND: &str = "CREDVAULT_BACKEND";
pub const ENV_API_URL: &str = "CREDVAULT_API_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vault directory; `<config_dir>/credvault` when unset
    pub base_dir: Option<PathBuf>,
    pub backend: BackendPreference,
    pub service_name: String,
    pub subprocess_timeout_secs: u64,
    pub api_base_url: Option<String>,
    /// Rolling log files go here; `<base_dir>/logs` when unset
    pub log_dir: Option<PathBuf>,
    pub max_log_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: None,
            backend: BackendPreference::Auto,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            subprocess_timeout_secs: 10,
            api_base_url: None,
            log_dir: None,
            max_log_files: 5,
        }
    }
}

impl Config {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::app_dir()?.join(CONFIG_FILE))
    }

    fn app_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME))
    }

    /// Apply overrides from `lookup`; blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup(ENV_BASE_DIR) {
            self.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.backend = backend
                .parse()
                .map_err(|e: crate::error::VaultError| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = Some(url.trim().to_string());
        }
        Ok(())
    }

    /// Absolute vault directory. Rejects paths with `..` components.
    pub fn base_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => Self::app_dir()?,
        };
        normalize_base_dir(&dir).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn log_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.base_dir()?.join(LOG_DIR)),
        }
    }

    pub fn vault_config(&self) -> Result<VaultConfig, ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("service_name cannot be empty".to_string()));
        }
        if self.subprocess_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "subprocess_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(VaultConfig {
            base_dir: self.base_dir()?,
            preference: self.backend,
            service_name: self.service_name.clone(),
            subprocess_timeout: Duration::from_secs(self.subprocess_timeout_secs),
        })
    }
}
