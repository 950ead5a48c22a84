//! Configuration loading
//!
//! Multi-device YAML configuration with `${VAR}` / `${VAR:-default}`
//! environment substitution, falling back to plain environment variables
//! when no file is present. Each monitored device gets its own store
//! directory under the shared data dir.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SentinelError};

/// Connection settings for a single appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_https")]
    pub https: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    5001
}

fn default_https() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_device_name() -> String {
    "default".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Application configuration with multi-device support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_device_name")]
    pub default: String,
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from a YAML file, or from environment variables
    /// when no file can be found.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = find_config_file(config_path) {
            return Self::from_yaml_file(&path);
        }
        Self::from_env()
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let substituted = substitute_env_vars(contents);
        let config: AppConfig = serde_yaml::from_str(&substituted)?;
        Ok(config)
    }

    /// Minimal single-device configuration from `SENTINEL_*` variables.
    fn from_env() -> Result<Self> {
        let host = env::var("SENTINEL_HOST").map_err(|_| {
            SentinelError::ConfigError(
                "no configuration file found and SENTINEL_HOST is not set".to_string(),
            )
        })?;

        let device = DeviceConfig {
            host,
            port: env::var("SENTINEL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_port),
            https: env::var("SENTINEL_HTTPS")
                .ok()
                .map(|v| v != "false" && v != "0")
                .unwrap_or_else(default_https),
            username: env::var("SENTINEL_USERNAME").unwrap_or_default(),
            password: env::var("SENTINEL_PASSWORD").unwrap_or_default(),
            timeout_secs: env::var("SENTINEL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout_secs),
        };

        let mut devices = HashMap::new();
        devices.insert(default_device_name(), device);

        Ok(Self {
            default: default_device_name(),
            devices,
            data_dir: env::var("SENTINEL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir()),
        })
    }

    /// Device configuration by name, or the default device.
    pub fn device(&self, name: Option<&str>) -> Result<&DeviceConfig> {
        let target = name.unwrap_or(&self.default);
        self.devices.get(target).ok_or_else(|| {
            SentinelError::ConfigError(format!("device '{}' not found in configuration", target))
        })
    }

    pub fn device_names(&self) -> Vec<&str> {
        self.devices.keys().map(|k| k.as_str()).collect()
    }

    /// Store directory for a device. Devices never share a store.
    pub fn device_data_dir(&self, name: Option<&str>) -> PathBuf {
        let target = name.unwrap_or(&self.default);
        self.data_dir.join(target)
    }
}

fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    for candidate in ["config/sentinel.yaml", "sentinel.yaml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
fn substitute_env_vars(contents: &str) -> String {
    let pattern = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    pattern
        .replace_all(contents, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}
