use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, retry::RetryPolicy};

/// Application name used for data directory paths
pub const APP_NAME: &str = "skool";

/// Config file name inside the data directory
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_ENDPOINT: &str = "http://localhost:8000";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL without trailing slash
    pub api_endpoint: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Where the durable login token lives
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            timeout_secs: 30,
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            backoff_ms: 1000,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load `config.json` from the data directory if present, then apply
    /// `SKOOL_*` environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;

        let path = config.data_dir()?.join(CONFIG_FILE);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            config = serde_json::from_str(&contents).map_err(|e| {
                Error::Config(format!("Invalid config file {}: {}", path.display(), e))
            })?;
            // environment wins over the file
            config.apply_env(|key| std::env::var(key).ok())?;
            tracing::debug!(path = %path.display(), "Loaded config file");
        }

        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("SKOOL_API_ENDPOINT") {
            self.api_endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup("SKOOL_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup("SKOOL_MAX_ATTEMPTS") {
            self.max_attempts = parse_var("SKOOL_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("SKOOL_BACKOFF_MS") {
            self.backoff_ms = parse_var("SKOOL_BACKOFF_MS", &value)?;
        }
        if let Some(value) = lookup("SKOOL_TIMEOUT_SECS") {
            self.timeout_secs = parse_var("SKOOL_TIMEOUT_SECS", &value)?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    /// Configured data directory, or the platform default.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(APP_NAME),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, value)))
}

fn default_data_dir(app_name: &str) -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|home| {
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join(app_name)
            })
            .ok_or_else(|| Error::Config("Cannot determine data directory".to_string()))
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(data_dir) = std::env::var_os("XDG_DATA_HOME") {
            Ok(PathBuf::from(data_dir).join(app_name))
        } else if let Some(home) = std::env::var_os("HOME") {
            Ok(PathBuf::from(home)
                .join(".local")
                .join("share")
                .join(app_name))
        } else {
            Err(Error::Config("Cannot determine data directory".to_string()))
        }
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA")
            .map(|dir| PathBuf::from(dir).join(app_name))
            .ok_or_else(|| Error::Config("Cannot determine data directory".to_string()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = app_name;
        Err(Error::Config(
            "Unsupported operating system for data directory detection".to_string(),
        ))
    }
}
