use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VibifyError};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the `KEY=value` credentials file
    pub credentials_path: PathBuf,

    /// Path to the JSON token cache
    pub token_path: PathBuf,

    /// Polling interval in seconds for the now-playing refresh
    pub poll_interval_secs: u64,

    /// How long to wait for the browser redirect during login
    pub auth_timeout_secs: u64,

    /// Window size as (width, height)
    pub window_size: (f32, f32),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("spotify_credits.txt"),
            token_path: PathBuf::from("token_info.json"),
            poll_interval_secs: 5,
            auth_timeout_secs: 180,
            window_size: (420.0, 560.0),
        }
    }
}

impl AppConfig {
    /// Get the path to the config directory
    fn config_dir() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| {
            VibifyError::ConfigError("Could not determine the user config directory".to_string())
        })?;

        Ok(base.join("vibify"))
    }

    /// Get the path to the config file
    fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Load configuration from disk, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if !config_path.exists() {
            log::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .map_err(|e| VibifyError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Ok(Self::from_json(&contents))
    }

    fn from_json(contents: &str) -> Self {
        match serde_json::from_str(contents) {
            Ok(config) => {
                log::info!("Loaded configuration");
                config
            }
            Err(e) => {
                log::warn!("Failed to parse config file ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        let config_path = Self::config_file_path()?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                VibifyError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
            log::info!("Created config directory at {:?}", config_dir);
        }

        let json = serde_json::to_string_pretty(self)?;

        fs::write(&config_path, json)
            .map_err(|e| VibifyError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", config_path);
        Ok(())
    }
}
