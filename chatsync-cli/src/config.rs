//! Client Configuration
//!
//! Configuration management for the chatsync client. The file is TOML and
//! is created with defaults on first run.

use anyhow::{Context, Result};
use chatsync_core::PreviewConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat list behavior
    #[serde(default)]
    pub previews: PreviewConfig,

    /// `watch` command behavior
    #[serde(default)]
    pub watch: WatchConfig,

    /// Storage paths
    #[serde(default)]
    pub paths: PathConfig,
}

/// `watch` command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// How often to check the data file for changes, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    pub config_dir: PathBuf,

    /// JSON file holding accounts, profiles, chats and messages
    pub data_file: PathBuf,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    /// Poll interval as a `Duration` (at least 10ms)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("chatsync");

        let data_file = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("chatsync")
            .join("data.json");

        Self {
            config_dir,
            data_file,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        PathConfig::default().config_dir.join("config.toml")
    }

    /// Load configuration from `path`, creating a default file if not found
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {:?}", path))?;
            Ok(config)
        } else {
            let mut config = Config::default();
            if let Some(dir) = path.parent() {
                config.paths.config_dir = dir.to_path_buf();
            }
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir)
            .context("Failed to create config directory")?;
        if let Some(dir) = self.paths.data_file.parent() {
            fs::create_dir_all(dir).context("Failed to create data directory")?;
        }
        Ok(())
    }
}
