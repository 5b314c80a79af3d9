// Configuration management for the ConfSignal CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/confsignal/config.json
// - Linux: ~/.config/confsignal/config.json
// - Windows: %APPDATA%\confsignal\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signaling server; `/signal` is appended when no path is given
    pub server_url: String,

    /// STUN/TURN URLs handed to the peer-connection engine
    pub ice_servers: Vec<String>,

    /// Seconds to wait for an answer before failing the session (0 = forever)
    pub answer_timeout_secs: u64,

    /// Whether this machine may publish a local stream
    pub capture_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/signal".to_string(),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            answer_timeout_secs: 30,
            capture_enabled: true,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("confsignal");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        match self.answer_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server_url" => {
                confsignal_core::transport::endpoint_url(value)?;
                self.server_url = value.trim().to_string();
            }
            "ice_servers" => {
                self.ice_servers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "answer_timeout_secs" => {
                self.answer_timeout_secs = value.parse().context("Invalid number")?;
            }
            "capture_enabled" => {
                self.capture_enabled = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "server_url" => Some(self.server_url.clone()),
            "ice_servers" => Some(self.ice_servers.join(",")),
            "answer_timeout_secs" => Some(self.answer_timeout_secs.to_string()),
            "capture_enabled" => Some(self.capture_enabled.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("server_url".to_string(), self.server_url.clone()),
            (
                "ice_servers".to_string(),
                if self.ice_servers.is_empty() {
                    "(none)".to_string()
                } else {
                    self.ice_servers.join(", ")
                },
            ),
            (
                "answer_timeout_secs".to_string(),
                match self.answer_timeout_secs {
                    0 => "disabled".to_string(),
                    secs => format!("{}s", secs),
                },
            ),
            ("capture_enabled".to_string(), self.capture_enabled.to_string()),
        ]
    }
}
