//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WebSocket server to, 0 for auto-discovery.
    /// Override: `MILO_BIND_PORT`
    pub bind_port: u16,

    /// Directory holding `settings.json`, `podcast_data.json`, `routing.env`.
    /// Override: `MILO_DATA_DIR`
    pub data_dir: PathBuf,

    /// Whether to pass `--user` to `systemctl` (unprivileged orchestrator).
    /// Override: `MILO_SYSTEMD_USER_MODE`
    pub systemd_user_mode: bool,

    /// JSON-RPC endpoint of the multiroom transport.
    /// Override: `MILO_TRANSPORT_ENDPOINT`
    pub transport_endpoint: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = milo_core::Config::default();
        Self {
            bind_port: core.bind_port,
            data_dir: core.data_dir,
            systemd_user_mode: core.systemd_user_mode,
            transport_endpoint: core.transport_endpoint,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MILO_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("MILO_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("MILO_SYSTEMD_USER_MODE") {
            if let Ok(user_mode) = val.parse() {
                self.systemd_user_mode = user_mode;
            }
        }

        if let Ok(val) = std::env::var("MILO_TRANSPORT_ENDPOINT") {
            self.transport_endpoint = val;
        }
    }

    /// Converts to milo-core's bootstrap `Config` type.
    pub fn to_core_config(&self) -> milo_core::Config {
        milo_core::Config {
            data_dir: self.data_dir.clone(),
            systemd_user_mode: self.systemd_user_mode,
            transport_endpoint: self.transport_endpoint.clone(),
            bind_port: self.bind_port,
        }
    }
}
