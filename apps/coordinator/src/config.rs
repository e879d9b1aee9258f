//! Coordinator configuration.
//!
//! Read from the TOML file named by `FILEMESH_COORDINATOR_CONFIG`
//! (`coordinator.toml` by default). A missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "FILEMESH_COORDINATOR_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "coordinator.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// RPC port (0 = OS-assigned).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Metadata snapshot location.
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,

    /// Chunk size handed to clients, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// A node without a heartbeat for this long stops receiving uploads.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Uploads still in progress after this long are reaped.
    #[serde(default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: u64,
}

fn default_listen_port() -> u16 {
    9090
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("data/coordinator/metadata.json")
}

fn default_chunk_size() -> u32 {
    1024 * 1024
}

fn default_node_timeout_ms() -> u64 {
    30_000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_cleanup_timeout_ms() -> u64 {
    3_600_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            metadata_path: default_metadata_path(),
            chunk_size: default_chunk_size(),
            node_timeout_ms: default_node_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            cleanup_timeout_ms: default_cleanup_timeout_ms(),
        }
    }
}

impl Config {
    /// Loads from the configured path.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}
