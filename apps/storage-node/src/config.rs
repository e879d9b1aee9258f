//! Storage node configuration.
//!
//! Read from the TOML file named by `FILEMESH_NODE_CONFIG` (`node.toml` by
//! default). A missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "FILEMESH_NODE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "node.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Root directory for upload data.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// `host:port` of the coordinator to register with.
    #[serde(default = "default_coordinator_address")]
    pub coordinator_address: String,

    /// Host clients should use to reach this node (hostname by default).
    #[serde(default = "default_advertised_host")]
    pub advertised_host: String,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Piece size for downloads that do not name one.
    #[serde(default = "default_download_chunk_size")]
    pub download_chunk_size: u32,
}

fn default_listen_port() -> u16 {
    9091
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/node")
}

fn default_coordinator_address() -> String {
    "127.0.0.1:9090".into()
}

fn default_advertised_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "127.0.0.1".into())
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_download_chunk_size() -> u32 {
    1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            storage_path: default_storage_path(),
            coordinator_address: default_coordinator_address(),
            advertised_host: default_advertised_host(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            download_chunk_size: default_download_chunk_size(),
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
        Ok(toml::from_str(&content)?)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.listen_port, 9091);
        assert_eq!(config.storage_path, PathBuf::from("data/node"));
        assert_eq!(config.coordinator_address, "127.0.0.1:9090");
        assert!(!config.advertised_host.is_empty());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.download_chunk_size, 1_048_576);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config =
            toml::from_str("advertised_host = \"node-a.lan\"\nlisten_port = 9191").unwrap();
        assert_eq!(config.advertised_host, "node-a.lan");
        assert_eq!(config.listen_port, 9191);
        assert_eq!(config.heartbeat_interval_ms, 5_000);
    }

    #[test]
    fn missing_file_means_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.listen_port, 9091);
    }

    #[test]
    fn toml_roundtrip() {
        let config = Config {
            storage_path: PathBuf::from("/srv/filemesh"),
            ..Config::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
