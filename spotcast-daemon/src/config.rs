//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spotcast_broadcaster::config::{DEFAULT_IDLE_TIMEOUT, DEFAULT_OUTBOUND_BUFFER, DEFAULT_PATH};
use spotcast_broadcaster::ServerConfig;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Where this config was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,

    /// WebSocket listen address
    pub listen_addr: String,

    /// Upgrade path for the availability socket
    pub ws_path: String,

    /// Close connections silent for this long (seconds)
    pub idle_timeout_secs: u64,

    /// Per-connection outbound queue length
    pub outbound_buffer: usize,

    /// Occupancy feed socket. Empty means the default under the runtime dir.
    pub feed_socket_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            listen_addr: "127.0.0.1:8000".to_string(),
            ws_path: DEFAULT_PATH.to_string(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            feed_socket_path: String::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from `<config_dir>/spotcast/config.toml`, writing defaults if missing
    pub fn load() -> Result<Self> {
        let config_path =
            spotcast_paths::get_config_file_path().context("Failed to locate config file")?;
        Self::load_from(&config_path)
    }

    /// Load from an explicit path, writing defaults if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: DaemonConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

            config.config_path = config_path.to_path_buf();
            Ok(config)
        } else {
            let config = Self {
                config_path: config_path.to_path_buf(),
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_path(self.ws_path.clone())
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_outbound_buffer(self.outbound_buffer)
    }

    /// Feed socket location, falling back to the runtime dir
    pub fn feed_socket_path(&self) -> Result<PathBuf> {
        if self.feed_socket_path.is_empty() {
            spotcast_paths::get_feed_socket_path().context("Failed to locate feed socket")
        } else {
            Ok(PathBuf::from(&self.feed_socket_path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = DaemonConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.listen_addr, "127.0.0.1:8000");
        assert_eq!(config.ws_path, "/api/v1/ws");
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.outbound_buffer, 64);
        assert_eq!(config.config_path, path);

        let reloaded = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_addr = \"0.0.0.0:9000\"\nidle_timeout_secs = 5\n").unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.idle_timeout_secs, 5);
        assert_eq!(config.outbound_buffer, 64);

        let server = config.server_config();
        assert_eq!(server.idle_timeout, Duration::from_secs(5));
        assert_eq!(server.path, "/api/v1/ws");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_addr = [").unwrap();

        assert!(DaemonConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_explicit_feed_socket_path() {
        let config = DaemonConfig {
            feed_socket_path: "/tmp/spotcast-test/feed.sock".to_string(),
            ..DaemonConfig::default()
        };
        assert_eq!(
            config.feed_socket_path().unwrap(),
            PathBuf::from("/tmp/spotcast-test/feed.sock")
        );
    }
}
