//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the tunnel daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path of the control socket
    pub socket_path: PathBuf,

    /// Port the SSH server listens on for every tunneled host
    pub ssh_port: u16,

    /// Username for SSH authentication
    pub username: String,

    /// Explicit private key path. When unset the daemon falls back to
    /// `SSH_KEY_PATH` and the well-known names under `~/.ssh`.
    pub key_path: Option<PathBuf>,

    /// TCP connect timeout towards the SSH host
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::ipc::default_socket_path(),
            ssh_port: 22,
            username: whoami::username(),
            key_path: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunnelmux")
        .join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Helper module for Duration serialization as seconds
///
/// Serializes `std::time::Duration` as a u64 representing seconds, which is
/// more human-readable in TOML configuration files.
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.ssh_port, 22);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/tunnel.sock"));
        assert!(config.key_path.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: DaemonConfig = toml::from_str("ssh_port = 2222").unwrap();
        assert_eq!(config.ssh_port, 2222);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_duration_secs_roundtrip() {
        let config = DaemonConfig {
            connect_timeout: Duration::from_secs(12),
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("connect_timeout = 12"));
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.connect_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config::<DaemonConfig>(Path::new("/nonexistent/tunnelmux.toml"));
        assert!(matches!(err, Err(ConfigError::NotFound(_))));
    }
}
