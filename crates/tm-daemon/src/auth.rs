//! SSH credential discovery
//!
//! Resolves the private key the daemon authenticates with, once at startup.
//! Precedence: `SSH_KEY_PATH`, then the configured `key_path`, then the
//! well-known names under `~/.ssh`. `SSH_KEY_PASSPHRASE` is retried for
//! encrypted keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh_keys::key::KeyPair;

use tm_core::config::DaemonConfig;
use tm_core::error::ConfigError;

/// Key names tried under `~/.ssh`, in order of preference.
const DEFAULT_KEY_NAMES: &[&str] = &["id_ed25519", "id_rsa", "id_ecdsa"];

/// Credentials the daemon presents to every SSH host
pub struct SshAuth {
    /// Username for SSH authentication
    pub username: String,
    /// Private key, shared across all sessions
    pub key: Arc<KeyPair>,
}

/// Resolve credentials from the environment and the daemon configuration
pub fn discover(config: &DaemonConfig) -> Result<SshAuth, ConfigError> {
    let key = locate_key(config)?;
    Ok(SshAuth {
        username: config.username.clone(),
        key: Arc::new(key),
    })
}

fn locate_key(config: &DaemonConfig) -> Result<KeyPair, ConfigError> {
    if let Ok(path) = std::env::var("SSH_KEY_PATH") {
        let path = PathBuf::from(path);
        match try_load(&path) {
            Ok(key) => {
                tracing::info!("loaded SSH key from SSH_KEY_PATH: {}", path.display());
                return Ok(key);
            }
            Err(e) => tracing::warn!("could not use SSH_KEY_PATH: {}", e),
        }
    }

    if let Some(path) = &config.key_path {
        match try_load(path) {
            Ok(key) => {
                tracing::info!("loaded configured SSH key: {}", path.display());
                return Ok(key);
            }
            Err(e) => tracing::warn!("could not use configured key: {}", e),
        }
    }

    let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");
    for name in DEFAULT_KEY_NAMES {
        let path = ssh_dir.join(name);
        if !path.exists() {
            continue;
        }
        match try_load(&path) {
            Ok(key) => {
                tracing::info!("loaded SSH key: {}", path.display());
                return Ok(key);
            }
            Err(e) => tracing::warn!("skipping SSH key: {}", e),
        }
    }

    Err(ConfigError::NoKey(ssh_dir))
}

fn try_load(path: &Path) -> Result<KeyPair, ConfigError> {
    match russh_keys::load_secret_key(path, None) {
        Ok(key) => Ok(key),
        Err(first) => {
            // Encrypted keys fail the passphrase-less load; retry with the
            // passphrase from the environment when one is set.
            if let Ok(passphrase) = std::env::var("SSH_KEY_PASSPHRASE") {
                russh_keys::load_secret_key(path, Some(&passphrase)).map_err(|e| {
                    ConfigError::Key {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    }
                })
            } else {
                Err(ConfigError::Key {
                    path: path.to_path_buf(),
                    message: format!(
                        "{} (set SSH_KEY_PASSPHRASE if the key is encrypted)",
                        first
                    ),
                })
            }
        }
    }
}
