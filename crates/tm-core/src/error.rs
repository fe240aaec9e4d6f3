//! Core error types for tunnelmux

use std::path::PathBuf;
use thiserror::Error;

/// Tunnel lifecycle errors
#[derive(Error, Debug)]
pub enum TunnelError {
    /// A tunnel with the same (host, remote port) key is already registered
    #[error("tunnel already exists")]
    AlreadyExists,

    /// No tunnel registered under the given key
    #[error("tunnel not found")]
    NotFound,

    /// TCP connection to the SSH host failed
    #[error("failed to connect to host: {0}")]
    Connect(String),

    /// SSH handshake or authentication exchange failed
    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    /// The server rejected our public key
    #[error("SSH authentication rejected for user {0}")]
    AuthRejected(String),

    /// Local listener could not be bound
    #[error("failed to start local listener: {0}")]
    Bind(std::io::Error),

    /// Remote target could not be reached through the SSH transport
    #[error("remote dial failed after {attempts} attempts: {message}")]
    RemoteDial { attempts: u32, message: String },

    /// Liveness probe against the SSH transport failed
    #[error("liveness probe failed: {0}")]
    Probe(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// No usable SSH key could be located
    #[error("no usable SSH key found (set SSH_KEY_PATH or place a key in {0})")]
    NoKey(PathBuf),

    /// An SSH key exists but could not be loaded
    #[error("failed to load SSH key {path}: {message}")]
    Key { path: PathBuf, message: String },
}
