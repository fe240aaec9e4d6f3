//! tm-core: Shared types and configuration for tunnelmux
//!
//! This crate provides the error types, the control-socket protocol, the
//! daemon configuration, and the transport-error classification shared by
//! the daemon and the CLI.

pub mod classify;
pub mod config;
pub mod error;
pub mod ipc;
pub mod time;

pub use error::{ConfigError, TunnelError};
pub use ipc::{Request, Response, TunnelInfo};
