//! tm-cli: CLI for the tunnelmux daemon

pub mod client;
pub mod mapping;
pub mod output;

pub use client::DaemonClient;
pub use mapping::PortMapping;
