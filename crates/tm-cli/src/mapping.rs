//! Port mapping argument parsing

use anyhow::{bail, Result};

/// One `[local:]remote` port mapping from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl PortMapping {
    /// Parse `"8080"` (same port both sides) or `"8080:80"`
    pub fn parse(arg: &str) -> Result<Self> {
        match arg.split_once(':') {
            Some((local, remote)) => {
                let local = parse_port(local)?;
                let remote = parse_port(remote)?;
                Ok(Self { local, remote })
            }
            None => {
                let port = parse_port(arg)?;
                Ok(Self {
                    local: port,
                    remote: port,
                })
            }
        }
    }
}

fn parse_port(s: &str) -> Result<u16> {
    match s.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => bail!("invalid port '{}'", s),
    }
}
