//! Control-socket protocol between the CLI and the daemon
//!
//! Newline-delimited JSON messages over a Unix-domain socket. Every request
//! is answered with exactly one response line.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Get the default control socket path
pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/tunnel.sock")
}

/// Request from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Create one tunnel
    CreateTunnel {
        host: String,
        local_port: u16,
        remote_port: u16,
    },

    /// Close the tunnel keyed by (host, remote_port)
    CloseTunnel { host: String, remote_port: u16 },

    /// Close every registered tunnel
    CloseAllTunnels,

    /// Snapshot all registered tunnels
    ListTunnels,
}

/// Response from the daemon to the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Generic success
    Ok,

    /// Result of `CloseAllTunnels`: number of tunnels present at entry
    Count { count: usize },

    /// Result of `ListTunnels`
    Tunnels { tunnels: Vec<TunnelInfo> },

    /// Error response
    Error { message: String },
}

/// Snapshot of one tunnel's identity and traffic counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    /// Remote host the tunnel is attached to
    pub host: String,
    /// Local listening port
    pub local_port: u16,
    /// Target port on the remote host
    pub remote_port: u16,
    /// Unix timestamp of the last observed activity
    pub last_activity: u64,
    /// Unix timestamp of tunnel creation
    pub created_at: u64,
    /// Total bytes copied local to remote
    pub bytes_sent: u64,
    /// Total bytes copied remote to local
    pub bytes_received: u64,
    /// Current upstream bandwidth in bytes per second
    pub bandwidth_up: f64,
    /// Current downstream bandwidth in bytes per second
    pub bandwidth_down: f64,
    /// Forwarding sessions currently in flight
    pub active_conns: i32,
    /// Forwarding sessions accepted over the tunnel's lifetime
    pub total_conns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> TunnelInfo {
        TunnelInfo {
            host: "server1".to_string(),
            local_port: 8080,
            remote_port: 80,
            last_activity: 1_700_000_100,
            created_at: 1_700_000_000,
            bytes_sent: 42,
            bytes_received: 1024,
            bandwidth_up: 12.5,
            bandwidth_down: 300.0,
            active_conns: 1,
            total_conns: 7,
        }
    }

    #[test]
    fn test_request_serialization() {
        let req = Request::CreateTunnel {
            host: "server1".to_string(),
            local_port: 8080,
            remote_port: 80,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("create_tunnel"));
        assert!(json.contains("local_port"));

        let decoded: Request = serde_json::from_str(&json).unwrap();
        match decoded {
            Request::CreateTunnel {
                host,
                local_port,
                remote_port,
            } => {
                assert_eq!(host, "server1");
                assert_eq!(local_port, 8080);
                assert_eq!(remote_port, 80);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unit_requests_roundtrip() {
        for req in [Request::CloseAllTunnels, Request::ListTunnels] {
            let json = serde_json::to_string(&req).unwrap();
            let decoded: Request = serde_json::from_str(&json).unwrap();
            assert_eq!(
                std::mem::discriminant(&req),
                std::mem::discriminant(&decoded)
            );
        }
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Tunnels {
            tunnels: vec![sample_info()],
        };

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("bandwidthUp"));

        let decoded: Response = serde_json::from_str(&json).unwrap();
        match decoded {
            Response::Tunnels { tunnels } => {
                assert_eq!(tunnels.len(), 1);
                assert_eq!(tunnels[0].host, "server1");
                assert_eq!(tunnels[0].total_conns, 7);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_empty_tunnel_list_serializes() {
        let resp = Response::Tunnels { tunnels: vec![] };
        let json = serde_json::to_string(&resp).unwrap();
        let decoded: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded, Response::Tunnels { tunnels } if tunnels.is_empty()));
    }

    #[test]
    fn test_error_response() {
        let resp = Response::Error {
            message: "tunnel already exists".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("tunnel already exists"));
    }
}
