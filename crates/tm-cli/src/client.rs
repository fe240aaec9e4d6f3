//! Client for the daemon's control socket
//!
//! Newline-delimited JSON over a Unix stream socket, one response line per
//! request. The connection is kept open across requests so watch mode does
//! not redial every second.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use tm_core::ipc::{default_socket_path, Request, Response, TunnelInfo};

/// Client for communicating with the tunnel daemon
pub struct DaemonClient {
    path: PathBuf,
    stream: Option<UnixStream>,
}

impl DaemonClient {
    /// Create a new client against the default socket path
    pub fn new() -> Self {
        Self::with_path(default_socket_path())
    }

    /// Create a new client against a custom socket path
    pub fn with_path(path: PathBuf) -> Self {
        Self { path, stream: None }
    }

    /// Create one tunnel
    pub async fn create_tunnel(
        &mut self,
        host: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<()> {
        let request = Request::CreateTunnel {
            host: host.to_string(),
            local_port,
            remote_port,
        };

        match self.send_request(request).await? {
            Response::Ok => Ok(()),
            Response::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("unexpected response: {:?}", other),
        }
    }

    /// Close the tunnel keyed by (host, remote_port)
    pub async fn close_tunnel(&mut self, host: &str, remote_port: u16) -> Result<()> {
        let request = Request::CloseTunnel {
            host: host.to_string(),
            remote_port,
        };

        match self.send_request(request).await? {
            Response::Ok => Ok(()),
            Response::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("unexpected response: {:?}", other),
        }
    }

    /// Close every tunnel; returns how many were present
    pub async fn close_all_tunnels(&mut self) -> Result<usize> {
        match self.send_request(Request::CloseAllTunnels).await? {
            Response::Count { count } => Ok(count),
            Response::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("unexpected response: {:?}", other),
        }
    }

    /// Snapshot all active tunnels
    pub async fn list_tunnels(&mut self) -> Result<Vec<TunnelInfo>> {
        match self.send_request(Request::ListTunnels).await? {
            Response::Tunnels { tunnels } => Ok(tunnels),
            Response::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("unexpected response: {:?}", other),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = UnixStream::connect(&self.path).await.with_context(|| {
            format!(
                "failed to connect to the tunnel daemon at {}. Is tunneld running?",
                self.path.display()
            )
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send_request(&mut self, request: Request) -> Result<Response> {
        self.connect().await?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("not connected"))?;

        let mut json = serde_json::to_string(&request)?;
        json.push('\n');
        stream.write_all(json.as_bytes()).await?;

        let (reader, _writer) = stream.split();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await?;
        if line.is_empty() {
            anyhow::bail!("daemon closed the connection");
        }

        let response: Response = serde_json::from_str(&line)?;
        Ok(response)
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}
