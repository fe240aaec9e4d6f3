//! Control server on the Unix socket
//!
//! Thin adapter between the wire protocol and the registry: one JSON line
//! in, one JSON line out, no state per client beyond the stream itself.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use tm_core::ipc::{Request, Response};

use crate::registry::TunnelRegistry;

/// Serves control requests against a registry
pub struct RpcServer {
    registry: Arc<TunnelRegistry>,
}

impl RpcServer {
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        Self { registry }
    }

    /// Accept control clients until `cancel` fires
    pub async fn run(&self, listener: UnixListener, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("control server shutting down");
                    break;
                }

                result = listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, registry).await {
                                tracing::debug!("control client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("failed to accept control client: {}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

async fn handle_client(stream: UnixStream, registry: Arc<TunnelRegistry>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(request, &registry).await,
            Err(e) => Response::Error {
                message: format!("malformed request: {}", e),
            },
        };
        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
    }
    Ok(())
}

async fn dispatch(request: Request, registry: &TunnelRegistry) -> Response {
    match request {
        Request::CreateTunnel {
            host,
            local_port,
            remote_port,
        } => {
            tracing::info!(
                "creating tunnel: {}:{} -> localhost:{}",
                host,
                remote_port,
                local_port
            );
            match registry.create(host, local_port, remote_port).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }

        Request::CloseTunnel { host, remote_port } => {
            tracing::info!("closing tunnel: {}:{}", host, remote_port);
            match registry.close(&host, remote_port) {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }

        Request::CloseAllTunnels => {
            let count = registry.close_all();
            tracing::info!("closed {} tunnel(s)", count);
            Response::Count { count }
        }

        Request::ListTunnels => Response::Tunnels {
            tunnels: registry.list(),
        },
    }
}
