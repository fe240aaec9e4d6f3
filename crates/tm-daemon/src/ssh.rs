//! Outbound SSH session management
//!
//! One [`SshSession`] wraps one live SSH client connection. The connector
//! performs the TCP dial with OS keepalive enabled, runs the handshake under
//! a deadline, and authenticates with the shared key. Each session carries a
//! watch task that raises the owning tunnel's reconnect signal when the
//! transport dies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::PublicKey;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tm_core::error::TunnelError;

use crate::auth::SshAuth;

/// Interval of the in-band `keepalive@openssh.com` requests.
pub(crate) const SSH_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// OS-level keepalive period on the raw SSH socket.
const TCP_KEEPALIVE_PERIOD: Duration = Duration::from_secs(15);

/// Deadline for the SSH handshake and authentication exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Wall-clock deadline for a liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds SSH sessions towards arbitrary hosts with fixed credentials
pub struct SshConnector {
    ssh_port: u16,
    connect_timeout: Duration,
    auth: Arc<SshAuth>,
}

impl SshConnector {
    /// Create a new connector
    pub fn new(ssh_port: u16, connect_timeout: Duration, auth: Arc<SshAuth>) -> Self {
        Self {
            ssh_port,
            connect_timeout,
            auth,
        }
    }

    /// Establish one SSH session to `host`
    pub async fn connect(&self, host: &str) -> Result<SshSession, TunnelError> {
        let addr = format!("{}:{}", host, self.ssh_port);

        tracing::debug!("connecting to {}", addr);
        let tcp = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TunnelError::Connect(format!("connection to {} timed out", addr)))?
            .map_err(|e| TunnelError::Connect(format!("{}: {}", addr, e)))?;

        // OS keepalive notices half-dead links between in-band keepalives;
        // linger(0) keeps dead sessions from lingering in FIN_WAIT on teardown.
        let keepalive = socket2::TcpKeepalive::new().with_time(TCP_KEEPALIVE_PERIOD);
        socket2::SockRef::from(&tcp)
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| TunnelError::Connect(format!("failed to enable keepalive: {}", e)))?;
        tcp.set_linger(Some(Duration::ZERO))
            .map_err(|e| TunnelError::Connect(format!("failed to set linger: {}", e)))?;

        let config = Arc::new(client::Config {
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            inactivity_timeout: None,
            ..Default::default()
        });

        let mut handle = timeout(
            HANDSHAKE_TIMEOUT,
            client::connect_stream(config, tcp, ClientHandler),
        )
        .await
        .map_err(|_| TunnelError::Handshake(format!("{}: handshake timed out", addr)))?
        .map_err(|e| TunnelError::Handshake(e.to_string()))?;

        let authenticated = handle
            .authenticate_publickey(&self.auth.username, Arc::clone(&self.auth.key))
            .await
            .map_err(|e| TunnelError::Handshake(format!("authentication error: {}", e)))?;

        if !authenticated {
            return Err(TunnelError::AuthRejected(self.auth.username.clone()));
        }

        tracing::debug!("SSH session to {} established", addr);
        Ok(SshSession {
            handle,
            watch_cancel: CancellationToken::new(),
        })
    }
}

/// One live SSH client connection
pub struct SshSession {
    handle: Handle<ClientHandler>,
    watch_cancel: CancellationToken,
}

impl SshSession {
    /// Open a direct-tcpip channel to `localhost:<port>` on the remote side
    pub async fn dial_remote(&self, port: u16) -> Result<Channel<Msg>, russh::Error> {
        self.handle
            .channel_open_direct_tcpip("localhost", port as u32, "127.0.0.1", 0)
            .await
    }

    /// Check transport liveness with a bounded control round-trip.
    ///
    /// Never blocks past [`PROBE_TIMEOUT`].
    pub async fn probe(&self) -> Result<(), TunnelError> {
        match timeout(PROBE_TIMEOUT, self.handle.channel_open_session()).await {
            Ok(Ok(mut channel)) => {
                let _ = channel.close().await;
                Ok(())
            }
            Ok(Err(e)) => Err(TunnelError::Probe(e.to_string())),
            Err(_) => Err(TunnelError::Probe("timed out".to_string())),
        }
    }

    /// Whether the underlying transport has shut down
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Start the background task that raises `reconnect` once the transport
    /// dies. The embedded client sends `keepalive@openssh.com` on its own
    /// (see [`SSH_KEEPALIVE_INTERVAL`]) and closes the transport after
    /// missed replies; this task turns that closure into the signal.
    pub fn spawn_keepalive_watch(self: &Arc<Self>, reconnect: Arc<Notify>) {
        let session = Arc::clone(self);
        let cancel = self.watch_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SSH_KEEPALIVE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if session.is_closed() {
                            tracing::debug!("SSH transport closed, requesting reconnect");
                            reconnect.notify_one();
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stop the keepalive watch without closing the transport. Used when the
    /// session is replaced but in-flight channels still run against it.
    pub fn stop_watch(&self) {
        self.watch_cancel.cancel();
    }

    /// Tear the session down. Idempotent.
    pub async fn close(&self) {
        self.watch_cancel.cancel();
        if !self.handle.is_closed() {
            let _ = self
                .handle
                .disconnect(Disconnect::ByApplication, "closing", "en")
                .await;
        }
    }
}

/// Client-side SSH event handler.
///
/// Host-key verification policy is inherited from the deployment; the daemon
/// accepts the server key, like `ssh -o StrictHostKeyChecking=no`.
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
