//! The per-tunnel engine
//!
//! A tunnel owns one SSH session, one local listener, its activity meter,
//! and the set of live forwarding sessions. Three background tasks drive it:
//! the accept loop, the health loop, and the reconnect controller. Shutdown
//! fans out through a single cancellation token; the reconnect signal is an
//! edge-triggered, coalescing notify.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use tm_core::classify;
use tm_core::error::TunnelError;
use tm_core::ipc::TunnelInfo;

use crate::forward::{self, SessionContext};
use crate::meter::ActivityMeter;
use crate::ssh::{SshConnector, SshSession};

/// Interval between liveness checks when the tunnel is idle.
const HEALTH_INTERVAL: Duration = Duration::from_secs(15);

/// How long a replaced SSH session stays alive for in-flight channels.
const OLD_SESSION_GRACE: Duration = Duration::from_secs(30);

/// Poll interval while waiting for forwarding sessions to drain.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle states of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Starting,
    Running,
    Reconnecting,
    Draining,
    Closed,
}

/// Immutable identity of a tunnel
#[derive(Debug, Clone)]
pub struct TunnelSpec {
    pub host: String,
    pub local_port: u16,
    pub remote_port: u16,
}

/// One local listener forwarding to one remote host:port over SSH
pub struct Tunnel {
    spec: TunnelSpec,
    meter: Arc<ActivityMeter>,
    connector: Arc<SshConnector>,
    /// Current SSH session. Replaced atomically by the reconnect
    /// controller; forwarding sessions borrow whichever value is current.
    ssh_tx: watch::Sender<Arc<SshSession>>,
    reconnect: Arc<Notify>,
    shutdown: CancellationToken,
    state: Mutex<TunnelState>,
}

impl Tunnel {
    /// Establish the SSH session, bind the local listener, and start the
    /// tunnel's background tasks. On failure every acquired resource is
    /// released and nothing keeps running.
    pub async fn open(
        spec: TunnelSpec,
        connector: Arc<SshConnector>,
    ) -> Result<Arc<Self>, TunnelError> {
        let ssh = connector.connect(&spec.host).await?;

        let listener = match TcpListener::bind(("localhost", spec.local_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                ssh.close().await;
                return Err(TunnelError::Bind(e));
            }
        };

        let ssh = Arc::new(ssh);
        let (ssh_tx, _) = watch::channel(Arc::clone(&ssh));
        let reconnect = Arc::new(Notify::new());

        let tunnel = Arc::new(Self {
            spec,
            meter: Arc::new(ActivityMeter::new()),
            connector,
            ssh_tx,
            reconnect: Arc::clone(&reconnect),
            shutdown: CancellationToken::new(),
            state: Mutex::new(TunnelState::Starting),
        });

        ssh.spawn_keepalive_watch(reconnect);
        tunnel.spawn_accept_loop(listener);
        tunnel.spawn_health_loop();
        tunnel.spawn_reconnect_controller();
        tunnel.set_state(TunnelState::Running);

        tracing::info!(
            host = %tunnel.spec.host,
            local_port = tunnel.spec.local_port,
            remote_port = tunnel.spec.remote_port,
            "tunnel established"
        );
        Ok(tunnel)
    }

    /// Stop accepting, cancel every forwarding session, and release the SSH
    /// session once they have drained. Returns immediately; idempotent.
    pub fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("tunnel state poisoned");
            if matches!(*state, TunnelState::Draining | TunnelState::Closed) {
                return;
            }
            *state = TunnelState::Draining;
        }
        self.shutdown.cancel();

        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            while tunnel.meter.active_conns() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
            let ssh = tunnel.ssh_tx.borrow().clone();
            ssh.close().await;
            *tunnel.state.lock().expect("tunnel state poisoned") = TunnelState::Closed;
            tracing::info!(
                host = %tunnel.spec.host,
                remote_port = tunnel.spec.remote_port,
                "tunnel closed"
            );
        });
    }

    /// Whether the tunnel has fully shut down
    pub fn is_closed(&self) -> bool {
        *self.state.lock().expect("tunnel state poisoned") == TunnelState::Closed
    }

    /// Point-in-time view for listing
    pub fn snapshot(&self) -> TunnelInfo {
        let view = self.meter.snapshot();
        TunnelInfo {
            host: self.spec.host.clone(),
            local_port: self.spec.local_port,
            remote_port: self.spec.remote_port,
            last_activity: view.last_activity,
            created_at: view.created_at,
            bytes_sent: view.bytes_sent,
            bytes_received: view.bytes_received,
            bandwidth_up: view.bandwidth_up,
            bandwidth_down: view.bandwidth_down,
            active_conns: view.active_conns,
            total_conns: view.total_conns,
        }
    }

    fn set_state(&self, next: TunnelState) {
        let mut state = self.state.lock().expect("tunnel state poisoned");
        // Draining and Closed are terminal for the background tasks; they
        // must not flip the tunnel back to Running after close() ran.
        if matches!(*state, TunnelState::Draining | TunnelState::Closed) {
            return;
        }
        *state = next;
    }

    fn spawn_accept_loop(self: &Arc<Self>, listener: TcpListener) {
        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tunnel.shutdown.cancelled() => break,

                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            tracing::debug!(
                                peer = %peer,
                                local_port = tunnel.spec.local_port,
                                "accepted local connection"
                            );
                            forward::spawn(stream, SessionContext {
                                host: tunnel.spec.host.clone(),
                                remote_port: tunnel.spec.remote_port,
                                ssh: tunnel.ssh_tx.subscribe(),
                                meter: Arc::clone(&tunnel.meter),
                                reconnect: Arc::clone(&tunnel.reconnect),
                                cancel: tunnel.shutdown.child_token(),
                            });
                        }
                        Err(e) if classify::is_transient_accept(&e) => {
                            tracing::debug!("transient accept error: {}, retrying", e);
                        }
                        Err(e) => {
                            tracing::warn!(
                                local_port = tunnel.spec.local_port,
                                "fatal accept error: {}, draining tunnel", e
                            );
                            tunnel.close();
                            break;
                        }
                    }
                }
            }
            // The listener drops here; no further connections are accepted.
        });
    }

    fn spawn_health_loop(self: &Arc<Self>) {
        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = tunnel.shutdown.cancelled() => break,

                    _ = ticker.tick() => {
                        // Live traffic proves transport health; only probe
                        // when the tunnel sits idle.
                        if tunnel.meter.active_conns() > 0 {
                            continue;
                        }
                        let ssh = tunnel.ssh_tx.borrow().clone();
                        if let Err(e) = ssh.probe().await {
                            tracing::debug!(
                                host = %tunnel.spec.host,
                                "{}, requesting reconnect", e
                            );
                            tunnel.reconnect.notify_one();
                        }
                    }
                }
            }
        });
    }

    /// A single task consumes the reconnect signal, so at most one attempt
    /// is ever in flight and duplicate signals coalesce.
    fn spawn_reconnect_controller(self: &Arc<Self>) {
        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tunnel.shutdown.cancelled() => break,
                    _ = tunnel.reconnect.notified() => {}
                }

                tunnel.set_state(TunnelState::Reconnecting);
                tracing::info!(
                    host = %tunnel.spec.host,
                    remote_port = tunnel.spec.remote_port,
                    "rebuilding SSH session"
                );

                match tunnel.connector.connect(&tunnel.spec.host).await {
                    Ok(session) => {
                        let session = Arc::new(session);
                        session.spawn_keepalive_watch(Arc::clone(&tunnel.reconnect));

                        // Install the replacement before releasing the old
                        // session, so the listener never observes a period
                        // with no usable transport.
                        let old = tunnel.ssh_tx.borrow().clone();
                        old.stop_watch();
                        tunnel.ssh_tx.send_replace(session);

                        tokio::spawn(async move {
                            tokio::time::sleep(OLD_SESSION_GRACE).await;
                            old.close().await;
                        });

                        tunnel.set_state(TunnelState::Running);
                        tracing::info!(host = %tunnel.spec.host, "SSH session rebuilt");
                    }
                    Err(e) => {
                        tracing::error!(
                            host = %tunnel.spec.host,
                            remote_port = tunnel.spec.remote_port,
                            "reconnect failed: {}, closing tunnel", e
                        );
                        tunnel.close();
                        break;
                    }
                }
            }
        });
    }
}
