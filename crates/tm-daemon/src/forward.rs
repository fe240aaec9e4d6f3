//! Forwarding sessions
//!
//! One forwarding session pairs an accepted local connection with a
//! direct-tcpip channel through the tunnel's SSH transport and pumps bytes
//! in both directions. Errors stay inside the session: the local peer is
//! dropped on failure, and only transport sickness is escalated, by raising
//! the tunnel's reconnect signal.

use std::sync::Arc;
use std::time::Duration;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use tm_core::classify;
use tm_core::error::TunnelError;

use crate::meter::ActivityMeter;
use crate::ssh::SshSession;

/// Remote dial attempts per session.
const DIAL_ATTEMPTS: u32 = 3;

/// Wall-clock cap on the whole dial phase, including retries and any wait
/// for a replacement SSH session.
const DIAL_DEADLINE: Duration = Duration::from_secs(10);

/// Per-write deadline during the pump phase.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer per direction.
const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Hard cap on a single forwarding session.
const MAX_SESSION_DURATION: Duration = Duration::from_secs(12 * 60 * 60);

/// OS keepalive period applied to the local socket once the pump starts.
const LOCAL_KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Everything a forwarding session needs from its parent tunnel
pub(crate) struct SessionContext {
    pub host: String,
    pub remote_port: u16,
    pub ssh: watch::Receiver<Arc<SshSession>>,
    pub meter: Arc<ActivityMeter>,
    pub reconnect: Arc<Notify>,
    pub cancel: CancellationToken,
}

/// Run one forwarding session to completion on its own task
pub(crate) fn spawn(local: TcpStream, ctx: SessionContext) {
    tokio::spawn(run(local, ctx));
}

/// Decrements the active-session count on every exit path.
struct EndGuard(Arc<ActivityMeter>);

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.0.session_ended();
    }
}

async fn run(local: TcpStream, mut ctx: SessionContext) {
    ctx.meter.session_began();
    let _ended = EndGuard(Arc::clone(&ctx.meter));

    let channel = match timeout(DIAL_DEADLINE, dial_with_retry(&mut ctx)).await {
        Ok(Ok(channel)) => channel,
        Ok(Err(e)) => {
            tracing::warn!(
                host = %ctx.host,
                remote_port = ctx.remote_port,
                "dropping local connection: {}", e
            );
            return;
        }
        Err(_) => {
            tracing::warn!(
                host = %ctx.host,
                remote_port = ctx.remote_port,
                "dropping local connection: remote dial timed out"
            );
            return;
        }
    };

    // The remote leg rides the SSH transport, whose socket already carries
    // keepalive; only the local socket needs its own.
    let keepalive = socket2::TcpKeepalive::new().with_time(LOCAL_KEEPALIVE_PERIOD);
    if let Err(e) = socket2::SockRef::from(&local).set_tcp_keepalive(&keepalive) {
        tracing::debug!("could not enable keepalive on local socket: {}", e);
    }

    pump(local, channel, &ctx).await;
}

/// Dial the remote target, retrying with 1 s then 2 s backoff. When the
/// transport looks dead between attempts, ask the tunnel for a replacement
/// and wait for the session slot to change before trying again.
async fn dial_with_retry(ctx: &mut SessionContext) -> Result<Channel<Msg>, TunnelError> {
    let mut last_error = String::new();

    for attempt in 1..=DIAL_ATTEMPTS {
        let ssh = ctx.ssh.borrow().clone();
        match ssh.dial_remote(ctx.remote_port).await {
            Ok(channel) => return Ok(channel),
            Err(e) => {
                last_error = e.to_string();
                if attempt < DIAL_ATTEMPTS {
                    tracing::debug!(
                        attempt,
                        remote_port = ctx.remote_port,
                        "remote dial failed: {}, retrying", last_error
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    if ssh.is_closed() {
                        ctx.reconnect.notify_one();
                        let _ = timeout(DIAL_DEADLINE, ctx.ssh.changed()).await;
                    }
                }
            }
        }
    }

    Err(TunnelError::RemoteDial {
        attempts: DIAL_ATTEMPTS,
        message: last_error,
    })
}

/// Copy bytes in both directions until either side closes, the tunnel shuts
/// down, or the session cap expires. Cancellation and the cap are select
/// arms, so teardown does not wait on socket activity.
async fn pump(mut local: TcpStream, mut channel: Channel<Msg>, ctx: &SessionContext) {
    let (mut local_read, mut local_write) = local.split();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let deadline = Instant::now() + MAX_SESSION_DURATION;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                let _ = channel.eof().await;
                break;
            }

            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    host = %ctx.host,
                    remote_port = ctx.remote_port,
                    "maximum session duration reached"
                );
                break;
            }

            result = local_read.read(&mut buf) => match result {
                Ok(0) => {
                    let _ = channel.eof().await;
                    break;
                }
                Ok(n) => {
                    match timeout(WRITE_TIMEOUT, channel.data(&buf[..n])).await {
                        Ok(Ok(())) => {
                            ctx.meter.record_bytes_sent(n as u64);
                            ctx.meter.touch();
                        }
                        Ok(Err(_)) | Err(_) => break,
                    }
                }
                Err(e) => {
                    if !classify::is_benign_close(&e) && !classify::is_timeout(&e) {
                        tracing::warn!(
                            host = %ctx.host,
                            remote_port = ctx.remote_port,
                            "error reading from local connection: {}", e
                        );
                    }
                    break;
                }
            },

            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    match timeout(WRITE_TIMEOUT, local_write.write_all(&data)).await {
                        Ok(Ok(())) => {
                            ctx.meter.record_bytes_received(data.len() as u64);
                            ctx.meter.touch();
                        }
                        Ok(Err(e)) => {
                            if !classify::is_benign_close(&e) && !classify::is_timeout(&e) {
                                tracing::warn!(
                                    host = %ctx.host,
                                    remote_port = ctx.remote_port,
                                    "error writing to local connection: {}", e
                                );
                            }
                            break;
                        }
                        Err(_) => break,
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }
}
