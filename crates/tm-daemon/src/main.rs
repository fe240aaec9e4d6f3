//! tunnelmux daemon
//!
//! Multiplexes outbound SSH connections and exposes them as local TCP
//! listeners, driven by control clients on a Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tm_core::config::{self, DaemonConfig};
use tm_daemon::ssh::SshConnector;
use tm_daemon::{auth, RpcServer, TunnelRegistry};

#[derive(Parser)]
#[command(name = "tunneld")]
#[command(about = "tunnelmux daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path (overrides config)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tunnelmux daemon starting...");

    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("failed to load config from {:?}: {}", default_path, e);
                DaemonConfig::default()
            })
        } else {
            DaemonConfig::default()
        }
    };

    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    let auth = auth::discover(&config).context("failed to resolve SSH credentials")?;
    let connector = Arc::new(SshConnector::new(
        config.ssh_port,
        config.connect_timeout,
        Arc::new(auth),
    ));
    let registry = Arc::new(TunnelRegistry::new(connector));

    // A previous run may have left its socket file behind.
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)
            .with_context(|| format!("could not remove stale socket {:?}", config.socket_path))?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("failed to bind control socket {:?}", config.socket_path))?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    tracing::info!(
        "control server listening at {}",
        config.socket_path.display()
    );
    RpcServer::new(Arc::clone(&registry))
        .run(listener, cancel)
        .await?;

    let count = registry.close_all();
    if count > 0 {
        tracing::info!("closed {} tunnel(s)", count);
    }
    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        tracing::warn!("could not remove socket file on shutdown: {}", e);
    }

    tracing::info!("daemon shutdown complete");
    Ok(())
}
