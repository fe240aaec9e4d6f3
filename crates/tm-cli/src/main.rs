//! tunnelmux CLI

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tm_cli::output::{format_tunnels, print_error, print_info, print_success};
use tm_cli::{DaemonClient, PortMapping};

#[derive(Parser)]
#[command(name = "tunnel")]
#[command(version, about = "Manage SSH tunnels")]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "Examples:
  tunnel server1 8080                   Local 8080 to remote 8080
  tunnel server1 8080:80                Local 8080 to remote 80
  tunnel server1 8080 9090 3000:3001    Multiple tunnels")]
struct Cli {
    /// Control socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Remote machine to tunnel to
    host: Option<String>,

    /// Port mappings ([local:]remote)
    ports: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List active tunnels
    List {
        /// Watch mode: continuously update the display
        #[arg(short, long)]
        watch: bool,
    },

    /// Close a tunnel
    Close {
        /// Remote machine
        host: String,
        /// Remote port
        remote_port: u16,
    },

    /// Close all active tunnels
    Closeall,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut client = match &cli.socket {
        Some(path) => DaemonClient::with_path(path.clone()),
        None => DaemonClient::new(),
    };

    match cli.command {
        Some(Commands::List { watch }) => {
            if watch {
                watch_tunnels(&mut client).await?;
            } else {
                let tunnels = client.list_tunnels().await?;
                println!("{}", format_tunnels(&tunnels));
            }
        }

        Some(Commands::Close { host, remote_port }) => {
            match client.close_tunnel(&host, remote_port).await {
                Ok(()) => print_success(&format!("Tunnel closed: {}:{}", host, remote_port)),
                Err(e) => {
                    print_error(&format!("Failed to close tunnel: {}", e));
                    std::process::exit(1);
                }
            }
        }

        Some(Commands::Closeall) => match client.close_all_tunnels().await {
            Ok(count) => print_success(&format!("Closed {} tunnel(s)", count)),
            Err(e) => {
                print_error(&format!("Failed to close all tunnels: {}", e));
                std::process::exit(1);
            }
        },

        None => {
            let (Some(host), ports) = (cli.host, cli.ports) else {
                anyhow::bail!("usage: tunnel <machine> [local:]remote [[local:]remote...]");
            };
            if ports.is_empty() {
                anyhow::bail!("usage: tunnel <machine> [local:]remote [[local:]remote...]");
            }
            create_tunnels(&mut client, &host, &ports).await?;
        }
    }

    Ok(())
}

/// Create one tunnel per mapping; keeps going on individual failures and
/// exits non-zero if any of them failed.
async fn create_tunnels(client: &mut DaemonClient, host: &str, ports: &[String]) -> Result<()> {
    // Validate every mapping before creating anything.
    let mappings = ports
        .iter()
        .map(|p| PortMapping::parse(p))
        .collect::<Result<Vec<_>>>()?;

    let mut failed = false;
    for mapping in mappings {
        match client
            .create_tunnel(host, mapping.local, mapping.remote)
            .await
        {
            Ok(()) => print_success(&format!(
                "Tunnel created: {}:{} -> localhost:{}",
                host, mapping.remote, mapping.local
            )),
            Err(e) => {
                print_error(&format!(
                    "Failed to create tunnel {}:{}: {}",
                    mapping.local, mapping.remote, e
                ));
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Redraw the tunnel table every second until Ctrl+C
async fn watch_tunnels(client: &mut DaemonClient) -> Result<()> {
    use crossterm::{cursor, execute, terminal};

    let mut stdout = std::io::stdout();
    execute!(stdout, cursor::Hide)?;

    let result = async {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,

                _ = ticker.tick() => {
                    let tunnels = match client.list_tunnels().await {
                        Ok(tunnels) => tunnels,
                        Err(e) => {
                            print_error(&format!("Failed to list tunnels: {}", e));
                            break;
                        }
                    };

                    execute!(
                        stdout,
                        terminal::Clear(terminal::ClearType::All),
                        cursor::MoveTo(0, 0)
                    )?;
                    if tunnels.is_empty() {
                        print_info("No active tunnels (Press Ctrl+C to exit)");
                    } else {
                        println!("Active Tunnels (Press Ctrl+C to exit)\n");
                        println!("{}", format_tunnels(&tunnels));
                    }
                }
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    execute!(stdout, cursor::Show)?;
    println!();
    result
}
