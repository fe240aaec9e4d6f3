//! Control-plane integration tests over a real Unix socket.
//!
//! The registry's connector points at a loopback port nothing listens on,
//! so tunnel setup always fails fast; everything up to and including the
//! wire protocol is exercised for real.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use tm_core::ipc::{Request, Response};
use tm_daemon::auth::SshAuth;
use tm_daemon::{RpcServer, SshConnector, TunnelRegistry};

struct TestDaemon {
    socket_path: PathBuf,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn start_daemon() -> TestDaemon {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("tunnel.sock");

    let auth = SshAuth {
        username: "test".to_string(),
        key: Arc::new(russh_keys::key::KeyPair::generate_ed25519().expect("ed25519 keygen")),
    };
    let connector = Arc::new(SshConnector::new(
        refused_port(),
        Duration::from_secs(5),
        Arc::new(auth),
    ));
    let registry = Arc::new(TunnelRegistry::new(connector));

    let listener = UnixListener::bind(&socket_path).unwrap();
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = RpcServer::new(registry).run(listener, server_cancel).await;
    });

    TestDaemon {
        socket_path,
        cancel,
        _dir: dir,
    }
}

async fn roundtrip(socket_path: &PathBuf, request: Request) -> Response {
    let stream = UnixStream::connect(socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();

    let mut json = serde_json::to_string(&request).unwrap();
    json.push('\n');
    writer.write_all(json.as_bytes()).await.unwrap();

    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_list_starts_empty() {
    let daemon = start_daemon().await;
    let response = roundtrip(&daemon.socket_path, Request::ListTunnels).await;
    assert!(matches!(response, Response::Tunnels { tunnels } if tunnels.is_empty()));
}

#[tokio::test]
async fn test_create_fails_when_host_unreachable() {
    let daemon = start_daemon().await;

    let response = roundtrip(
        &daemon.socket_path,
        Request::CreateTunnel {
            host: "127.0.0.1".to_string(),
            local_port: 18080,
            remote_port: 80,
        },
    )
    .await;

    match response {
        Response::Error { message } => {
            assert!(message.contains("failed to connect"), "got: {}", message)
        }
        other => panic!("expected error, got {:?}", other),
    }

    // a failed create must leave no tunnel behind
    let response = roundtrip(&daemon.socket_path, Request::ListTunnels).await;
    assert!(matches!(response, Response::Tunnels { tunnels } if tunnels.is_empty()));
}

#[tokio::test]
async fn test_close_missing_tunnel() {
    let daemon = start_daemon().await;

    let response = roundtrip(
        &daemon.socket_path,
        Request::CloseTunnel {
            host: "server1".to_string(),
            remote_port: 80,
        },
    )
    .await;

    match response {
        Response::Error { message } => assert_eq!(message, "tunnel not found"),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_all_on_empty_registry() {
    let daemon = start_daemon().await;
    let response = roundtrip(&daemon.socket_path, Request::CloseAllTunnels).await;
    assert!(matches!(response, Response::Count { count: 0 }));
}

#[tokio::test]
async fn test_malformed_request_is_answered() {
    let daemon = start_daemon().await;

    let stream = UnixStream::connect(&daemon.socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(b"not json\n").await.unwrap();

    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await.unwrap();
    let response: Response = serde_json::from_str(&line).unwrap();
    assert!(matches!(response, Response::Error { .. }));
}

#[tokio::test]
async fn test_multiple_requests_on_one_connection() {
    let daemon = start_daemon().await;

    let stream = UnixStream::connect(&daemon.socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    for _ in 0..3 {
        let mut json = serde_json::to_string(&Request::ListTunnels).unwrap();
        json.push('\n');
        writer.write_all(json.as_bytes()).await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert!(matches!(response, Response::Tunnels { .. }));
    }
}
