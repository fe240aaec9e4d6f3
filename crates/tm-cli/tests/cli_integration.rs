//! CLI integration tests
//!
//! Tests the tunnel binary using assert_cmd. Nothing here needs a running
//! daemon; commands that would reach it point at a socket that does not
//! exist and must fail with a clear message.

use assert_cmd::Command;
use predicates::prelude::*;

fn tunnel() -> Command {
    Command::cargo_bin("tunnel").expect("tunnel binary should be built")
}

#[test]
fn test_cli_help() {
    tunnel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Manage SSH tunnels"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("closeall"));
}

#[test]
fn test_cli_version() {
    tunnel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tunnel"));
}

#[test]
fn test_cli_list_help() {
    tunnel()
        .args(["list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_cli_close_help() {
    tunnel()
        .args(["close", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Remote port"));
}

#[test]
fn test_cli_no_args_fails() {
    tunnel().assert().failure();
}

#[test]
fn test_cli_host_without_ports_fails() {
    tunnel()
        .arg("server1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("usage"));
}

#[test]
fn test_cli_invalid_port_mapping_fails() {
    tunnel()
        .args(["--socket", "/nonexistent/tunnel.sock", "server1", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid port"));
}

#[test]
fn test_cli_list_without_daemon_fails() {
    tunnel()
        .args(["--socket", "/nonexistent/tunnel.sock", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Is tunneld running?"));
}
