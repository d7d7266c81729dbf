//! Runs the built `scorebridge` binary and checks its exit codes and output.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn scorebridge(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("scorebridge").unwrap();
    // Keep a stray scorebridge.toml in the working directory out of the run.
    cmd.arg("--config")
        .arg(tmp.path().join("absent.toml"))
        .env_remove("RUST_LOG")
        .timeout(Duration::from_secs(30));
    cmd
}

/// An address nothing is listening on.
fn closed_port_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{port}")
}

#[test]
fn test_help_lists_flags() {
    let tmp = TempDir::new().unwrap();
    scorebridge(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--socket-path"))
        .stdout(predicate::str::contains("--grpc-address"))
        .stdout(predicate::str::contains("--on-backend-failure"));
}

#[test]
fn test_version_includes_build_details() {
    let tmp = TempDir::new().unwrap();
    scorebridge(&tmp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("scorebridge "))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stdout(predicate::str::contains("("));
}

#[test]
fn test_missing_grpc_address_exits_with_usage() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("bridge.sock");
    scorebridge(&tmp)
        .arg("--socket-path")
        .arg(&socket)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--grpc-address"))
        .stderr(predicate::str::contains("Usage"));
    assert!(!socket.exists(), "nothing may be bound without an address");
}

#[test]
fn test_unreachable_exchange_exits_nonzero_and_cleans_up() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("bridge.sock");
    scorebridge(&tmp)
        .arg("--socket-path")
        .arg(&socket)
        .arg("--grpc-address")
        .arg(closed_port_address())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("handshake"));
    assert!(!socket.exists(), "socket file must be removed on startup failure");
}

#[test]
fn test_invalid_policy_is_rejected() {
    let tmp = TempDir::new().unwrap();
    scorebridge(&tmp)
        .args(["--grpc-address", "127.0.0.1:1", "--on-backend-failure", "retry"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("retry"));
}

#[test]
fn test_print_config_merges_file_and_flags() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("scorebridge.toml");
    std::fs::write(
        &config,
        "socket_path = \"/run/scorebridge/file.sock\"\n\n[backend]\naddress = \"file-host:50051\"\non_failure = \"exit\"\n",
    )
    .unwrap();

    Command::cargo_bin("scorebridge")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["--grpc-address", "flag-host:50051", "--print-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/run/scorebridge/file.sock"))
        .stdout(predicate::str::contains("flag-host:50051"))
        .stdout(predicate::str::contains("file-host").not())
        .stdout(predicate::str::contains("on_failure = \"exit\""));
}

#[test]
fn test_broken_config_file_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("scorebridge.toml");
    std::fs::write(&config, "[backend\naddress = ").unwrap();

    Command::cargo_bin("scorebridge")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to load config"));
}

/// Kills the bridge process if a test bails out early.
struct Bridge(Child);

impl Drop for Bridge {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Start the binary against an exchange that accepts TCP connections but
/// never answers, so it stays up holding its socket until signalled.
fn start_stalled_bridge(tmp: &TempDir, socket: &Path, exchange: &TcpListener) -> Bridge {
    let child = std::process::Command::new(env!("CARGO_BIN_EXE_scorebridge"))
        .arg("--config")
        .arg(tmp.path().join("absent.toml"))
        .arg("--socket-path")
        .arg(socket)
        .arg("--grpc-address")
        .arg(exchange.local_addr().unwrap().to_string())
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    Bridge(child)
}

fn assert_signal_stops_cleanly(signal: &str) {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("bridge.sock");
    let exchange = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut bridge = start_stalled_bridge(&tmp, &socket, &exchange);

    wait_for("socket to be bound", || socket.exists());
    let sent = std::process::Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(bridge.0.id().to_string())
        .status()
        .unwrap();
    assert!(sent.success());

    let mut exit = None;
    wait_for("scorebridge to exit", || {
        exit = bridge.0.try_wait().unwrap();
        exit.is_some()
    });
    assert_eq!(exit.and_then(|status| status.code()), Some(0));
    assert!(!socket.exists(), "socket file must be removed on {signal}");
}

#[test]
fn test_interrupt_exits_cleanly_and_removes_socket() {
    assert_signal_stops_cleanly("INT");
}

#[test]
fn test_terminate_exits_cleanly_and_removes_socket() {
    assert_signal_stops_cleanly("TERM");
}
