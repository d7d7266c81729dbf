//! Whole-bridge test harness.
//!
//! [`TestBridge`] runs a [`LifecycleController`] on a socket inside its own
//! temporary directory, backed by a [`FakeExchange`]. The directory is
//! deleted when the harness is dropped, even on panic.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use scorebridge_core::{BridgeError, LifecycleController, LifecycleState, ShutdownHandle};

use crate::config::TestConfigBuilder;
use crate::exchange::FakeExchange;

/// Upper bound for anything a test waits on.
pub const GRACE: Duration = Duration::from_secs(5);

/// A running bridge plus the handles a test needs to drive it.
pub struct TestBridge {
    pub socket_path: PathBuf,
    pub exchange: FakeExchange,
    pub shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), BridgeError>>,
    _temp_dir: TempDir,
}

impl TestBridge {
    /// Start a bridge with default settings and wait for it to serve.
    pub async fn start(exchange: FakeExchange) -> Self {
        Self::start_with(exchange, TestConfigBuilder::new()).await
    }

    /// Start a bridge with a customised config. The socket path is always
    /// placed in a fresh temp directory.
    pub async fn start_with(exchange: FakeExchange, config: TestConfigBuilder) -> Self {
        let bridge = Self::spawn(exchange, config);
        let mut watch = bridge.shutdown.watch();
        let reached = tokio::time::timeout(GRACE, watch.started())
            .await
            .expect("bridge did not finish starting");
        assert_eq!(reached, LifecycleState::Serving, "bridge failed to start");
        bridge
    }

    /// Spawn a bridge without waiting for startup to finish.
    pub fn spawn(exchange: FakeExchange, config: TestConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("scorebridge.sock");
        let config = config.socket_path(&socket_path).build();

        let controller = LifecycleController::new(config);
        let shutdown = controller.shutdown_handle();
        let backend = exchange.clone();
        let task = tokio::spawn(controller.run(move |_address: &str| Ok(backend)));

        Self {
            socket_path,
            exchange,
            shutdown,
            task,
            _temp_dir: temp_dir,
        }
    }

    /// Connect a client to the bridge socket.
    pub async fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path)
            .await
            .expect("failed to connect to bridge socket")
    }

    /// Request shutdown and wait for the bridge to finish.
    pub async fn stop(self) -> Result<(), BridgeError> {
        self.shutdown.request_shutdown();
        self.join().await
    }

    /// Wait for the bridge to finish on its own.
    pub async fn join(self) -> Result<(), BridgeError> {
        tokio::time::timeout(GRACE, self.task)
            .await
            .expect("bridge did not stop within the grace period")
            .expect("bridge task panicked")
    }
}

/// Send one command and read the reply.
pub async fn send_command(stream: &mut UnixStream, command: &[u8]) -> Vec<u8> {
    stream.write_all(command).await.expect("failed to send command");
    let mut buf = vec![0u8; 64 * 1024];
    let n = tokio::time::timeout(GRACE, stream.read(&mut buf))
        .await
        .expect("no reply within the grace period")
        .expect("failed to read reply");
    buf.truncate(n);
    buf
}

/// Wait until the bridge closes `stream` from its side.
pub async fn expect_closed(stream: &mut UnixStream) {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(GRACE, stream.read(&mut buf))
        .await
        .expect("connection was not closed within the grace period")
        .unwrap_or(0);
    assert_eq!(n, 0, "expected the bridge to close the connection");
}
