//! Bridge lifecycle: startup ordering, shutdown sequencing, and the
//! process-wide [`LifecycleState`].
//!
//! The state lives in a `tokio::sync::watch` channel. The controller is the
//! only writer; the accept loop and dispatcher hold [`LifecycleWatch`]
//! receivers, race their blocking calls against
//! [`LifecycleWatch::shutdown_requested`], and use
//! [`LifecycleWatch::is_shutting_down`] to tell expected teardown errors from
//! real failures. Transitions only ever move forward.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use scorebridge_config::{BridgeConfig, ConfigError};

use crate::backend::{BackendClient, BackendError, Exchange};
use crate::build_info;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::server::{ServerError, SocketFile, SocketServer};

/// Process-wide lifecycle state. Ordered; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Starting,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Writer side of the lifecycle state.
#[derive(Debug, Clone)]
struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Starting);
        Self { tx: Arc::new(tx) }
    }

    fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next` if it is later than the current state.
    ///
    /// Returns whether the state changed.
    fn advance(&self, next: LifecycleState) -> bool {
        self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn watch(&self) -> LifecycleWatch {
        LifecycleWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the lifecycle state.
#[derive(Debug, Clone)]
pub struct LifecycleWatch {
    rx: watch::Receiver<LifecycleState>,
}

impl LifecycleWatch {
    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.rx.borrow()
    }

    /// Whether teardown has begun, so resource errors are expected.
    pub fn is_shutting_down(&self) -> bool {
        self.state() >= LifecycleState::ShuttingDown
    }

    /// Resolve once startup is over, with the state reached: `Serving`, or a
    /// later state if startup was aborted.
    pub async fn started(&mut self) -> LifecycleState {
        let reached = self
            .rx
            .wait_for(|state| *state >= LifecycleState::Serving)
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Resolve once shutdown has been requested.
    pub async fn shutdown_requested(&mut self) {
        // A closed channel means the controller is gone, which is shutdown too.
        let _ = self
            .rx
            .wait_for(|state| *state >= LifecycleState::ShuttingDown)
            .await;
    }
}

/// Cloneable handle that asks a running bridge to shut down.
///
/// Repeated requests are no-ops.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    lifecycle: Lifecycle,
}

impl ShutdownHandle {
    /// Request shutdown. Returns `false` if shutdown was already under way.
    pub fn request_shutdown(&self) -> bool {
        let changed = self.lifecycle.advance(LifecycleState::ShuttingDown);
        if changed {
            info!("Shutdown requested");
        }
        changed
    }

    /// Current state of the bridge.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// A watch on the bridge's lifecycle, e.g. to wait for readiness.
    pub fn watch(&self) -> LifecycleWatch {
        self.lifecycle.watch()
    }
}

/// Errors that stop the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Drives the bridge from startup to a clean stop.
pub struct LifecycleController {
    config: BridgeConfig,
    lifecycle: Lifecycle,
}

impl LifecycleController {
    /// Create a controller in the `Starting` state.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Handle for triggering shutdown from a signal task or a test.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            lifecycle: self.lifecycle.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run the bridge until shutdown.
    ///
    /// Startup is strictly ordered: validate configuration, bind the socket,
    /// dial the exchange with `dial`, handshake. Any failure there aborts
    /// before a single client is accepted. Once serving, the future resolves
    /// only after the ordered teardown has finished, so callers can exit as
    /// soon as it returns.
    pub async fn run<E, D>(self, dial: D) -> Result<(), BridgeError>
    where
        E: Exchange,
        D: FnOnce(&str) -> Result<E, BackendError>,
    {
        info!(
            version = build_info::LONG_VERSION,
            socket = %self.config.socket_path.display(),
            "scorebridge starting"
        );

        let address = match self.config.backend_address() {
            Ok(address) => address.to_string(),
            Err(e) => return Err(self.abort_startup(e.into())),
        };
        let server = match SocketServer::bind(&self.config.socket_path) {
            Ok(server) => server,
            Err(e) => return Err(self.abort_startup(e.into())),
        };

        let mut startup_watch = self.lifecycle.watch();
        let connected = tokio::select! {
            connected = connect_backend(&address, dial) => connected,
            _ = startup_watch.shutdown_requested() => {
                info!("Shutdown requested during startup");
                self.finish(server.close());
                return Ok(());
            }
        };
        let backend = match connected {
            Ok(backend) => backend,
            Err(e) => {
                self.finish(server.close());
                return Err(e);
            }
        };

        if !self.lifecycle.advance(LifecycleState::Serving) {
            info!("Shutdown requested during startup");
            self.teardown(server, backend);
            return Ok(());
        }
        info!(
            socket = %server.socket_file().path().display(),
            exchange = %backend.address(),
            policy = %self.config.backend.on_failure,
            "Bridge serving"
        );

        let outcome = {
            let dispatcher =
                Dispatcher::new(&backend, self.config.backend.on_failure, self.lifecycle.watch());
            server.serve(&dispatcher, self.lifecycle.watch()).await
        };

        self.teardown(server, backend);
        outcome.map_err(BridgeError::from)
    }

    /// Ordered teardown: listener, exchange channel, socket file.
    ///
    /// The active connection has already been dropped by the accept loop.
    fn teardown<E: Exchange>(&self, server: SocketServer, backend: BackendClient<E>) {
        self.lifecycle.advance(LifecycleState::ShuttingDown);
        let socket_file = server.close();
        info!("Closed socket listener");
        backend.close();
        self.finish(socket_file);
    }

    /// Startup failed before anything was bound; there is nothing to tear
    /// down, but waiters still need to see the bridge stop.
    fn abort_startup(&self, error: BridgeError) -> BridgeError {
        self.lifecycle.advance(LifecycleState::ShuttingDown);
        self.lifecycle.advance(LifecycleState::Stopped);
        info!("Exiting...");
        error
    }

    fn finish(&self, socket_file: SocketFile) {
        self.lifecycle.advance(LifecycleState::ShuttingDown);
        match socket_file.remove() {
            Ok(true) => info!(path = %socket_file.path().display(), "Removed socket file"),
            Ok(false) => debug!(path = %socket_file.path().display(), "Socket file already gone"),
            Err(e) => warn!(
                path = %socket_file.path().display(),
                error = %e,
                "Failed to remove socket file"
            ),
        }
        self.lifecycle.advance(LifecycleState::Stopped);
        info!("Exiting...");
    }
}

async fn connect_backend<E, D>(address: &str, dial: D) -> Result<BackendClient<E>, BridgeError>
where
    E: Exchange,
    D: FnOnce(&str) -> Result<E, BackendError>,
{
    let exchange = dial(address)?;
    let backend = BackendClient::new(exchange, address);
    backend.handshake().await?;
    info!(address, "Connected to exchange");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_state_ordering() {
        assert!(LifecycleState::Starting < LifecycleState::Serving);
        assert!(LifecycleState::Serving < LifecycleState::ShuttingDown);
        assert!(LifecycleState::ShuttingDown < LifecycleState::Stopped);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);

        assert!(lifecycle.advance(LifecycleState::Serving));
        assert!(!lifecycle.advance(LifecycleState::Serving));
        assert!(!lifecycle.advance(LifecycleState::Starting));
        assert_eq!(lifecycle.state(), LifecycleState::Serving);

        assert!(lifecycle.advance(LifecycleState::Stopped));
        assert!(!lifecycle.advance(LifecycleState::ShuttingDown));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_shutdown_handle_is_idempotent() {
        let controller = LifecycleController::new(BridgeConfig::default());
        let handle = controller.shutdown_handle();

        assert!(handle.request_shutdown());
        assert!(!handle.request_shutdown());
        assert!(!handle.clone().request_shutdown());
        assert_eq!(controller.state(), LifecycleState::ShuttingDown);
    }

    #[test]
    fn test_watch_reports_shutting_down() {
        let lifecycle = Lifecycle::new();
        let watch = lifecycle.watch();
        assert!(!watch.is_shutting_down());
        lifecycle.advance(LifecycleState::Serving);
        assert!(!watch.is_shutting_down());
        lifecycle.advance(LifecycleState::ShuttingDown);
        assert!(watch.is_shutting_down());
        assert_eq!(watch.state(), LifecycleState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_shutdown_requested_wakes_waiter() {
        let lifecycle = Lifecycle::new();
        let mut watch = lifecycle.watch();

        let waiter = tokio::spawn(async move {
            watch.shutdown_requested().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lifecycle.advance(LifecycleState::ShuttingDown);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_returns_immediately_when_already_stopping() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Stopped);
        let mut watch = lifecycle.watch();
        tokio::time::timeout(Duration::from_millis(100), watch.shutdown_requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_without_backend_address_fails_before_binding() {
        let tmp = tempfile::TempDir::new().unwrap();
        let socket = tmp.path().join("bridge.sock");
        let config = BridgeConfig {
            socket_path: socket.clone(),
            ..BridgeConfig::default()
        };

        let controller = LifecycleController::new(config);
        let handle = controller.shutdown_handle();
        let mut watch = handle.watch();
        let result = controller
            .run(|_: &str| -> Result<crate::GrpcExchange, BackendError> {
                panic!("dial must not be attempted without an address")
            })
            .await;

        assert!(matches!(
            result,
            Err(BridgeError::Config(ConfigError::MissingBackendAddress))
        ));
        assert!(!socket.exists());
        assert_eq!(handle.state(), LifecycleState::Stopped);
        let reached = tokio::time::timeout(Duration::from_secs(1), watch.started())
            .await
            .expect("started() must resolve once startup is abandoned");
        assert_eq!(reached, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_failure_stops_the_lifecycle() {
        let tmp = tempfile::TempDir::new().unwrap();
        // A directory cannot be replaced by the socket.
        let mut config = BridgeConfig {
            socket_path: tmp.path().to_path_buf(),
            ..BridgeConfig::default()
        };
        config.backend.address = Some("exchange:50051".to_string());

        let controller = LifecycleController::new(config);
        let handle = controller.shutdown_handle();
        let mut watch = handle.watch();
        let result = controller
            .run(|_: &str| -> Result<crate::GrpcExchange, BackendError> {
                panic!("dial must not be attempted when binding failed")
            })
            .await;

        assert!(matches!(result, Err(BridgeError::Server(_))));
        assert!(tmp.path().is_dir());
        assert_eq!(handle.state(), LifecycleState::Stopped);
        let reached = tokio::time::timeout(Duration::from_secs(1), watch.started())
            .await
            .expect("started() must resolve once startup is abandoned");
        assert_eq!(reached, LifecycleState::Stopped);
        assert!(!handle.request_shutdown());
    }

    #[tokio::test]
    async fn test_dial_failure_removes_socket_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let socket = tmp.path().join("bridge.sock");
        let mut config = BridgeConfig {
            socket_path: socket.clone(),
            ..BridgeConfig::default()
        };
        config.backend.address = Some("exchange:50051".to_string());

        let controller = LifecycleController::new(config);
        let handle = controller.shutdown_handle();
        let result = controller
            .run(|address: &str| -> Result<crate::GrpcExchange, BackendError> {
                Err(BackendError::DialFailed {
                    address: address.to_string(),
                    reason: "refused".to_string(),
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(BridgeError::Backend(BackendError::DialFailed { .. }))
        ));
        assert!(!socket.exists());
        assert_eq!(handle.state(), LifecycleState::Stopped);
    }
}
