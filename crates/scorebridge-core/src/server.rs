//! Unix socket server. Owns the socket file and listener and serves one
//! client connection at a time.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::backend::Exchange;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::lifecycle::LifecycleWatch;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Errors from binding the socket.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to remove stale socket at {path}: {source}")]
    StaleSocket { path: PathBuf, source: io::Error },

    #[error("failed to create socket directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to create Unix domain socket listener at {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
}

/// The filesystem entry backing the listener.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
}

impl SocketFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file. `Ok(false)` if it was already gone.
    pub fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Listener plus its socket file.
#[derive(Debug)]
pub struct SocketServer {
    listener: UnixListener,
    socket_file: SocketFile,
}

impl SocketServer {
    /// Bind a fresh listener at `path`.
    ///
    /// The parent directory is created if missing, then whatever already
    /// sits at `path` (typically a socket left behind by a previous run) is
    /// removed. Must be called from within a tokio runtime.
    pub fn bind(path: &Path) -> Result<Self, ServerError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ServerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let socket_file = SocketFile::new(path);
        if socket_file
            .remove()
            .map_err(|source| ServerError::StaleSocket {
                path: path.to_path_buf(),
                source,
            })?
        {
            info!(path = %path.display(), "Removed stale socket file");
        }

        let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Created Unix domain socket listener");

        Ok(Self {
            listener,
            socket_file,
        })
    }

    pub fn socket_file(&self) -> &SocketFile {
        &self.socket_file
    }

    /// Accept and serve connections one at a time until shutdown.
    ///
    /// The next `accept` only happens after the previous connection has been
    /// closed. Shutdown interrupts both a pending accept and an active
    /// connection; the dropped futures release the connection they owned.
    /// Returns an error only when the dispatcher reports a fatal failure.
    pub async fn serve<E: Exchange>(
        &self,
        dispatcher: &Dispatcher<'_, E>,
        mut shutdown: LifecycleWatch,
    ) -> Result<(), DispatchError> {
        loop {
            debug!("Waiting for Unix domain socket connection");
            let accepted = tokio::select! {
                _ = shutdown.shutdown_requested() => break,
                accepted = self.listener.accept() => accepted,
            };
            let mut stream = match accepted {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    if shutdown.is_shutting_down() {
                        debug!(error = %e, "Accept interrupted by shutdown");
                    } else {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                    continue;
                }
            };
            info!("Accepted Unix domain socket connection");

            let outcome = tokio::select! {
                _ = shutdown.shutdown_requested() => {
                    debug!("Dropping active connection for shutdown");
                    break;
                }
                outcome = dispatcher.serve_connection(&mut stream) => outcome,
            };

            close_connection(stream, &shutdown).await;
            match outcome {
                Ok(end) => info!(?end, "Closed Unix domain socket connection"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Close the listener and hand back the socket file for removal.
    pub fn close(self) -> SocketFile {
        drop(self.listener);
        self.socket_file
    }
}

async fn close_connection(mut stream: UnixStream, shutdown: &LifecycleWatch) {
    if let Err(e) = stream.shutdown().await {
        // The peer hanging up first is the normal way a session ends.
        if shutdown.is_shutting_down() || e.kind() == io::ErrorKind::NotConnected {
            debug!(error = %e, "Connection already closed");
        } else {
            warn!(error = %e, "Failed to close Unix domain socket connection");
        }
    }
}
