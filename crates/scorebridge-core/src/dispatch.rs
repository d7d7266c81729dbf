//! Per-connection command loop.
//!
//! Each read is interpreted as one command token: exactly the bytes that read
//! returned, nothing more. A shorter command following a longer one can
//! therefore never be compared against leftovers of the earlier message.
//! Matching is exact and case-sensitive.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use scorebridge_config::BackendFailurePolicy;

use crate::backend::{BackendClient, BackendError, Exchange};
use crate::lifecycle::LifecycleWatch;

/// Largest command read in one go.
pub const READ_BUFFER_SIZE: usize = 512;

/// Reply to any unrecognised command.
pub const UNKNOWN_COMMAND_REPLY: &[u8] = b"unknown command";

/// A command received from the local client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch scoring data from the exchange.
    Get,
    /// End this connection so the next client can be accepted.
    Unregister,
    /// Anything else, kept (lossily decoded) for logging.
    Unknown(String),
}

impl Command {
    /// Interpret exactly `raw` as a command token.
    pub fn parse(raw: &[u8]) -> Self {
        match raw {
            b"get" => Self::Get,
            b"unregister" => Self::Unregister,
            other => Self::Unknown(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

/// Why a connection's command loop ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its end (zero-byte read).
    Disconnected,
    /// The client sent `unregister`.
    Unregistered,
    /// Reading from the client failed.
    ReadFailed,
    /// Writing a reply failed; the connection is presumed broken.
    WriteFailed,
    /// The exchange failed a fetch under the `disconnect` policy.
    BackendFailed,
}

/// Fatal dispatch errors: these stop the whole bridge.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("backend failure while serving 'get': {0}")]
    Backend(#[source] BackendError),
}

/// Runs the command loop for one connection at a time.
///
/// Holds no per-connection state, so every connection starts fresh.
pub struct Dispatcher<'a, E> {
    backend: &'a BackendClient<E>,
    policy: BackendFailurePolicy,
    lifecycle: LifecycleWatch,
}

impl<'a, E: Exchange> Dispatcher<'a, E> {
    pub fn new(
        backend: &'a BackendClient<E>,
        policy: BackendFailurePolicy,
        lifecycle: LifecycleWatch,
    ) -> Self {
        Self {
            backend,
            policy,
            lifecycle,
        }
    }

    /// Serve commands from `stream` until the client goes away, unregisters,
    /// or a reply cannot be written.
    ///
    /// Only a backend failure under [`BackendFailurePolicy::Exit`] is
    /// returned as an error.
    pub async fn serve_connection<S>(&self, stream: &mut S) -> Result<SessionEnd, DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => {
                    debug!("Client closed the connection");
                    return Ok(SessionEnd::Disconnected);
                }
                Ok(n) => n,
                Err(e) => {
                    self.report(&e, "Failed to read from client");
                    return Ok(SessionEnd::ReadFailed);
                }
            };

            match Command::parse(&buf[..n]) {
                Command::Get => {
                    if let Some(end) = self.handle_get(stream).await? {
                        return Ok(end);
                    }
                }
                Command::Unregister => {
                    info!("Client unregistered");
                    return Ok(SessionEnd::Unregistered);
                }
                Command::Unknown(raw) => {
                    info!(command = %raw.escape_debug(), "Unknown command");
                    if let Err(e) = write_reply(stream, UNKNOWN_COMMAND_REPLY).await {
                        self.report(&e, "Failed to write reply to client");
                        return Ok(SessionEnd::WriteFailed);
                    }
                }
            }
        }
    }

    /// Returns `Some` when the connection must end.
    async fn handle_get<S>(&self, stream: &mut S) -> Result<Option<SessionEnd>, DispatchError>
    where
        S: AsyncWrite + Unpin,
    {
        debug!("'get' received, fetching scoring data");
        match self.backend.fetch_scoring_data().await {
            Ok(payload) => match write_reply(stream, &payload).await {
                Ok(()) => {
                    debug!(bytes = payload.len(), "Wrote scoring data to client");
                    Ok(None)
                }
                Err(e) => {
                    self.report(&e, "Failed to write scoring data to client");
                    Ok(Some(SessionEnd::WriteFailed))
                }
            },
            Err(e) if self.policy.is_fatal() => {
                error!(error = %e, "Failed to fetch scoring data from exchange");
                Err(DispatchError::Backend(e))
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch scoring data, closing client connection");
                Ok(Some(SessionEnd::BackendFailed))
            }
        }
    }

    /// Log an I/O failure, quietly if the bridge is already tearing down.
    fn report(&self, e: &io::Error, what: &str) {
        if self.lifecycle.is_shutting_down() {
            debug!(error = %e, "{what} during shutdown");
        } else {
            warn!(error = %e, "{what}");
        }
    }
}

async fn write_reply<S>(stream: &mut S, bytes: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}
