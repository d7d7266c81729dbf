//! Exchange backend client.
//!
//! The bridge talks to the exchange through the two-operation [`Exchange`]
//! trait. [`GrpcExchange`] is the production transport; anything honouring
//! the same greeting/fetch contract can stand in for it. [`BackendClient`]
//! owns the session for the process lifetime and layers the fixed handshake
//! and request values on top of the raw operations.

pub mod proto;

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::BoxFuture;
use proto::exchange_client::ExchangeClient;
use proto::{DataRequest, HelloRequest};

/// Greeting sent on startup.
pub const HANDSHAKE_GREETING: &str = "connect";

/// Acknowledgement the exchange must answer the greeting with.
pub const HANDSHAKE_ACK: &str = "connected";

/// Request identifier sent for every `get` command.
pub const SCORING_DATA_REQUEST: &str = "scoring data";

/// Errors from the exchange backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to dial exchange at {address}: {reason}")]
    DialFailed { address: String, reason: String },

    #[error("handshake with exchange failed: {0}")]
    HandshakeFailed(#[source] tonic::Status),

    #[error("exchange answered handshake with {got:?}, expected \"connected\"")]
    HandshakeMismatch { got: String },

    #[error("exchange unavailable: {0}")]
    Unavailable(#[source] tonic::Status),
}

/// The raw operations of the exchange service.
pub trait Exchange: Send + Sync {
    /// Send a greeting and return the acknowledgement verbatim.
    fn hello<'a>(&'a self, greeting: &'a str) -> BoxFuture<'a, Result<String, tonic::Status>>;

    /// Request data by identifier and return the payload verbatim.
    fn get_data<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<Vec<u8>, tonic::Status>>;
}

/// gRPC transport to a remote exchange service.
#[derive(Debug, Clone)]
pub struct GrpcExchange {
    client: ExchangeClient<Channel>,
}

impl GrpcExchange {
    /// Build a lazily-connected channel to `address`.
    ///
    /// No I/O happens here; an unreachable exchange only surfaces on the
    /// first call, which is why startup always follows with a handshake.
    /// Must be called from within a tokio runtime.
    pub fn connect(address: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let uri = normalize_address(address);
        let endpoint = Endpoint::from_shared(uri).map_err(|e| BackendError::DialFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        let channel = endpoint.connect_timeout(connect_timeout).connect_lazy();
        debug!(address, "Created gRPC exchange channel");
        Ok(Self {
            client: ExchangeClient::new(channel),
        })
    }
}

impl Exchange for GrpcExchange {
    fn hello<'a>(&'a self, greeting: &'a str) -> BoxFuture<'a, Result<String, tonic::Status>> {
        let mut client = self.client.clone();
        let request = HelloRequest {
            hello: greeting.to_string(),
        };
        Box::pin(async move {
            let response = client.grpc_hello(request).await?;
            Ok(response.into_inner().hello)
        })
    }

    fn get_data<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<Vec<u8>, tonic::Status>> {
        let mut client = self.client.clone();
        let request = DataRequest {
            request: request.to_string(),
        };
        Box::pin(async move {
            let response = client.get_data(request).await?;
            Ok(response.into_inner().response.into_bytes())
        })
    }
}

/// Prefix a bare `host:port` with `http://`; tonic endpoints need a scheme.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Long-lived session with the exchange, shared read-only by every
/// connection for the lifetime of the process.
pub struct BackendClient<E> {
    exchange: E,
    address: String,
}

impl<E: Exchange> BackendClient<E> {
    pub fn new(exchange: E, address: impl Into<String>) -> Self {
        Self {
            exchange,
            address: address.into(),
        }
    }

    /// The address this session was dialled with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The transport behind this session.
    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Confirm the exchange is alive and speaks the expected protocol.
    ///
    /// Anything other than the exact acknowledgement is a failure.
    pub async fn handshake(&self) -> Result<(), BackendError> {
        let ack = self
            .exchange
            .hello(HANDSHAKE_GREETING)
            .await
            .map_err(BackendError::HandshakeFailed)?;
        if ack != HANDSHAKE_ACK {
            return Err(BackendError::HandshakeMismatch { got: ack });
        }
        info!(address = %self.address, "Handshake with exchange succeeded");
        Ok(())
    }

    /// Fetch the current scoring data. No retry, no caching.
    pub async fn fetch_scoring_data(&self) -> Result<Vec<u8>, BackendError> {
        self.exchange
            .get_data(SCORING_DATA_REQUEST)
            .await
            .map_err(BackendError::Unavailable)
    }

    /// Close the session, dropping the underlying channel.
    pub fn close(self) {
        info!(address = %self.address, "Closing exchange channel");
        drop(self.exchange);
    }
}
