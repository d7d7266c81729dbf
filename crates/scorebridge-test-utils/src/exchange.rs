//! Scriptable in-memory exchange.

use std::sync::{Arc, Mutex, MutexGuard};

use scorebridge_core::BoxFuture;
use scorebridge_core::backend::{Exchange, HANDSHAKE_ACK};

#[derive(Debug)]
struct FakeState {
    ack: String,
    payload: Option<Vec<u8>>,
    greetings: Vec<String>,
    requests: Vec<String>,
}

/// An [`Exchange`] whose answers tests can change while a bridge is running.
///
/// Clones share state: keep one clone in the test and hand another to the
/// bridge.
#[derive(Debug, Clone)]
pub struct FakeExchange {
    state: Arc<Mutex<FakeState>>,
}

impl FakeExchange {
    /// A healthy exchange that acknowledges the handshake and serves
    /// `payload` for every fetch.
    pub fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                ack: HANDSHAKE_ACK.to_string(),
                payload: Some(payload.into()),
                greetings: Vec::new(),
                requests: Vec::new(),
            })),
        }
    }

    /// Answer the handshake greeting with `ack` instead of the expected value.
    pub fn with_ack(self, ack: &str) -> Self {
        self.lock().ack = ack.to_string();
        self
    }

    /// Serve `payload` from now on.
    pub fn set_payload(&self, payload: impl Into<Vec<u8>>) {
        self.lock().payload = Some(payload.into());
    }

    /// Fail every fetch from now on.
    pub fn fail_fetches(&self) {
        self.lock().payload = None;
    }

    /// Greetings received so far.
    pub fn greetings(&self) -> Vec<String> {
        self.lock().greetings.clone()
    }

    /// Fetch request identifiers received so far.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Exchange for FakeExchange {
    fn hello<'a>(&'a self, greeting: &'a str) -> BoxFuture<'a, Result<String, tonic::Status>> {
        let ack = {
            let mut state = self.lock();
            state.greetings.push(greeting.to_string());
            state.ack.clone()
        };
        Box::pin(async move { Ok(ack) })
    }

    fn get_data<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<Vec<u8>, tonic::Status>> {
        let payload = {
            let mut state = self.lock();
            state.requests.push(request.to_string());
            state.payload.clone()
        };
        Box::pin(async move {
            payload.ok_or_else(|| tonic::Status::unavailable("fake exchange is failing fetches"))
        })
    }
}
