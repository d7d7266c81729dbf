#![deny(unsafe_code)]

//! scorebridge core runtime.
//!
//! Bridges a Unix domain socket speaking a tiny text command protocol to a
//! remote exchange service reached over gRPC. One local client is served at a
//! time; `get` is answered with the exchange's scoring data verbatim.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   Unix socket   ┌──────────────┐   gRPC   ┌──────────────┐
//! │  client  │────────────────▶│ SocketServer │─────────▶│   Exchange   │
//! │ (display)│  get/unregister │ + Dispatcher │  GetData │   service    │
//! └──────────┘                 └──────▲───────┘          └──────────────┘
//!                                     │ lifecycle watch
//!                              ┌──────┴───────┐
//!                              │  Lifecycle   │◀── SIGINT / SIGTERM
//!                              │  Controller  │
//!                              └──────────────┘
//! ```

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, used as the return type of
/// [`backend::Exchange`] methods so the trait stays object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exchange backend client: handshake and scoring-data fetch.
pub mod backend;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Per-connection command parsing and dispatch.
pub mod dispatch;
/// Startup ordering, shutdown sequencing, and lifecycle state.
pub mod lifecycle;
/// Unix socket listener and the single-connection accept loop.
pub mod server;

pub use backend::{BackendClient, BackendError, Exchange, GrpcExchange};
pub use dispatch::{Command, DispatchError, Dispatcher, SessionEnd};
pub use lifecycle::{
    BridgeError, LifecycleController, LifecycleState, LifecycleWatch, ShutdownHandle,
};
pub use server::{ServerError, SocketFile, SocketServer};
