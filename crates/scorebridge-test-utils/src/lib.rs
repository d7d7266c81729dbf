#![deny(unsafe_code)]

//! Shared test utilities for the scorebridge workspace.
//!
//! Provides a scriptable in-memory exchange, config builders, and a harness
//! that runs a whole bridge on a temporary socket.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! scorebridge-test-utils = { workspace = true }
//! ```

pub mod bridge;
pub mod config;
pub mod exchange;

pub use bridge::TestBridge;
pub use config::TestConfigBuilder;
pub use exchange::FakeExchange;
