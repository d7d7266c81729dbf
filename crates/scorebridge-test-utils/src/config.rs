//! Configuration builders for tests.

use std::path::Path;

use scorebridge_config::{BackendFailurePolicy, BridgeConfig};

/// Fluent builder for [`BridgeConfig`] in tests.
///
/// Starts from defaults with a placeholder backend address, since the real
/// exchange is replaced by a fake in almost every test.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_path(dir.path().join("bridge.sock"))
///     .on_failure(BackendFailurePolicy::Exit)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: BridgeConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = BridgeConfig::default();
        config.backend.address = Some("fake-exchange:50051".to_string());
        Self { config }
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.socket_path = path.as_ref().to_path_buf();
        self
    }

    pub fn without_backend_address(mut self) -> Self {
        self.config.backend.address = None;
        self
    }

    pub fn on_failure(mut self, policy: BackendFailurePolicy) -> Self {
        self.config.backend.on_failure = policy;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
