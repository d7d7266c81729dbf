//! Fuzz target for `BridgeConfig::parse`.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use scorebridge_config::BridgeConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = BridgeConfig::parse(s) {
        // Anything that parsed must also pass the address lookup without panicking.
        let _ = config.backend_address();
    }
});
