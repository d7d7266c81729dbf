//! Fuzz target for the socket command parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_command_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use scorebridge_core::Command;

fuzz_target!(|data: &[u8]| {
    match Command::parse(data) {
        Command::Get => assert_eq!(data, b"get"),
        Command::Unregister => assert_eq!(data, b"unregister"),
        Command::Unknown(_) => assert!(data != b"get" && data != b"unregister"),
    }
});
