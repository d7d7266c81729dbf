//! Build-time metadata embedded by the build script.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("SCOREBRIDGE_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("SCOREBRIDGE_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("SCOREBRIDGE_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version line shown by `--version` and logged at startup.
///
/// Example: `"0.1.0 (abc1234, debug)"`
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SCOREBRIDGE_GIT_HASH"),
    ", ",
    env!("SCOREBRIDGE_BUILD_PROFILE"),
    ")"
);
