//! Logging utilities for ipvsctl components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing for human-readable output.
///
/// Levels are controlled by RUST_LOG; the default is INFO. Call once at
/// process start.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(env_filter())
        .init();
}

/// Initialize tracing with JSON output, one event per line, for log
/// shippers.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(env_filter())
        .init();
}

/// Like [`init`], but safe to call repeatedly (later calls are ignored).
/// Intended for test binaries where several tests race to initialize.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_test_writer())
        .with(env_filter())
        .try_init();
}
