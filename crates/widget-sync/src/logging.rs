//! Opt-in `tracing` subscriber for native embedders and tests.
//!
//! The library only emits events; nothing is printed unless the embedder
//! installs a subscriber, either its own or the one from [`init`].

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (for example `"widget_sync=debug"`). Returns `false`
/// when a global subscriber was already installed, so calling it more than
/// once is harmless.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Like [`init`], writing through the test harness so output is captured
/// per test.
pub fn init_for_tests() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("widget_sync=trace"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
