//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise logging for the binary.
///
/// `RUST_LOG` selects the filter (default `info`), for example
/// `RUST_LOG=xlsx_consolidator=debug`. Logs go to stderr so command output
/// on stdout stays clean.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Debug-level logging captured by the test harness; safe to call repeatedly
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
