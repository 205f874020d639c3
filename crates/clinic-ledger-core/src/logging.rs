//! Logging setup.
//!
//! Library code only emits `tracing` events; hosts decide where they go. The
//! helpers here install a `tracing-subscriber` fmt subscriber for hosts that
//! don't bring their own.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default subscriber.
///
/// The filter is read from `RUST_LOG` and falls back to `info`, e.g.
/// `RUST_LOG=clinic_ledger_core=debug` to see FEFO allocation plans.
/// Calling this more than once is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init();
}

/// Install a debug-level subscriber that writes through the test harness.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
