//! Tracing setup for tests driving the emulator.
//!
//! Guest log lines are re-emitted on the `proxywasm::guest` target and the
//! emulator's own state changes on `proxywasm_host`, so
//! `RUST_LOG=proxywasm::guest=debug cargo test` shows what a filter logged.

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
/// Output goes through the test writer, so it is captured per test.
pub fn init_test_subscriber() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
