//! Log output for applications and tests.
//!
//! The library only emits `tracing` events; this installs a subscriber for
//! them. The filter comes from `BEANBASE_LOG`, then `RUST_LOG`, and is `warn`
//! when neither is set.

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env("BEANBASE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs a stderr subscriber. Returns false when one was already set,
/// which makes repeated calls harmless.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Like [`init`] but writing through the test harness capture.
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}
