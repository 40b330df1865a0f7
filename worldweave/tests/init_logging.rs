//! Shared test helper: initialize tracing from RUST_LOG once per test binary.
//! Include with `mod init_logging;` and call `init_logging::init()` in tests
//! that want log output under `--nocapture`.

#![allow(dead_code)]

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
