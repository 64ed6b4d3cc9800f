#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use tee_manager::{Manager, ManagerConfig};

static LOGGING: Once = Once::new();

/// Route `tracing` output to the test harness (shown for failing tests).
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::DEBUG);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_thread_ids(true)
            .with_target(true)
            .try_init();
    });
}

/// Manager with a short quantum so idle iterations do not stall tests.
pub fn quick_manager() -> Manager {
    init_test_logging();
    Manager::with_config(ManagerConfig::default().max_quantum(Duration::from_millis(5)))
}
