//! Logging utilities and structured logging support

pub use log::{debug, info, warn, error, trace};

/// Initialize logging for tests; repeated calls are ignored
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
