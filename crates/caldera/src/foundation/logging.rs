//! Logging utilities
//!
//! The library only emits through the `log` facade. Binaries and tests
//! install `env_logger` through [`init`].

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}
