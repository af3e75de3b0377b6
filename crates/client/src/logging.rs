//! Logging macros and subscriber setup.
//!
//! Call sites use `log_info!` and friends so the backend can change in one
//! place; today they forward to `tracing` under the `bridgekit` target.

use tracing_subscriber::EnvFilter;

#[doc(hidden)]
pub use tracing as __tracing;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "bridgekit=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init();
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::info!(target: "bridgekit", $($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::error!(target: "bridgekit", $($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::warn!(target: "bridgekit", $($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::__tracing::debug!(target: "bridgekit", $($arg)*)
    };
}
