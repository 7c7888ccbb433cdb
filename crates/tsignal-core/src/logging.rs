//! Logging facilities for tsignal-core.
//!
//! The crate is instrumented with the `tracing` crate. Applications that
//! already install their own subscriber can filter this crate's output with
//! the target constants in [`targets`]; applications that do not can call
//! [`init`] to get a sensible console subscriber.
//!
//! # Debug toggle
//!
//! Setting the `TSIGNAL_DEBUG` environment variable (to anything but `0` or
//! the empty string) raises this crate's level to `trace` in the subscriber
//! installed by [`init`]. At that level every connection, emission,
//! dispatch-mode decision, and cleanup is logged.
//!
//! ```ignore
//! tsignal_core::logging::init();
//! ```

use std::env;

/// Name of the environment variable that raises the crate's log level.
pub const DEBUG_ENV: &str = "TSIGNAL_DEBUG";

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target prefix.
    pub const CORE: &str = "tsignal_core";
    /// Signal connection lifecycle.
    pub const SIGNAL: &str = "tsignal_core::signal";
    /// Per-emission dispatch decisions and delivery failures.
    pub const DISPATCH: &str = "tsignal_core::dispatch";
    /// Execution context binding and posting.
    pub const CONTEXT: &str = "tsignal_core::context";
    /// Worker lifecycle and task queue.
    pub const WORKER: &str = "tsignal_core::worker";
}

/// Whether the `TSIGNAL_DEBUG` toggle is set.
pub fn debug_enabled() -> bool {
    matches!(env::var(DEBUG_ENV), Ok(value) if !value.is_empty() && value != "0")
}

/// Install a console subscriber for this process.
///
/// Honors `RUST_LOG` when set, defaults to `info` otherwise, and raises this
/// crate to `trace` when [`DEBUG_ENV`] is set. Errors if a global subscriber
/// is already installed.
pub fn try_init() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::EnvFilter;

    let filter = if debug_enabled() {
        EnvFilter::new(format!("warn,{}=trace", targets::CORE))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
}

/// Like [`try_init`], but ignores the error when a subscriber already exists.
///
/// Convenient in examples and test binaries where several entry points may
/// race to initialize logging.
pub fn init() {
    let _ = try_init();
}
