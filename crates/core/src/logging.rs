//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,rtg=debug";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (`RUST_LOG`, falling back to `info,rtg=debug`)
/// - Targets and thread ids on every line
///
/// Must be called at most once per process.
///
/// # Example
/// ```no_run
/// rtg_core::init_logging();
/// tracing::info!("Engine starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
