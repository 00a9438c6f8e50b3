//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,vkframe=debug";

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when set, otherwise `info` with debug output
/// for the vkframe crates. Calling this twice is a no-op for the second call.
///
/// # Example
/// ```
/// vkframe_core::init_logging();
/// tracing::info!("frame loop starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
