//! Shared foundation for the vkframe crates.
//!
//! - Error type and result alias for platform and configuration failures
//! - Logging bootstrap
//! - Engine configuration
//! - Frame-rate timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
