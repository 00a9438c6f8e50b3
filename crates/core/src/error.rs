//! Error types shared by the platform and configuration layers.

use thiserror::Error;

/// Errors raised outside the GPU layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Surface creation or Vulkan entry failures seen from the platform side
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or handle retrieval errors
    #[error("Window error: {0}")]
    Window(String),

    /// Invalid configuration value
    #[error("Config error: {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias using the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
