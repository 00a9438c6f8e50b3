//! Error types for the renderer crate.

use thiserror::Error;
use vkframe_rhi::RhiError;

/// Anything that can stop the renderer: GPU-layer failures and
/// platform/config failures raised while setting it up.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Core(#[from] vkframe_core::Error),
}

pub type RendererResult<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_pass_through() {
        let err: RendererError = RhiError::NoDeviceFound.into();
        assert_eq!(err.to_string(), RhiError::NoDeviceFound.to_string());

        let err: RendererError = vkframe_core::Error::Window("closed".to_string()).into();
        assert!(err.to_string().contains("closed"));
    }
}
