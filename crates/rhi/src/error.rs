//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// Errors raised by the Vulkan layer.
///
/// Setup failures and per-frame fatal failures both surface here. A stale
/// presentable chain is not an error; it is reported through
/// [`AcquireOutcome`](crate::swapchain::AcquireOutcome) and
/// [`PresentOutcome`](crate::swapchain::PresentOutcome).
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error outside the dedicated categories below
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The instance enumerated zero physical devices
    #[error("No Vulkan-capable device found")]
    NoDeviceFound,

    /// No enumerated device has graphics + present queues and the required extensions
    #[error("No suitable device found ({0} candidate(s) rejected)")]
    NoSuitableDevice(usize),

    #[error("Logical device creation failed: {0}")]
    DeviceCreation(vk::Result),

    #[error("Presentable chain creation failed: {0}")]
    ChainCreation(String),

    #[error("Failed to acquire next image: {0}")]
    Acquire(vk::Result),

    #[error("Queue submission failed: {0}")]
    Submit(vk::Result),

    #[error("Presentation failed: {0}")]
    Present(vk::Result),

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
