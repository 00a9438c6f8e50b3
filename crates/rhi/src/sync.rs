//! Synchronization primitives.
//!
//! - [`Semaphore`]: GPU-side ordering between queue operations
//! - [`Fence`]: GPU-to-CPU completion signal
//! - [`FrameSync`]: the set used by the single in-flight frame
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::sync::FrameSync;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let sync = FrameSync::new(device)?;
//!
//! // Returns immediately on the first frame: the fence starts signaled
//! sync.in_flight_fence().wait(u64::MAX)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device that owns the fence
    /// * `signaled` - Start in the signaled state, so the first
    ///   [`Fence::wait`] returns at once
    ///
    /// # Errors
    ///
    /// Returns `VulkanError` if `vkCreateFence` fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use vkframe_rhi::device::Device;
    /// # use vkframe_rhi::sync::Fence;
    /// # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
    /// let fence = Fence::new(device, true)?;
    /// fence.wait(u64::MAX)?;
    /// fence.reset()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let create_info = vk::FenceCreateInfo::default().flags(fence_flags(signaled));

        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    ///
    /// A timeout is reported as `VulkanError(TIMEOUT)`.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be pending in any queue submission.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

fn fence_flags(signaled: bool) -> vk::FenceCreateFlags {
    if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    }
}

/// Synchronization set for one in-flight frame.
///
/// ```text
/// 1. wait in_flight_fence          (GPU finished the previous frame)
/// 2. acquire image                 -> signals image_available
/// 3. reset in_flight_fence
/// 4. submit: wait image_available at COLOR_ATTACHMENT_OUTPUT,
///            signal render_finished + in_flight_fence
/// 5. present: wait render_finished
/// ```
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// Creates two unsignaled semaphores and a signaled fence.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        debug!("Frame synchronization set created");

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn image_available_semaphore(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished_semaphore(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }

    #[test]
    fn test_fence_flags() {
        assert_eq!(fence_flags(true), vk::FenceCreateFlags::SIGNALED);
        assert!(fence_flags(false).is_empty());
    }
}
