//! GPU buffer management.
//!
//! Buffers are allocated through gpu-allocator in host-visible memory and
//! filled through their persistent mapping.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::buffer::Buffer;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let positions: [f32; 6] = [0.0, -0.5, 0.5, 0.5, -0.5, 0.5];
//! let vertex_buffer = Buffer::new_with_data(device, bytemuck::cast_slice(&positions))?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, MutexGuard};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vertex data is written once from the CPU and read by the input assembler.
const USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::VERTEX_BUFFER;
const LOCATION: MemoryLocation = MemoryLocation::CpuToGpu;

fn buffer_create_info<'a>(size: vk::DeviceSize) -> vk::BufferCreateInfo<'a> {
    vk::BufferCreateInfo::default()
        .size(size)
        .usage(USAGE)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
}

/// `VkBuffer` plus its gpu-allocator allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Creates an unfilled vertex buffer in host-visible memory.
    ///
    /// The memory stays persistently mapped, so [`Buffer::write_data`] is a
    /// plain copy.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device that owns the buffer
    /// * `size` - Size in bytes
    ///
    /// # Errors
    ///
    /// * `InvalidHandle` if `size` is zero or the allocator lock is poisoned
    /// * `VulkanError` if buffer creation or memory binding fails
    /// * `AllocatorError` if no suitable memory is available
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use vkframe_rhi::device::Device;
    /// # use vkframe_rhi::buffer::Buffer;
    /// # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
    /// let buffer = Buffer::new(device, 60)?;
    /// assert_eq!(buffer.size(), 60);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(device: Arc<Device>, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer = unsafe { device.handle().create_buffer(&buffer_create_info(size), None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = match lock_allocator(&device).and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: "vertex",
                    requirements,
                    location: LOCATION,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // Wrap first so Drop releases both on a bind failure
        let buffer = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
        };

        if let Some(allocation) = &buffer.allocation {
            unsafe {
                buffer.device.handle().bind_buffer_memory(
                    buffer.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        debug!("Created vertex buffer: {} bytes", size);

        Ok(buffer)
    }

    /// Creates a buffer sized for `data` and copies it in.
    ///
    /// # Errors
    ///
    /// Same as [`Buffer::new`]; an empty `data` is rejected as a zero size.
    pub fn new_with_data(device: Arc<Device>, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        check_write_range(self.size, offset, data.len())?;

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        // SAFETY: the range was checked against the buffer size and the
        // mapping stays valid for the allocation's lifetime.
        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free the allocation first, then destroy the buffer
        if let Some(allocation) = self.allocation.take() {
            match lock_allocator(&self.device) {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed vertex buffer ({} bytes)", self.size);
    }
}

fn lock_allocator(device: &Device) -> RhiResult<MutexGuard<'_, Allocator>> {
    device
        .allocator()
        .lock()
        .map_err(|_| RhiError::InvalidHandle("GPU allocator mutex poisoned".to_string()))
}

fn check_write_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
    let end = offset.checked_add(len as vk::DeviceSize);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::InvalidHandle(format!(
            "Write exceeds buffer size: offset {} + data {} > buffer {}",
            offset, len, size
        ))),
    }
}
