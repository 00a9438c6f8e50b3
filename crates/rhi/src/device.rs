//! Vulkan logical device and queue management.
//!
//! The [`Device`] is the execution context: it exclusively owns the logical
//! device, the graphics (submission) queue and the presentation queue, plus
//! the gpu-allocator used for vertex buffers.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::instance::Instance;
//! use vkframe_rhi::physical_device::select_physical_device;
//! use vkframe_rhi::device::Device;
//! use ash::vk;
//!
//! let instance = Instance::new(&[], false).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let accelerator = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//! let device = Device::new(&instance, &accelerator).expect("Failed to create logical device");
//!
//! let graphics_queue = device.graphics_queue();
//! let present_queue = device.present_queue();
//! ```

use std::ffi::c_char;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{AcceleratorCandidate, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

const QUEUE_PRIORITIES: [f32; 1] = [1.0];

/// Vulkan logical device wrapper.
///
/// Shared through `Arc`; every object created from it holds a clone, so the
/// device is destroyed only after its dependents are gone.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    /// Dropped explicitly before `destroy_device`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the logical device for a selected accelerator.
    ///
    /// One queue (priority 1.0) is requested per unique family in the
    /// accelerator's mapping, so a shared graphics/present family yields a
    /// single request. Queues are then fetched at index 0 of each family.
    ///
    /// # Errors
    ///
    /// [`RhiError::DeviceCreation`] if the mapping is incomplete or
    /// `vkCreateDevice` fails; [`RhiError::AllocatorError`] if the memory
    /// allocator cannot be initialized.
    pub fn new(instance: &Instance, accelerator: &AcceleratorCandidate) -> RhiResult<Arc<Self>> {
        let queue_families = accelerator.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::DeviceCreation(
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ));
        };

        let unique_families = queue_families.unique_families();
        let queue_create_infos = queue_create_infos(&unique_families, &QUEUE_PRIORITIES);

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let extension_names: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(accelerator.device, &create_info, None)
                .map_err(RhiError::DeviceCreation)?
        };

        info!(
            "Logical device created with {} extension(s)",
            extension_names.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics from family {}, present from family {}",
            graphics_family, present_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: accelerator.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: accelerator.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue used for command submission.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue used for presentation. May equal the graphics queue.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The command buffers must be fully recorded, and the fence (if not null)
    /// must be unsignaled and not in use by another submission.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Submit`] on failure.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)
                .map_err(RhiError::Submit)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is a function table plus handle, queues and the physical
// device are plain handles, and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Builds one queue request per family in `families`.
fn queue_create_infos<'a>(
    families: &[u32],
    priorities: &'a [f32],
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(priorities)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_family_single_queue_request() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        let infos = queue_create_infos(&indices.unique_families(), &QUEUE_PRIORITIES);

        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 0);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn test_split_families_two_queue_requests() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        let infos = queue_create_infos(&indices.unique_families(), &QUEUE_PRIORITIES);

        let families: Vec<u32> = infos.iter().map(|i| i.queue_family_index).collect();
        assert_eq!(families, vec![0, 2]);
        assert!(infos.iter().all(|i| i.queue_count == 1));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
