//! Presentable chain management.
//!
//! Owns the `VkSwapchainKHR`, its images and one 2-D color view per image.
//! Format, present mode, extent and image count are negotiated from the
//! surface capabilities by the pure `choose_*` helpers below.
//!
//! A stale chain (window resized, surface changed) is reported as a value,
//! not an error: [`AcquireOutcome::OutOfDate`] and [`PresentOutcome::Stale`].
//! The owner is expected to rebuild with [`Swapchain::recreate`].
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vkframe_rhi::{instance::Instance, device::Device, swapchain::*, vk};
//! # fn run(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR,
//! #        acquired: vk::Semaphore, rendered: vk::Semaphore) -> vkframe_rhi::RhiResult<()> {
//! let mut swapchain = Swapchain::new(instance, device.clone(), surface, vk::Extent2D { width: 800, height: 600 })?;
//!
//! match swapchain.acquire_next_image(acquired)? {
//!     AcquireOutcome::Acquired { index, .. } => {
//!         // ... submit work that signals `rendered` ...
//!         if swapchain.present(device.present_queue(), index, rendered)? == PresentOutcome::Stale {
//!             swapchain.recreate(vk::Extent2D { width: 1024, height: 768 })?;
//!         }
//!     }
//!     AcquireOutcome::OutOfDate => swapchain.recreate(vk::Extent2D { width: 1024, height: 768 })?,
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::QueueFamilyIndices;

/// Result of asking the chain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available. `suboptimal` means it can still be rendered and
    /// presented, but the chain should be rebuilt afterwards.
    Acquired { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Result of a presentation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented or dropped, but the chain is out of date or suboptimal.
    Stale,
}

/// Surface capability triple used to negotiate the chain.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Handles and negotiated parameters of one chain generation.
struct ChainParts {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// Vulkan swapchain wrapper.
///
/// Invariant: `images.len() == image_views.len()`. Must be dropped before the
/// surface it presents to and before the device.
pub struct Swapchain {
    device: Arc<Device>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Builds a chain for `surface`.
    ///
    /// `desired_extent` is only used when the surface accepts any size;
    /// otherwise the surface's current extent wins.
    ///
    /// # Errors
    ///
    /// [`RhiError::ChainCreation`] if the surface cannot be queried, offers no
    /// formats or present modes, or chain/view creation fails. Anything
    /// created before the failure is released.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        desired_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let parts = build_chain(
            &device,
            &surface_loader,
            &swapchain_loader,
            surface,
            desired_extent,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            surface_loader,
            surface,
            swapchain_loader,
            swapchain: parts.swapchain,
            images: parts.images,
            image_views: parts.image_views,
            format: parts.surface_format.format,
            color_space: parts.surface_format.color_space,
            extent: parts.extent,
            present_mode: parts.present_mode,
        })
    }

    /// Rebuilds the chain against the surface's current capabilities.
    ///
    /// Waits for the device to go idle, creates the new chain with the old one
    /// as `old_swapchain`, then destroys the old views and chain.
    ///
    /// Passing the old chain to `vkCreateSwapchainKHR` retires it even when
    /// creation fails, so an error here is fatal: the old images can no longer
    /// be acquired and the caller must tear the renderer down.
    ///
    /// Anything derived from the old images (framebuffers, recorded command
    /// buffers) must be released by the caller before this is called.
    pub fn recreate(&mut self, desired_extent: vk::Extent2D) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain for {}x{}",
            desired_extent.width, desired_extent.height
        );

        let parts = build_chain(
            &self.device,
            &self.surface_loader,
            &self.swapchain_loader,
            self.surface,
            desired_extent,
            self.swapchain,
        )?;

        self.destroy_chain();

        self.swapchain = parts.swapchain;
        self.images = parts.images;
        self.image_views = parts.image_views;
        self.format = parts.surface_format.format;
        self.color_space = parts.surface_format.color_space;
        self.extent = parts.extent;
        self.present_mode = parts.present_mode;

        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Waits without timeout.
    ///
    /// # Errors
    ///
    /// [`RhiError::Acquire`] for anything other than success, suboptimal or
    /// out-of-date.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Queues image `image_index` for presentation once `wait_semaphore` is signaled.
    ///
    /// # Errors
    ///
    /// [`RhiError::Present`] for anything other than success, suboptimal or
    /// out-of-date.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_chain(&mut self) {
        destroy_image_views(&self.device, &self.image_views);
        self.image_views.clear();
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let image_count = self.images.len();
        self.destroy_chain();
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width, self.extent.height, image_count
        );
    }
}

fn build_chain(
    device: &Device,
    surface_loader: &ash::khr::surface::Instance,
    swapchain_loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    desired_extent: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<ChainParts> {
    let support = SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)
        .map_err(|e| RhiError::ChainCreation(format!("surface query failed: {e}")))?;

    if !support.is_adequate() {
        return Err(RhiError::ChainCreation(
            "surface offers no formats or present modes".to_string(),
        ));
    }

    let surface_format = choose_surface_format(&support.formats)
        .ok_or_else(|| RhiError::ChainCreation("no surface format".to_string()))?;
    let present_mode = choose_present_mode(&support.present_modes);
    let extent = choose_extent(
        &support.capabilities,
        desired_extent.width,
        desired_extent.height,
    );
    let image_count = determine_image_count(&support.capabilities);

    info!(
        "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
        extent.width,
        extent.height,
        surface_format.format,
        surface_format.color_space,
        present_mode,
        image_count
    );

    let (sharing_mode, queue_family_indices) = choose_sharing_mode(device.queue_families());
    debug!(
        "Image sharing mode {:?} for families {:?}",
        sharing_mode, queue_family_indices
    );

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(&queue_family_indices)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe {
        swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| RhiError::ChainCreation(format!("vkCreateSwapchainKHR: {e}")))?
    };

    let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(RhiError::ChainCreation(format!(
                "vkGetSwapchainImagesKHR: {e}"
            )));
        }
    };

    let image_views = match create_image_views(device, &images, surface_format.format) {
        Ok(views) => views,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e);
        }
    };

    info!("Swapchain created with {} images", images.len());

    Ok(ChainParts {
        swapchain,
        images,
        image_views,
        surface_format,
        extent,
        present_mode,
    })
}

/// Maps the raw acquire result onto an [`AcquireOutcome`].
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            debug!("Swapchain out of date on acquire");
            Ok(AcquireOutcome::OutOfDate)
        }
        Err(e) => Err(RhiError::Acquire(e)),
    }
}

/// Maps the raw present result onto a [`PresentOutcome`].
///
/// `Ok(true)` from ash means `VK_SUBOPTIMAL_KHR`.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            debug!("Swapchain stale on present");
            Ok(PresentOutcome::Stale)
        }
        Err(e) => Err(RhiError::Present(e)),
    }
}

/// Prefers 8-bit BGRA sRGB in the non-linear sRGB color space, else the first format.
///
/// Returns `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return Some(format);
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!(
            "Preferred surface format unavailable, using {:?} / {:?}",
            format.format, format.color_space
        );
    }
    first
}

/// MAILBOX if offered, otherwise FIFO (always supported).
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, unless it reports the `u32::MAX` sentinel,
/// in which case the requested size is clamped into `[min, max]`.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        width,
        height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// `min + 1`, capped at `max` when `max` is nonzero (zero means unbounded).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// CONCURRENT across both families when graphics and present differ, else EXCLUSIVE.
pub fn choose_sharing_mode(queue_families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match (queue_families.graphics_family, queue_families.present_family) {
        (Some(graphics), Some(present)) if graphics != present => {
            (vk::SharingMode::CONCURRENT, vec![graphics, present])
        }
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                destroy_image_views(device, &image_views);
                return Err(RhiError::ChainCreation(format!(
                    "failed to create image view {i}: {e}"
                )));
            }
        }
    }

    debug!("Created {} image views", image_views.len());
    Ok(image_views)
}

fn destroy_image_views(device: &Device, views: &[vk::ImageView]) {
    for &view in views {
        unsafe { device.handle().destroy_image_view(view, None) };
    }
}
