//! Physical device (accelerator) selection.
//!
//! Selection is pass/fail: a candidate is suitable when it has a
//! graphics-capable and a present-capable queue family for the target surface
//! and advertises every extension in [`REQUIRED_DEVICE_EXTENSIONS`]. The first
//! suitable candidate in enumeration order wins.
//!
//! Enumeration (which talks to Vulkan) is kept apart from the queue family
//! scan and the selection policy (which are pure and unit tested).
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::instance::Instance;
//! use vkframe_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(&[], false).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let accelerator = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//! println!("Selected GPU: {}", accelerator.device_name());
//! ```

use std::ffi::{CStr, CString};

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Device extensions every accelerator must advertise.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Graphics and present queue family indices resolved against one device and
/// one surface. The two may be the same family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both roles have a family.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }

    /// Graphics and present are served by different families.
    pub fn is_split(&self) -> bool {
        matches!(
            (self.graphics_family, self.present_family),
            (Some(g), Some(p)) if g != p
        )
    }
}

/// Scans queue families once, recording the first graphics-capable family and
/// the first present-capable family independently.
///
/// `supports_present` is asked only until a present family has been found,
/// and the scan stops as soon as both roles are filled.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> QueueFamilyIndices
where
    F: FnMut(u32) -> bool,
{
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(i);
        }

        if indices.present_family.is_none() && supports_present(i) {
            indices.present_family = Some(i);
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// A physical device together with everything selection needs to know about it.
#[derive(Clone)]
pub struct AcceleratorCandidate {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,
    /// Names of the device extensions the driver advertises.
    pub extensions: Vec<CString>,
}

impl AcceleratorCandidate {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Required extensions this device does not advertise.
    pub fn missing_extensions(&self) -> Vec<&'static CStr> {
        REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .copied()
            .filter(|required| !self.extensions.iter().any(|ext| ext.as_c_str() == *required))
            .collect()
    }

    /// Complete queue family mapping and every required extension present.
    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete() && self.missing_extensions().is_empty()
    }
}

impl std::fmt::Debug for AcceleratorCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("AcceleratorCandidate")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the first suitable candidate in enumeration order.
///
/// # Errors
///
/// [`RhiError::NoDeviceFound`] for an empty candidate list,
/// [`RhiError::NoSuitableDevice`] when every candidate is rejected.
pub fn select_accelerator(
    candidates: impl IntoIterator<Item = AcceleratorCandidate>,
) -> RhiResult<AcceleratorCandidate> {
    let mut rejected = 0usize;

    for candidate in candidates {
        if candidate.is_suitable() {
            return Ok(candidate);
        }

        debug!(
            "GPU '{}' skipped: graphics={:?}, present={:?}, missing extensions={:?}",
            candidate.device_name(),
            candidate.queue_families.graphics_family,
            candidate.queue_families.present_family,
            candidate.missing_extensions()
        );
        rejected += 1;
    }

    if rejected == 0 {
        Err(RhiError::NoDeviceFound)
    } else {
        Err(RhiError::NoSuitableDevice(rejected))
    }
}

/// Queries every physical device the instance exposes against `surface`.
pub fn enumerate_candidates(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Vec<AcceleratorCandidate>> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    devices
        .into_iter()
        .map(|device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let queue_families = find_queue_families(&families, |index| {
                let support = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                };
                present_supported(index, support)
            });

            let extensions = unsafe { instance.enumerate_device_extension_properties(device)? }
                .iter()
                .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
                .collect();

            Ok(AcceleratorCandidate {
                device,
                properties,
                queue_families,
                extensions,
            })
        })
        .collect()
}

/// Enumerates the instance's devices and selects the first suitable one.
///
/// # Errors
///
/// See [`select_accelerator`]. Vulkan enumeration failures are returned as
/// [`RhiError::VulkanError`].
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<AcceleratorCandidate> {
    let candidates = enumerate_candidates(instance, surface, surface_loader)?;

    let selected = select_accelerator(candidates).inspect_err(|e| warn!("{}", e))?;

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, graphics family {:?}, present family {:?}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        selected.queue_families.graphics_family,
        selected.queue_families.present_family
    );

    Ok(selected)
}

/// A failed support query counts as "cannot present" but is logged, since
/// it usually points at a lost surface rather than an unsuitable device.
fn present_supported(family_index: u32, support: ash::prelude::VkResult<bool>) -> bool {
    match support {
        Ok(supported) => supported,
        Err(e) => {
            warn!(
                "Surface support query failed for queue family {}: {}",
                family_index, e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(graphics: Option<u32>, present: Option<u32>, swapchain: bool) -> AcceleratorCandidate {
        let mut extensions = vec![c"VK_KHR_maintenance1".to_owned()];
        if swapchain {
            extensions.push(ash::khr::swapchain::NAME.to_owned());
        }
        AcceleratorCandidate {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            queue_families: QueueFamilyIndices {
                graphics_family: graphics,
                present_family: present,
            },
            extensions,
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!indices.is_complete());

        let indices = QueueFamilyIndices {
            graphics_family: None,
            present_family: Some(0),
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);
        assert!(!shared.is_split());

        let split = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(1),
        };
        assert_eq!(split.unique_families(), vec![2, 1]);
        assert!(split.is_split());
    }

    #[test]
    fn test_find_queue_families_same_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn test_find_queue_families_split_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = find_queue_families(&families, |i| i == 2);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(2));
        assert!(indices.is_split());
    }

    #[test]
    fn test_find_queue_families_takes_first_match() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |i| i == 1);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_find_queue_families_short_circuits() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut queried = Vec::new();
        let indices = find_queue_families(&families, |i| {
            queried.push(i);
            true
        });

        assert!(indices.is_complete());
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn test_find_queue_families_completeness_is_monotonic() {
        // Later families that lack capabilities never clear earlier findings
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::empty()),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, |i| i == 0);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn test_find_queue_families_skips_empty_families() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_find_queue_families_no_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_candidate_suitability() {
        assert!(candidate(Some(0), Some(0), true).is_suitable());
        assert!(!candidate(Some(0), None, true).is_suitable());
        assert!(!candidate(None, Some(0), true).is_suitable());

        let no_swapchain = candidate(Some(0), Some(0), false);
        assert!(!no_swapchain.is_suitable());
        assert_eq!(no_swapchain.missing_extensions(), vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_select_empty_list() {
        let result = select_accelerator(Vec::new());
        assert!(matches!(result, Err(RhiError::NoDeviceFound)));
    }

    #[test]
    fn test_select_no_suitable() {
        let result = select_accelerator(vec![
            candidate(Some(0), None, true),
            candidate(Some(0), Some(0), false),
        ]);
        assert!(matches!(result, Err(RhiError::NoSuitableDevice(2))));
    }

    #[test]
    fn test_select_first_suitable_wins() {
        let mut first = candidate(Some(1), Some(2), true);
        first.properties.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        let mut second = candidate(Some(0), Some(0), true);
        second.properties.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;

        let selected = select_accelerator(vec![
            candidate(None, None, true),
            first,
            second,
        ])
        .unwrap();

        assert_eq!(selected.properties.device_type, vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert!(selected.queue_families.is_complete());
        assert!(selected.missing_extensions().is_empty());
    }

    #[test]
    fn test_present_support_query_failure() {
        assert!(present_supported(0, Ok(true)));
        assert!(!present_supported(0, Ok(false)));
        assert!(!present_supported(
            1,
            Err(vk::Result::ERROR_SURFACE_LOST_KHR)
        ));
    }
}
