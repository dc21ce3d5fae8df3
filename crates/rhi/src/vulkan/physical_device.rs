//! Physical device (GPU) selection.
//!
//! Devices are filtered by queue support (a graphics queue, plus a present
//! queue when a surface exists and the swapchain extension). A configured
//! device name wins outright; otherwise the highest-scoring device is chosen
//! (discrete > integrated > virtual > CPU, then image limits and VRAM).

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices for the queues the engine submits to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics and transfer work.
    pub graphics_family: Option<u32>,
    /// Family able to present to the surface; unused without one.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Graphics is always required; presentation only when a surface exists.
    #[inline]
    pub fn is_complete(&self, needs_present: bool) -> bool {
        self.graphics_family.is_some() && (!needs_present || self.present_family.is_some())
    }

    /// Distinct families, graphics first.
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
}

/// A selected GPU and what the engine needs to know about it.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        device_name(&self.properties)
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

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// The surface a device must be able to present to.
#[derive(Clone, Copy)]
pub struct SurfaceTarget<'a> {
    pub loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

/// Selects the GPU to run on.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies, or if
/// `preferred_name` is given and no qualifying device carries that name.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<SurfaceTarget<'_>>,
    preferred_name: Option<&str>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable: Vec<(PhysicalDeviceInfo, u32)> = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .collect();

    if let Some(name) = preferred_name {
        return match suitable.into_iter().find(|(info, _)| info.device_name() == name) {
            Some((info, _)) => {
                info!("Selected requested GPU '{}'", name);
                Ok(info)
            }
            None => {
                warn!("Requested GPU '{}' not found or not suitable", name);
                Err(RhiError::NoSuitableGpu)
            }
        };
    }

    // Highest score first; ties keep enumeration order.
    suitable.sort_by(|a, b| b.1.cmp(&a.1));
    let Some((selected, score)) = suitable.into_iter().next() else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}), Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        score
    );

    Ok(selected)
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown Device")
    }
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceTarget<'_>>,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let name = device_name(&properties);

    let queue_families = find_queue_families(instance, device, surface);
    if !queue_families.is_complete(surface.is_some()) {
        debug!(
            "GPU '{}' skipped: missing required queue families (graphics={}, present={})",
            name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        );
        return None;
    }

    if surface.is_some() && !supports_swapchain(instance, device) {
        debug!("GPU '{}' skipped: no swapchain extension", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceTarget<'_>>,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics_family.is_none()
        {
            indices.graphics_family = Some(i);
        }

        if let Some(target) = surface
            && indices.present_family.is_none()
        {
            let present_support = unsafe {
                target
                    .loader
                    .get_physical_device_surface_support(device, i, target.surface)
                    .unwrap_or(false)
            };
            if present_support {
                indices.present_family = Some(i);
            }
        }
    }

    // Prefer a single family that does both.
    if let (Some(graphics), Some(present)) = (indices.graphics_family, indices.present_family)
        && graphics != present
        && let Some(target) = surface
    {
        let graphics_presents = unsafe {
            target
                .loader
                .get_physical_device_surface_support(device, graphics, target.surface)
                .unwrap_or(false)
        };
        if graphics_presents {
            indices.present_family = Some(graphics);
        }
    }

    indices
}

/// Rates a physical device based on its capabilities.
///
/// Higher scores indicate more desirable devices.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // Max image dimension tracks overall capability.
    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(device_type: vk::PhysicalDeviceType, heap_mb: u64) -> PhysicalDeviceInfo {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 1,
            ..Default::default()
        };
        memory_properties.memory_heaps[0] = vk::MemoryHeap {
            size: heap_mb * 1024 * 1024,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties {
                device_type,
                ..Default::default()
            },
            memory_properties,
            queue_families: QueueFamilyIndices::default(),
        }
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete(false));
    }

    #[test]
    fn test_present_family_only_required_with_surface() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(indices.is_complete(false));
        assert!(!indices.is_complete(true));
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_discrete_outranks_integrated() {
        let discrete = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, 1024);
        let integrated = info_with(vk::PhysicalDeviceType::INTEGRATED_GPU, 8192);
        assert!(rate_device(&discrete) > rate_device(&integrated));
    }

    #[test]
    fn test_device_local_memory_sums_device_heaps() {
        let info = info_with(vk::PhysicalDeviceType::CPU, 512);
        assert_eq!(info.device_local_memory(), 512 * 1024 * 1024);
    }
}
