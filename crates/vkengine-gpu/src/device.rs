//! Physical device selection and logical device creation.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use crate::memory::GpuAllocator;
use crate::surface::Surface;
use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Arc;

/// Device extensions every presenting device must offer.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Capabilities of one queue family on a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub count: u32,
    pub graphics: bool,
    pub compute: bool,
    pub transfer: bool,
    pub sparse_binding: bool,
    pub protected: bool,
    /// Can present to the surface the device was enumerated against.
    pub presentation: bool,
}

impl QueueFamily {
    fn from_properties(index: u32, properties: &vk::QueueFamilyProperties, presentation: bool) -> Self {
        let flags = properties.queue_flags;
        Self {
            index,
            count: properties.queue_count,
            graphics: flags.contains(vk::QueueFlags::GRAPHICS),
            compute: flags.contains(vk::QueueFlags::COMPUTE),
            transfer: flags.contains(vk::QueueFlags::TRANSFER),
            sparse_binding: flags.contains(vk::QueueFlags::SPARSE_BINDING),
            protected: flags.contains(vk::QueueFlags::PROTECTED),
            presentation,
        }
    }
}

/// Surface support query result.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// A swapchain can only be created with at least one format and present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// A GPU visible to the instance.
#[derive(Clone)]
pub struct PhysicalDevice {
    instance: Arc<Instance>,
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    name: String,
    queue_families: Vec<QueueFamily>,
}

impl PhysicalDevice {
    /// List every adapter, with queue presentation support checked against `surface`.
    pub fn enumerate(instance: &Arc<Instance>, surface: &Surface) -> Result<Vec<Self>> {
        let handles = unsafe { instance.handle().enumerate_physical_devices()? };
        if handles.is_empty() {
            return Err(GpuError::NoSuitableDevice);
        }

        handles
            .into_iter()
            .map(|handle| Self::inspect(instance, surface, handle))
            .collect()
    }

    fn inspect(
        instance: &Arc<Instance>,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let raw = instance.handle();
        let (properties, features, memory_properties, family_properties) = unsafe {
            (
                raw.get_physical_device_properties(handle),
                raw.get_physical_device_features(handle),
                raw.get_physical_device_memory_properties(handle),
                raw.get_physical_device_queue_family_properties(handle),
            )
        };

        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string());

        let queue_families = family_properties
            .iter()
            .enumerate()
            .map(|(i, props)| {
                let index = i as u32;
                let presentation = surface.supports_presentation(handle, index)?;
                Ok(QueueFamily::from_properties(index, props, presentation))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Found device '{}' ({:?}), geometry shader: {}, tessellation shader: {}",
            name,
            properties.device_type,
            features.geometry_shader == vk::TRUE,
            features.tessellation_shader == vk::TRUE,
        );

        Ok(Self {
            instance: Arc::clone(instance),
            handle,
            properties,
            features,
            memory_properties,
            name,
            queue_families,
        })
    }

    /// Pick the highest scoring device that can render and present to `surface`.
    pub fn pick(
        instance: &Arc<Instance>,
        surface: &Surface,
        required_extensions: &[&CStr],
    ) -> Result<Self> {
        let mut best: Option<(u32, Self)> = None;

        for device in Self::enumerate(instance, surface)? {
            if !device.is_suitable(surface, required_extensions)? {
                tracing::debug!("Device '{}' is not suitable", device.name);
                continue;
            }
            let score = device.score();
            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, device));
            }
        }

        let (score, device) = best.ok_or(GpuError::NoSuitableDevice)?;
        tracing::info!("Selected GPU: {} (score {score})", device.name);
        Ok(device)
    }

    fn is_suitable(&self, surface: &Surface, required_extensions: &[&CStr]) -> Result<bool> {
        if self.graphics_family().is_none() || self.presentation_family().is_none() {
            return Ok(false);
        }
        if !self.has_all_extensions(required_extensions)? {
            return Ok(false);
        }
        Ok(self.swapchain_support(surface)?.is_adequate())
    }

    /// Selection score; higher is better.
    pub fn score(&self) -> u32 {
        let device_local: u64 = self
            .memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|h| h.size)
            .sum();

        device_score(
            self.properties.device_type,
            device_local,
            self.features.geometry_shader == vk::TRUE,
        )
    }

    /// Device extensions this adapter offers.
    pub fn extensions(&self) -> Result<Vec<String>> {
        let properties = unsafe {
            self.instance
                .handle()
                .enumerate_device_extension_properties(self.handle)?
        };
        Ok(properties
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    /// Check every extension in `wanted` is offered, warning about each gap.
    pub fn has_all_extensions(&self, wanted: &[&CStr]) -> Result<bool> {
        let missing = crate::instance::missing_names(&self.extensions()?, wanted);
        for name in &missing {
            tracing::warn!(
                "Device '{}' is missing extension '{name}', which was requested",
                self.name
            );
        }
        Ok(missing.is_empty())
    }

    /// Query what `surface` supports on this device.
    pub fn swapchain_support(&self, surface: &Surface) -> Result<SwapchainSupport> {
        let loader = self.instance.surface_loader();
        unsafe {
            Ok(SwapchainSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(self.handle, surface.handle())?,
                formats: loader.get_physical_device_surface_formats(self.handle, surface.handle())?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(self.handle, surface.handle())?,
            })
        }
    }

    /// First family with graphics support.
    pub fn graphics_family(&self) -> Option<QueueFamily> {
        self.queue_families.iter().copied().find(|f| f.graphics)
    }

    /// First family able to present.
    pub fn presentation_family(&self) -> Option<QueueFamily> {
        self.queue_families.iter().copied().find(|f| f.presentation)
    }

    pub fn queue_families(&self) -> &[QueueFamily] {
        &self.queue_families
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

/// Score an adapter from its type, device-local memory and geometry shader support.
pub fn device_score(
    device_type: vk::PhysicalDeviceType,
    device_local_bytes: u64,
    geometry_shader: bool,
) -> u32 {
    let mut score: u32 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    // +1 per GiB
    score = score.saturating_add(u32::try_from(device_local_bytes >> 30).unwrap_or(u32::MAX));

    if geometry_shader {
        score = score.saturating_add(10);
    }

    score
}

/// Family indices with duplicates removed, in order of first appearance.
pub fn unique_families(families: &[u32]) -> Vec<u32> {
    let mut unique: Vec<u32> = Vec::with_capacity(families.len());
    for &family in families {
        if !unique.contains(&family) {
            unique.push(family);
        }
    }
    unique
}

/// A queue the logical device should create, with its scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueFamilyRequest {
    pub family: u32,
    /// In `[0, 1]`.
    pub priority: f32,
}

impl QueueFamilyRequest {
    pub fn new(family: u32, priority: f32) -> Self {
        Self { family, priority }
    }
}

/// Collapse requests to one per family, keeping the highest priority.
///
/// Families keep the order of their first appearance.
pub fn unique_queue_requests(requests: &[QueueFamilyRequest]) -> Result<Vec<QueueFamilyRequest>> {
    let mut unique: Vec<QueueFamilyRequest> = Vec::with_capacity(requests.len());

    for request in requests {
        if !(0.0..=1.0).contains(&request.priority) {
            return Err(GpuError::InvalidState(format!(
                "queue priority {} for family {} is outside [0, 1]",
                request.priority, request.family
            )));
        }
        match unique.iter_mut().find(|r| r.family == request.family) {
            Some(existing) => existing.priority = existing.priority.max(request.priority),
            None => unique.push(*request),
        }
    }

    Ok(unique)
}

/// The logical device, its queues and memory allocator.
///
/// Holds the instance so it is always destroyed after the device.
pub struct LogicalDevice {
    instance: Arc<Instance>,
    physical_device: PhysicalDevice,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    allocator: Mutex<GpuAllocator>,
    queues: HashMap<u32, vk::Queue>,
}

impl LogicalDevice {
    /// Create a device with one queue per unique requested family.
    pub fn new(
        physical_device: &PhysicalDevice,
        requests: &[QueueFamilyRequest],
        extensions: &[&CStr],
    ) -> Result<Arc<Self>> {
        if requests.is_empty() {
            return Err(GpuError::InvalidState("no queues requested".to_string()));
        }
        if !physical_device.has_all_extensions(extensions)? {
            let names: Vec<String> = extensions
                .iter()
                .map(|e| e.to_string_lossy().into_owned())
                .collect();
            return Err(GpuError::ExtensionNotSupported(names.join(", ")));
        }

        let unique = unique_queue_requests(requests)?;
        let priorities: Vec<[f32; 1]> = unique.iter().map(|r| [r.priority]).collect();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique
            .iter()
            .zip(&priorities)
            .map(|(request, priority)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(request.family)
                    .queue_priorities(priority)
            })
            .collect();

        let extension_names: Vec<*const std::ffi::c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let instance = Arc::clone(physical_device.instance());
        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device.handle(), &create_info, None)?
        };

        let queues = unique
            .iter()
            .map(|r| (r.family, unsafe { device.get_device_queue(r.family, 0) }))
            .collect();

        let allocator =
            match unsafe { GpuAllocator::new(instance.handle(), &device, physical_device.handle()) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err(e);
                }
            };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        tracing::info!(
            "Logical device created with {} queue famil{}",
            unique.len(),
            if unique.len() == 1 { "y" } else { "ies" }
        );

        Ok(Arc::new(Self {
            instance,
            physical_device: physical_device.clone(),
            device,
            swapchain_loader,
            allocator: Mutex::new(allocator),
            queues,
        }))
    }

    /// The queue created for `request`'s family.
    pub fn queue(&self, request: &QueueFamilyRequest) -> Result<vk::Queue> {
        self.queues.get(&request.family).copied().ok_or_else(|| {
            GpuError::InvalidState(format!("no queue was created for family {}", request.family))
        })
    }

    /// The raw device.
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// `VK_KHR_swapchain` function table.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Frees every VkDeviceMemory block, so it must precede vkDestroyDevice.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
        }
    }
}
