//! Images and image views.

use crate::device::{LogicalDevice, PhysicalDevice};
use crate::error::{GpuError, Result};
use crate::swapchain::SwapchainHandle;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Depth formats tried in order when picking a depth attachment format.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

enum Backing {
    /// Owned by the swapchain; never destroyed here.
    Swapchain(Arc<SwapchainHandle>),
    Allocated {
        device: Arc<LogicalDevice>,
        allocation: Option<Allocation>,
    },
}

/// A 2-D image, either presentable or backed by allocator memory.
pub struct Image {
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    backing: Backing,
}

impl Image {
    pub(crate) fn from_swapchain(
        swapchain: Arc<SwapchainHandle>,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            image,
            format,
            extent,
            mip_levels: 1,
            backing: Backing::Swapchain(swapchain),
        }
    }

    /// Create an optimally tiled, device-local image for use as an attachment.
    pub fn new_attachment(
        device: &Arc<LogicalDevice>,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = device.handle();
        let image = unsafe { raw.create_image(&create_info, None)? };
        let requirements = unsafe { raw.get_image_memory_requirements(image) };

        let allocation =
            match device
                .allocator()
                .lock()
                .allocate(name, requirements, MemoryLocation::GpuOnly, false)
            {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { raw.destroy_image(image, None) };
                    return Err(e);
                }
            };

        if let Err(e) =
            unsafe { raw.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            let _ = device.allocator().lock().free(allocation);
            unsafe { raw.destroy_image(image, None) };
            return Err(e.into());
        }

        Ok(Self {
            image,
            format,
            extent,
            mip_levels: 1,
            backing: Backing::Allocated {
                device: Arc::clone(device),
                allocation: Some(allocation),
            },
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Whether the image belongs to a swapchain.
    pub fn presentable(&self) -> bool {
        matches!(self.backing, Backing::Swapchain(_))
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        match &self.backing {
            Backing::Swapchain(swapchain) => swapchain.device(),
            Backing::Allocated { device, .. } => device,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Backing::Allocated { device, allocation } = &mut self.backing {
            if let Some(allocation) = allocation.take() {
                if let Err(e) = device.allocator().lock().free(allocation) {
                    tracing::error!("Failed to free image memory: {e}");
                }
            }
            unsafe { device.handle().destroy_image(self.image, None) };
        }
    }
}

/// A 2-D view over every mip level of an image.
///
/// Keeps its image alive.
pub struct ImageView {
    image: Arc<Image>,
    view: vk::ImageView,
}

impl ImageView {
    pub fn new(image: Arc<Image>) -> Result<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format())
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_flags(image.format()))
                    .base_mip_level(0)
                    .level_count(image.mip_levels())
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { image.device().handle().create_image_view(&view_info, None)? };

        Ok(Self { image, view })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.image
                .device()
                .handle()
                .destroy_image_view(self.view, None);
        }
    }
}

/// Whether `format` carries a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Whether `format` carries a stencil component.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspects a full view of a `format` image covers.
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    match (is_depth_format(format), has_stencil(format)) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        (false, true) => vk::ImageAspectFlags::STENCIL,
        (false, false) => vk::ImageAspectFlags::COLOR,
    }
}

/// First candidate usable as an optimally tiled depth attachment.
pub fn find_depth_format(physical_device: &PhysicalDevice) -> Result<vk::Format> {
    let instance = physical_device.instance().handle();
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            let properties = unsafe {
                instance.get_physical_device_format_properties(physical_device.handle(), format)
            };
            properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| GpuError::InvalidState("no supported depth format".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_formats_use_color_aspect() {
        assert_eq!(
            aspect_flags(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
        assert!(!is_depth_format(vk::Format::R32G32B32_SFLOAT));
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(
            aspect_flags(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert!(DEPTH_FORMAT_CANDIDATES.iter().all(|&f| is_depth_format(f)));
    }
}
