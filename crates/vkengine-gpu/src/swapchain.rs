//! Swapchain creation, image acquisition and presentation.

use crate::device::{unique_families, LogicalDevice};
use crate::error::{GpuError, Result};
use crate::image::Image;
use crate::surface::Surface;
use ash::vk;
use std::sync::Arc;

/// Owns the raw `VkSwapchainKHR`.
///
/// Shared by the swapchain's [`Image`]s so the handle outlives every view of them.
pub struct SwapchainHandle {
    device: Arc<LogicalDevice>,
    swapchain: vk::SwapchainKHR,
}

impl SwapchainHandle {
    pub fn raw(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        unsafe {
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Result of [`Swapchain::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    /// An image was acquired; `suboptimal` asks for a rebuild after this frame.
    Ready { index: u32, suboptimal: bool },
    /// No image was acquired; the swapchain must be rebuilt.
    OutOfDate,
}

/// Result of [`Swapchain::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// Swapchain with its presentable images.
pub struct Swapchain {
    handle: Arc<SwapchainHandle>,
    images: Vec<Arc<Image>>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface`.
    ///
    /// `queue_families` lists the family of every queue that will touch the
    /// images. `old` is handed to the driver so resources can be recycled; it
    /// must no longer be presented to.
    pub fn new(
        device: &Arc<LogicalDevice>,
        surface: &Surface,
        desired_extent: vk::Extent2D,
        vsync: bool,
        queue_families: &[u32],
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = device.physical_device().swapchain_support(surface)?;
        if !support.is_adequate() {
            return Err(GpuError::SwapchainCreation(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = select_surface_format(&support.formats)
            .ok_or_else(|| GpuError::SwapchainCreation("no surface formats".to_string()))?;
        let present_mode = select_present_mode(&support.present_modes, vsync);
        let extent = calculate_extent(&support.capabilities, desired_extent);
        let image_count = image_count(&support.capabilities);
        let (sharing_mode, families) = sharing_mode(queue_families)?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |s| s.handle.raw()));

        let loader = device.swapchain_loader();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let handle = Arc::new(SwapchainHandle {
            device: Arc::clone(device),
            swapchain,
        });

        let images = unsafe { loader.get_swapchain_images(swapchain)? }
            .into_iter()
            .map(|image| {
                Arc::new(Image::from_swapchain(
                    Arc::clone(&handle),
                    image,
                    surface_format.format,
                    extent,
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "Swapchain created: {} images, format {:?}, color space {:?}, present mode {:?}, extent {}x{}",
            images.len(),
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height
        );

        Ok(Self {
            handle,
            images,
            surface_format,
            present_mode,
            extent,
        })
    }

    /// Acquire the next presentable image, signaling `semaphore` once it is usable.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout_ns: u64) -> Result<AcquiredImage> {
        let result = unsafe {
            self.handle.device.swapchain_loader().acquire_next_image(
                self.handle.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        acquired_image(result)
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentStatus> {
        let swapchains = [self.handle.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.handle
                .device
                .swapchain_loader()
                .queue_present(queue, &present_info)
        };

        present_status(result)
    }

    /// Presentable images, indexed by the values `acquire_next_image` returns.
    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.handle.device
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise take whatever the surface lists first.
/// Out-of-date is a value, not an error.
fn acquired_image(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquiredImage> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquiredImage::Ready { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}

fn present_status(result: ash::prelude::VkResult<bool>) -> Result<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Optimal),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}

pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the present mode.
///
/// FIFO is the only mode every implementation must support, so it is the fallback.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's extent, or clamp the window's size when the surface leaves it to us.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: desired.width.clamp(min.width, max.width.max(min.width)),
        height: desired.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by the maximum when the surface has one.
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Sharing mode for images touched by queues from `queue_families`.
///
/// Returns the unique family list to pass along with CONCURRENT sharing.
pub fn sharing_mode(queue_families: &[u32]) -> Result<(vk::SharingMode, Vec<u32>)> {
    if queue_families.is_empty() {
        return Err(GpuError::SwapchainCreation(
            "no queues will use the swapchain".to_string(),
        ));
    }

    let unique = unique_families(queue_families);
    if unique.len() == 1 {
        return Ok((vk::SharingMode::EXCLUSIVE, Vec::new()));
    }

    tracing::warn!(
        "Swapchain images are shared between queue families {:?}; using concurrent sharing",
        unique
    );
    Ok((vk::SharingMode::CONCURRENT, unique))
}
