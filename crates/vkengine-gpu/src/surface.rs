//! Presentation surface.
//!
//! Hides the raw-window-handle plumbing from application code.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// A `VkSurfaceKHR` bound to one window.
///
/// Keeps its instance alive so the surface is always destroyed first.
pub struct Surface {
    instance: Arc<Instance>,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for a window.
    ///
    /// The window must outlive the returned surface.
    pub fn new<W>(instance: Arc<Instance>, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        tracing::debug!("Window surface created");

        Ok(Self { instance, surface })
    }

    /// The raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// The instance this surface was created from.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Whether `family` on `physical_device` can present to this surface.
    pub fn supports_presentation(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family, self.surface)?
        };
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader()
                .destroy_surface(self.surface, None);
        }
    }
}
