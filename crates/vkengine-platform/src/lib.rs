//! Window system abstraction for vkengine.
//!
//! The renderer only talks to a [`WindowSystem`]; [`WinitWindowSystem`] is the
//! implementation shipped with the engine.

mod winit_window;

pub use winit_window::{WindowSignal, WinitWindowSystem};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Window handle unavailable: {0}")]
    Handle(String),
    #[error("Vulkan surface extensions unavailable: {0}")]
    SurfaceExtensions(vk::Result),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Window configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "vkengine".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// What the renderer needs from a window.
pub trait WindowSystem: HasDisplayHandle + HasWindowHandle {
    /// The user asked for the window to close.
    fn should_exit(&self) -> bool;

    /// Framebuffer size in pixels.
    fn desired_framebuffer_size(&self) -> vk::Extent2D;

    /// Whether there is anything to present to.
    fn is_visible(&self) -> bool;

    /// Instance extensions needed to create a surface for this window.
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Ask for another frame to be drawn.
    fn request_redraw(&self);
}

/// A window is visible when it has a non-empty framebuffer and is not minimized.
pub fn is_presentable(size: vk::Extent2D, minimized: bool) -> bool {
    !minimized && size.width > 0 && size.height > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn zero_sized_windows_are_not_presentable() {
        assert!(is_presentable(extent(800, 600), false));
        assert!(!is_presentable(extent(0, 600), false));
        assert!(!is_presentable(extent(800, 0), false));
    }

    #[test]
    fn minimized_windows_are_not_presentable() {
        assert!(!is_presentable(extent(800, 600), true));
    }

    #[test]
    fn default_config_is_resizable() {
        let config = PlatformConfig::default();
        assert!(config.resizable);
        assert_eq!((config.width, config.height), (800, 600));
    }
}
