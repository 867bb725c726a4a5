use crate::{is_presentable, PlatformConfig, PlatformError, Result, WindowSystem};
use ash::vk;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::ffi::CStr;
use std::sync::Arc;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// What a window event means for the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    /// Nothing the renderer cares about.
    Ignored,
    CloseRequested,
    /// The framebuffer changed size; the swapchain is stale.
    Resized { width: u32, height: u32 },
    RedrawRequested,
}

/// Event-driven window flags, kept apart from the winit handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct WindowState {
    close_requested: bool,
    /// Covered by other windows. Such a window keeps its size and can still
    /// present, so this does not pause rendering.
    occluded: bool,
}

impl WindowState {
    fn apply(&mut self, event: &WindowEvent) -> WindowSignal {
        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                WindowSignal::CloseRequested
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                tracing::debug!("Framebuffer resized to {width}x{height}");
                WindowSignal::Resized {
                    width: *width,
                    height: *height,
                }
            }
            WindowEvent::Occluded(occluded) => {
                tracing::debug!("Window occluded: {occluded}");
                self.occluded = *occluded;
                WindowSignal::Ignored
            }
            WindowEvent::RedrawRequested => WindowSignal::RedrawRequested,
            _ => WindowSignal::Ignored,
        }
    }

    fn presentable(&self, size: vk::Extent2D, minimized: bool) -> bool {
        is_presentable(size, minimized)
    }
}

/// A single winit window.
pub struct WinitWindowSystem {
    window: Arc<Window>,
    state: WindowState,
}

impl WinitWindowSystem {
    /// Open a window on a running event loop.
    pub fn new(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let attributes = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        tracing::info!(
            "Window created: '{}' {}x{}",
            config.title,
            config.width,
            config.height
        );

        Ok(Self {
            window: Arc::new(window),
            state: WindowState::default(),
        })
    }

    /// Update window state from `event` and report what it means.
    pub fn handle_event(&mut self, event: &WindowEvent) -> WindowSignal {
        self.state.apply(event)
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Whether the compositor reports the window as fully covered.
    pub fn is_occluded(&self) -> bool {
        self.state.occluded
    }
}

impl WindowSystem for WinitWindowSystem {
    fn should_exit(&self) -> bool {
        self.state.close_requested
    }

    fn desired_framebuffer_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn is_visible(&self) -> bool {
        let minimized = self.window.is_minimized().unwrap_or(false);
        self.state
            .presentable(self.desired_framebuffer_size(), minimized)
    }

    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| PlatformError::Handle(e.to_string()))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(PlatformError::SurfaceExtensions)?;

        // Entries are static NUL-terminated extension names owned by ash.
        Ok(extensions
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect())
    }

    fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasDisplayHandle for WinitWindowSystem {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HasWindowHandle for WinitWindowSystem {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_and_resize_events_map_to_signals() {
        let mut state = WindowState::default();
        let resized = state.apply(&WindowEvent::Resized(PhysicalSize::new(1024, 768)));
        assert_eq!(
            resized,
            WindowSignal::Resized {
                width: 1024,
                height: 768
            }
        );
        assert!(!state.close_requested);

        assert_eq!(state.apply(&WindowEvent::CloseRequested), WindowSignal::CloseRequested);
        assert!(state.close_requested);
    }

    #[test]
    fn occlusion_is_tracked_without_pausing_rendering() {
        let mut state = WindowState::default();
        assert_eq!(state.apply(&WindowEvent::Occluded(true)), WindowSignal::Ignored);
        assert!(state.occluded);

        let size = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert!(state.presentable(size, false));
        assert!(!state.presentable(size, true));

        state.apply(&WindowEvent::Occluded(false));
        assert!(!state.occluded);
    }
}
