//! Application runner and event loop.

use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vkengine_platform::{WindowSignal, WindowSystem, WinitWindowSystem};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::config::AppConfig;
use crate::lifecycle::{FrameLoop, FrameStatus};
use crate::renderer::Renderer;

/// Run the application.
///
/// Initializes logging, opens the window, brings up the renderer and draws
/// until the window is closed. A render error stops the loop and is returned.
pub fn run_app(config: AppConfig) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        state: None,
        error: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
        return Err(e.into());
    }

    runner.error.map_or(Ok(()), Err)
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner {
    config: AppConfig,
    state: Option<AppState>,
    error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState {
    renderer: Renderer<WinitWindowSystem>,
    frame_loop: FrameLoop,
    started: Instant,
}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        match state.renderer.window_mut().handle_event(&event) {
            WindowSignal::CloseRequested => {
                info!("Close requested");
                if let Some(state) = self.state.take() {
                    state.shutdown();
                }
                event_loop.exit();
            }
            WindowSignal::Resized { width, height } => {
                info!("Resized to {}x{}", width, height);
                state.frame_loop.notify_resized();
                state.renderer.window().request_redraw();
            }
            WindowSignal::RedrawRequested => match state.frame_loop.draw_frame(&mut state.renderer) {
                Ok(FrameStatus::Suspended) => event_loop.set_control_flow(ControlFlow::Wait),
                Ok(_) => event_loop.set_control_flow(ControlFlow::Poll),
                Err(e) => {
                    error!("Render error: {e:#}");
                    if let Some(state) = self.state.take() {
                        state.shutdown();
                    }
                    self.error = Some(e);
                    event_loop.exit();
                }
            },
            WindowSignal::Ignored => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            if state.renderer.window().should_exit() {
                return;
            }
            // A suspended loop only resumes once the window is visible again.
            if !state.frame_loop.is_suspended() || state.renderer.window().is_visible() {
                state.renderer.window().request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            state.shutdown();
        }
    }
}

impl AppRunner {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        let window = WinitWindowSystem::new(event_loop, &self.config.platform())?;
        let renderer = Renderer::new(window, &self.config)?;
        let frame_loop = FrameLoop::for_backend(&renderer);

        Ok(AppState {
            renderer,
            frame_loop,
            started: Instant::now(),
        })
    }
}

impl AppState {
    /// Wait for the GPU, then drop the renderer and the window.
    fn shutdown(mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let frames = self.frame_loop.frame_number();
        if frames > 0 && elapsed > 0.0 {
            info!(
                "Rendered {} frames in {:.1}s ({:.1} FPS avg)",
                frames,
                elapsed,
                frames as f64 / elapsed
            );
        }

        info!("Starting cleanup...");
        if let Err(e) = self.frame_loop.finish(&mut self.renderer) {
            error!("Failed to wait idle: {e:#}");
        }

        drop(self);
        info!("Cleanup complete");
    }
}
