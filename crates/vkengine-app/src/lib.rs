//! Frame lifecycle and application runner for vkengine.
//!
//! This crate ties the GPU wrappers and the window system together:
//!
//! - [`FrameLoop`] paces frames in flight against a [`FrameBackend`]
//! - [`SwapchainChain`] owns everything that is rebuilt with the swapchain
//! - [`Renderer`] is the Vulkan [`FrameBackend`] for one window
//! - [`run_app`] drives it all from a winit event loop
//!
//! # Example
//!
//! ```ignore
//! use vkengine_app::{run_app, AppConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::new("Triangle")
//!         .with_size(800, 600)
//!         .with_shaders("shaders/shader.vert.spv", "shaders/shader.frag.spv");
//!     run_app(config)
//! }
//! ```

pub mod chain;
pub mod config;
pub mod lifecycle;
pub mod renderer;
pub mod runner;

pub use chain::{build_order, enabled_stages, teardown_order, ChainContext, ChainStage, SwapchainChain};
pub use config::{triangle, AppConfig, DEFAULT_FRAMES_IN_FLIGHT};
pub use lifecycle::{AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, PresentOutcome};
pub use renderer::Renderer;
pub use runner::run_app;
