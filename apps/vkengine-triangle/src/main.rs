//! vkengine hello triangle
//!
//! Draws a single colored triangle, rebuilding the swapchain on resize.
//!
//! ## Usage
//!
//! ```bash
//! glslc shaders/shader.vert -o shaders/shader.vert.spv
//! glslc shaders/shader.frag -o shaders/shader.frag.spv
//! cargo run -p vkengine-triangle -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::PathBuf;

use clap::Parser;
use vkengine_app::{run_app, AppConfig, DEFAULT_FRAMES_IN_FLIGHT};

/// Draw a triangle with Vulkan.
#[derive(Parser, Debug)]
#[command(name = "vkengine-triangle", version)]
struct Cli {
    /// Compiled SPIR-V vertex shader
    #[arg(long, default_value = "shaders/shader.vert.spv")]
    vertex_shader: PathBuf,

    /// Compiled SPIR-V fragment shader
    #[arg(long, default_value = "shaders/shader.frag.spv")]
    fragment_shader: PathBuf,

    /// Initial window width
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Wait for vertical blank when presenting
    #[arg(long)]
    vsync: bool,

    /// Enable Vulkan validation layers (always on in debug builds)
    #[arg(long)]
    validation: bool,

    /// Frames the CPU may record ahead of the GPU
    #[arg(long, default_value_t = DEFAULT_FRAMES_IN_FLIGHT)]
    frames_in_flight: usize,

    /// Allocate a depth buffer and enable depth testing
    #[arg(long)]
    depth: bool,
}

impl Cli {
    fn into_config(self) -> AppConfig {
        AppConfig::new("vkengine - Hello Triangle")
            .with_size(self.width, self.height)
            .with_vsync(self.vsync)
            .with_validation(self.validation || cfg!(debug_assertions))
            .with_frames_in_flight(self.frames_in_flight)
            .with_depth(self.depth)
            .with_shaders(self.vertex_shader, self.fragment_shader)
    }
}

fn main() -> anyhow::Result<()> {
    run_app(Cli::parse().into_config())
}
