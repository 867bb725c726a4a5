//! Application configuration.

use std::path::PathBuf;

use glam::{Vec2, Vec3};
use vkengine_gpu::Vertex;
use vkengine_platform::PlatformConfig;

/// Number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also used as the Vulkan application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frame slots; never less than one.
    pub frames_in_flight: usize,
    /// Allocate a depth attachment and enable depth testing.
    pub depth: bool,
    /// Compiled SPIR-V vertex stage.
    pub vertex_shader: PathBuf,
    /// Compiled SPIR-V fragment stage.
    pub fragment_shader: PathBuf,
    /// Vertex data drawn every frame.
    pub vertices: Vec<Vertex>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "vkengine".to_string(),
            width: 800,
            height: 600,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            depth: false,
            vertex_shader: PathBuf::from("shaders/shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/shader.frag.spv"),
            vertices: triangle(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight, clamped to at least one.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Enable or disable the depth attachment.
    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    /// Set the SPIR-V files for the vertex and fragment stages.
    pub fn with_shaders(mut self, vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    /// Set the vertices drawn each frame.
    pub fn with_vertices(mut self, vertices: Vec<Vertex>) -> Self {
        self.vertices = vertices;
        self
    }

    /// Window settings derived from this config.
    pub fn platform(&self) -> PlatformConfig {
        PlatformConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            resizable: true,
        }
    }
}

/// The classic red/green/blue triangle, wound clockwise.
pub fn triangle() -> Vec<Vertex> {
    vec![
        Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
        Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
        Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert!(!config.depth);
        assert_eq!(config.vertices.len(), 3);
    }

    #[test]
    fn frames_in_flight_is_at_least_one() {
        assert_eq!(AppConfig::default().with_frames_in_flight(0).frames_in_flight, 1);
        assert_eq!(AppConfig::default().with_frames_in_flight(3).frames_in_flight, 3);
    }

    #[test]
    fn builders_chain() {
        let config = AppConfig::new("demo")
            .with_size(1024, 768)
            .with_vsync(false)
            .with_depth(true)
            .with_shaders("a.spv", "b.spv");
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (1024, 768));
        assert!(!config.vsync);
        assert!(config.depth);
        assert_eq!(config.vertex_shader, PathBuf::from("a.spv"));

        let platform = config.platform();
        assert_eq!(platform.title, "demo");
        assert_eq!((platform.width, platform.height), (1024, 768));
    }
}
