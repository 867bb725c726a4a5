//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Required layer not supported.
    #[error("Required layer not supported: {0}")]
    LayerNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module could not be loaded.
    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Render pass or framebuffer description is invalid.
    #[error("Invalid render pass: {0}")]
    RenderPass(String),

    /// Command buffer used out of order.
    #[error("Invalid command buffer usage: {0}")]
    CommandBuffer(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
