//! RAII Vulkan object wrappers for vkengine.
//!
//! Every wrapper owns its Vulkan handle and destroys it on drop. Objects hold
//! shared references to whatever they were created from (views hold images,
//! framebuffers hold render passes, everything holds the logical device), so
//! a parent can never be destroyed before its children.

pub mod buffer;
pub mod command;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use buffer::{Buffer, OnDeviceBuffer, TransferBuffer};
pub use command::{CommandBuffer, CommandPool, RecordingState};
pub use device::{
    LogicalDevice, PhysicalDevice, QueueFamily, QueueFamilyRequest, SwapchainSupport,
};
pub use error::{GpuError, Result};
pub use image::{Image, ImageView};
pub use instance::{Instance, Version};
pub use memory::GpuAllocator;
pub use pipeline::{GraphicsPipeline, PipelineOptions};
pub use render_pass::{AttachmentId, Framebuffer, RenderPass, RenderPassBuilder, SubpassId};
pub use shader::{ShaderModule, VertexShaderModule};
pub use surface::Surface;
pub use swapchain::{AcquiredImage, PresentStatus, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
pub use vertex::{Vertex, VertexInput};
