//! Vulkan renderer owning every GPU object of the application.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use tracing::info;
use vkengine_gpu::device::required_device_extensions;
use vkengine_gpu::image::find_depth_format;
use vkengine_gpu::{
    AcquiredImage, CommandPool, FrameSync, Instance, LogicalDevice, OnDeviceBuffer, PhysicalDevice,
    PresentStatus, QueueFamilyRequest, ShaderModule, Surface, Version, Vertex, VertexShaderModule,
};
use vkengine_platform::WindowSystem;

use crate::chain::{ChainContext, SwapchainChain};
use crate::config::AppConfig;
use crate::lifecycle::{AcquireOutcome, FrameBackend, PresentOutcome};

/// Renderer for a single window.
///
/// Dropping waits for the device to go idle. Fields then drop in declaration
/// order: the swapchain chain first, the window last.
pub struct Renderer<W: WindowSystem> {
    chain: Option<SwapchainChain>,
    frames: Vec<FrameSync>,
    vertex_buffer: OnDeviceBuffer<Vertex>,
    vertex_shader: VertexShaderModule<Vertex>,
    fragment_shader: ShaderModule,
    command_pool: Arc<CommandPool>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: Vec<u32>,
    depth_format: Option<vk::Format>,
    vsync: bool,
    device: Arc<LogicalDevice>,
    surface: Surface,
    instance: Arc<Instance>,
    window: W,
}

impl<W: WindowSystem> Renderer<W> {
    /// Initialize Vulkan for `window`.
    pub fn new(window: W, config: &AppConfig) -> Result<Self> {
        info!("Initializing Vulkan renderer...");

        let extensions = window
            .required_instance_extensions()
            .context("failed to query window instance extensions")?;
        let instance = Arc::new(
            Instance::new(&config.title, Version::new(0, 1, 0), config.validation, &extensions, &[])
                .context("failed to create Vulkan instance")?,
        );
        let surface = Surface::new(Arc::clone(&instance), &window)?;

        let device_extensions = required_device_extensions();
        let physical = PhysicalDevice::pick(&instance, &surface, &device_extensions)?;
        let graphics = physical
            .graphics_family()
            .ok_or_else(|| anyhow!("{} has no graphics queue", physical.name()))?;
        let present = physical
            .presentation_family()
            .ok_or_else(|| anyhow!("{} cannot present to the surface", physical.name()))?;
        info!(
            "Using GPU: {} (graphics family {}, present family {})",
            physical.name(),
            graphics.index,
            present.index
        );

        let graphics_request = QueueFamilyRequest::new(graphics.index, 1.0);
        let present_request = QueueFamilyRequest::new(present.index, 1.0);
        let device = LogicalDevice::new(
            &physical,
            &[graphics_request, present_request],
            &device_extensions,
        )?;
        let graphics_queue = device.queue(&graphics_request)?;
        let present_queue = device.queue(&present_request)?;

        let command_pool =
            CommandPool::new(&device, graphics.index, vk::CommandPoolCreateFlags::empty())?;
        let vertex_buffer =
            OnDeviceBuffer::upload(&device, &command_pool, graphics_queue, &config.vertices)
                .context("failed to upload vertex data")?;

        let vertex_shader = VertexShaderModule::from_file(&device, &config.vertex_shader)
            .with_context(|| format!("failed to load {}", config.vertex_shader.display()))?;
        let fragment_shader = ShaderModule::from_file(&device, &config.fragment_shader)
            .with_context(|| format!("failed to load {}", config.fragment_shader.display()))?;

        let frames = (0..config.frames_in_flight.max(1))
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>, _>>()?;

        let depth_format = if config.depth {
            Some(find_depth_format(device.physical_device())?)
        } else {
            None
        };

        let mut renderer = Self {
            chain: None,
            frames,
            vertex_buffer,
            vertex_shader,
            fragment_shader,
            command_pool,
            graphics_queue,
            present_queue,
            queue_families: vec![graphics.index, present.index],
            depth_format,
            vsync: config.vsync,
            device,
            surface,
            instance,
            window,
        };
        let chain = SwapchainChain::build(&renderer.chain_context(), None)?;
        renderer.chain = Some(chain);

        info!(
            "Renderer initialized with {} frames in flight",
            renderer.frames.len()
        );
        Ok(renderer)
    }

    fn chain_context(&self) -> ChainContext<'_> {
        ChainContext {
            device: &self.device,
            surface: &self.surface,
            extent: self.window.desired_framebuffer_size(),
            vsync: self.vsync,
            queue_families: &self.queue_families,
            depth_format: self.depth_format,
            vertex_shader: &self.vertex_shader,
            fragment_shader: &self.fragment_shader,
            vertex_buffer: &self.vertex_buffer,
            command_pool: &self.command_pool,
        }
    }

    fn chain(&self) -> Result<&SwapchainChain> {
        self.chain
            .as_ref()
            .ok_or_else(|| anyhow!("swapchain chain is not built"))
    }

    fn frame(&self, slot: usize) -> Result<&FrameSync> {
        self.frames
            .get(slot)
            .ok_or_else(|| anyhow!("no frame slot {slot}"))
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Current swapchain extent, if the chain is built.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.chain.as_ref().map(SwapchainChain::extent)
    }
}

impl<W: WindowSystem> FrameBackend for Renderer<W> {
    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, SwapchainChain::image_count)
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frame(slot)?.in_flight.wait(u64::MAX)?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frame(slot)?.image_available.handle();
        let acquired = self
            .chain()?
            .swapchain()
            .acquire_next_image(semaphore, u64::MAX)?;
        Ok(match acquired {
            AcquiredImage::Ready { index, suboptimal } => AcquireOutcome::Acquired {
                image_index: index,
                suboptimal,
            },
            AcquiredImage::OutOfDate => AcquireOutcome::OutOfDate,
        })
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.frame(slot)?.in_flight.reset()?;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let frame = self.frame(slot)?;
        let chain = self.chain()?;
        let image = image_index as usize;
        chain.command_buffer(image)?.submit(
            self.graphics_queue,
            &[(
                &frame.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )],
            &[chain.present_semaphore(image)?],
            Some(&frame.in_flight),
        )?;
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let chain = self.chain()?;
        let wait = [chain.present_semaphore(image_index as usize)?.handle()];
        let status = chain
            .swapchain()
            .present(self.present_queue, image_index, &wait)?;
        Ok(match status {
            PresentStatus::Optimal => PresentOutcome::Presented,
            PresentStatus::Suboptimal => PresentOutcome::Suboptimal,
            PresentStatus::OutOfDate => PresentOutcome::OutOfDate,
        })
    }

    fn surface_visible(&self) -> bool {
        self.window.is_visible()
    }

    fn rebuild_chain(&mut self) -> Result<()> {
        let old = self.chain.take();
        let next = {
            let ctx = self.chain_context();
            match old {
                Some(old) => old.rebuild(&ctx),
                None => SwapchainChain::build(&ctx, None),
            }
        };
        let chain = next.context("failed to rebuild swapchain chain")?;
        info!(
            "Swapchain rebuilt: {}x{}, {} images",
            chain.extent().width,
            chain.extent().height,
            chain.image_count()
        );
        self.chain = Some(chain);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        Ok(())
    }
}

impl<W: WindowSystem> Drop for Renderer<W> {
    fn drop(&mut self) {
        idle_before_teardown(|| self.device.wait_idle());
    }
}

/// Run `wait_idle` ahead of destroying GPU objects, logging a failure.
fn idle_before_teardown(wait_idle: impl FnOnce() -> vkengine_gpu::Result<()>) {
    if let Err(e) = wait_idle() {
        tracing::error!("Failed to wait for device idle before teardown: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkengine_gpu::GpuError;

    #[test]
    fn teardown_waits_for_idle_once() {
        let mut waits = 0;
        idle_before_teardown(|| {
            waits += 1;
            Ok(())
        });
        assert_eq!(waits, 1);
    }

    #[test]
    fn teardown_continues_after_failed_wait() {
        let mut waits = 0;
        idle_before_teardown(|| {
            waits += 1;
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        });
        assert_eq!(waits, 1);
    }
}
