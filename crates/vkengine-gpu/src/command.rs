//! Command pools and command buffer recording.

use crate::buffer::Buffer;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::pipeline::GraphicsPipeline;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::sync::{Fence, Semaphore};
use crate::vertex::VertexInput;
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

/// Command pool for allocating command buffers.
///
/// Shared by every buffer allocated from it, so the pool is destroyed last.
pub struct CommandPool {
    device: Arc<LogicalDevice>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    pub fn new(
        device: &Arc<LogicalDevice>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Arc<Self>> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            pool,
            queue_family,
        }))
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    /// Allocate a single command buffer.
    pub fn allocate(self: &Arc<Self>, level: vk::CommandBufferLevel) -> Result<CommandBuffer> {
        self.allocate_many(level, 1)?
            .pop()
            .ok_or_else(|| GpuError::CommandBuffer("driver returned no command buffer".into()))
    }

    /// Allocate `count` command buffers.
    pub fn allocate_many(
        self: &Arc<Self>,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBuffer {
                pool: Arc::clone(self),
                buffer,
                level,
                state: RecordingState::Initial,
            })
            .collect())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
    }
}

/// Where a command buffer is in its recording lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Initial,
    Recording,
    InRenderPass,
    Executable,
}

impl RecordingState {
    pub fn begin(self) -> Result<Self> {
        match self {
            Self::Initial => Ok(Self::Recording),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot begin a command buffer that is already {other:?}"
            ))),
        }
    }

    pub fn end(self) -> Result<Self> {
        match self {
            Self::Recording => Ok(Self::Executable),
            Self::InRenderPass => Err(GpuError::CommandBuffer(
                "cannot end a command buffer inside a render pass".into(),
            )),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot end a command buffer that is {other:?}"
            ))),
        }
    }

    pub fn begin_render_pass(self) -> Result<Self> {
        match self {
            Self::Recording => Ok(Self::InRenderPass),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot begin a render pass while {other:?}"
            ))),
        }
    }

    pub fn end_render_pass(self) -> Result<Self> {
        match self {
            Self::InRenderPass => Ok(Self::Recording),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot end a render pass while {other:?}"
            ))),
        }
    }

    /// State commands valid both inside and outside a render pass.
    pub fn require_recording(self) -> Result<Self> {
        match self {
            Self::Recording | Self::InRenderPass => Ok(self),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot record commands while {other:?}"
            ))),
        }
    }

    /// Draws must happen inside a render pass.
    pub fn require_render_pass(self) -> Result<Self> {
        match self {
            Self::InRenderPass => Ok(self),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot draw while {other:?}"
            ))),
        }
    }

    /// Transfers must happen outside a render pass.
    pub fn require_outside_render_pass(self) -> Result<Self> {
        match self {
            Self::Recording => Ok(self),
            other => Err(GpuError::CommandBuffer(format!(
                "cannot record a transfer while {other:?}"
            ))),
        }
    }
}

/// A command buffer; freed back to its pool on drop.
pub struct CommandBuffer {
    pool: Arc<CommandPool>,
    buffer: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
    state: RecordingState,
}

impl CommandBuffer {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    fn device(&self) -> &ash::Device {
        self.pool.device.handle()
    }

    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        let next = self.state.begin()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device().begin_command_buffer(self.buffer, &begin_info)? };
        self.state = next;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        let next = self.state.end()?;
        unsafe { self.device().end_command_buffer(self.buffer)? };
        self.state = next;
        Ok(())
    }

    /// Begin `render_pass` on `framebuffer`, clearing every attachment.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
    ) -> Result<()> {
        let next = self.state.begin_render_pass()?;
        if framebuffer.render_pass().handle() != render_pass.handle() {
            return Err(GpuError::CommandBuffer(
                "framebuffer was created for a different render pass".into(),
            ));
        }

        let clear_values = render_pass.clear_values();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: render_pass.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            self.device()
                .cmd_begin_render_pass(self.buffer, &begin_info, vk::SubpassContents::INLINE);
        }
        self.state = next;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        let next = self.state.end_render_pass()?;
        unsafe { self.device().cmd_end_render_pass(self.buffer) };
        self.state = next;
        Ok(())
    }

    pub fn bind_pipeline<V: VertexInput>(&mut self, pipeline: &GraphicsPipeline<V>) -> Result<()> {
        self.state.require_recording()?;
        unsafe {
            self.device().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
        Ok(())
    }

    /// Bind `buffers` to consecutive bindings starting at `first_binding`.
    pub fn bind_vertex_buffers<T: Pod>(
        &mut self,
        first_binding: u32,
        buffers: &[&Buffer<T>],
    ) -> Result<()> {
        self.state.require_recording()?;
        let handles: Vec<vk::Buffer> = buffers.iter().map(|b| b.handle()).collect();
        let offsets = vec![0; handles.len()];
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(self.buffer, first_binding, &handles, &offsets);
        }
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.state.require_render_pass()?;
        unsafe {
            self.device().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    /// Copy the whole of `src` into the start of `dst`.
    pub fn copy_buffer<T: Pod>(&mut self, src: &Buffer<T>, dst: &Buffer<T>) -> Result<()> {
        self.state.require_outside_render_pass()?;
        if dst.size() < src.size() {
            return Err(GpuError::CommandBuffer(format!(
                "copy destination holds {} bytes, source has {}",
                dst.size(),
                src.size()
            )));
        }

        let region = vk::BufferCopy::default().size(src.size());
        unsafe {
            self.device()
                .cmd_copy_buffer(self.buffer, src.handle(), dst.handle(), &[region]);
        }
        Ok(())
    }

    /// Submit for execution on `queue`.
    ///
    /// Each wait semaphore is paired with the stage that waits on it.
    pub fn submit(
        &self,
        queue: vk::Queue,
        waits: &[(&Semaphore, vk::PipelineStageFlags)],
        signals: &[&Semaphore],
        fence: Option<&Fence>,
    ) -> Result<()> {
        if self.state != RecordingState::Executable {
            return Err(GpuError::CommandBuffer(format!(
                "cannot submit a command buffer that is {:?}",
                self.state
            )));
        }

        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|(s, _)| s.handle()).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = waits.iter().map(|(_, st)| *st).collect();
        let signal_semaphores: Vec<vk::Semaphore> = signals.iter().map(|s| s.handle()).collect();
        let command_buffers = [self.buffer];

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device().queue_submit(
                queue,
                &[submit_info],
                fence.map_or(vk::Fence::null(), Fence::handle),
            )?;
        }
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device()
                .free_command_buffers(self.pool.pool, &[self.buffer]);
        }
    }
}

/// Record with `record`, submit once to `queue` and wait for completion.
pub fn execute_one_time<F>(pool: &Arc<CommandPool>, queue: vk::Queue, record: F) -> Result<()>
where
    F: FnOnce(&mut CommandBuffer) -> Result<()>,
{
    let mut cmd = pool.allocate(vk::CommandBufferLevel::PRIMARY)?;
    cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    record(&mut cmd)?;
    cmd.end()?;

    let fence = Fence::new(pool.device(), false)?;
    cmd.submit(queue, &[], &[], Some(&fence))?;
    fence.wait(u64::MAX)?;
    Ok(())
}
