//! Swapchain-dependent objects, built and torn down as one unit.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use tracing::debug;
use vkengine_gpu::{
    AttachmentId, CommandBuffer, CommandPool, Framebuffer, GraphicsPipeline, Image, ImageView,
    LogicalDevice, OnDeviceBuffer, PipelineOptions, RenderPass, RenderPassBuilder, Semaphore,
    ShaderModule, SubpassId, Surface, Swapchain, Vertex, VertexShaderModule,
};

/// One step of the swapchain chain.
///
/// Variants are declared in build order; ties in [`build_order`] are broken
/// by declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChainStage {
    Swapchain,
    ImageViews,
    DepthAttachment,
    PresentSemaphores,
    RenderPass,
    Framebuffers,
    Pipeline,
    CommandBuffers,
}

impl ChainStage {
    pub const ALL: [Self; 8] = [
        Self::Swapchain,
        Self::ImageViews,
        Self::DepthAttachment,
        Self::PresentSemaphores,
        Self::RenderPass,
        Self::Framebuffers,
        Self::Pipeline,
        Self::CommandBuffers,
    ];

    /// Stages that must exist before this one is built.
    pub fn depends_on(self) -> &'static [Self] {
        match self {
            Self::Swapchain => &[],
            Self::ImageViews | Self::DepthAttachment | Self::PresentSemaphores => {
                &[Self::Swapchain]
            }
            Self::RenderPass => &[Self::Swapchain, Self::DepthAttachment],
            Self::Framebuffers => &[Self::RenderPass, Self::ImageViews, Self::DepthAttachment],
            Self::Pipeline => &[Self::RenderPass],
            Self::CommandBuffers => &[Self::Framebuffers, Self::Pipeline],
        }
    }
}

/// Stages present in a chain with or without a depth attachment.
pub fn enabled_stages(depth: bool) -> Vec<ChainStage> {
    ChainStage::ALL
        .into_iter()
        .filter(|&stage| depth || stage != ChainStage::DepthAttachment)
        .collect()
}

/// Topological order of `enabled`; dependencies on stages outside `enabled`
/// are ignored.
pub fn build_order(enabled: &[ChainStage]) -> Vec<ChainStage> {
    let mut remaining: Vec<ChainStage> = ChainStage::ALL
        .into_iter()
        .filter(|stage| enabled.contains(stage))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while let Some(pos) = remaining.iter().position(|stage| {
        stage
            .depends_on()
            .iter()
            .all(|dep| !remaining.contains(dep))
    }) {
        order.push(remaining.remove(pos));
    }

    order
}

/// Reverse of [`build_order`]: dependents first.
pub fn teardown_order(enabled: &[ChainStage]) -> Vec<ChainStage> {
    let mut order = build_order(enabled);
    order.reverse();
    order
}

/// Long-lived objects the chain is built from.
pub struct ChainContext<'a> {
    pub device: &'a Arc<LogicalDevice>,
    pub surface: &'a Surface,
    pub extent: vk::Extent2D,
    pub vsync: bool,
    /// Families of the queues that touch swapchain images.
    pub queue_families: &'a [u32],
    /// `None` disables the depth attachment.
    pub depth_format: Option<vk::Format>,
    pub vertex_shader: &'a VertexShaderModule<Vertex>,
    pub fragment_shader: &'a ShaderModule,
    pub vertex_buffer: &'a OnDeviceBuffer<Vertex>,
    pub command_pool: &'a Arc<CommandPool>,
}

impl ChainContext<'_> {
    fn stages(&self) -> Vec<ChainStage> {
        enabled_stages(self.depth_format.is_some())
    }
}

struct PassLayout {
    render_pass: Arc<RenderPass>,
    color: AttachmentId,
    depth: Option<AttachmentId>,
    subpass: SubpassId,
}

/// Partially built chain. Fields are declared dependents-first so an error
/// midway drops what was built in teardown order.
#[derive(Default)]
struct Stages {
    command_buffers: Option<Vec<CommandBuffer>>,
    pipeline: Option<GraphicsPipeline<Vertex>>,
    framebuffers: Option<Vec<Framebuffer>>,
    pass: Option<PassLayout>,
    present_semaphores: Option<Vec<Semaphore>>,
    depth_view: Option<Arc<ImageView>>,
    image_views: Option<Vec<Arc<ImageView>>>,
    swapchain: Option<Swapchain>,
}

fn missing(stage: ChainStage) -> anyhow::Error {
    anyhow!("{stage:?} stage has not been built")
}

impl Stages {
    fn build(&mut self, stage: ChainStage, ctx: &ChainContext<'_>, old: Option<&Swapchain>) -> Result<()> {
        match stage {
            ChainStage::Swapchain => {
                self.swapchain = Some(
                    Swapchain::new(ctx.device, ctx.surface, ctx.extent, ctx.vsync, ctx.queue_families, old)
                        .context("failed to create swapchain")?,
                );
            }
            ChainStage::ImageViews => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| missing(ChainStage::Swapchain))?;
                let views = swapchain
                    .images()
                    .iter()
                    .map(|image| ImageView::new(Arc::clone(image)).map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()?;
                self.image_views = Some(views);
            }
            ChainStage::DepthAttachment => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| missing(ChainStage::Swapchain))?;
                let format = ctx
                    .depth_format
                    .ok_or_else(|| anyhow!("depth attachment built without a depth format"))?;
                let image = Image::new_attachment(
                    ctx.device,
                    "depth attachment",
                    format,
                    swapchain.extent(),
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                )?;
                self.depth_view = Some(Arc::new(ImageView::new(Arc::new(image))?));
            }
            ChainStage::PresentSemaphores => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| missing(ChainStage::Swapchain))?;
                let semaphores = (0..swapchain.image_count())
                    .map(|_| Semaphore::new(ctx.device))
                    .collect::<Result<Vec<_>, _>>()?;
                self.present_semaphores = Some(semaphores);
            }
            ChainStage::RenderPass => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| missing(ChainStage::Swapchain))?;
                let extent = swapchain.extent();
                let mut builder = RenderPassBuilder::new(extent.width, extent.height);
                let color = builder.create_attachment(swapchain.format());
                let depth = self
                    .depth_view
                    .as_ref()
                    .map(|view| builder.create_attachment(view.format()));
                let subpass = builder.create_subpass(&[color], depth)?;
                builder.add_start_external_dependency(subpass)?;
                self.pass = Some(PassLayout {
                    render_pass: builder.finalize(ctx.device)?,
                    color,
                    depth,
                    subpass,
                });
            }
            ChainStage::Framebuffers => {
                let pass = self.pass.as_ref().ok_or_else(|| missing(ChainStage::RenderPass))?;
                let views = self.image_views.as_ref().ok_or_else(|| missing(ChainStage::ImageViews))?;
                let framebuffers = views
                    .iter()
                    .map(|view| {
                        let mut bindings = vec![(pass.color, view)];
                        if let (Some(id), Some(depth_view)) = (pass.depth, self.depth_view.as_ref()) {
                            bindings.push((id, depth_view));
                        }
                        pass.render_pass.create_framebuffer(&bindings)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.framebuffers = Some(framebuffers);
            }
            ChainStage::Pipeline => {
                let pass = self.pass.as_ref().ok_or_else(|| missing(ChainStage::RenderPass))?;
                let options = PipelineOptions {
                    depth_test: pass.depth.is_some(),
                    ..PipelineOptions::default()
                };
                self.pipeline = Some(GraphicsPipeline::new(
                    ctx.device,
                    &pass.render_pass,
                    pass.subpass,
                    ctx.vertex_shader,
                    ctx.fragment_shader,
                    options,
                )?);
            }
            ChainStage::CommandBuffers => {
                let pass = self.pass.as_ref().ok_or_else(|| missing(ChainStage::RenderPass))?;
                let framebuffers = self.framebuffers.as_ref().ok_or_else(|| missing(ChainStage::Framebuffers))?;
                let pipeline = self.pipeline.as_ref().ok_or_else(|| missing(ChainStage::Pipeline))?;
                let count = u32::try_from(framebuffers.len())?;
                let mut buffers = ctx
                    .command_pool
                    .allocate_many(vk::CommandBufferLevel::PRIMARY, count)?;
                for (cmd, framebuffer) in buffers.iter_mut().zip(framebuffers) {
                    record_draw(cmd, &pass.render_pass, framebuffer, pipeline, ctx.vertex_buffer)?;
                }
                self.command_buffers = Some(buffers);
            }
        }
        debug!("Built chain stage {stage:?}");
        Ok(())
    }

    fn release(&mut self, stage: ChainStage) {
        match stage {
            ChainStage::Swapchain => self.swapchain = None,
            ChainStage::ImageViews => self.image_views = None,
            ChainStage::DepthAttachment => self.depth_view = None,
            ChainStage::PresentSemaphores => self.present_semaphores = None,
            ChainStage::RenderPass => self.pass = None,
            ChainStage::Framebuffers => self.framebuffers = None,
            ChainStage::Pipeline => self.pipeline = None,
            ChainStage::CommandBuffers => self.command_buffers = None,
        }
    }

    fn finish(self) -> Result<SwapchainChain> {
        Ok(SwapchainChain {
            command_buffers: self.command_buffers.ok_or_else(|| missing(ChainStage::CommandBuffers))?,
            pipeline: self.pipeline.ok_or_else(|| missing(ChainStage::Pipeline))?,
            framebuffers: self.framebuffers.ok_or_else(|| missing(ChainStage::Framebuffers))?,
            pass: self.pass.ok_or_else(|| missing(ChainStage::RenderPass))?,
            present_semaphores: self
                .present_semaphores
                .ok_or_else(|| missing(ChainStage::PresentSemaphores))?,
            depth_view: self.depth_view,
            image_views: self.image_views.ok_or_else(|| missing(ChainStage::ImageViews))?,
            swapchain: self.swapchain.ok_or_else(|| missing(ChainStage::Swapchain))?,
        })
    }
}

fn record_draw(
    cmd: &mut CommandBuffer,
    render_pass: &RenderPass,
    framebuffer: &Framebuffer,
    pipeline: &GraphicsPipeline<Vertex>,
    vertex_buffer: &OnDeviceBuffer<Vertex>,
) -> Result<()> {
    let vertex_count = u32::try_from(vertex_buffer.len())?;
    cmd.begin(vk::CommandBufferUsageFlags::empty())?;
    cmd.begin_render_pass(render_pass, framebuffer)?;
    cmd.bind_pipeline(pipeline)?;
    cmd.bind_vertex_buffers(0, &[&**vertex_buffer])?;
    cmd.draw(vertex_count, 1, 0, 0)?;
    cmd.end_render_pass()?;
    cmd.end()?;
    Ok(())
}

/// Every object that depends on the swapchain.
///
/// Fields drop in declaration order, dependents first.
pub struct SwapchainChain {
    /// One pre-recorded command buffer per swapchain image.
    command_buffers: Vec<CommandBuffer>,
    pipeline: GraphicsPipeline<Vertex>,
    framebuffers: Vec<Framebuffer>,
    pass: PassLayout,
    /// Render-finished semaphore per swapchain image.
    present_semaphores: Vec<Semaphore>,
    depth_view: Option<Arc<ImageView>>,
    image_views: Vec<Arc<ImageView>>,
    swapchain: Swapchain,
}

impl SwapchainChain {
    /// Build every enabled stage in dependency order.
    pub fn build(ctx: &ChainContext<'_>, old: Option<&Swapchain>) -> Result<Self> {
        let mut stages = Stages::default();
        for stage in build_order(&ctx.stages()) {
            stages.build(stage, ctx, old)?;
        }
        let chain = stages.finish()?;
        debug!(
            "Swapchain chain built: {} images, {}x{}",
            chain.image_count(),
            chain.extent().width,
            chain.extent().height
        );
        Ok(chain)
    }

    /// Tear down every stage but the swapchain, build a new chain that
    /// recycles it, then release the old swapchain.
    ///
    /// The device must be idle.
    pub fn rebuild(self, ctx: &ChainContext<'_>) -> Result<Self> {
        let mut stages = self.into_stages();
        for stage in teardown_order(&ctx.stages()) {
            if stage != ChainStage::Swapchain {
                stages.release(stage);
            }
        }

        let old = stages.swapchain.take();
        Self::build(ctx, old.as_ref())
    }

    fn into_stages(self) -> Stages {
        Stages {
            command_buffers: Some(self.command_buffers),
            pipeline: Some(self.pipeline),
            framebuffers: Some(self.framebuffers),
            pass: Some(self.pass),
            present_semaphores: Some(self.present_semaphores),
            depth_view: self.depth_view,
            image_views: Some(self.image_views),
            swapchain: Some(self.swapchain),
        }
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.pass.render_pass
    }

    pub fn command_buffer(&self, image: usize) -> Result<&CommandBuffer> {
        self.command_buffers
            .get(image)
            .ok_or_else(|| anyhow!("no command buffer for image {image}"))
    }

    pub fn present_semaphore(&self, image: usize) -> Result<&Semaphore> {
        self.present_semaphores
            .get(image)
            .ok_or_else(|| anyhow!("no present semaphore for image {image}"))
    }

    pub fn has_depth(&self) -> bool {
        self.depth_view.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[ChainStage], stage: ChainStage) -> usize {
        order.iter().position(|&s| s == stage).unwrap()
    }

    #[test]
    fn build_order_respects_dependencies() {
        let enabled = enabled_stages(true);
        let order = build_order(&enabled);
        assert_eq!(order.len(), enabled.len());
        for &stage in &order {
            for &dep in stage.depends_on() {
                assert!(position(&order, dep) < position(&order, stage), "{dep:?} before {stage:?}");
            }
        }
    }

    #[test]
    fn full_build_order_matches_declaration_order() {
        assert_eq!(build_order(&ChainStage::ALL), ChainStage::ALL.to_vec());
    }

    #[test]
    fn teardown_is_reverse_of_build() {
        let enabled = enabled_stages(true);
        let mut teardown = teardown_order(&enabled);
        assert_eq!(teardown.first(), Some(&ChainStage::CommandBuffers));
        assert_eq!(teardown.last(), Some(&ChainStage::Swapchain));
        teardown.reverse();
        assert_eq!(teardown, build_order(&enabled));
    }

    #[test]
    fn disabled_depth_is_skipped() {
        let order = build_order(&enabled_stages(false));
        assert!(!order.contains(&ChainStage::DepthAttachment));
        assert_eq!(order.len(), 7);
        assert!(position(&order, ChainStage::RenderPass) < position(&order, ChainStage::Framebuffers));
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let order = build_order(&[
            ChainStage::PresentSemaphores,
            ChainStage::ImageViews,
            ChainStage::Swapchain,
        ]);
        assert_eq!(
            order,
            vec![
                ChainStage::Swapchain,
                ChainStage::ImageViews,
                ChainStage::PresentSemaphores
            ]
        );
    }

    #[test]
    fn swapchain_has_no_dependencies() {
        assert!(ChainStage::Swapchain.depends_on().is_empty());
        assert!(ChainStage::ALL
            .iter()
            .filter(|&&s| s != ChainStage::Swapchain)
            .all(|s| !s.depends_on().is_empty()));
    }
}
