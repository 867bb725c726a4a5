//! Render passes, subpasses, attachments and framebuffers.
//!
//! A pass is described with a [`RenderPassBuilder`] and turned into an
//! immutable [`RenderPass`] by [`RenderPassBuilder::finalize`]. Framebuffers
//! can only be created from the finalized pass, so a pass can never change
//! shape underneath its framebuffers.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::image::{is_depth_format, ImageView};
use ash::vk;
use ash::vk::Handle;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an attachment of a particular render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentId {
    pass: u64,
    index: u32,
}

impl AttachmentId {
    /// Position in the pass's attachment list (creation order).
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Handle to a subpass of a particular render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubpassId {
    pass: u64,
    index: u32,
}

impl SubpassId {
    pub fn index(self) -> u32 {
        self.index
    }
}

/// What an attachment is written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Color,
    Depth,
}

/// One attachment of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub format: vk::Format,
    pub kind: AttachmentKind,
    pub extent: vk::Extent2D,
}

impl Attachment {
    fn description(&self) -> vk::AttachmentDescription {
        let base = vk::AttachmentDescription::default()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        match self.kind {
            // Swapchain images arrive undefined and leave ready for the compositor.
            AttachmentKind::Color => base
                .store_op(vk::AttachmentStoreOp::STORE)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            AttachmentKind::Depth => base
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        }
    }

    fn clear_value(&self) -> vk::ClearValue {
        match self.kind {
            AttachmentKind::Color => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            AttachmentKind::Depth => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Subpass {
    colors: Vec<vk::AttachmentReference>,
    depth: Option<vk::AttachmentReference>,
}

/// Mutable description of a render pass.
pub struct RenderPassBuilder {
    id: u64,
    extent: vk::Extent2D,
    attachments: Vec<Attachment>,
    subpasses: Vec<Subpass>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    /// Start describing a pass whose attachments are all `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed),
            extent: vk::Extent2D { width, height },
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Add an attachment; depth formats become depth attachments.
    pub fn create_attachment(&mut self, format: vk::Format) -> AttachmentId {
        let kind = if is_depth_format(format) {
            AttachmentKind::Depth
        } else {
            AttachmentKind::Color
        };
        self.attachments.push(Attachment {
            format,
            kind,
            extent: self.extent,
        });
        AttachmentId {
            pass: self.id,
            index: (self.attachments.len() - 1) as u32,
        }
    }

    /// Add a graphics subpass writing `colors` and optionally `depth`.
    pub fn create_subpass(
        &mut self,
        colors: &[AttachmentId],
        depth: Option<AttachmentId>,
    ) -> Result<SubpassId> {
        let colors = colors
            .iter()
            .map(|&id| {
                let attachment = self.attachment(id)?;
                if attachment.kind != AttachmentKind::Color {
                    return Err(GpuError::RenderPass(format!(
                        "attachment {} ({:?}) cannot be used as a color attachment",
                        id.index, attachment.format
                    )));
                }
                Ok(vk::AttachmentReference {
                    attachment: id.index,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let depth = depth
            .map(|id| {
                let attachment = self.attachment(id)?;
                if attachment.kind != AttachmentKind::Depth {
                    return Err(GpuError::RenderPass(format!(
                        "attachment {} ({:?}) cannot be used as a depth attachment",
                        id.index, attachment.format
                    )));
                }
                Ok(vk::AttachmentReference {
                    attachment: id.index,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                })
            })
            .transpose()?;

        self.subpasses.push(Subpass { colors, depth });
        Ok(SubpassId {
            pass: self.id,
            index: (self.subpasses.len() - 1) as u32,
        })
    }

    /// Make `subpass` wait for work submitted before the pass to finish
    /// writing its attachments, so the acquired image is not written early.
    ///
    /// With a depth attachment the previous frame's depth writes are also
    /// made available before the shared depth image is cleared again.
    pub fn add_start_external_dependency(&mut self, subpass: SubpassId) -> Result<()> {
        let depth = self.subpass(subpass)?.depth.is_some();
        self.dependencies
            .push(start_dependency(depth).dst_subpass(subpass.index));
        Ok(())
    }

    /// Make work after the pass wait for `subpass`'s color output.
    pub fn add_end_external_dependency(&mut self, subpass: SubpassId) -> Result<()> {
        self.subpass(subpass)?;

        self.dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(subpass.index)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .dst_access_mask(vk::AccessFlags::empty()),
        );
        Ok(())
    }

    /// Make `subpass` read what `other` wrote. `other` must come first.
    pub fn depend_on(&mut self, subpass: SubpassId, other: SubpassId) -> Result<()> {
        self.subpass(subpass)?;
        self.subpass(other)?;
        if other.index >= subpass.index {
            return Err(GpuError::RenderPass(format!(
                "subpass {} cannot depend on subpass {}, which does not precede it",
                subpass.index, other.index
            )));
        }

        self.dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(other.index)
                .dst_subpass(subpass.index)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_access_mask(
                    vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        );
        Ok(())
    }

    /// Check the description can be turned into a pass.
    pub fn validate(&self) -> Result<()> {
        if self.attachments.is_empty() {
            return Err(GpuError::RenderPass("render pass has no attachments".into()));
        }
        if self.subpasses.is_empty() {
            return Err(GpuError::RenderPass("render pass has no subpasses".into()));
        }
        Ok(())
    }

    /// Create the Vulkan render pass. The builder is consumed.
    pub fn finalize(self, device: &Arc<LogicalDevice>) -> Result<Arc<RenderPass>> {
        self.validate()?;

        let attachment_descriptions: Vec<vk::AttachmentDescription> =
            self.attachments.iter().map(Attachment::description).collect();

        let subpass_descriptions: Vec<vk::SubpassDescription> = self
            .subpasses
            .iter()
            .map(|subpass| {
                let description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&subpass.colors);
                match &subpass.depth {
                    Some(depth) => description.depth_stencil_attachment(depth),
                    None => description,
                }
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachment_descriptions)
            .subpasses(&subpass_descriptions)
            .dependencies(&self.dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        tracing::debug!(
            "Render pass created: {} attachments, {} subpasses, {} dependencies",
            self.attachments.len(),
            self.subpasses.len(),
            self.dependencies.len()
        );

        Ok(Arc::new(RenderPass {
            device: Arc::clone(device),
            render_pass,
            id: self.id,
            extent: self.extent,
            attachments: self.attachments,
            subpass_colors: self.subpasses.iter().map(|s| s.colors.len()).collect(),
            subpass_depth: self.subpasses.iter().map(|s| s.depth.is_some()).collect(),
        }))
    }

    fn attachment(&self, id: AttachmentId) -> Result<&Attachment> {
        if id.pass != self.id {
            return Err(GpuError::RenderPass(
                "attachment belongs to a different render pass".into(),
            ));
        }
        self.attachments
            .get(id.index as usize)
            .ok_or_else(|| GpuError::RenderPass(format!("no attachment {}", id.index)))
    }

    fn subpass(&self, id: SubpassId) -> Result<&Subpass> {
        if id.pass != self.id {
            return Err(GpuError::RenderPass(
                "subpass belongs to a different render pass".into(),
            ));
        }
        self.subpasses
            .get(id.index as usize)
            .ok_or_else(|| GpuError::RenderPass(format!("no subpass {}", id.index)))
    }

    #[cfg(test)]
    fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.dependencies
    }
}

fn start_dependency(depth: bool) -> vk::SubpassDependency {
    let dependency = vk::SubpassDependency::default().src_subpass(vk::SUBPASS_EXTERNAL);
    if depth {
        dependency
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
    } else {
        dependency
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
    }
}

/// A finalized, immutable render pass.
pub struct RenderPass {
    device: Arc<LogicalDevice>,
    render_pass: vk::RenderPass,
    id: u64,
    extent: vk::Extent2D,
    attachments: Vec<Attachment>,
    subpass_colors: Vec<usize>,
    subpass_depth: Vec<bool>,
}

impl RenderPass {
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// One clear value per attachment: opaque black for color, far plane for depth.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.attachments.iter().map(Attachment::clear_value).collect()
    }

    /// Number of color attachments `subpass` writes.
    pub fn color_attachment_count(&self, subpass: SubpassId) -> Result<usize> {
        self.check_subpass(subpass)?;
        Ok(self.subpass_colors[subpass.index as usize])
    }

    /// Whether `subpass` has a depth attachment.
    pub fn has_depth(&self, subpass: SubpassId) -> Result<bool> {
        self.check_subpass(subpass)?;
        Ok(self.subpass_depth[subpass.index as usize])
    }

    fn check_subpass(&self, subpass: SubpassId) -> Result<()> {
        if subpass.pass != self.id || subpass.index as usize >= self.subpass_colors.len() {
            return Err(GpuError::RenderPass(
                "subpass does not belong to this render pass".into(),
            ));
        }
        Ok(())
    }

    /// Create a framebuffer binding one image view to every attachment.
    pub fn create_framebuffer(
        self: &Arc<Self>,
        bindings: &[(AttachmentId, &Arc<ImageView>)],
    ) -> Result<Framebuffer> {
        let described: Vec<FramebufferBinding> = bindings
            .iter()
            .map(|(attachment, view)| FramebufferBinding {
                attachment: *attachment,
                view: view.handle(),
                format: view.format(),
                extent: view.extent(),
            })
            .collect();

        let order = resolve_bindings(self.id, &self.attachments, &described)?;
        let attachments: Vec<vk::ImageView> = order.iter().map(|&i| described[i].view).collect();
        let views: Vec<Arc<ImageView>> = order.iter().map(|&i| Arc::clone(bindings[i].1)).collect();

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(self.extent.width)
            .height(self.extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device.handle().create_framebuffer(&create_info, None)? };

        Ok(Framebuffer {
            render_pass: Arc::clone(self),
            framebuffer,
            _views: views,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Everything framebuffer validation needs to know about one binding.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FramebufferBinding {
    pub attachment: AttachmentId,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Validate `bindings` against a pass's attachments.
///
/// Returns, for each attachment index, the position of its binding.
pub(crate) fn resolve_bindings(
    pass: u64,
    attachments: &[Attachment],
    bindings: &[FramebufferBinding],
) -> Result<Vec<usize>> {
    let mut seen_attachments = HashSet::new();
    let mut seen_views = HashSet::new();
    let mut order = vec![usize::MAX; attachments.len()];

    for (position, binding) in bindings.iter().enumerate() {
        let index = binding.attachment.index;
        if binding.attachment.pass != pass {
            return Err(GpuError::RenderPass(format!(
                "attachment {index} is not from this render pass"
            )));
        }
        if !seen_attachments.insert(index) {
            return Err(GpuError::RenderPass(format!(
                "attachment {index} is bound more than once"
            )));
        }
        if !seen_views.insert(binding.view.as_raw()) {
            return Err(GpuError::RenderPass(format!(
                "image view for attachment {index} is bound more than once"
            )));
        }
        let attachment = attachments.get(index as usize).ok_or_else(|| {
            GpuError::RenderPass(format!("attachment index {index} is out of range"))
        })?;
        if attachment.extent != binding.extent {
            return Err(GpuError::RenderPass(format!(
                "image view extent {}x{} does not match attachment {index} extent {}x{}",
                binding.extent.width,
                binding.extent.height,
                attachment.extent.width,
                attachment.extent.height
            )));
        }
        if attachment.format != binding.format {
            return Err(GpuError::RenderPass(format!(
                "image view format {:?} does not match attachment {index} format {:?}",
                binding.format, attachment.format
            )));
        }
        order[index as usize] = position;
    }

    if seen_attachments.len() != attachments.len() {
        return Err(GpuError::RenderPass(format!(
            "framebuffer binds {} of {} attachments",
            seen_attachments.len(),
            attachments.len()
        )));
    }

    Ok(order)
}

/// A framebuffer; keeps its render pass and image views alive.
pub struct Framebuffer {
    render_pass: Arc<RenderPass>,
    framebuffer: vk::Framebuffer,
    _views: Vec<Arc<ImageView>>,
}

impl Framebuffer {
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.render_pass
                .device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    fn binding(attachment: AttachmentId, view: u64, format: vk::Format) -> FramebufferBinding {
        FramebufferBinding {
            attachment,
            view: vk::ImageView::from_raw(view),
            format,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
        }
    }

    #[test]
    fn attachment_ids_follow_creation_order() {
        let mut builder = RenderPassBuilder::new(800, 600);
        let color = builder.create_attachment(COLOR);
        let depth = builder.create_attachment(DEPTH);
        assert_eq!(color.index(), 0);
        assert_eq!(depth.index(), 1);
        assert_eq!(builder.attachments[0].kind, AttachmentKind::Color);
        assert_eq!(builder.attachments[1].kind, AttachmentKind::Depth);
    }

    #[test]
    fn color_attachment_clears_and_presents() {
        let attachment = Attachment {
            format: COLOR,
            kind: AttachmentKind::Color,
            extent: vk::Extent2D::default(),
        };
        let description = attachment.description();
        assert_eq!(description.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(description.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(description.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(description.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn subpass_rejects_foreign_and_mismatched_attachments() {
        let mut a = RenderPassBuilder::new(800, 600);
        let mut b = RenderPassBuilder::new(800, 600);
        let a_color = a.create_attachment(COLOR);
        let b_color = b.create_attachment(COLOR);
        let a_depth = a.create_attachment(DEPTH);

        assert!(a.create_subpass(&[b_color], None).is_err());
        assert!(a.create_subpass(&[a_depth], None).is_err());
        assert!(a.create_subpass(&[a_color], Some(a_color)).is_err());

        let subpass = a.create_subpass(&[a_color], Some(a_depth)).unwrap();
        assert_eq!(subpass.index(), 0);
    }

    #[test]
    fn start_dependency_waits_on_color_output() {
        let mut builder = RenderPassBuilder::new(800, 600);
        let color = builder.create_attachment(COLOR);
        let subpass = builder.create_subpass(&[color], None).unwrap();
        builder.add_start_external_dependency(subpass).unwrap();

        let dep = builder.dependencies()[0];
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(dep.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dep.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dep.src_access_mask, vk::AccessFlags::empty());
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn start_dependency_with_depth_waits_on_previous_depth_writes() {
        let mut builder = RenderPassBuilder::new(800, 600);
        let color = builder.create_attachment(COLOR);
        let depth = builder.create_attachment(DEPTH);
        let subpass = builder.create_subpass(&[color], Some(depth)).unwrap();
        builder.add_start_external_dependency(subpass).unwrap();

        let dep = builder.dependencies()[0];
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert!(dep
            .src_stage_mask
            .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(dep
            .src_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert_eq!(
            dep.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn end_dependency_targets_external() {
        let mut builder = RenderPassBuilder::new(800, 600);
        let color = builder.create_attachment(COLOR);
        let subpass = builder.create_subpass(&[color], None).unwrap();
        builder.add_end_external_dependency(subpass).unwrap();

        let dep = builder.dependencies()[0];
        assert_eq!(dep.src_subpass, 0);
        assert_eq!(dep.dst_subpass, vk::SUBPASS_EXTERNAL);
    }

    #[test]
    fn depend_on_requires_earlier_source() {
        let mut builder = RenderPassBuilder::new(800, 600);
        let color = builder.create_attachment(COLOR);
        let first = builder.create_subpass(&[color], None).unwrap();
        let second = builder.create_subpass(&[color], None).unwrap();

        assert!(builder.depend_on(first, second).is_err());
        assert!(builder.depend_on(first, first).is_err());
        builder.depend_on(second, first).unwrap();

        let dep = builder.dependencies()[0];
        assert_eq!((dep.src_subpass, dep.dst_subpass), (0, 1));
    }

    #[test]
    fn empty_pass_is_invalid() {
        let mut builder = RenderPassBuilder::new(800, 600);
        assert!(builder.validate().is_err());
        let color = builder.create_attachment(COLOR);
        assert!(builder.validate().is_err());
        builder.create_subpass(&[color], None).unwrap();
        assert!(builder.validate().is_ok());
    }

    fn two_attachment_pass() -> (RenderPassBuilder, AttachmentId, AttachmentId) {
        let mut builder = RenderPassBuilder::new(800, 600);
        let color = builder.create_attachment(COLOR);
        let depth = builder.create_attachment(DEPTH);
        (builder, color, depth)
    }

    #[test]
    fn bindings_are_ordered_by_attachment_index() {
        let (builder, color, depth) = two_attachment_pass();
        let order = resolve_bindings(
            builder.id,
            &builder.attachments,
            &[binding(depth, 2, DEPTH), binding(color, 1, COLOR)],
        )
        .unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn duplicate_attachment_or_view_is_rejected() {
        let (builder, color, depth) = two_attachment_pass();
        let dup_attachment = resolve_bindings(
            builder.id,
            &builder.attachments,
            &[binding(color, 1, COLOR), binding(color, 2, COLOR)],
        );
        assert!(dup_attachment.is_err());

        let dup_view = resolve_bindings(
            builder.id,
            &builder.attachments,
            &[binding(color, 1, COLOR), binding(depth, 1, DEPTH)],
        );
        assert!(dup_view.is_err());
    }

    #[test]
    fn mismatched_format_or_extent_is_rejected() {
        let (builder, color, depth) = two_attachment_pass();
        let wrong_format = resolve_bindings(
            builder.id,
            &builder.attachments,
            &[binding(color, 1, vk::Format::R8G8B8A8_UNORM), binding(depth, 2, DEPTH)],
        );
        assert!(wrong_format.is_err());

        let mut small = binding(color, 1, COLOR);
        small.extent.width = 640;
        let wrong_extent =
            resolve_bindings(builder.id, &builder.attachments, &[small, binding(depth, 2, DEPTH)]);
        assert!(wrong_extent.is_err());
    }

    #[test]
    fn incomplete_or_foreign_bindings_are_rejected() {
        let (builder, color, _) = two_attachment_pass();
        let (other, other_color, _) = two_attachment_pass();

        let missing = resolve_bindings(builder.id, &builder.attachments, &[binding(color, 1, COLOR)]);
        assert!(missing.is_err());

        let foreign = resolve_bindings(
            builder.id,
            &builder.attachments,
            &[binding(other_color, 1, COLOR)],
        );
        assert!(foreign.is_err());
        assert_ne!(builder.id, other.id);
    }

    #[test]
    fn clear_values_match_attachment_kinds() {
        let depth = Attachment {
            format: DEPTH,
            kind: AttachmentKind::Depth,
            extent: vk::Extent2D::default(),
        };
        let value = depth.clear_value();
        assert_eq!(unsafe { value.depth_stencil.depth }, 1.0);
    }
}
