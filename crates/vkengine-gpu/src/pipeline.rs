//! Graphics pipeline creation.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::render_pass::{RenderPass, SubpassId};
use crate::shader::{ShaderModule, VertexShaderModule};
use crate::vertex::VertexInput;
use ash::vk;
use std::marker::PhantomData;
use std::sync::Arc;

/// Fixed-function state that varies between pipelines.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// Test and write depth; requires a depth attachment in the subpass.
    pub depth_test: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: false,
        }
    }
}

/// Viewport covering `extent` with the full depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// A graphics pipeline drawing vertices of type `V` in one subpass.
///
/// Viewport and scissor are baked in from the render pass extent, so the
/// pipeline must be rebuilt whenever its render pass is.
pub struct GraphicsPipeline<V: VertexInput> {
    render_pass: Arc<RenderPass>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    _vertex: PhantomData<fn() -> V>,
}

impl<V: VertexInput> GraphicsPipeline<V> {
    pub fn new(
        device: &Arc<LogicalDevice>,
        render_pass: &Arc<RenderPass>,
        subpass: SubpassId,
        vertex_shader: &VertexShaderModule<V>,
        fragment_shader: &ShaderModule,
        options: PipelineOptions,
    ) -> Result<Self> {
        let color_count = render_pass.color_attachment_count(subpass)?;
        if options.depth_test && !render_pass.has_depth(subpass)? {
            return Err(GpuError::PipelineCreation(
                "depth testing requested for a subpass without a depth attachment".to_string(),
            ));
        }

        let shader_stages = [
            vertex_shader
                .module()
                .stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let bindings = vertex_shader.binding_descriptions();
        let attributes = vertex_shader.attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vertex_shader.input_assembly();

        let viewports = [full_viewport(render_pass.extent())];
        let scissors = [full_scissor(render_pass.extent())];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(options.polygon_mode)
            .cull_mode(options.cull_mode)
            .front_face(options.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(options.depth_test)
            .depth_write_enable(options.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments: Vec<_> = (0..color_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let raw = device.handle();
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(subpass.index());

        let pipelines = unsafe {
            raw.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { raw.destroy_pipeline_layout(layout, None) };
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

        tracing::debug!(
            "Graphics pipeline created for subpass {} ({}x{})",
            subpass.index(),
            render_pass.extent().width,
            render_pass.extent().height
        );

        Ok(Self {
            render_pass: Arc::clone(render_pass),
            pipeline,
            layout,
            _vertex: PhantomData,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }
}

impl<V: VertexInput> Drop for GraphicsPipeline<V> {
    fn drop(&mut self) {
        let device = self.render_pass.device().handle();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_cull_back_faces_clockwise() {
        let options = PipelineOptions::default();
        assert_eq!(options.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(options.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(options.front_face, vk::FrontFace::CLOCKWISE);
        assert!(!options.depth_test);
    }

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let viewport = full_viewport(extent);
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        let scissor = full_scissor(extent);
        assert_eq!(scissor.extent, extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
    }
}
