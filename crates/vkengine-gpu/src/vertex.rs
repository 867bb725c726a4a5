//! Vertex input layouts.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};

/// A type that can be fed to a vertex shader from binding 0.
pub trait VertexInput: Pod {
    fn binding_description() -> vk::VertexInputBindingDescription;
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

/// 2-D position with a per-vertex color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(pos: Vec2, color: Vec3) -> Self {
        Self { pos, color }
    }
}

impl VertexInput for Vertex {
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn attributes_match_shader_locations() {
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes.len(), 2);
        assert_eq!(
            (attributes[0].location, attributes[0].format, attributes[0].offset),
            (0, vk::Format::R32G32_SFLOAT, 0)
        );
        assert_eq!(
            (attributes[1].location, attributes[1].format, attributes[1].offset),
            (1, vk::Format::R32G32B32_SFLOAT, 8)
        );
    }

    #[test]
    fn casts_to_bytes() {
        let vertices = [Vertex::new(Vec2::new(0.0, -0.5), Vec3::X)];
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&vertices).len(), 20);
    }
}
