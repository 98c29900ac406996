//! Vertex input descriptions.
//!
//! Types fed to a graphics pipeline as vertex data implement [`VertexInput`],
//! which supplies the binding and attribute descriptions the pipeline builder
//! needs. Both the mesh vertices and the particle records read by the point
//! pipeline go through this trait.

use ash::vk;
use bytemuck::Pod;

/// A `#[repr(C)]` record consumed per vertex from binding 0.
pub trait VertexInput: Pod {
    /// Attribute descriptions for binding 0, in location order.
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;

    /// Per-vertex binding 0 with the record size as stride.
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }
}

/// A `vec3` attribute at `location`, `offset` bytes into the record.
#[inline]
pub const fn vec3_attribute(location: u32, offset: u32) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use glam::Vec3;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Colored {
        position: Vec3,
        color: Vec3,
    }

    impl VertexInput for Colored {
        fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
            vec![vec3_attribute(0, 0), vec3_attribute(1, 12)]
        }
    }

    #[test]
    fn test_binding_uses_record_stride() {
        let binding = Colored::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_vec3_attribute() {
        let attribute = vec3_attribute(1, 32);
        assert_eq!(attribute.location, 1);
        assert_eq!(attribute.offset, 32);
        assert_eq!(attribute.format, vk::Format::R32G32B32_SFLOAT);
    }
}
