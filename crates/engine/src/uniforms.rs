//! Uniform block definitions shared with the shaders.
//!
//! These structures must match the GLSL uniform block layouts exactly (std140).
//! All structures use `#[repr(C)]` for predictable memory layout and implement
//! `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Camera block (binding 0 of the graphics layout).
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraBlock {
    /// View matrix (world to view space).
    pub view: Mat4,
    /// Projection matrix (view to clip space), Y flipped for Vulkan.
    pub projection: Mat4,
}

impl CameraBlock {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
    pub const FOV_Y_DEGREES: f32 = 45.0;
    pub const NEAR: f32 = 0.1;
    pub const FAR: f32 = 10.0;

    /// Fixed camera looking at the origin from (2, 2, 2) with +Z up.
    pub fn looking_at_origin(aspect_ratio: f32) -> Self {
        let view = Mat4::look_at_rh(Self::EYE, Vec3::ZERO, Vec3::Z);
        let mut projection = Mat4::perspective_rh(
            Self::FOV_Y_DEGREES.to_radians(),
            aspect_ratio,
            Self::NEAR,
            Self::FAR,
        );
        // Vulkan clip space has Y pointing down.
        projection.y_axis.y *= -1.0;
        Self { view, projection }
    }
}

/// Model block (binding 1 of the graphics layout).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelBlock {
    pub model: Mat4,
}

impl ModelBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// The mesh transform: a quarter turn about Z.
    pub fn quarter_turn() -> Self {
        Self {
            model: Mat4::from_rotation_z(90.0_f32.to_radians()),
        }
    }
}

/// Per-frame simulation inputs (binding 0 of the compute layout).
///
/// # Memory Layout
///
/// - Offset 0: attractor point (16 bytes)
/// - Offset 16: delta time (4 bytes) + padding (12 bytes)
/// - Total size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputeBlock {
    pub attractor: Vec4,
    pub delta_time: f32,
    pub _padding: [f32; 3],
}

impl ComputeBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Attractor position before rotation.
    pub const BASE_ATTRACTOR: Vec4 = Vec4::new(0.5, 0.0, 0.0, 1.0);
    /// Axis the attractor swings around, before normalisation.
    pub const ROTATION_AXIS: Vec3 = Vec3::new(0.1, 0.1, 1.0);
    /// Scale from the last frame's wall-clock seconds to simulation time.
    pub const TIME_SCALE: f32 = 2000.0;

    /// Builds the block for a frame whose predecessor took `last_frame_secs`.
    ///
    /// The attractor swings by a quarter turn per unit of simulation time.
    /// It is applied as a row vector, so the effective rotation is the inverse.
    pub fn for_frame(last_frame_secs: f32) -> Self {
        let delta_time = last_frame_secs * Self::TIME_SCALE;
        let angle = 90.0_f32.to_radians() * delta_time;
        let rotation = Mat4::from_axis_angle(Self::ROTATION_AXIS.normalize(), angle);

        Self {
            attractor: rotation.transpose() * Self::BASE_ATTRACTOR,
            delta_time,
            _padding: [0.0; 3],
        }
    }
}

/// Byte offset of the model block inside a graphics uniform buffer.
pub fn model_block_offset(min_alignment: u64) -> u64 {
    align_up(CameraBlock::SIZE as u64, min_alignment)
}

/// Size of one graphics uniform buffer holding both blocks.
pub fn graphics_uniform_size(min_alignment: u64) -> u64 {
    model_block_offset(min_alignment) + ModelBlock::SIZE as u64
}

/// Rounds `value` up to a multiple of `alignment` (treated as 1 when zero).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(CameraBlock::SIZE, 128);
        assert_eq!(ModelBlock::SIZE, 64);
        assert_eq!(ComputeBlock::SIZE, 32);
        assert_eq!(std::mem::align_of::<CameraBlock>(), 16);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(128, 256), 256);
        assert_eq!(align_up(128, 64), 128);
        assert_eq!(align_up(129, 64), 192);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn test_model_block_offset_respects_alignment() {
        assert_eq!(model_block_offset(256), 256);
        assert_eq!(model_block_offset(16), 128);
        assert_eq!(graphics_uniform_size(256), 320);
    }

    #[test]
    fn test_zero_delta_keeps_base_attractor() {
        let block = ComputeBlock::for_frame(0.0);
        assert_eq!(block.delta_time, 0.0);
        assert!(block.attractor.abs_diff_eq(ComputeBlock::BASE_ATTRACTOR, 1e-6));
    }

    #[test]
    fn test_attractor_rotation_preserves_distance() {
        let block = ComputeBlock::for_frame(0.016);
        assert!((block.delta_time - 32.0).abs() < 1e-4);
        assert!((block.attractor.truncate().length() - 0.5).abs() < 1e-5);
        assert_eq!(block.attractor.w, 1.0);
    }

    #[test]
    fn test_projection_is_flipped() {
        let camera = CameraBlock::looking_at_origin(16.0 / 9.0);
        let reference = Mat4::perspective_rh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 10.0);
        assert_eq!(camera.projection.y_axis.y, -reference.y_axis.y);

        let origin = camera.projection * camera.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = origin.truncate() / origin.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    }
}
