//! The simulated particle field.
//!
//! Particle records are written by the compute shader into a storage buffer
//! and read back by the particle pipeline as vertex data, so the struct has to
//! satisfy both the std430 layout and the vertex attribute offsets.

use std::f32::consts::TAU;

use bytemuck::{Pod, Zeroable};
use field_rhi::vertex::{VertexInput, vec3_attribute};
use field_rhi::vk;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outward speed given to every particle at start-up.
pub const INITIAL_SPEED: f32 = 0.0001;
/// Radius scale of the initial distribution.
pub const SEED_RADIUS: f32 = 0.25;
/// Colour of every particle, in linear units.
pub const PARTICLE_COLOR: Vec3 = Vec3::new(0.0, 100.0 / 255.0, 100.0 / 255.0);

/// One particle as laid out in the storage buffer.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes) + padding (4 bytes)
/// - Offset 16: velocity (12 bytes) + padding (4 bytes)
/// - Offset 32: color (12 bytes) + padding (4 bytes)
/// - Total size: 48 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec3,
    _pad0: f32,
    pub velocity: Vec3,
    _pad1: f32,
    pub color: Vec3,
    _pad2: f32,
}

impl Particle {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(position: Vec3, velocity: Vec3, color: Vec3) -> Self {
        Self {
            position,
            velocity,
            color,
            ..Self::default()
        }
    }
}

impl VertexInput for Particle {
    /// Position at location 0 and colour at location 1; velocity is only
    /// read by the compute shader.
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vec3_attribute(0, std::mem::offset_of!(Particle, position) as u32),
            vec3_attribute(1, std::mem::offset_of!(Particle, color) as u32),
        ]
    }
}

/// Seeds `count` particles inside a sphere around the origin, moving outwards.
///
/// The same seed always yields the same field.
pub fn seed_particles(count: usize, seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|_| {
            let radius = SEED_RADIUS * rng.gen_range(0.0f32..1.0).sqrt();
            let theta = TAU * rng.gen_range(0.0f32..1.0);
            let phi = (2.0 * rng.gen_range(0.0f32..1.0) - 1.0).acos();

            let position = Vec3::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
            );
            let velocity = position.normalize_or_zero() * INITIAL_SPEED;

            Particle::new(position, velocity, PARTICLE_COLOR)
        })
        .collect()
}
