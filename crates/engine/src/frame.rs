//! Per-frame resources.
//!
//! Each of the [`MAX_FRAMES_IN_FLIGHT`] frame slots owns everything one frame
//! touches, so the CPU can prepare frame `k + 1` while the GPU still executes
//! frame `k`:
//!
//! - a compute and a graphics command buffer
//! - semaphores for compute → graphics, acquire → graphics and graphics → present
//! - fences guarding reuse of the two command buffers
//! - host-resident uniform buffers for both passes
//! - descriptor sets wiring those buffers and the particle storage
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait compute_in_flight, write compute uniforms, reset, record, submit:
//!    - signal compute_finished, compute_in_flight
//! 2. Wait graphics_in_flight, acquire (signals image_available)
//! 3. Reset graphics_in_flight, write graphics uniforms, record, submit:
//!    - wait compute_finished at VERTEX_INPUT
//!    - wait image_available at COLOR_ATTACHMENT_OUTPUT
//!    - signal render_finished, graphics_in_flight
//! 4. Present (waits on render_finished)
//! ```
//!
//! The particle storage buffers form a ring: slot `i` reads the buffer of slot
//! `(i + N - 1) mod N` and writes its own.

use std::sync::Arc;
use std::time::Duration;

use field_rhi::buffer::{BufferUsage, StagedBuffer};
use field_rhi::descriptor::{
    CAMERA_BINDING, COMPUTE_UNIFORM_BINDING, DescriptorPool, MODEL_BINDING,
    PARTICLES_IN_BINDING, PARTICLES_OUT_BINDING,
};
use field_rhi::gpu::{BufferBinding, Gpu, QueueRole};
use field_rhi::sync::{Fence, Semaphore};
use field_rhi::vk;
use tracing::{debug, info};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{EngineError, EngineResult};
use crate::particles::Particle;
use crate::pipelines::PipelineSet;
use crate::uniforms::{CameraBlock, ComputeBlock, ModelBlock, graphics_uniform_size};

/// Index of the slot whose storage buffer slot `index` reads.
#[inline]
pub const fn previous_slot(index: usize) -> usize {
    (index + MAX_FRAMES_IN_FLIGHT - 1) % MAX_FRAMES_IN_FLIGHT
}

/// A command buffer returned to its queue's pool when dropped.
struct SlotCommandBuffer<G: Gpu> {
    gpu: Arc<G>,
    role: QueueRole,
    handle: vk::CommandBuffer,
}

impl<G: Gpu> SlotCommandBuffer<G> {
    fn new(gpu: Arc<G>, role: QueueRole) -> EngineResult<Self> {
        let handle = gpu
            .allocate_command_buffer(role)
            .map_err(|e| EngineError::creation("frame command buffer", e))?;
        Ok(Self { gpu, role, handle })
    }
}

impl<G: Gpu> Drop for SlotCommandBuffer<G> {
    fn drop(&mut self) {
        self.gpu.free_command_buffer(self.role, self.handle);
    }
}

/// Resources exclusively owned by one in-flight frame.
pub struct FrameSlot<G: Gpu> {
    index: usize,
    compute_commands: SlotCommandBuffer<G>,
    graphics_commands: SlotCommandBuffer<G>,
    compute_finished: Semaphore<G>,
    compute_in_flight: Fence<G>,
    image_available: Semaphore<G>,
    render_finished: Semaphore<G>,
    graphics_in_flight: Fence<G>,
    compute_uniforms: StagedBuffer<G>,
    graphics_uniforms: StagedBuffer<G>,
    compute_set: vk::DescriptorSet,
    graphics_set: vk::DescriptorSet,
    model_offset: vk::DeviceSize,
}

impl<G: Gpu> FrameSlot<G> {
    fn new(
        gpu: &Arc<G>,
        index: usize,
        pipelines: &PipelineSet,
        descriptors: &FrameDescriptorPools<G>,
        storage: &[StagedBuffer<G>],
    ) -> EngineResult<Self> {
        let alignment = gpu.min_uniform_buffer_offset_alignment();
        let model_offset = crate::uniforms::model_block_offset(alignment);

        let compute_uniforms = StagedBuffer::host_resident(
            gpu.clone(),
            ComputeBlock::SIZE as vk::DeviceSize,
            BufferUsage::Uniform,
        )?;
        let graphics_uniforms = StagedBuffer::host_resident(
            gpu.clone(),
            graphics_uniform_size(alignment),
            BufferUsage::Uniform,
        )?;

        let graphics_set = descriptors
            .graphics
            .allocate(
                pipelines.main.set_layout,
                &[
                    BufferBinding::uniform(
                        CAMERA_BINDING,
                        graphics_uniforms.handle(),
                        0,
                        CameraBlock::SIZE as vk::DeviceSize,
                    ),
                    BufferBinding::uniform(
                        MODEL_BINDING,
                        graphics_uniforms.handle(),
                        model_offset,
                        ModelBlock::SIZE as vk::DeviceSize,
                    ),
                ],
            )
            .map_err(|e| EngineError::creation("graphics descriptor set", e))?;

        let previous = &storage[previous_slot(index)];
        let current = &storage[index];
        let compute_set = descriptors
            .compute
            .allocate(
                pipelines.compute.set_layout,
                &[
                    BufferBinding::uniform(
                        COMPUTE_UNIFORM_BINDING,
                        compute_uniforms.handle(),
                        0,
                        ComputeBlock::SIZE as vk::DeviceSize,
                    ),
                    BufferBinding::storage(
                        PARTICLES_IN_BINDING,
                        previous.handle(),
                        previous.size(),
                    ),
                    BufferBinding::storage(PARTICLES_OUT_BINDING, current.handle(), current.size()),
                ],
            )
            .map_err(|e| EngineError::creation("compute descriptor set", e))?;

        let slot = Self {
            index,
            compute_commands: SlotCommandBuffer::new(gpu.clone(), QueueRole::Compute)?,
            graphics_commands: SlotCommandBuffer::new(gpu.clone(), QueueRole::Graphics)?,
            compute_finished: Semaphore::new(gpu.clone())
                .map_err(|e| EngineError::creation("semaphore", e))?,
            // Created signaled so the first wait doesn't block forever
            compute_in_flight: Fence::new(gpu.clone(), true)
                .map_err(|e| EngineError::creation("fence", e))?,
            image_available: Semaphore::new(gpu.clone())
                .map_err(|e| EngineError::creation("semaphore", e))?,
            render_finished: Semaphore::new(gpu.clone())
                .map_err(|e| EngineError::creation("semaphore", e))?,
            graphics_in_flight: Fence::new(gpu.clone(), true)
                .map_err(|e| EngineError::creation("fence", e))?,
            compute_uniforms,
            graphics_uniforms,
            compute_set,
            graphics_set,
            model_offset,
        };

        debug!(
            "Created frame slot {} (reads storage {}, writes storage {})",
            index,
            previous_slot(index),
            index
        );
        Ok(slot)
    }

    /// Writes this frame's simulation inputs.
    pub fn write_compute_inputs(&self, block: &ComputeBlock) -> EngineResult<()> {
        self.compute_uniforms.write_pod(0, block)?;
        Ok(())
    }

    /// Writes the camera block at offset 0 and the model block at its aligned offset.
    pub fn write_graphics_inputs(
        &self,
        camera: &CameraBlock,
        model: &ModelBlock,
    ) -> EngineResult<()> {
        self.graphics_uniforms.write_pod(0, camera)?;
        self.graphics_uniforms.write_pod(self.model_offset, model)?;
        Ok(())
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn compute_commands(&self) -> vk::CommandBuffer {
        self.compute_commands.handle
    }

    #[inline]
    pub fn graphics_commands(&self) -> vk::CommandBuffer {
        self.graphics_commands.handle
    }

    #[inline]
    pub fn compute_finished(&self) -> vk::Semaphore {
        self.compute_finished.handle()
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn compute_in_flight(&self) -> &Fence<G> {
        &self.compute_in_flight
    }

    #[inline]
    pub fn graphics_in_flight(&self) -> &Fence<G> {
        &self.graphics_in_flight
    }

    #[inline]
    pub fn compute_set(&self) -> vk::DescriptorSet {
        self.compute_set
    }

    #[inline]
    pub fn graphics_set(&self) -> vk::DescriptorSet {
        self.graphics_set
    }

    #[inline]
    pub fn compute_uniforms(&self) -> &StagedBuffer<G> {
        &self.compute_uniforms
    }

    #[inline]
    pub fn graphics_uniforms(&self) -> &StagedBuffer<G> {
        &self.graphics_uniforms
    }
}

struct FrameDescriptorPools<G: Gpu> {
    graphics: DescriptorPool<G>,
    compute: DescriptorPool<G>,
}

impl<G: Gpu> FrameDescriptorPools<G> {
    fn new(gpu: &Arc<G>) -> EngineResult<Self> {
        let slots = MAX_FRAMES_IN_FLIGHT as u32;

        // Two uniform blocks per graphics set.
        let graphics_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * slots,
        }];
        // One uniform block and two particle buffers per compute set.
        let compute_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: slots,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 2 * slots,
            },
        ];

        let graphics = DescriptorPool::new(gpu.clone(), slots, &graphics_sizes)
            .map_err(|e| EngineError::creation("graphics descriptor pool", e))?;
        let compute = DescriptorPool::new(gpu.clone(), slots, &compute_sizes)
            .map_err(|e| EngineError::creation("compute descriptor pool", e))?;

        Ok(Self { graphics, compute })
    }
}

/// The full ring of frame slots plus the particle storage they share.
///
/// Fields drop in declaration order: slots first, then the storage buffers
/// their sets reference, then the pools the sets came from.
pub struct FrameRing<G: Gpu> {
    slots: Vec<FrameSlot<G>>,
    storage: Vec<StagedBuffer<G>>,
    _descriptors: FrameDescriptorPools<G>,
}

impl<G: Gpu> FrameRing<G> {
    /// Creates every slot, uploading `particles` into each slot's storage buffer
    /// through the compute queue. Each upload waits at most `upload_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ResourceCreation`] if any resource fails, or
    /// [`EngineError::SynchronizationTimeout`] if an upload does not finish in
    /// time; whatever was already created is released.
    pub fn new(
        gpu: &Arc<G>,
        pipelines: &PipelineSet,
        particles: &[Particle],
        upload_timeout: Duration,
    ) -> EngineResult<Self> {
        let descriptors = FrameDescriptorPools::new(gpu)?;

        let storage = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                StagedBuffer::device_resident(
                    gpu.clone(),
                    bytemuck::cast_slice(particles),
                    BufferUsage::Storage,
                    QueueRole::Compute,
                    upload_timeout,
                )
                .map_err(|e| EngineError::creation("particle storage buffer", e))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|index| FrameSlot::new(gpu, index, pipelines, &descriptors, &storage))
            .collect::<EngineResult<Vec<_>>>()?;

        info!(
            "Frame ring created: {} slots, {} particles ({} bytes each)",
            slots.len(),
            particles.len(),
            storage.first().map_or(0, |b| b.size())
        );

        Ok(Self {
            slots,
            storage,
            _descriptors: descriptors,
        })
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &FrameSlot<G> {
        &self.slots[index]
    }

    #[inline]
    pub fn slots(&self) -> &[FrameSlot<G>] {
        &self.slots
    }

    /// The particle buffer written by slot `index`.
    #[inline]
    pub fn storage(&self, index: usize) -> &StagedBuffer<G> {
        &self.storage[index]
    }
}

#[cfg(test)]
mod tests {
    use field_rhi::mock::{MOCK_UNIFORM_ALIGNMENT, MockGpu};

    use super::*;
    use crate::particles::seed_particles;

    fn build_ring(gpu: &Arc<MockGpu>, particles: &[Particle]) -> EngineResult<FrameRing<MockGpu>> {
        FrameRing::new(gpu, &PipelineSet::default(), particles, Duration::from_secs(1))
    }

    #[test]
    fn test_previous_slot_wraps() {
        assert_eq!(previous_slot(0), MAX_FRAMES_IN_FLIGHT - 1);
        for index in 1..MAX_FRAMES_IN_FLIGHT {
            assert_eq!(previous_slot(index), index - 1);
        }
    }

    #[test]
    fn test_ring_wires_storage_ping_pong() {
        let gpu = Arc::new(MockGpu::new());
        let particles = seed_particles(256, 3);
        let ring = build_ring(&gpu, &particles).unwrap();

        for slot in ring.slots() {
            let bindings = gpu.descriptor_bindings(slot.compute_set());
            let input = bindings.iter().find(|b| b.binding == PARTICLES_IN_BINDING).unwrap();
            let output = bindings.iter().find(|b| b.binding == PARTICLES_OUT_BINDING).unwrap();
            assert_eq!(input.buffer, ring.storage(previous_slot(slot.index())).handle());
            assert_eq!(output.buffer, ring.storage(slot.index()).handle());
            assert_eq!(output.range, (256 * Particle::SIZE) as u64);
        }
    }

    #[test]
    fn test_model_block_binding_is_aligned() {
        let gpu = Arc::new(MockGpu::new());
        let ring = build_ring(&gpu, &seed_particles(256, 3)).unwrap();

        let bindings = gpu.descriptor_bindings(ring.slot(0).graphics_set());
        assert_eq!(bindings[1].binding, MODEL_BINDING);
        assert_eq!(bindings[1].offset, MOCK_UNIFORM_ALIGNMENT);
        assert_eq!(bindings[1].offset % MOCK_UNIFORM_ALIGNMENT, 0);
    }

    #[test]
    fn test_storage_starts_with_seeded_particles() {
        let gpu = Arc::new(MockGpu::new());
        let particles = seed_particles(256, 9);
        let ring = build_ring(&gpu, &particles).unwrap();

        for index in 0..MAX_FRAMES_IN_FLIGHT {
            let bytes = gpu.memory_contents(ring.storage(index).handle()).unwrap();
            assert_eq!(bytes, bytemuck::cast_slice::<Particle, u8>(&particles));
        }
    }

    #[test]
    fn test_ring_releases_everything() {
        let gpu = Arc::new(MockGpu::new());
        let ring = build_ring(&gpu, &seed_particles(256, 1)).unwrap();
        assert!(gpu.stats().live_buffers > 0);

        drop(ring);
        let stats = gpu.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.live_sync_objects, 0);
        assert_eq!(stats.live_command_buffers, 0);
        assert_eq!(stats.live_descriptor_pools, 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_failed_upload_leaves_nothing_behind() {
        let gpu = Arc::new(MockGpu::new());
        gpu.fail_next_copies(1);

        let result = build_ring(&gpu, &seed_particles(256, 1));
        assert!(matches!(result, Err(EngineError::ResourceCreation { .. })));

        let stats = gpu.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.live_descriptor_pools, 0);
    }
}
