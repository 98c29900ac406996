//! The device seam used by the frame logic.
//!
//! [`Gpu`] is the narrow set of device operations the engine needs: buffer and
//! memory management, fences and semaphores, command recording for the two
//! passes the renderer issues, queue submission, descriptor writes and the
//! swap-target lifecycle. Handles are plain `ash::vk` handles so the real
//! backend ([`crate::vulkan::VulkanGpu`]) is a thin forwarding layer, while the
//! mock backend (feature `mock`) can fabricate them.
//!
//! Out-of-date and suboptimal surfaces are reported as values
//! ([`AcquireOutcome::Stale`], [`PresentOutcome::Stale`]), never as errors.

use std::ptr::NonNull;
use std::time::Duration;

use ash::vk;

use crate::error::RhiResult;

/// Queue a submission or transfer targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Present,
}

/// A semaphore wait gating one pipeline stage of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags,
}

/// One batch submitted to a queue.
///
/// `command_buffer` may be `None` for a batch that only waits on or signals
/// semaphores.
#[derive(Clone, Copy, Debug)]
pub struct Submission<'a> {
    pub command_buffer: Option<vk::CommandBuffer>,
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [vk::Semaphore],
    pub fence: Option<vk::Fence>,
}

/// Result of asking the presentation engine for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; `suboptimal` asks for recreation after this frame.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface is out of date and nothing was acquired.
    Stale,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The image was queued but the surface is out of date or suboptimal.
    Stale,
}

/// A buffer bound into a descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

impl BufferBinding {
    pub fn uniform(
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            buffer,
            offset,
            range,
        }
    }

    pub fn storage(binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            offset: 0,
            range,
        }
    }
}

/// Everything needed to record the particle simulation dispatch.
#[derive(Clone, Copy, Debug)]
pub struct ComputePass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub group_count: [u32; 3],
}

/// Indexed mesh geometry for the main pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Everything needed to record the graphics pass for one swap image.
///
/// The main and particle pipelines share `layout`, so the descriptor set bound
/// for the mesh stays valid for the particle draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawPass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub mesh_pipeline: vk::Pipeline,
    pub mesh: Option<MeshDraw>,
    pub particle_pipeline: vk::Pipeline,
    pub particle_buffer: vk::Buffer,
    pub particle_count: u32,
}

/// Presentable images plus the attachments and framebuffers built around them.
pub trait SwapTargetSet {
    fn extent(&self) -> vk::Extent2D;
    fn image_count(&self) -> u32;
    fn color_format(&self) -> vk::Format;
    fn depth_format(&self) -> vk::Format;
    fn samples(&self) -> vk::SampleCountFlags;
    /// Framebuffer binding {MSAA colour, depth, resolve = swap image `image_index`}.
    fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer>;
}

/// Device operations the engine is written against.
///
/// Implementations are driven from a single control thread. Methods taking a
/// handle expect it to come from the same implementation.
pub trait Gpu {
    type SwapTargets: SwapTargetSet;

    // ---- memory -----------------------------------------------------------

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize;

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer>;

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory>;

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()>;

    /// Maps `size` bytes of host-visible memory. The pointer stays valid until
    /// [`Gpu::unmap_memory`] or [`Gpu::free_memory`].
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
    ) -> RhiResult<NonNull<u8>>;

    fn unmap_memory(&self, memory: vk::DeviceMemory);

    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn free_memory(&self, memory: vk::DeviceMemory);

    /// Records a one-shot copy on `queue`, submits it and blocks until it completes.
    ///
    /// Fails with [`crate::RhiError::Timeout`] if the copy is not done within `timeout`.
    fn copy_buffer(
        &self,
        queue: QueueRole,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
        timeout: Duration,
    ) -> RhiResult<()>;

    // ---- synchronization --------------------------------------------------

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    /// Blocks until `fence` is signalled, failing with [`crate::RhiError::Timeout`].
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<()>;

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    fn destroy_fence(&self, fence: vk::Fence);

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Blocks until every queue is idle, failing with [`crate::RhiError::Timeout`]
    /// once `timeout` has passed.
    fn wait_idle(&self, timeout: Duration) -> RhiResult<()>;

    // ---- commands ---------------------------------------------------------

    fn allocate_command_buffer(&self, role: QueueRole) -> RhiResult<vk::CommandBuffer>;

    fn free_command_buffer(&self, role: QueueRole, command_buffer: vk::CommandBuffer);

    /// Resets `command_buffer` and records the simulation dispatch into it.
    fn record_compute(
        &self,
        command_buffer: vk::CommandBuffer,
        pass: &ComputePass,
    ) -> RhiResult<()>;

    /// Resets `command_buffer` and records the mesh and particle draws into it.
    fn record_draw(&self, command_buffer: vk::CommandBuffer, pass: &DrawPass) -> RhiResult<()>;

    fn submit(&self, role: QueueRole, submission: &Submission<'_>) -> RhiResult<()>;

    // ---- descriptors ------------------------------------------------------

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet>;

    fn write_descriptor_set(&self, set: vk::DescriptorSet, bindings: &[BufferBinding]);

    /// Destroys the pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    // ---- swap surface -----------------------------------------------------

    /// Builds a fresh swap target set for a drawable of `drawable` pixels.
    fn create_swap_targets(
        &self,
        render_pass: vk::RenderPass,
        drawable: vk::Extent2D,
    ) -> RhiResult<Self::SwapTargets>;

    /// Releases a target set. The caller guarantees no queued work references it.
    fn destroy_swap_targets(&self, targets: Self::SwapTargets);

    fn acquire_next_image(
        &self,
        targets: &Self::SwapTargets,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome>;

    fn present(
        &self,
        targets: &Self::SwapTargets,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome>;
}
