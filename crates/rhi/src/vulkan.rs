//! The Vulkan implementation of [`Gpu`].
//!
//! [`VulkanGpu`] forwards every trait operation to the logical device. Graphics
//! and compute each get their own command pool on the shared graphics/compute
//! family; compute work goes to the second queue of that family when one exists.

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, trace, warn};

use crate::command::{CommandBuffer, CommandPool, full_scissor, full_viewport};
use crate::descriptor;
use crate::device::Device;
use crate::error::{RhiError, RhiResult, timeout_nanos};
use crate::gpu::{
    AcquireOutcome, BufferBinding, ComputePass, DrawPass, Gpu, PresentOutcome, QueueRole,
    Submission,
};
use crate::swapchain::{PresentationSurface, VulkanSwapTargets};

/// A logical device plus the presentation surface it renders to.
pub struct VulkanGpu {
    device: Arc<Device>,
    presentation: PresentationSurface,
    graphics_pool: CommandPool,
    compute_pool: CommandPool,
}

impl VulkanGpu {
    pub fn new(device: Arc<Device>, presentation: PresentationSurface) -> RhiResult<Self> {
        let family = device
            .queue_families()
            .graphics_compute_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let graphics_pool = CommandPool::new(device.clone(), family)?;
        let compute_pool = CommandPool::new(device.clone(), family)?;

        Ok(Self {
            device,
            presentation,
            graphics_pool,
            compute_pool,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn pool(&self, role: QueueRole) -> &CommandPool {
        match role {
            QueueRole::Compute => &self.compute_pool,
            QueueRole::Graphics | QueueRole::Present => &self.graphics_pool,
        }
    }

    fn recorder(&self, command_buffer: vk::CommandBuffer) -> CommandBuffer {
        CommandBuffer::from_handle(self.device.clone(), command_buffer)
    }

    /// Submits `submit_info` with a fresh fence and waits up to `timeout` for it.
    ///
    /// A fence that timed out still has a signal pending, so it is leaked
    /// instead of destroyed.
    fn submit_fenced(
        &self,
        role: QueueRole,
        submit_info: vk::SubmitInfo<'_>,
        what: &'static str,
        timeout: Duration,
    ) -> RhiResult<()> {
        let fence = self.create_fence(false)?;
        let result = unsafe { self.device.submit(role, &[submit_info], fence) }
            .and_then(|()| self.wait_for_fence(fence, timeout));

        match result {
            Err(e) if e.is_timeout() => {
                warn!("Abandoning {} fence after {:?}", what, timeout);
                Err(RhiError::Timeout { what, timeout })
            }
            other => {
                self.destroy_fence(fence);
                other
            }
        }
    }
}

/// A one-shot command buffer returned to its pool when dropped.
struct OneShot<'a> {
    pool: &'a CommandPool,
    buffer: vk::CommandBuffer,
}

impl Drop for OneShot<'_> {
    fn drop(&mut self) {
        self.pool.free_command_buffer(self.buffer);
    }
}

impl Gpu for VulkanGpu {
    type SwapTargets = VulkanSwapTargets;

    // ---- memory -----------------------------------------------------------

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.device.physical_device().memory_properties
    }

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.device
            .physical_device()
            .min_uniform_buffer_offset_alignment()
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        Ok(unsafe { self.device.handle().create_buffer(&create_info, None)? })
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.handle().get_buffer_memory_requirements(buffer) }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory> {
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        Ok(unsafe { self.device.handle().allocate_memory(&alloc_info, None)? })
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()> {
        unsafe { self.device.handle().bind_buffer_memory(buffer, memory, 0)? };
        Ok(())
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
    ) -> RhiResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .handle()
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
        };
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| RhiError::InvalidHandle("Mapped pointer is null".to_string()))
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.handle().unmap_memory(memory) };
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.handle().destroy_buffer(buffer, None) };
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.handle().free_memory(memory, None) };
    }

    fn copy_buffer(
        &self,
        queue: QueueRole,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
        timeout: Duration,
    ) -> RhiResult<()> {
        let pool = self.pool(queue);
        let one_shot = OneShot {
            pool,
            buffer: pool.allocate_command_buffer()?,
        };

        let cmd = self.recorder(one_shot.buffer);
        cmd.begin()?;
        cmd.copy_buffer(
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        );
        cmd.end()?;

        let command_buffers = [one_shot.buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if let Err(e) = self.submit_fenced(queue, submit_info, "transfer", timeout) {
            // Still pending on the device; freeing it now would be invalid.
            if e.is_timeout() {
                std::mem::forget(one_shot);
            }
            return Err(e);
        }

        trace!("Copied {} bytes on the {:?} queue", size, queue);
        Ok(())
    }

    // ---- synchronization --------------------------------------------------

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.handle().create_fence(&create_info, None)? })
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.handle().create_semaphore(&create_info, None)? })
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&[fence], true, timeout_nanos(timeout))
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout {
                what: "fence",
                timeout,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[fence])? };
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.handle().destroy_fence(fence, None) };
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.handle().destroy_semaphore(semaphore, None) };
    }

    fn wait_idle(&self, timeout: Duration) -> RhiResult<()> {
        // A fence submitted behind everything else on a queue signals once the
        // queue has drained, which bounds the wait.
        let mut drained: Vec<vk::Queue> = Vec::with_capacity(3);
        for role in [QueueRole::Graphics, QueueRole::Compute, QueueRole::Present] {
            let queue = self.device.queue(role);
            if drained.contains(&queue) {
                continue;
            }
            self.submit_fenced(role, vk::SubmitInfo::default(), "device idle", timeout)?;
            drained.push(queue);
        }

        // Only presentation work can remain at this point.
        self.device.wait_idle()
    }

    // ---- commands ---------------------------------------------------------

    fn allocate_command_buffer(&self, role: QueueRole) -> RhiResult<vk::CommandBuffer> {
        self.pool(role).allocate_command_buffer()
    }

    fn free_command_buffer(&self, role: QueueRole, command_buffer: vk::CommandBuffer) {
        self.pool(role).free_command_buffer(command_buffer);
    }

    fn record_compute(
        &self,
        command_buffer: vk::CommandBuffer,
        pass: &ComputePass,
    ) -> RhiResult<()> {
        let cmd = self.recorder(command_buffer);
        let [x, y, z] = pass.group_count;

        cmd.reset()?;
        cmd.begin()?;
        cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, pass.pipeline);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            pass.layout,
            0,
            &[pass.descriptor_set],
        );
        cmd.dispatch(x, y, z);
        cmd.end()
    }

    fn record_draw(&self, command_buffer: vk::CommandBuffer, pass: &DrawPass) -> RhiResult<()> {
        let cmd = self.recorder(command_buffer);
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: pass.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: pass.clear_depth,
                    stencil: 0,
                },
            },
        ];

        cmd.reset()?;
        cmd.begin()?;
        cmd.begin_render_pass(pass.render_pass, pass.framebuffer, pass.extent, &clear_values);

        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pass.mesh_pipeline);
        cmd.set_viewport(&full_viewport(pass.extent));
        cmd.set_scissor(&full_scissor(pass.extent));
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            pass.layout,
            0,
            &[pass.descriptor_set],
        );

        if let Some(mesh) = pass.mesh {
            cmd.bind_vertex_buffers(0, &[mesh.vertex_buffer], &[0]);
            cmd.bind_index_buffer(mesh.index_buffer, 0, vk::IndexType::UINT32);
            cmd.draw_indexed(mesh.index_count, 1, 0, 0, 0);
        }

        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pass.particle_pipeline);
        cmd.bind_vertex_buffers(0, &[pass.particle_buffer], &[0]);
        cmd.draw(pass.particle_count, 1, 0, 0);

        cmd.end_render_pass();
        cmd.end()
    }

    fn submit(&self, role: QueueRole, submission: &Submission<'_>) -> RhiResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> =
            submission.waits.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            submission.waits.iter().map(|w| w.stage).collect();
        let command_buffers: Vec<vk::CommandBuffer> =
            submission.command_buffer.into_iter().collect();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(submission.signals);

        unsafe {
            self.device.submit(
                role,
                &[submit_info],
                submission.fence.unwrap_or(vk::Fence::null()),
            )
        }
    }

    // ---- descriptors ------------------------------------------------------

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        descriptor::create_pool(&self.device, max_sets, pool_sizes)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        descriptor::allocate_set(&self.device, pool, layout)
    }

    fn write_descriptor_set(&self, set: vk::DescriptorSet, bindings: &[BufferBinding]) {
        descriptor::write_buffer_bindings(&self.device, set, bindings);
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.handle().destroy_descriptor_pool(pool, None) };
    }

    // ---- swap surface -----------------------------------------------------

    fn create_swap_targets(
        &self,
        render_pass: vk::RenderPass,
        drawable: vk::Extent2D,
    ) -> RhiResult<VulkanSwapTargets> {
        VulkanSwapTargets::new(self.device.clone(), &self.presentation, render_pass, drawable)
    }

    fn destroy_swap_targets(&self, targets: VulkanSwapTargets) {
        debug!("Releasing swap targets");
        drop(targets);
    }

    fn acquire_next_image(
        &self,
        targets: &VulkanSwapTargets,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        targets.acquire_next_image(signal, timeout)
    }

    fn present(
        &self,
        targets: &VulkanSwapTargets,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        targets.present(image_index, wait)
    }
}
