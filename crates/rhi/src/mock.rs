//! In-process [`Gpu`] implementation for tests.
//!
//! `MockGpu` fabricates handles, backs device memory with host byte arrays and
//! models queue execution lazily: a submission stays pending until the host
//! waits on its fence (which retires it and every earlier submission) or calls
//! [`Gpu::wait_idle`]. That is the latest the real device could finish the
//! work, so any missing host-side wait shows up as a recorded violation.
//!
//! Violations are collected instead of panicking so a test can drive a whole
//! scenario and then assert `gpu.violations().is_empty()`.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::Mutex;
use std::time::Duration;

use ash::vk::{self, Handle};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{
    AcquireOutcome, BufferBinding, ComputePass, DrawPass, Gpu, PresentOutcome, QueueRole,
    SemaphoreWait, Submission, SwapTargetSet,
};

/// Memory type 0 of the mock device.
pub const DEVICE_LOCAL_TYPE: u32 = 0;
/// Memory type 1 of the mock device.
pub const HOST_VISIBLE_TYPE: u32 = 1;
/// Images in every mock swap target set.
pub const MOCK_IMAGE_COUNT: u32 = 3;
/// Uniform offset alignment reported by the mock device.
pub const MOCK_UNIFORM_ALIGNMENT: vk::DeviceSize = 256;

/// Allocation and lifecycle counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MockStats {
    pub allocations: usize,
    pub frees: usize,
    pub live_allocations: usize,
    pub live_buffers: usize,
    pub live_sync_objects: usize,
    pub live_command_buffers: usize,
    pub live_descriptor_pools: usize,
    pub copies: usize,
    pub submissions: usize,
    pub presents: usize,
    pub wait_idles: usize,
    pub swap_targets_created: usize,
    pub swap_targets_live: usize,
}

/// What a submitted command buffer was last recorded with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmittedWork {
    Compute,
    Draw,
    /// A batch without a command buffer.
    Empty,
}

/// One call to [`Gpu::submit`].
#[derive(Clone, Debug)]
pub struct SubmissionRecord {
    pub role: QueueRole,
    pub command_buffer: Option<vk::CommandBuffer>,
    pub work: SubmittedWork,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
}

/// One call to [`Gpu::record_compute`].
#[derive(Clone, Debug)]
pub struct ComputeRecord {
    pub command_buffer: vk::CommandBuffer,
    pub pass: ComputePass,
    /// Descriptor bindings of `pass.descriptor_set` at record time.
    pub bindings: Vec<BufferBinding>,
    /// Submissions of this command buffer still pending at record time.
    pub outstanding: u32,
}

/// One call to [`Gpu::record_draw`].
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub command_buffer: vk::CommandBuffer,
    pub pass: DrawPass,
    pub bindings: Vec<BufferBinding>,
    pub outstanding: u32,
}

/// Swap target set fabricated by [`MockGpu`].
#[derive(Debug)]
pub struct MockSwapTargets {
    id: u64,
    extent: vk::Extent2D,
    framebuffers: Vec<vk::Framebuffer>,
}

impl MockSwapTargets {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl SwapTargetSet for MockSwapTargets {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.framebuffers.len() as u32
    }

    fn color_format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_SRGB
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn samples(&self) -> vk::SampleCountFlags {
        vk::SampleCountFlags::TYPE_4
    }

    fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }
}

struct BufferRecord {
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory: Option<vk::DeviceMemory>,
}

struct MemoryRecord {
    bytes: Box<[u8]>,
    type_index: u32,
    mapped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

#[derive(Default)]
struct CommandBufferRecord {
    role: Option<QueueRole>,
    outstanding: u32,
    last: Option<SubmittedWork>,
}

struct PendingSubmission {
    command_buffer: Option<vk::CommandBuffer>,
    fence: Option<vk::Fence>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    buffers: HashMap<vk::Buffer, BufferRecord>,
    memories: HashMap<vk::DeviceMemory, MemoryRecord>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, bool>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferRecord>,
    descriptor_pools: HashMap<vk::DescriptorPool, Vec<vk::DescriptorSet>>,
    descriptor_sets: HashMap<vk::DescriptorSet, Vec<BufferBinding>>,
    live_targets: Vec<u64>,
    next_image: u32,
    pending: Vec<PendingSubmission>,
    submissions: Vec<SubmissionRecord>,
    compute_records: Vec<ComputeRecord>,
    draw_records: Vec<DrawRecord>,
    presented_images: Vec<u32>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fail_copies: u32,
    fail_allocations: u32,
    hung: bool,
    stats: MockStats,
    violations: Vec<String>,
}

impl State {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn violation(&mut self, message: String) {
        tracing::warn!("mock gpu violation: {}", message);
        self.violations.push(message);
    }

    /// Retires pending submissions up to and including index `last`.
    fn retire_through(&mut self, last: usize) {
        for done in self.pending.drain(..=last).collect::<Vec<_>>() {
            if let Some(cb) = done.command_buffer
                && let Some(record) = self.command_buffers.get_mut(&cb)
            {
                record.outstanding = record.outstanding.saturating_sub(1);
            }
            if let Some(fence) = done.fence {
                self.fences.insert(fence, FenceState::Signaled);
            }
        }
    }

    fn retire_all(&mut self) {
        if !self.pending.is_empty() {
            self.retire_through(self.pending.len() - 1);
        }
    }

    fn signal(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get(&semaphore).copied() {
            Some(true) => {
                self.violation(format!("{by} signals semaphore {semaphore:?} twice"));
            }
            Some(false) => {
                self.semaphores.insert(semaphore, true);
            }
            None => self.violation(format!("{by} signals unknown semaphore {semaphore:?}")),
        }
    }

    fn consume(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get(&semaphore).copied() {
            Some(true) => {
                self.semaphores.insert(semaphore, false);
            }
            Some(false) => self.violation(format!(
                "{by} waits on semaphore {semaphore:?} that nothing will signal"
            )),
            None => self.violation(format!("{by} waits on unknown semaphore {semaphore:?}")),
        }
    }

    fn bytes_of(&self, buffer: vk::Buffer) -> Option<&[u8]> {
        let record = self.buffers.get(&buffer)?;
        let memory = self.memories.get(&record.memory?)?;
        memory.bytes.get(..record.size as usize)
    }

    fn record_start(&mut self, cb: vk::CommandBuffer, work: SubmittedWork) -> u32 {
        let Some(record) = self.command_buffers.get_mut(&cb) else {
            self.violation(format!("recording unknown command buffer {cb:?}"));
            return 0;
        };
        let outstanding = record.outstanding;
        record.last = Some(work);
        if outstanding > 0 {
            self.violation(format!(
                "command buffer {cb:?} re-recorded with {outstanding} submission(s) outstanding"
            ));
        }
        outstanding
    }
}

/// Scriptable fake device. See the module docs.
pub struct MockGpu {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    state: Mutex<State>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    pub fn new() -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory_properties.memory_types[DEVICE_LOCAL_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory_properties.memory_types[HOST_VISIBLE_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        Self {
            memory_properties,
            state: Mutex::new(State::default()),
        }
    }

    // ---- scripting --------------------------------------------------------

    /// Queues outcomes returned by the next acquires, in order.
    pub fn script_acquire(&self, outcomes: impl IntoIterator<Item = AcquireOutcome>) {
        self.state.lock().unwrap().acquire_script.extend(outcomes);
    }

    /// Queues outcomes returned by the next presents, in order.
    pub fn script_present(&self, outcomes: impl IntoIterator<Item = PresentOutcome>) {
        self.state.lock().unwrap().present_script.extend(outcomes);
    }

    /// Makes the next `count` buffer copies fail with `ERROR_DEVICE_LOST`.
    pub fn fail_next_copies(&self, count: u32) {
        self.state.lock().unwrap().fail_copies = count;
    }

    /// Makes the next `count` memory allocations fail with `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_next_allocations(&self, count: u32) {
        self.state.lock().unwrap().fail_allocations = count;
    }

    /// While hung, pending submissions never retire and waits time out.
    pub fn set_hung(&self, hung: bool) {
        self.state.lock().unwrap().hung = hung;
    }

    // ---- inspection -------------------------------------------------------

    pub fn stats(&self) -> MockStats {
        self.state.lock().unwrap().stats
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn compute_records(&self) -> Vec<ComputeRecord> {
        self.state.lock().unwrap().compute_records.clone()
    }

    pub fn draw_records(&self) -> Vec<DrawRecord> {
        self.state.lock().unwrap().draw_records.clone()
    }

    /// Swap image indices passed to successful presents, in order.
    pub fn presented_images(&self) -> Vec<u32> {
        self.state.lock().unwrap().presented_images.clone()
    }

    /// Number of submissions not yet retired.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Bytes of the memory bound to `buffer`, trimmed to the buffer size.
    pub fn memory_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().unwrap().bytes_of(buffer).map(<[u8]>::to_vec)
    }

    pub fn buffer_usage(&self, buffer: vk::Buffer) -> Option<vk::BufferUsageFlags> {
        self.state.lock().unwrap().buffers.get(&buffer).map(|b| b.usage)
    }

    /// Bindings last written to `set`, ordered by binding index.
    pub fn descriptor_bindings(&self, set: vk::DescriptorSet) -> Vec<BufferBinding> {
        self.state
            .lock()
            .unwrap()
            .descriptor_sets
            .get(&set)
            .cloned()
            .unwrap_or_default()
    }
}

impl Gpu for MockGpu {
    type SwapTargets = MockSwapTargets;

    // ---- memory -----------------------------------------------------------

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        MOCK_UNIFORM_ALIGNMENT
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer> {
        let mut state = self.state.lock().unwrap();
        let buffer = vk::Buffer::from_raw(state.next_raw());
        state.buffers.insert(
            buffer,
            BufferRecord {
                size,
                usage,
                memory: None,
            },
        );
        state.stats.live_buffers += 1;
        Ok(buffer)
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.lock().unwrap();
        let size = state.buffers.get(&buffer).map_or(0, |b| b.size);
        vk::MemoryRequirements {
            size,
            alignment: 16,
            memory_type_bits: (1 << DEVICE_LOCAL_TYPE) | (1 << HOST_VISIBLE_TYPE),
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory> {
        let mut state = self.state.lock().unwrap();
        if state.fail_allocations > 0 {
            state.fail_allocations -= 1;
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        if memory_type_index >= self.memory_properties.memory_type_count {
            state.violation(format!("allocation from unknown memory type {memory_type_index}"));
        }

        let memory = vk::DeviceMemory::from_raw(state.next_raw());
        state.memories.insert(
            memory,
            MemoryRecord {
                bytes: vec![0u8; size as usize].into_boxed_slice(),
                type_index: memory_type_index,
                mapped: false,
            },
        );
        state.stats.allocations += 1;
        state.stats.live_allocations += 1;
        Ok(memory)
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.memories.contains_key(&memory) {
            return Err(RhiError::InvalidHandle(format!("unknown memory {memory:?}")));
        }
        match state.buffers.get_mut(&buffer) {
            Some(record) => {
                record.memory = Some(memory);
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("unknown buffer {buffer:?}"))),
        }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
    ) -> RhiResult<NonNull<u8>> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .memories
            .get_mut(&memory)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown memory {memory:?}")))?;
        if record.type_index != HOST_VISIBLE_TYPE || size as usize > record.bytes.len() {
            return Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        record.mapped = true;
        NonNull::new(record.bytes.as_mut_ptr())
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock().unwrap();
        let was_mapped = state
            .memories
            .get_mut(&memory)
            .is_some_and(|record| std::mem::replace(&mut record.mapped, false));
        if !was_mapped {
            state.violation(format!("unmap of memory {memory:?} that is not mapped"));
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock().unwrap();
        if state.buffers.remove(&buffer).is_some() {
            state.stats.live_buffers -= 1;
        } else {
            state.violation(format!("buffer {buffer:?} destroyed twice"));
        }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock().unwrap();
        match state.memories.remove(&memory) {
            Some(record) => {
                if record.mapped {
                    state.violation(format!("memory {memory:?} freed while mapped"));
                }
                state.stats.frees += 1;
                state.stats.live_allocations -= 1;
            }
            None => state.violation(format!("memory {memory:?} freed twice")),
        }
    }

    fn copy_buffer(
        &self,
        _queue: QueueRole,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
        timeout: Duration,
    ) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_copies > 0 {
            state.fail_copies -= 1;
            return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
        }
        if state.hung {
            return Err(RhiError::Timeout {
                what: "transfer",
                timeout,
            });
        }

        let size = size as usize;
        let data = state
            .bytes_of(src)
            .and_then(|bytes| bytes.get(..size))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RhiError::InvalidHandle(format!("copy source {src:?} too small")))?;

        let target = state
            .buffers
            .get(&dst)
            .and_then(|b| b.memory)
            .ok_or_else(|| RhiError::InvalidHandle(format!("copy target {dst:?} unbound")))?;
        let bytes = state
            .memories
            .get_mut(&target)
            .and_then(|m| m.bytes.get_mut(..size))
            .ok_or_else(|| RhiError::InvalidHandle(format!("copy target {dst:?} too small")))?;
        bytes.copy_from_slice(&data);

        state.stats.copies += 1;
        Ok(())
    }

    // ---- synchronization --------------------------------------------------

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state.lock().unwrap();
        let fence = vk::Fence::from_raw(state.next_raw());
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        state.stats.live_sync_objects += 1;
        Ok(fence)
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state.lock().unwrap();
        let semaphore = vk::Semaphore::from_raw(state.next_raw());
        state.semaphores.insert(semaphore, false);
        state.stats.live_sync_objects += 1;
        Ok(semaphore)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) if !state.hung => {
                let position = state.pending.iter().position(|p| p.fence == Some(fence));
                if let Some(position) = position {
                    state.retire_through(position);
                }
                Ok(())
            }
            Some(_) => Err(RhiError::Timeout {
                what: "fence",
                timeout,
            }),
            None => Err(RhiError::InvalidHandle(format!("unknown fence {fence:?}"))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.fences.get(&fence).copied() {
            Some(FenceState::Pending) => {
                state.violation(format!("fence {fence:?} reset while in flight"));
                Ok(())
            }
            Some(_) => {
                state.fences.insert(fence, FenceState::Unsignaled);
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("unknown fence {fence:?}"))),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock().unwrap();
        match state.fences.remove(&fence) {
            Some(FenceState::Pending) => {
                state.violation(format!("fence {fence:?} destroyed while in flight"));
                state.stats.live_sync_objects -= 1;
            }
            Some(_) => state.stats.live_sync_objects -= 1,
            None => state.violation(format!("fence {fence:?} destroyed twice")),
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock().unwrap();
        if state.semaphores.remove(&semaphore).is_some() {
            state.stats.live_sync_objects -= 1;
        } else {
            state.violation(format!("semaphore {semaphore:?} destroyed twice"));
        }
    }

    fn wait_idle(&self, timeout: Duration) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.stats.wait_idles += 1;
        if state.hung && !state.pending.is_empty() {
            return Err(RhiError::Timeout {
                what: "device idle",
                timeout,
            });
        }
        state.retire_all();
        Ok(())
    }

    // ---- commands ---------------------------------------------------------

    fn allocate_command_buffer(&self, role: QueueRole) -> RhiResult<vk::CommandBuffer> {
        let mut state = self.state.lock().unwrap();
        let cb = vk::CommandBuffer::from_raw(state.next_raw());
        state.command_buffers.insert(
            cb,
            CommandBufferRecord {
                role: Some(role),
                ..Default::default()
            },
        );
        state.stats.live_command_buffers += 1;
        Ok(cb)
    }

    fn free_command_buffer(&self, role: QueueRole, command_buffer: vk::CommandBuffer) {
        let mut state = self.state.lock().unwrap();
        match state.command_buffers.remove(&command_buffer) {
            Some(record) => {
                if record.outstanding > 0 {
                    state.violation(format!(
                        "command buffer {command_buffer:?} freed with work outstanding"
                    ));
                }
                if record.role != Some(role) {
                    state.violation(format!(
                        "command buffer {command_buffer:?} freed to the {role:?} pool"
                    ));
                }
                state.stats.live_command_buffers -= 1;
            }
            None => state.violation(format!("command buffer {command_buffer:?} freed twice")),
        }
    }

    fn record_compute(
        &self,
        command_buffer: vk::CommandBuffer,
        pass: &ComputePass,
    ) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        let outstanding = state.record_start(command_buffer, SubmittedWork::Compute);
        let bindings = state
            .descriptor_sets
            .get(&pass.descriptor_set)
            .cloned()
            .unwrap_or_default();
        state.compute_records.push(ComputeRecord {
            command_buffer,
            pass: *pass,
            bindings,
            outstanding,
        });
        Ok(())
    }

    fn record_draw(&self, command_buffer: vk::CommandBuffer, pass: &DrawPass) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        let outstanding = state.record_start(command_buffer, SubmittedWork::Draw);
        let bindings = state
            .descriptor_sets
            .get(&pass.descriptor_set)
            .cloned()
            .unwrap_or_default();
        state.draw_records.push(DrawRecord {
            command_buffer,
            pass: *pass,
            bindings,
            outstanding,
        });
        Ok(())
    }

    fn submit(&self, role: QueueRole, submission: &Submission<'_>) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        let by = format!("{role:?} submission");

        for wait in submission.waits {
            state.consume(wait.semaphore, &by);
        }
        for &signal in submission.signals {
            state.signal(signal, &by);
        }

        if let Some(fence) = submission.fence {
            match state.fences.get(&fence).copied() {
                Some(FenceState::Unsignaled) => {
                    state.fences.insert(fence, FenceState::Pending);
                }
                Some(other) => {
                    state.violation(format!("{by} uses fence {fence:?} in state {other:?}"));
                    state.fences.insert(fence, FenceState::Pending);
                }
                None => return Err(RhiError::InvalidHandle(format!("unknown fence {fence:?}"))),
            }
        }

        let work = match submission.command_buffer {
            Some(cb) => match state.command_buffers.get_mut(&cb) {
                Some(record) => {
                    record.outstanding += 1;
                    record.last.unwrap_or(SubmittedWork::Empty)
                }
                None => {
                    return Err(RhiError::InvalidHandle(format!("unknown command buffer {cb:?}")));
                }
            },
            None => SubmittedWork::Empty,
        };

        state.pending.push(PendingSubmission {
            command_buffer: submission.command_buffer,
            fence: submission.fence,
        });
        state.submissions.push(SubmissionRecord {
            role,
            command_buffer: submission.command_buffer,
            work,
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
            fence: submission.fence,
        });
        state.stats.submissions += 1;
        Ok(())
    }

    // ---- descriptors ------------------------------------------------------

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let mut state = self.state.lock().unwrap();
        let pool = vk::DescriptorPool::from_raw(state.next_raw());
        state.descriptor_pools.insert(pool, Vec::new());
        state.stats.live_descriptor_pools += 1;
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let mut state = self.state.lock().unwrap();
        let set = vk::DescriptorSet::from_raw(state.next_raw());
        state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown descriptor pool {pool:?}")))?
            .push(set);
        state.descriptor_sets.insert(set, Vec::new());
        Ok(set)
    }

    fn write_descriptor_set(&self, set: vk::DescriptorSet, bindings: &[BufferBinding]) {
        let mut state = self.state.lock().unwrap();
        let Some(current) = state.descriptor_sets.get_mut(&set) else {
            state.violation(format!("write to unknown descriptor set {set:?}"));
            return;
        };
        for binding in bindings {
            current.retain(|b| b.binding != binding.binding);
            current.push(*binding);
        }
        current.sort_by_key(|b| b.binding);
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock().unwrap();
        match state.descriptor_pools.remove(&pool) {
            Some(sets) => {
                for set in sets {
                    state.descriptor_sets.remove(&set);
                }
                state.stats.live_descriptor_pools -= 1;
            }
            None => state.violation(format!("descriptor pool {pool:?} destroyed twice")),
        }
    }

    // ---- swap surface -----------------------------------------------------

    fn create_swap_targets(
        &self,
        _render_pass: vk::RenderPass,
        drawable: vk::Extent2D,
    ) -> RhiResult<MockSwapTargets> {
        if drawable.width == 0 || drawable.height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "zero-sized drawable {}x{}",
                drawable.width, drawable.height
            )));
        }

        let mut state = self.state.lock().unwrap();
        let id = state.next_raw();
        let framebuffers = (0..MOCK_IMAGE_COUNT)
            .map(|_| vk::Framebuffer::from_raw(state.next_raw()))
            .collect();
        state.live_targets.push(id);
        state.next_image = 0;
        state.stats.swap_targets_created += 1;
        state.stats.swap_targets_live += 1;

        Ok(MockSwapTargets {
            id,
            extent: drawable,
            framebuffers,
        })
    }

    fn destroy_swap_targets(&self, targets: MockSwapTargets) {
        let mut state = self.state.lock().unwrap();
        if !state.pending.is_empty() {
            let pending = state.pending.len();
            state.violation(format!(
                "swap targets {} destroyed with {pending} submission(s) pending",
                targets.id
            ));
        }
        state.live_targets.retain(|&id| id != targets.id);
        state.stats.swap_targets_live -= 1;
    }

    fn acquire_next_image(
        &self,
        targets: &MockSwapTargets,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.live_targets.contains(&targets.id) {
            state.violation(format!("acquire from destroyed swap targets {}", targets.id));
        }
        if state.hung {
            return Err(RhiError::Timeout {
                what: "swap image",
                timeout,
            });
        }

        let outcome = state.acquire_script.pop_front().unwrap_or_else(|| {
            let image_index = state.next_image;
            state.next_image = (state.next_image + 1) % MOCK_IMAGE_COUNT;
            AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            }
        });
        if matches!(outcome, AcquireOutcome::Acquired { .. }) {
            state.signal(signal, "acquire");
        }
        Ok(outcome)
    }

    fn present(
        &self,
        targets: &MockSwapTargets,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.live_targets.contains(&targets.id) {
            state.violation(format!("present to destroyed swap targets {}", targets.id));
        }
        state.consume(wait, "present");

        let outcome = state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        state.presented_images.push(image_index);
        state.stats.presents += 1;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_wait_retires_earlier_submissions() {
        let gpu = MockGpu::new();
        let first = gpu.create_fence(false).unwrap();
        let second = gpu.create_fence(false).unwrap();
        let cb = gpu.allocate_command_buffer(QueueRole::Compute).unwrap();

        for fence in [first, second] {
            gpu.submit(
                QueueRole::Compute,
                &Submission {
                    command_buffer: Some(cb),
                    waits: &[],
                    signals: &[],
                    fence: Some(fence),
                },
            )
            .unwrap();
        }
        assert_eq!(gpu.pending_submissions(), 2);

        gpu.wait_for_fence(second, Duration::MAX).unwrap();
        assert_eq!(gpu.pending_submissions(), 0);
        gpu.wait_for_fence(first, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_double_signal_is_a_violation() {
        let gpu = MockGpu::new();
        let semaphore = gpu.create_semaphore().unwrap();
        let batch = Submission {
            command_buffer: None,
            waits: &[],
            signals: &[semaphore],
            fence: None,
        };

        gpu.submit(QueueRole::Graphics, &batch).unwrap();
        assert!(gpu.violations().is_empty());
        gpu.submit(QueueRole::Graphics, &batch).unwrap();
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn test_rerecord_with_outstanding_work_is_a_violation() {
        let gpu = MockGpu::new();
        let cb = gpu.allocate_command_buffer(QueueRole::Compute).unwrap();
        let pass = ComputePass {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            group_count: [1, 1, 1],
        };

        gpu.record_compute(cb, &pass).unwrap();
        gpu.submit(
            QueueRole::Compute,
            &Submission {
                command_buffer: Some(cb),
                waits: &[],
                signals: &[],
                fence: None,
            },
        )
        .unwrap();
        gpu.record_compute(cb, &pass).unwrap();

        assert_eq!(gpu.compute_records()[1].outstanding, 1);
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn test_hung_device_times_out_pending_fence() {
        let gpu = MockGpu::new();
        let fence = gpu.create_fence(false).unwrap();
        gpu.submit(
            QueueRole::Graphics,
            &Submission {
                command_buffer: None,
                waits: &[],
                signals: &[],
                fence: Some(fence),
            },
        )
        .unwrap();

        gpu.set_hung(true);
        let err = gpu.wait_for_fence(fence, Duration::from_millis(1)).unwrap_err();
        assert!(err.is_timeout());

        gpu.set_hung(false);
        gpu.wait_for_fence(fence, Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn test_hung_device_reports_the_requested_idle_and_copy_timeouts() {
        let gpu = MockGpu::new();
        gpu.submit(
            QueueRole::Compute,
            &Submission {
                command_buffer: None,
                waits: &[],
                signals: &[],
                fence: None,
            },
        )
        .unwrap();
        gpu.set_hung(true);

        let limit = Duration::from_millis(100);
        match gpu.wait_idle(limit).unwrap_err() {
            RhiError::Timeout { what, timeout } => {
                assert_eq!(what, "device idle");
                assert_eq!(timeout, limit);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let src = gpu.create_buffer(16, vk::BufferUsageFlags::TRANSFER_SRC).unwrap();
        let dst = gpu.create_buffer(16, vk::BufferUsageFlags::TRANSFER_DST).unwrap();
        match gpu.copy_buffer(QueueRole::Graphics, src, dst, 16, limit).unwrap_err() {
            RhiError::Timeout { what, timeout } => {
                assert_eq!(what, "transfer");
                assert_eq!(timeout, limit);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(gpu.stats().copies, 0);

        gpu.set_hung(false);
        gpu.wait_idle(limit).unwrap();
        assert_eq!(gpu.pending_submissions(), 0);
    }
}
