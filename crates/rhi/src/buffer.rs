//! GPU buffer management.
//!
//! [`StagedBuffer`] owns a buffer and its backing memory and is created in one
//! of two ways:
//!
//! - [`StagedBuffer::host_resident`] allocates host-visible, coherent memory and
//!   keeps it mapped for the lifetime of the buffer. CPU writes are visible to
//!   the GPU without an explicit flush.
//! - [`StagedBuffer::device_resident`] uploads initial data through a
//!   temporary staging buffer, copies it into device-local memory and releases
//!   the staging buffer before returning.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use field_rhi::buffer::{BufferUsage, StagedBuffer};
//! use field_rhi::gpu::{Gpu, QueueRole};
//!
//! # fn example<G: Gpu>(gpu: Arc<G>) -> Result<(), field_rhi::RhiError> {
//! let indices: [u32; 3] = [0, 1, 2];
//! let index_buffer = StagedBuffer::device_resident(
//!     gpu,
//!     bytemuck::cast_slice(&indices),
//!     BufferUsage::Index,
//!     QueueRole::Graphics,
//!     Duration::from_secs(1),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::gpu::{Gpu, QueueRole};
use crate::memory::{DEVICE_LOCAL, HOST_COHERENT, MemoryAllocator};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which selects its Vulkan usage
/// flags. Residency is chosen by the constructor, not the usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores mesh vertices
    Vertex,
    /// Index buffer - stores 32-bit mesh indices
    Index,
    /// Uniform buffer - per-frame shader inputs
    Uniform,
    /// Particle storage - written by compute, read as vertex input
    Storage,
    /// Staging buffer - CPU-writable source for uploads
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex buffer",
            BufferUsage::Index => "index buffer",
            BufferUsage::Uniform => "uniform buffer",
            BufferUsage::Storage => "particle storage buffer",
            BufferUsage::Staging => "staging buffer",
        }
    }
}

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Host-visible, coherent and persistently mapped.
    Host,
    /// Device-local, filled once through a staging copy.
    Device,
}

/// A buffer plus its dedicated memory allocation.
///
/// Handles are released in `Drop`: unmap, destroy the buffer, free the memory.
/// A partially constructed buffer releases only what it acquired.
pub struct StagedBuffer<G: Gpu> {
    gpu: Arc<G>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: BufferUsage,
    residency: Residency,
    mapped: Option<NonNull<u8>>,
}

impl<G: Gpu> StagedBuffer<G> {
    /// Creates a persistently mapped, host-coherent buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a zero size and
    /// [`RhiError::ResourceCreation`] when allocation or mapping fails.
    pub fn host_resident(
        gpu: Arc<G>,
        size: vk::DeviceSize,
        usage: BufferUsage,
    ) -> RhiResult<Self> {
        check_size(size)?;
        Self::create_host(gpu, size, usage).map_err(|e| RhiError::creation(usage.name(), e))
    }

    /// Creates a device-local buffer holding `data`.
    ///
    /// The data is written into a temporary staging buffer, copied on
    /// `upload_queue` and the call blocks until the copy is complete or
    /// `timeout` has passed. The staging buffer is released on every path,
    /// including a failed copy.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for empty data and
    /// [`RhiError::ResourceCreation`] when any allocation or the copy fails.
    pub fn device_resident(
        gpu: Arc<G>,
        data: &[u8],
        usage: BufferUsage,
        upload_queue: QueueRole,
        timeout: Duration,
    ) -> RhiResult<Self> {
        let size = data.len() as vk::DeviceSize;
        check_size(size)?;
        Self::upload(gpu, data, usage, upload_queue, timeout)
            .map_err(|e| RhiError::creation(usage.name(), e))
    }

    fn create_host(gpu: Arc<G>, size: vk::DeviceSize, usage: BufferUsage) -> RhiResult<Self> {
        let mut buffer = Self::allocate(gpu, size, usage, usage.to_vk_usage(), Residency::Host)?;
        let mapped = MemoryAllocator::new(buffer.gpu.as_ref()).map(buffer.memory, size)?;
        buffer.mapped = Some(mapped);
        debug!("Created host-resident {}: {} bytes", usage.name(), size);
        Ok(buffer)
    }

    fn upload(
        gpu: Arc<G>,
        data: &[u8],
        usage: BufferUsage,
        upload_queue: QueueRole,
        timeout: Duration,
    ) -> RhiResult<Self> {
        let size = data.len() as vk::DeviceSize;

        let staging = Self::create_host(Arc::clone(&gpu), size, BufferUsage::Staging)?;
        staging.write(0, data)?;

        let flags = usage.to_vk_usage() | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = Self::allocate(gpu, size, usage, flags, Residency::Device)?;

        MemoryAllocator::new(buffer.gpu.as_ref()).copy_buffer(
            upload_queue,
            staging.buffer,
            buffer.buffer,
            size,
            timeout,
        )?;

        debug!("Uploaded device-resident {}: {} bytes", usage.name(), size);
        Ok(buffer)
    }

    fn allocate(
        gpu: Arc<G>,
        size: vk::DeviceSize,
        usage: BufferUsage,
        usage_flags: vk::BufferUsageFlags,
        residency: Residency,
    ) -> RhiResult<Self> {
        let handle = gpu.create_buffer(size, usage_flags)?;

        // Own the handle first so an allocation failure still destroys it.
        let mut buffer = Self {
            gpu,
            buffer: handle,
            memory: vk::DeviceMemory::null(),
            size,
            usage,
            residency,
            mapped: None,
        };

        let requirements = buffer.gpu.buffer_memory_requirements(handle);
        let flags = match residency {
            Residency::Host => HOST_COHERENT,
            Residency::Device => DEVICE_LOCAL,
        };
        buffer.memory = MemoryAllocator::new(buffer.gpu.as_ref()).allocate(
            requirements.size,
            flags,
            requirements.memory_type_bits,
        )?;
        buffer.gpu.bind_buffer_memory(handle, buffer.memory)?;

        Ok(buffer)
    }

    /// Writes `data` at `offset` through the persistent mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not host-resident or the write would
    /// exceed the buffer size.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let dst = self.mapped_range(offset, data.len())?;

        // SAFETY: `mapped_range` checked the range lies inside the mapping,
        // which stays valid until drop.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len());
        }
        Ok(())
    }

    /// Writes a plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, value: &T) -> RhiResult<()> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    /// Reads `len` bytes at `offset` back through the mapping.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let src = self.mapped_range(offset, len)?;
        let mut out = vec![0u8; len];

        // SAFETY: see `write`.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    fn mapped_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<NonNull<u8>> {
        let mapped = self.mapped.ok_or_else(|| {
            RhiError::InvalidHandle(format!("{} memory is not mapped", self.usage.name()))
        })?;

        let end = offset.checked_add(len as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset, len, self.size
            )));
        }

        // SAFETY: offset + len <= size, so the result stays inside the mapping.
        Ok(unsafe { mapped.add(offset as usize) })
    }

    /// Returns the persistent mapping, `None` for device-resident buffers.
    #[inline]
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn residency(&self) -> Residency {
        self.residency
    }
}

impl<G: Gpu> Drop for StagedBuffer<G> {
    fn drop(&mut self) {
        if self.mapped.take().is_some() {
            self.gpu.unmap_memory(self.memory);
        }

        self.gpu.destroy_buffer(self.buffer);

        if self.memory != vk::DeviceMemory::null() {
            self.gpu.free_memory(self.memory);
        }

        debug!("Destroyed {}", self.usage.name());
    }
}

fn check_size(size: vk::DeviceSize) -> RhiResult<()> {
    if size == 0 {
        return Err(RhiError::InvalidHandle(
            "Buffer size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpu;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Storage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::STORAGE_BUFFER)
        );
        assert!(
            BufferUsage::Storage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_host_resident_write_is_visible() {
        let gpu = Arc::new(MockGpu::new());
        let buffer = StagedBuffer::host_resident(gpu.clone(), 64, BufferUsage::Uniform).unwrap();

        buffer.write_pod(16, &0xdead_beef_u32).unwrap();

        assert_eq!(buffer.read(16, 4).unwrap(), 0xdead_beef_u32.to_ne_bytes());
        assert_eq!(
            gpu.memory_contents(buffer.handle()).unwrap()[16..20],
            0xdead_beef_u32.to_ne_bytes()
        );
        assert_eq!(buffer.residency(), Residency::Host);
    }

    #[test]
    fn test_out_of_bounds_write_is_rejected() {
        let gpu = Arc::new(MockGpu::new());
        let buffer = StagedBuffer::host_resident(gpu, 8, BufferUsage::Uniform).unwrap();

        assert!(matches!(buffer.write(4, &[0; 8]), Err(RhiError::InvalidHandle(_))));
        assert!(matches!(buffer.read(u64::MAX, 2), Err(RhiError::InvalidHandle(_))));
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let gpu = Arc::new(MockGpu::new());

        let host = StagedBuffer::host_resident(gpu.clone(), 0, BufferUsage::Uniform);
        assert!(matches!(host, Err(RhiError::InvalidHandle(_))));

        let device = StagedBuffer::device_resident(
            gpu.clone(),
            &[],
            BufferUsage::Vertex,
            QueueRole::Graphics,
            Duration::MAX,
        );
        assert!(matches!(device, Err(RhiError::InvalidHandle(_))));
        assert_eq!(gpu.stats().allocations, 0);
    }

    #[test]
    fn test_device_resident_upload_copies_and_releases_staging() {
        let gpu = Arc::new(MockGpu::new());
        let data: Vec<u8> = (0..32).collect();

        let buffer = StagedBuffer::device_resident(
            gpu.clone(),
            &data,
            BufferUsage::Vertex,
            QueueRole::Graphics,
            Duration::MAX,
        )
        .unwrap();

        assert!(buffer.mapped_ptr().is_none());
        assert_eq!(gpu.memory_contents(buffer.handle()).unwrap(), data);

        let stats = gpu.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.live_allocations, 1);
        assert_eq!(stats.copies, 1);

        drop(buffer);
        assert_eq!(gpu.stats().live_allocations, 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_staging_released_once_when_copy_fails() {
        let gpu = Arc::new(MockGpu::new());
        gpu.fail_next_copies(1);

        let result = StagedBuffer::device_resident(
            gpu.clone(),
            &[1, 2, 3, 4],
            BufferUsage::Index,
            QueueRole::Graphics,
            Duration::MAX,
        );

        assert!(matches!(
            result,
            Err(RhiError::ResourceCreation { what: "index buffer", .. })
        ));
        let stats = gpu.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 2);
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.live_buffers, 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_upload_on_hung_device_times_out_with_requested_limit() {
        let gpu = Arc::new(MockGpu::new());
        gpu.set_hung(true);

        let limit = Duration::from_millis(5);
        let result = StagedBuffer::device_resident(
            gpu.clone(),
            &[1, 2, 3, 4],
            BufferUsage::Vertex,
            QueueRole::Graphics,
            limit,
        );

        match result {
            Err(RhiError::ResourceCreation { what, source }) => {
                assert_eq!(what, "vertex buffer");
                assert!(matches!(*source, RhiError::Timeout { timeout, .. } if timeout == limit));
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.size())),
        }
        assert_eq!(gpu.stats().live_allocations, 0);
    }

    #[test]
    fn test_failed_allocation_destroys_buffer_handle() {
        let gpu = Arc::new(MockGpu::new());
        gpu.fail_next_allocations(1);

        let result = StagedBuffer::host_resident(gpu.clone(), 16, BufferUsage::Uniform);

        assert!(matches!(result, Err(RhiError::ResourceCreation { .. })));
        let stats = gpu.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_allocations, 0);
    }
}
