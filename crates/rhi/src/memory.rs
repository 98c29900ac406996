//! Device memory allocation and transfer.
//!
//! [`MemoryAllocator`] resolves a memory type for a `(type filter, property
//! flags)` pair, allocates from it, maps host-visible memory and performs the
//! synchronous device-side copies used by staged uploads.
//!
//! Copies go through a one-shot command buffer that is submitted and waited on
//! before returning. This path is meant for resource creation, not for
//! per-frame traffic.

use std::ptr::NonNull;
use std::time::Duration;

use ash::vk;
use tracing::{debug, trace};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{Gpu, QueueRole};

/// Property flags for memory the CPU writes and the GPU reads without flushes.
pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Property flags for GPU-only memory.
pub const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

/// Finds the first memory type allowed by `type_bits` whose properties contain `flags`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    properties
        .memory_types
        .iter()
        .take(properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
}

/// Allocates, maps and copies device memory through a [`Gpu`].
pub struct MemoryAllocator<'a, G: Gpu> {
    gpu: &'a G,
}

impl<'a, G: Gpu> MemoryAllocator<'a, G> {
    pub fn new(gpu: &'a G) -> Self {
        Self { gpu }
    }

    /// Allocates `size` bytes from a memory type matching `type_bits` and `flags`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableMemoryType`] when no memory type satisfies
    /// both constraints, or the device error when the allocation itself fails.
    pub fn allocate(
        &self,
        size: vk::DeviceSize,
        flags: vk::MemoryPropertyFlags,
        type_bits: u32,
    ) -> RhiResult<vk::DeviceMemory> {
        let memory_type = find_memory_type(self.gpu.memory_properties(), type_bits, flags)
            .ok_or(RhiError::NoSuitableMemoryType { type_bits, flags })?;

        let memory = self.gpu.allocate_memory(size, memory_type)?;
        trace!("Allocated {} bytes from memory type {} ({:?})", size, memory_type, flags);
        Ok(memory)
    }

    /// Maps host-visible memory for the lifetime of the allocation.
    pub fn map(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> RhiResult<NonNull<u8>> {
        self.gpu.map_memory(memory, size)
    }

    pub fn unmap(&self, memory: vk::DeviceMemory) {
        self.gpu.unmap_memory(memory);
    }

    /// Copies `size` bytes from `src` to `dst` on `queue` and waits up to
    /// `timeout` for completion.
    pub fn copy_buffer(
        &self,
        queue: QueueRole,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
        timeout: Duration,
    ) -> RhiResult<()> {
        if size == 0 {
            return Err(RhiError::InvalidHandle("Copy size must be greater than 0".to_string()));
        }

        self.gpu.copy_buffer(queue, src, dst, size, timeout)?;
        debug!("Copied {} bytes on {:?} queue", size, queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpu;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        properties
    }

    #[test]
    fn finds_first_matching_type() {
        let props = properties(&[DEVICE_LOCAL, HOST_COHERENT, DEVICE_LOCAL | HOST_COHERENT]);

        assert_eq!(find_memory_type(&props, 0b111, DEVICE_LOCAL), Some(0));
        assert_eq!(find_memory_type(&props, 0b111, HOST_COHERENT), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, HOST_COHERENT), Some(2));
    }

    #[test]
    fn respects_type_filter() {
        let props = properties(&[DEVICE_LOCAL, HOST_COHERENT]);

        assert_eq!(find_memory_type(&props, 0b01, HOST_COHERENT), None);
        assert_eq!(find_memory_type(&props, 0b10, DEVICE_LOCAL), None);
    }

    #[test]
    fn ignores_types_past_count() {
        let mut props = properties(&[DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST_COHERENT;

        assert_eq!(find_memory_type(&props, u32::MAX, HOST_COHERENT), None);
    }

    #[test]
    fn allocate_reports_unsatisfiable_request() {
        let gpu = MockGpu::new();
        let allocator = MemoryAllocator::new(&gpu);

        // The mock exposes DEVICE_LOCAL at index 0 and HOST_COHERENT at index 1.
        let err = allocator.allocate(64, HOST_COHERENT, 0b01).unwrap_err();
        assert!(matches!(err, RhiError::NoSuitableMemoryType { type_bits: 0b01, .. }));
        assert_eq!(gpu.stats().allocations, 0);

        let memory = allocator.allocate(64, HOST_COHERENT, 0b11).unwrap();
        assert_eq!(gpu.stats().live_allocations, 1);
        gpu.free_memory(memory);
        assert_eq!(gpu.stats().live_allocations, 0);
    }

    #[test]
    fn zero_sized_copy_is_rejected() {
        let gpu = MockGpu::new();
        let allocator = MemoryAllocator::new(&gpu);
        let err = allocator
            .copy_buffer(
                QueueRole::Graphics,
                vk::Buffer::null(),
                vk::Buffer::null(),
                0,
                Duration::MAX,
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidHandle(_)));
    }
}
