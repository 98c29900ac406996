//! Descriptor set management for shader resource binding.
//!
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorBindingBuilder`] builds the individual layout bindings
//! - [`graphics_bindings`] / [`compute_bindings`] describe the two layouts the
//!   renderer uses
//! - [`DescriptorPool`] owns a pool allocated through any [`Gpu`] backend
//! - Pool creation and buffer writes used by the Vulkan backend
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use field_rhi::device::Device;
//! use field_rhi::descriptor::{DescriptorSetLayout, compute_bindings};
//!
//! # fn example(device: Arc<Device>) -> Result<(), field_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(device, &compute_bindings())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;
use crate::gpu::{BufferBinding, Gpu};

/// Binding of the camera block in the graphics layout.
pub const CAMERA_BINDING: u32 = 0;
/// Binding of the model block in the graphics layout.
pub const MODEL_BINDING: u32 = 1;
/// Binding of the per-frame simulation block in the compute layout.
pub const COMPUTE_UNIFORM_BINDING: u32 = 0;
/// Particle state written by the previous slot (read-only in the shader).
pub const PARTICLES_IN_BINDING: u32 = 1;
/// Particle state written by this slot.
pub const PARTICLES_OUT_BINDING: u32 = 2;

/// Descriptor set layout wrapper.
///
/// The layout is immutable after creation and can be shared between threads
/// when wrapped in `Arc`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool owned through a [`Gpu`] backend.
///
/// Sets allocated from the pool live as long as the pool; dropping it
/// destroys the pool and every set in it.
pub struct DescriptorPool<G: Gpu> {
    gpu: Arc<G>,
    pool: vk::DescriptorPool,
}

impl<G: Gpu> DescriptorPool<G> {
    pub fn new(
        gpu: Arc<G>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let pool = gpu.create_descriptor_pool(max_sets, pool_sizes)?;
        Ok(Self { gpu, pool })
    }

    /// Allocates one set and points its bindings at `bindings`.
    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        bindings: &[BufferBinding],
    ) -> RhiResult<vk::DescriptorSet> {
        let set = self.gpu.allocate_descriptor_set(self.pool, layout)?;
        self.gpu.write_descriptor_set(set, bindings);
        Ok(set)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl<G: Gpu> Drop for DescriptorPool<G> {
    fn drop(&mut self) {
        self.gpu.destroy_descriptor_pool(self.pool);
    }
}

/// Bindings of the graphics layout: camera block for the vertex stage, model
/// block for the vertex stage.
pub fn graphics_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        DescriptorBindingBuilder::uniform_buffer(CAMERA_BINDING, vk::ShaderStageFlags::VERTEX),
        DescriptorBindingBuilder::uniform_buffer(MODEL_BINDING, vk::ShaderStageFlags::VERTEX),
    ]
}

/// Bindings of the compute layout: simulation block, previous and current particle state.
pub fn compute_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    [
        DescriptorBindingBuilder::uniform_buffer(
            COMPUTE_UNIFORM_BINDING,
            vk::ShaderStageFlags::COMPUTE,
        ),
        DescriptorBindingBuilder::storage_buffer(
            PARTICLES_IN_BINDING,
            vk::ShaderStageFlags::COMPUTE,
        ),
        DescriptorBindingBuilder::storage_buffer(
            PARTICLES_OUT_BINDING,
            vk::ShaderStageFlags::COMPUTE,
        ),
    ]
}

/// Creates a descriptor pool. Sets are not individually freed; destroying the
/// pool releases them.
pub fn create_pool(
    device: &Device,
    max_sets: u32,
    pool_sizes: &[vk::DescriptorPoolSize],
) -> RhiResult<vk::DescriptorPool> {
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(pool_sizes);

    let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
    debug!(
        "Created descriptor pool (max sets: {}, {} pool size(s))",
        max_sets,
        pool_sizes.len()
    );
    Ok(pool)
}

/// Allocates one set with `layout` from `pool`.
pub fn allocate_set(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> RhiResult<vk::DescriptorSet> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = unsafe { device.handle().allocate_descriptor_sets(&alloc_info)? };
    Ok(sets[0])
}

/// Points each binding of `set` at its buffer range.
pub fn write_buffer_bindings(device: &Device, set: vk::DescriptorSet, bindings: &[BufferBinding]) {
    if bindings.is_empty() {
        return;
    }

    let infos: Vec<[vk::DescriptorBufferInfo; 1]> = bindings
        .iter()
        .map(|b| [buffer_info(b.buffer, b.offset, b.range)])
        .collect();

    let writes: Vec<vk::WriteDescriptorSet> = bindings
        .iter()
        .zip(&infos)
        .map(|(binding, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(binding.binding)
                .dst_array_element(0)
                .descriptor_type(binding.descriptor_type)
                .buffer_info(info)
        })
        .collect();

    unsafe {
        device.handle().update_descriptor_sets(&writes, &[]);
    }
}

/// Creates a buffer info for descriptor set updates.
#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

/// Builder for descriptor set layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn storage_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_compute_layout_bindings() {
        let bindings = compute_bindings();
        let types: Vec<_> = bindings.iter().map(|b| b.descriptor_type).collect();
        assert_eq!(
            types,
            [
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
            ]
        );
        assert!(
            bindings
                .iter()
                .all(|b| b.stage_flags == vk::ShaderStageFlags::COMPUTE)
        );
        assert_eq!(bindings[2].binding, PARTICLES_OUT_BINDING);
    }

    #[test]
    fn test_graphics_layout_bindings() {
        let bindings = graphics_bindings();
        assert_eq!(bindings[0].binding, CAMERA_BINDING);
        assert_eq!(bindings[1].binding, MODEL_BINDING);
        assert!(
            bindings
                .iter()
                .all(|b| b.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER)
        );
    }

    #[test]
    fn test_pool_allocates_and_writes_through_gpu() {
        use crate::mock::MockGpu;

        let gpu = Arc::new(MockGpu::new());
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        }];
        let pool = DescriptorPool::new(gpu.clone(), 1, &sizes).unwrap();
        let binding = BufferBinding::uniform(CAMERA_BINDING, vk::Buffer::null(), 0, 128);
        let set = pool.allocate(vk::DescriptorSetLayout::null(), &[binding]).unwrap();

        assert_eq!(gpu.descriptor_bindings(set), vec![binding]);
        assert_eq!(gpu.stats().live_descriptor_pools, 1);
        drop(pool);
        assert_eq!(gpu.stats().live_descriptor_pools, 0);
    }

    #[test]
    fn test_buffer_info_helper() {
        let info = buffer_info(vk::Buffer::null(), 64, 128);
        assert_eq!(info.buffer, vk::Buffer::null());
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, 128);
    }
}
