//! Vulkan logical device and queue management.
//!
//! This module handles VkDevice creation, queue retrieval, and gpu-allocator initialization.
//!
//! # Overview
//!
//! The [`Device`] struct provides a safe abstraction over the Vulkan logical device,
//! including:
//! - Logical device creation with the swapchain extension and sample-rate shading
//! - Graphics, compute and present queue retrieval
//! - Attachment memory allocation via gpu-allocator
//!
//! Graphics and compute come from the same queue family. When that family has
//! at least two queues, compute work is submitted to the second one; otherwise
//! both roles share queue 0.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::RhiError;
use crate::gpu::QueueRole;
use crate::instance::Instance;
use crate::physical_device::{DEVICE_EXTENSIONS, PhysicalDeviceInfo, QueueFamilyIndices};

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// The [`Device`] is designed to be shared across threads using `Arc`. The internal
/// allocator is protected by a `Mutex` for thread-safe memory allocation.
pub struct Device {
    device: ash::Device,
    physical_device: PhysicalDeviceInfo,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    swapchain_loader: ash::khr::swapchain::Device,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl Device {
    /// Creates a new logical device.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = &physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_compute_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let graphics_queue_count = graphics_queue_count(queue_families);
        let graphics_priorities = [1.0f32, 1.0];
        let present_priorities = [1.0f32];

        let mut queue_create_infos = vec![
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family)
                .queue_priorities(&graphics_priorities[..graphics_queue_count as usize]),
        ];
        if present_family != graphics_family {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(present_family)
                    .queue_priorities(&present_priorities),
            );
        }

        debug!(
            "Creating {} queue(s) on family {} and present on family {}",
            graphics_queue_count, graphics_family, present_family
        );

        let features = vk::PhysicalDeviceFeatures::default().sample_rate_shading(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let compute_queue =
            unsafe { device.get_device_queue(graphics_family, graphics_queue_count - 1) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        if graphics_queue_count > 1 {
            debug!("Compute work uses a dedicated queue");
        } else {
            debug!("Compute work shares the graphics queue");
        }

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.clone(),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            swapchain_loader,
            graphics_queue,
            compute_queue,
            present_queue,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.physical_device.queue_families
    }

    #[inline]
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Returns the queue serving `role`.
    ///
    /// The compute queue is the graphics queue when the family has a single queue.
    #[inline]
    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Compute => self.compute_queue,
            QueueRole::Present => self.present_queue,
        }
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Waits for the device to become idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the queue serving `role`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Every waited semaphore has a pending signal
    /// - The fence (if provided) is unsignaled and not in use
    pub unsafe fn submit(
        &self,
        role: QueueRole,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device
                .queue_submit(self.queue(role), submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device is Send+Sync
// - vk::Queue handles are Copy and queue submission is driven from one thread
// - Allocator is protected by Mutex
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Number of queues requested from the graphics/compute family.
fn graphics_queue_count(families: &QueueFamilyIndices) -> u32 {
    families.graphics_compute_queue_count.clamp(1, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_compute_gets_second_queue_when_available() {
        let mut families = QueueFamilyIndices {
            graphics_compute_family: Some(0),
            present_family: Some(0),
            graphics_compute_queue_count: 16,
        };
        assert_eq!(graphics_queue_count(&families), 2);

        families.graphics_compute_queue_count = 1;
        assert_eq!(graphics_queue_count(&families), 1);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
