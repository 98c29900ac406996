//! Swapchain and swap-target management.
//!
//! [`VulkanSwapTargets`] is one complete set of presentation resources: the
//! swapchain, a view per swap image, the shared multisampled colour and depth
//! attachments and a framebuffer per swap image. A set is built in one go and
//! torn down in one go; recreation means dropping the old set and building a
//! new one for the current drawable size.
//!
//! Out-of-date and suboptimal results are reported as
//! [`AcquireOutcome::Stale`] / [`PresentOutcome::Stale`] rather than errors.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult, timeout_nanos};
use crate::gpu::{AcquireOutcome, PresentOutcome, QueueRole, SwapTargetSet};
use crate::image::AttachmentImage;

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The window surface plus the presentation settings applied to every swapchain.
///
/// The surface itself is owned by the window layer and must outlive every
/// target set built from it.
#[derive(Clone)]
pub struct PresentationSurface {
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    /// Used when the surface supports it; otherwise MAILBOX, then FIFO.
    pub forced_present_mode: Option<vk::PresentModeKHR>,
}

/// Swapchain plus the attachments and framebuffers rendered into it.
///
/// Destruction order: framebuffers, swap image views, swapchain, then the
/// attachment images (dropped as fields).
pub struct VulkanSwapTargets {
    device: Arc<Device>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    color: AttachmentImage,
    depth: AttachmentImage,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    present_mode: vk::PresentModeKHR,
}

impl VulkanSwapTargets {
    /// Builds a target set sized for a drawable of `drawable` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] for a zero-sized drawable or an
    /// inadequate surface, and the underlying error for any failed creation.
    /// Everything created before the failure is released.
    pub fn new(
        device: Arc<Device>,
        presentation: &PresentationSurface,
        render_pass: vk::RenderPass,
        drawable: vk::Extent2D,
    ) -> RhiResult<Self> {
        if drawable.width == 0 || drawable.height == 0 {
            return Err(RhiError::SwapchainError(
                "Drawable size must be non-zero".to_string(),
            ));
        }

        let physical = device.physical_device();
        let support = SwapchainSupportDetails::query(
            physical.device,
            presentation.surface,
            &presentation.surface_loader,
        )?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode =
            choose_present_mode(&support.present_modes, presentation.forced_present_mode);
        let extent = choose_extent(&support.capabilities, drawable.width, drawable.height);
        let image_count = determine_image_count(&support.capabilities);
        let samples = physical.msaa_samples;

        let color = AttachmentImage::color(device.clone(), extent, surface_format.format, samples)?;
        let depth = AttachmentImage::depth(device.clone(), extent, physical.depth_format, samples)?;

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let queue_families = device.queue_families();
        let (Some(graphics_family), Some(present_family)) = (
            queue_families.graphics_compute_family,
            queue_families.present_family,
        ) else {
            return Err(RhiError::SwapchainError(
                "Queue families are incomplete".to_string(),
            ));
        };
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(presentation.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe {
            device
                .swapchain_loader()
                .create_swapchain(&create_info, None)?
        };

        // From here on `Drop` releases whatever has been created.
        let mut targets = Self {
            device,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            color,
            depth,
            extent,
            samples,
            present_mode,
        };

        targets.images = unsafe {
            targets
                .device
                .swapchain_loader()
                .get_swapchain_images(swapchain)?
        };

        for (i, &image) in targets.images.iter().enumerate() {
            let view = create_image_view(&targets.device, image, surface_format.format)
                .map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create image view {}: {}", i, e))
                })?;
            targets.image_views.push(view);
        }

        for &view in &targets.image_views {
            let attachments = [targets.color.image_view(), targets.depth.image_view(), view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                targets
                    .device
                    .handle()
                    .create_framebuffer(&framebuffer_info, None)?
            };
            targets.framebuffers.push(framebuffer);
        }

        info!(
            "Swap targets ready: {} images, {} framebuffers",
            targets.images.len(),
            targets.framebuffers.len()
        );

        Ok(targets)
    }

    /// Acquires the next swap image, signalling `semaphore` when it is ready.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.swapchain,
                timeout_nanos(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::Timeout {
                what: "swap image",
                timeout,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation once `wait` is signalled.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(self.device.queue(QueueRole::Present), &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl SwapTargetSet for VulkanSwapTargets {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn color_format(&self) -> vk::Format {
        self.color.format()
    }

    fn depth_format(&self) -> vk::Format {
        self.depth.format()
    }

    fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }
}

impl Drop for VulkanSwapTargets {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.handle().destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swap targets destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Chooses the surface format.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR color space, else the first available.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return format;
    }

    let first = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format: {:?}", first.format);
    first
}

/// Chooses the present mode.
///
/// A forced mode wins when the surface supports it. Without one, or when it is
/// unsupported, the search prefers MAILBOX and falls back to FIFO, which every
/// surface supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    forced: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    match forced {
        Some(mode) if present_modes.contains(&mode) => {
            debug!("Using forced present mode {:?}", mode);
            return mode;
        }
        Some(mode) => warn!("Forced present mode {:?} is not supported", mode),
        None => {}
    }

    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// If the surface reports no current extent (width is u32::MAX), the drawable
/// size is clamped to the surface's min/max extents.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more image than the minimum, clamped to the maximum when there is one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, vk::Result> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    unsafe { device.handle().create_image_view(&create_info, None) }
}
