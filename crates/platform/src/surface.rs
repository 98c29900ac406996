//! RAII wrapper for a window's Vulkan surface.

use ash::vk;
use field_rhi::swapchain::PresentationSurface;

/// Owns a `vk::SurfaceKHR` and destroys it on drop.
///
/// The Vulkan instance must outlive this surface, and every swap target set
/// built from it must be gone before it drops.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    pub(crate) fn new(handle: vk::SurfaceKHR, loader: ash::khr::surface::Instance) -> Self {
        Self { handle, loader }
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader used to query capabilities, formats and present modes.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    /// Presentation settings for swapchains built on this surface.
    pub fn presentation(
        &self,
        forced_present_mode: Option<vk::PresentModeKHR>,
    ) -> PresentationSurface {
        PresentationSurface {
            surface_loader: self.loader.clone(),
            surface: self.handle,
            forced_present_mode,
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The handle came from ash_window::create_surface on the
        // instance the loader was built from, and is destroyed only here.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}
