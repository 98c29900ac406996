//! Window management using winit.
//!
//! [`Window`] owns the winit window and fans resize events out to registered
//! [`ResizeObserver`]s. The engine never sees winit directly: it receives a
//! [`WindowSurface`], a cheap handle answering [`SurfaceProvider`] queries.

use std::ffi::c_char;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use field_core::{Error, Result, WindowConfig};
use field_engine::{ResizeObserver, SurfaceProvider};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use crate::surface::Surface;

/// A winit window plus the close flag and resize observers around it.
pub struct Window {
    window: Arc<WinitWindow>,
    closing: Arc<AtomicBool>,
    observers: Vec<Arc<dyn ResizeObserver>>,
}

impl Window {
    /// Create a resizable window from `config`.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", config.width, config.height);

        Ok(Self {
            window: Arc::new(window),
            closing: Arc::new(AtomicBool::new(false)),
            observers: Vec::new(),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// A handle the engine queries for drawable size and close requests.
    pub fn surface_provider(&self) -> WindowSurface {
        WindowSurface {
            window: self.window.clone(),
            closing: self.closing.clone(),
        }
    }

    /// Registers an observer invoked on every resize event.
    pub fn add_resize_observer(&mut self, observer: Arc<dyn ResizeObserver>) {
        self.observers.push(observer);
    }

    /// Forwards a resize event to every observer.
    pub fn handle_resize(&self, width: u32, height: u32) {
        tracing::debug!("Window resized: {}x{}", width, height);
        for observer in &self.observers {
            observer.on_resize(width, height);
        }
    }

    /// Marks the window as closing. [`WindowSurface::should_close`] reports it.
    pub fn request_close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The returned pointers reference static strings owned by the loader.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| {
                Error::Vulkan(format!("Failed to enumerate required extensions: {}", e))
            })?;

        tracing::debug!("{} instance extension(s) required for surfaces", extensions.len());
        Ok(extensions.to_vec())
    }

    /// Create a Vulkan surface for this window.
    ///
    /// The returned [`Surface`] destroys itself when dropped; `instance` must
    /// outlive it.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: Both handles come from a live winit window, and `Surface`
        // destroys the surface before the caller's instance goes away.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let loader = ash::khr::surface::Instance::new(entry, instance);
        tracing::info!("Vulkan surface created");

        Ok(Surface::new(handle, loader))
    }
}

/// Shared view of a [`Window`] handed to the engine.
#[derive(Clone)]
pub struct WindowSurface {
    window: Arc<WinitWindow>,
    closing: Arc<AtomicBool>,
}

impl SurfaceProvider for WindowSurface {
    fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn should_close(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// Maps a configured present mode onto its Vulkan value.
pub fn present_mode(preference: field_core::PresentModePreference) -> vk::PresentModeKHR {
    use field_core::PresentModePreference as Mode;
    match preference {
        Mode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        Mode::Mailbox => vk::PresentModeKHR::MAILBOX,
        Mode::Fifo => vk::PresentModeKHR::FIFO,
        Mode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}
