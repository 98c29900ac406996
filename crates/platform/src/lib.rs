//! Platform layer for the field-control renderer.
//!
//! This crate provides:
//! - Window management via winit
//! - Resize delivery to engine observers
//! - Vulkan surface creation and the instance extensions it needs

mod surface;
mod window;

pub use surface::Surface;
pub use window::{Window, WindowSurface, present_mode};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
