//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, physical device and logical device creation
//! - Device memory allocation and staged buffers
//! - Swap targets: swapchain, MSAA attachments and framebuffers
//! - Command buffer recording and descriptor management
//! - Render pass and pipeline creation
//! - Synchronization primitives
//!
//! Frame logic is written against the [`gpu::Gpu`] trait. [`vulkan::VulkanGpu`]
//! implements it on a real device; with the `mock` feature, `mock::MockGpu`
//! implements it in host memory.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod gpu;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;
pub mod vulkan;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{RhiError, RhiResult, timeout_nanos};

// Re-export ash types that users might need
pub use ash::vk;
