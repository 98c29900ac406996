//! Core utilities shared by the field-control crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Engine configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{EngineConfig, PARTICLE_WORKGROUP_SIZE, PresentModePreference, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameRateCounter, Timer};
