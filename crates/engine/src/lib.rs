//! Frame orchestration for the compute particle renderer.
//!
//! This crate drives one frame at a time across two GPU queues:
//! - [`engine::Engine`] cycles the frame slots and sequences compute, graphics
//!   and presentation
//! - [`swap_surface::SwapSurfaceManager`] owns the swap targets and rebuilds
//!   them when the surface goes stale
//! - [`mesh`] deduplicates and uploads the static mesh
//! - [`particles`] seeds the simulated particle field
//!
//! Everything is written against [`field_rhi::gpu::Gpu`], so the same frame
//! logic runs on a Vulkan device or on the mock backend in tests.

pub mod engine;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod particles;
pub mod pipelines;
pub mod surface;
pub mod swap_surface;
pub mod uniforms;

pub use engine::{Engine, FrameStatus};
pub use error::{EngineError, EngineResult};
pub use mesh::{MeshData, Vertex};
pub use particles::Particle;
pub use pipelines::{ComputePipelineHandles, GraphicsPipelineHandles, PipelineSet};
pub use surface::{ResizeObserver, ResizeSignal, SurfaceProvider};
pub use swap_surface::{SwapState, SwapSurfaceManager};

/// Number of frame slots cycled by the engine.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
