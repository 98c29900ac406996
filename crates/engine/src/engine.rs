//! The frame orchestrator.
//!
//! [`Engine`] owns the frame ring, the mesh buffers and the swap surface, and
//! advances one frame per [`Engine::advance_frame`] call from a single control
//! thread. All parallelism is between that thread and the GPU queues.
//!
//! # Frame Sequence
//!
//! ```text
//! compute:  wait compute fence → write compute block → reset → record → submit
//! acquire:  wait graphics fence → acquire image   (stale: skip frame, recreate)
//! graphics: reset → write camera/model → record → submit (2 waits, 1 signal)
//! present:  present (stale, suboptimal or resized: recreate after presenting)
//! advance:  next slot, measure frame time
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use field_core::EngineConfig;
//! use field_engine::{Engine, PipelineSet, SurfaceProvider};
//! use field_rhi::gpu::Gpu;
//!
//! # fn example<G: Gpu>(
//! #     gpu: Arc<G>,
//! #     pipelines: PipelineSet,
//! #     window: Box<dyn SurfaceProvider>,
//! # ) -> Result<(), field_engine::EngineError> {
//! let mut engine = Engine::new(gpu, pipelines, window, EngineConfig::default())?;
//! engine.init()?;
//!
//! while !engine.should_stop() {
//!     engine.advance_frame()?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use field_core::{EngineConfig, Timer};
use field_rhi::gpu::{
    AcquireOutcome, ComputePass, DrawPass, Gpu, PresentOutcome, QueueRole, SemaphoreWait,
    Submission, SwapTargetSet,
};
use field_rhi::{RhiError, vk};
use tracing::{debug, error, info, warn};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::{EngineError, EngineResult};
use crate::frame::{FrameRing, FrameSlot};
use crate::mesh::{MeshBuffers, MeshData, Vertex, deduplicate};
use crate::particles::seed_particles;
use crate::pipelines::PipelineSet;
use crate::surface::{ResizeObserver, ResizeSignal, SurfaceProvider};
use crate::swap_surface::{SwapState, SwapSurfaceManager};
use crate::uniforms::{CameraBlock, ComputeBlock, ModelBlock};

/// Clear colour of the colour attachment.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
/// Clear value of the depth attachment.
pub const CLEAR_DEPTH: f32 = 1.0;

/// Outcome of one [`Engine::advance_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was rendered and queued for presentation.
    Presented,
    /// The surface was stale or zero-sized; nothing was presented.
    Skipped,
}

/// Frame orchestrator. See the module docs.
///
/// # Resource Destruction Order
///
/// `Drop` waits for the device to go idle, then releases the frame ring, the
/// mesh buffers and finally the swap targets. Pipelines and the device itself
/// belong to the caller and must outlive the engine.
pub struct Engine<G: Gpu> {
    gpu: Arc<G>,
    config: EngineConfig,
    pipelines: PipelineSet,
    surface: Box<dyn SurfaceProvider>,
    resize: Arc<ResizeSignal>,

    frames: Option<FrameRing<G>>,
    mesh_buffers: Option<MeshBuffers<G>>,
    swap: SwapSurfaceManager<G>,
    mesh: MeshData,

    current_frame: usize,
    timer: Timer,
    last_frame_secs: f32,
    frames_presented: u64,
}

impl<G: Gpu> Engine<G> {
    /// Creates an engine. No GPU work happens until [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` is invalid.
    pub fn new(
        gpu: Arc<G>,
        pipelines: PipelineSet,
        surface: Box<dyn SurfaceProvider>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;

        Ok(Self {
            swap: SwapSurfaceManager::new(
                gpu.clone(),
                pipelines.render_pass,
                config.fence_timeout(),
            ),
            gpu,
            config,
            pipelines,
            surface,
            resize: Arc::new(ResizeSignal::new()),
            frames: None,
            mesh_buffers: None,
            mesh: MeshData::default(),
            current_frame: 0,
            timer: Timer::new(),
            last_frame_secs: 0.0,
            frames_presented: 0,
        })
    }

    /// Builds the swap targets, mesh buffers and frame ring.
    ///
    /// Only the first successful call does anything. On failure every resource
    /// built so far is released and the engine stays uninitialised.
    pub fn init(&mut self) -> EngineResult<()> {
        if self.is_initialized() {
            warn!("Engine already initialised");
            return Ok(());
        }

        info!(
            "Initialising engine: {} frame slots, {} particles",
            MAX_FRAMES_IN_FLIGHT, self.config.particle_count
        );

        let timeout = self.config.fence_timeout();
        let mut swap =
            SwapSurfaceManager::new(self.gpu.clone(), self.pipelines.render_pass, timeout);
        swap.build(self.surface.as_ref())?;

        let mesh_buffers = MeshBuffers::upload(&self.gpu, &self.mesh, timeout)?;

        let particles = seed_particles(
            self.config.particle_count as usize,
            self.config.particle_seed,
        );
        let frames = FrameRing::new(&self.gpu, &self.pipelines, &particles, timeout)?;

        self.swap = swap;
        self.mesh_buffers = mesh_buffers;
        self.frames = Some(frames);
        self.current_frame = 0;
        self.last_frame_secs = 0.0;
        self.timer.reset();

        info!("Engine initialised");
        Ok(())
    }

    /// Renders and presents one frame.
    ///
    /// A stale or zero-sized surface is not an error: the frame is dropped,
    /// the swap targets are rebuilt and [`FrameStatus::Skipped`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SynchronizationTimeout`] if a wait exceeds the
    /// configured timeout, [`EngineError::Presentation`] if acquire or present
    /// fails, and [`EngineError::NotInitialized`] before [`init`](Self::init).
    pub fn advance_frame(&mut self) -> EngineResult<FrameStatus> {
        let Some(frames) = self.frames.as_ref() else {
            return Err(EngineError::NotInitialized);
        };

        if self.swap.targets().is_none() {
            self.swap.recreate(self.surface.as_ref())?;
            if self.swap.targets().is_none() {
                return Ok(FrameStatus::Skipped);
            }
        }

        let timeout = self.config.fence_timeout();
        let slot = frames.slot(self.current_frame);

        // ---- compute ------------------------------------------------------

        slot.compute_in_flight().wait(timeout)?;
        slot.write_compute_inputs(&ComputeBlock::for_frame(self.last_frame_secs))?;
        slot.compute_in_flight().reset()?;

        self.gpu.record_compute(
            slot.compute_commands(),
            &ComputePass {
                pipeline: self.pipelines.compute.pipeline,
                layout: self.pipelines.compute.layout,
                descriptor_set: slot.compute_set(),
                group_count: [self.config.workgroup_count(), 1, 1],
            },
        )?;
        self.gpu.submit(
            QueueRole::Compute,
            &Submission {
                command_buffer: Some(slot.compute_commands()),
                waits: &[],
                signals: &[slot.compute_finished()],
                fence: Some(slot.compute_in_flight().handle()),
            },
        )?;

        // ---- acquire ------------------------------------------------------

        slot.graphics_in_flight().wait(timeout)?;

        let Some(targets) = self.swap.targets() else {
            return Err(EngineError::NotInitialized);
        };
        let acquired = self
            .gpu
            .acquire_next_image(targets, slot.image_available(), timeout)
            .map_err(EngineError::presentation)?;

        let (image_index, suboptimal) = match acquired {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::Stale => {
                debug!("Surface stale during acquire, skipping frame");
                consume_compute_signal(self.gpu.as_ref(), slot)?;
                self.swap.mark_stale();
                self.swap.recreate(self.surface.as_ref())?;
                self.last_frame_secs = self.timer.delta_secs();
                return Ok(FrameStatus::Skipped);
            }
        };

        // ---- graphics -----------------------------------------------------

        let extent = targets.extent();
        let framebuffer = targets.framebuffer(image_index).ok_or_else(|| {
            EngineError::Presentation(RhiError::InvalidHandle(format!(
                "no framebuffer for swap image {image_index}"
            )))
        })?;

        slot.graphics_in_flight().reset()?;
        slot.write_graphics_inputs(
            &CameraBlock::looking_at_origin(extent.width as f32 / extent.height as f32),
            &ModelBlock::quarter_turn(),
        )?;

        self.gpu.record_draw(
            slot.graphics_commands(),
            &DrawPass {
                render_pass: self.pipelines.render_pass,
                framebuffer,
                extent,
                clear_color: CLEAR_COLOR,
                clear_depth: CLEAR_DEPTH,
                layout: self.pipelines.main.layout,
                descriptor_set: slot.graphics_set(),
                mesh_pipeline: self.pipelines.main.pipeline,
                mesh: self.mesh_buffers.as_ref().map(MeshBuffers::draw),
                particle_pipeline: self.pipelines.particle,
                particle_buffer: frames.storage(slot.index()).handle(),
                particle_count: self.config.particle_count,
            },
        )?;

        // Particles are read as vertex input, so compute only gates that
        // stage; colour output waits for the swap image.
        let waits = [
            SemaphoreWait {
                semaphore: slot.compute_finished(),
                stage: vk::PipelineStageFlags::VERTEX_INPUT,
            },
            SemaphoreWait {
                semaphore: slot.image_available(),
                stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            },
        ];
        self.gpu.submit(
            QueueRole::Graphics,
            &Submission {
                command_buffer: Some(slot.graphics_commands()),
                waits: &waits,
                signals: &[slot.render_finished()],
                fence: Some(slot.graphics_in_flight().handle()),
            },
        )?;

        // ---- present ------------------------------------------------------

        let presented = self
            .gpu
            .present(targets, image_index, slot.render_finished())
            .map_err(EngineError::presentation)?;

        let resized = self.resize.take();
        if presented == PresentOutcome::Stale || suboptimal || resized {
            debug!(
                "Recreating swap targets after present (stale: {}, suboptimal: {}, resized: {})",
                presented == PresentOutcome::Stale,
                suboptimal,
                resized
            );
            self.swap.mark_stale();
            self.swap.recreate(self.surface.as_ref())?;
        }

        // ---- advance ------------------------------------------------------

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frames_presented += 1;
        self.last_frame_secs = self.timer.delta_secs();

        Ok(FrameStatus::Presented)
    }

    /// Replaces the mesh, deduplicating its vertices first.
    ///
    /// Before [`init`](Self::init) this only stores the mesh. Afterwards it
    /// waits for the device to go idle and rebuilds both mesh buffers. The
    /// new buffers replace the old ones only once both uploads succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidMesh`] if an index is out of range,
    /// [`EngineError::ResourceCreation`] if an upload fails and
    /// [`EngineError::SynchronizationTimeout`] if the idle wait or an upload
    /// runs past the configured timeout. The current mesh and its buffers are
    /// kept in every case.
    pub fn set_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> EngineResult<()> {
        let mesh = deduplicate(vertices, indices)?;

        if self.is_initialized() {
            let timeout = self.config.fence_timeout();
            self.gpu.wait_idle(timeout)?;
            let uploaded = MeshBuffers::upload(&self.gpu, &mesh, timeout)?;
            self.mesh_buffers = uploaded;
        }

        self.mesh = mesh;
        Ok(())
    }

    /// Whether the window asked to close.
    pub fn should_stop(&self) -> bool {
        self.surface.should_close()
    }

    /// Requests swap-target recreation after the next present.
    pub fn notify_resized(&self) {
        self.resize.raise();
    }

    /// The observer the window layer reports resizes to.
    pub fn resize_observer(&self) -> Arc<dyn ResizeObserver> {
        self.resize.clone()
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.frames.is_some()
    }

    /// Slot the next frame will use.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        MAX_FRAMES_IN_FLIGHT
    }

    #[inline]
    pub fn swap_state(&self) -> SwapState {
        self.swap.state()
    }

    #[inline]
    pub fn swap_surface(&self) -> &SwapSurfaceManager<G> {
        &self.swap
    }

    /// The deduplicated mesh currently drawn.
    #[inline]
    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    #[inline]
    pub fn frames(&self) -> Option<&FrameRing<G>> {
        self.frames.as_ref()
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Submits an empty graphics batch that waits on the slot's compute signal.
///
/// Used when a frame is dropped after compute was submitted: the binary
/// semaphore must be unsignalled again before the slot's next compute submit.
fn consume_compute_signal<G: Gpu>(gpu: &G, slot: &FrameSlot<G>) -> EngineResult<()> {
    let waits = [SemaphoreWait {
        semaphore: slot.compute_finished(),
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
    }];
    gpu.submit(
        QueueRole::Graphics,
        &Submission {
            command_buffer: None,
            waits: &waits,
            signals: &[],
            fence: None,
        },
    )?;
    Ok(())
}

impl<G: Gpu> Drop for Engine<G> {
    fn drop(&mut self) {
        if self.is_initialized()
            && let Err(e) = self.gpu.wait_idle(self.config.fence_timeout())
        {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }

        self.frames = None;
        self.mesh_buffers = None;
        if let Err(e) = self.swap.tear_down() {
            error!("Failed to tear down swap targets: {}", e);
        }

        debug!(
            "Engine destroyed after {} presented frame(s)",
            self.frames_presented
        );
    }
}
