//! Swap Surface Manager.
//!
//! Owns the current swap target set (presentable images, the shared MSAA colour
//! and depth attachments, and one framebuffer per image) and rebuilds it from
//! scratch whenever the surface goes stale. There is no incremental resize:
//! recreation waits for the device to go idle, drops the whole set and builds
//! a new one for the current drawable size.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized --build--> Ready --mark_stale--> Stale --recreate--> Ready
//!                                                  |
//!                                                  +--recreate (0x0)--> Stale
//! any --tear_down--> TornDown
//! ```

use std::sync::Arc;
use std::time::Duration;

use field_rhi::gpu::{Gpu, SwapTargetSet};
use field_rhi::vk;
use tracing::{debug, error, info};

use crate::error::{EngineError, EngineResult};
use crate::surface::SurfaceProvider;

/// Lifecycle of the swap target set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapState {
    Uninitialized,
    Ready,
    /// Needs recreation. No target set exists while the drawable is zero-sized.
    Stale,
    TornDown,
}

pub struct SwapSurfaceManager<G: Gpu> {
    gpu: Arc<G>,
    render_pass: vk::RenderPass,
    idle_timeout: Duration,
    targets: Option<G::SwapTargets>,
    state: SwapState,
    recreations: u64,
}

impl<G: Gpu> SwapSurfaceManager<G> {
    /// Creates a manager for targets compatible with `render_pass`. Nothing is
    /// built until [`build`](Self::build).
    ///
    /// Every idle wait before targets are destroyed gives up after `idle_timeout`.
    pub fn new(gpu: Arc<G>, render_pass: vk::RenderPass, idle_timeout: Duration) -> Self {
        Self {
            gpu,
            render_pass,
            idle_timeout,
            targets: None,
            state: SwapState::Uninitialized,
            recreations: 0,
        }
    }

    /// Builds the first target set. A zero-sized drawable leaves the manager
    /// `Stale` until a later [`recreate`](Self::recreate).
    pub fn build(&mut self, surface: &dyn SurfaceProvider) -> EngineResult<()> {
        if self.state != SwapState::Uninitialized {
            debug!("Swap targets already built ({:?})", self.state);
            return Ok(());
        }
        self.rebuild(surface)
    }

    /// Flags the current set as stale. Idempotent.
    pub fn mark_stale(&mut self) {
        if self.state == SwapState::Ready {
            debug!("Swap targets marked stale");
            self.state = SwapState::Stale;
        }
    }

    /// Waits for the device to go idle, drops the current set and builds a new
    /// one for the current drawable size.
    pub fn recreate(&mut self, surface: &dyn SurfaceProvider) -> EngineResult<()> {
        if self.state == SwapState::TornDown {
            return Ok(());
        }

        // Framebuffers reference images about to be destroyed.
        self.gpu.wait_idle(self.idle_timeout)?;
        if let Some(old) = self.targets.take() {
            self.gpu.destroy_swap_targets(old);
        }
        self.state = SwapState::Stale;
        self.recreations += 1;

        self.rebuild(surface)
    }

    fn rebuild(&mut self, surface: &dyn SurfaceProvider) -> EngineResult<()> {
        let (width, height) = surface.drawable_size();
        if width == 0 || height == 0 {
            debug!("Drawable is {}x{}, deferring swap targets", width, height);
            self.state = SwapState::Stale;
            return Ok(());
        }

        let targets = self
            .gpu
            .create_swap_targets(self.render_pass, vk::Extent2D { width, height })
            .map_err(|e| EngineError::creation("swap targets", e))?;

        info!(
            "Swap targets ready: {} images, {}x{}, {:?}",
            targets.image_count(),
            targets.extent().width,
            targets.extent().height,
            targets.samples()
        );

        self.targets = Some(targets);
        self.state = SwapState::Ready;
        Ok(())
    }

    /// Waits for the device to go idle and releases the target set.
    /// Idempotent.
    pub fn tear_down(&mut self) -> EngineResult<()> {
        if self.state == SwapState::TornDown {
            return Ok(());
        }
        if let Some(targets) = self.targets.take() {
            self.gpu.wait_idle(self.idle_timeout)?;
            self.gpu.destroy_swap_targets(targets);
        }
        self.state = SwapState::TornDown;
        debug!("Swap targets torn down");
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> SwapState {
        self.state
    }

    /// The current set, if one exists.
    #[inline]
    pub fn targets(&self) -> Option<&G::SwapTargets> {
        self.targets.as_ref()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.targets.as_ref().map(|t| t.extent())
    }

    /// Number of recreations since construction.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }
}

impl<G: Gpu> Drop for SwapSurfaceManager<G> {
    fn drop(&mut self) {
        if let Err(e) = self.tear_down() {
            error!("Failed to tear down swap targets: {}", e);
        }
    }
}
