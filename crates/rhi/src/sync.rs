//! Synchronization primitives.
//!
//! This module provides owning wrappers for the two synchronization objects the
//! frame loop uses:
//! - [`Semaphore`] - GPU-to-GPU ordering between queue submissions
//! - [`Fence`] - GPU-to-CPU completion, waited on by the host
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use field_rhi::gpu::Gpu;
//! use field_rhi::sync::{Fence, Semaphore};
//!
//! # fn example<G: Gpu>(gpu: Arc<G>) -> Result<(), field_rhi::RhiError> {
//! let image_available = Semaphore::new(gpu.clone())?;
//!
//! // Created signaled so the first wait returns immediately.
//! let in_flight = Fence::new(gpu, true)?;
//! in_flight.wait(Duration::MAX)?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::Gpu;

/// Binary semaphore, created unsignaled.
pub struct Semaphore<G: Gpu> {
    gpu: Arc<G>,
    semaphore: vk::Semaphore,
}

impl<G: Gpu> Semaphore<G> {
    pub fn new(gpu: Arc<G>) -> RhiResult<Self> {
        let semaphore = gpu.create_semaphore()?;
        Ok(Self { gpu, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<G: Gpu> Drop for Semaphore<G> {
    fn drop(&mut self) {
        self.gpu.destroy_semaphore(self.semaphore);
    }
}

/// Host-waitable fence.
///
/// Fences guarding reusable per-frame resources are created signaled, so the
/// first wait before any submission does not block.
pub struct Fence<G: Gpu> {
    gpu: Arc<G>,
    fence: vk::Fence,
}

impl<G: Gpu> Fence<G> {
    pub fn new(gpu: Arc<G>, signaled: bool) -> RhiResult<Self> {
        let fence = gpu.create_fence(signaled)?;
        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { gpu, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::Timeout`] when `timeout` elapses first.
    /// `Duration::MAX` waits forever.
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        self.gpu.wait_for_fence(self.fence, timeout)
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        self.gpu.reset_fence(self.fence)
    }
}

impl<G: Gpu> Drop for Fence<G> {
    fn drop(&mut self) {
        self.gpu.destroy_fence(self.fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RhiError;
    use crate::mock::MockGpu;

    #[test]
    fn test_signaled_fence_does_not_block() {
        let gpu = Arc::new(MockGpu::new());
        let fence = Fence::new(gpu, true).unwrap();
        fence.wait(Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let gpu = Arc::new(MockGpu::new());
        let fence = Fence::new(gpu, false).unwrap();

        let err = fence.wait(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, RhiError::Timeout { what: "fence", .. }));
    }

    #[test]
    fn test_objects_are_destroyed_on_drop() {
        let gpu = Arc::new(MockGpu::new());
        {
            let _semaphore = Semaphore::new(gpu.clone()).unwrap();
            let _fence = Fence::new(gpu.clone(), true).unwrap();
            assert_eq!(gpu.stats().live_sync_objects, 2);
        }
        assert_eq!(gpu.stats().live_sync_objects, 0);
    }
}
