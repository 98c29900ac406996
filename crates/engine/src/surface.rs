//! Window-side collaborators of the engine.
//!
//! The engine never touches the windowing layer directly. It asks a
//! [`SurfaceProvider`] for the drawable size and whether to stop, and it hands
//! out a [`ResizeObserver`] that the window invokes from its event handling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Drawable-size and lifetime queries answered by the window layer.
pub trait SurfaceProvider {
    /// Current drawable size in pixels. Either dimension is zero while the
    /// window is minimised.
    fn drawable_size(&self) -> (u32, u32);

    /// Whether the user asked to close the window.
    fn should_close(&self) -> bool;
}

/// Receives resize notifications from the window layer.
///
/// Called synchronously from event handling, possibly on another thread than
/// the one driving frames.
pub trait ResizeObserver: Send + Sync {
    fn on_resize(&self, width: u32, height: u32);
}

/// The engine's resize observer: a flag consumed by the next present phase.
#[derive(Debug, Default)]
pub struct ResizeSignal {
    pending: AtomicBool,
    notifications: AtomicU64,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the swap targets for recreation.
    pub fn raise(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Total notifications received.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

impl ResizeObserver for ResizeSignal {
    fn on_resize(&self, width: u32, height: u32) {
        tracing::debug!("Resize notification: {}x{}", width, height);
        self.raise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_flag() {
        let signal = ResizeSignal::new();
        assert!(!signal.take());

        signal.on_resize(800, 600);
        signal.on_resize(1024, 768);
        assert!(signal.is_pending());
        assert!(signal.take());
        assert!(!signal.take());
        assert_eq!(signal.notifications(), 2);
    }
}
