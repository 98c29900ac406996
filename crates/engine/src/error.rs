//! Engine error taxonomy.
//!
//! A stale surface is not represented here: it is a frame outcome
//! ([`crate::FrameStatus::Skipped`]) handled inside the engine.

use std::time::Duration;

use field_rhi::RhiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A buffer, image, descriptor or sync object could not be created.
    #[error("Failed to create {what}: {source}")]
    ResourceCreation {
        what: String,
        #[source]
        source: RhiError,
    },

    /// A fence, acquire or idle wait exceeded its timeout.
    #[error("Timed out after {timeout:?} waiting for {what}")]
    SynchronizationTimeout { what: &'static str, timeout: Duration },

    /// Acquire or present failed for a reason other than a stale surface.
    #[error("Presentation failed: {0}")]
    Presentation(#[source] RhiError),

    #[error("Mesh index {index} is out of range for {vertex_count} vertices")]
    InvalidMesh { index: u32, vertex_count: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] field_core::Error),

    #[error("Engine used before init()")]
    NotInitialized,

    #[error(transparent)]
    Rhi(RhiError),
}

impl EngineError {
    /// Wraps a creation failure, keeping timeouts distinguishable. An already
    /// wrapped RHI failure keeps its own subject.
    pub fn creation(what: impl Into<String>, source: RhiError) -> Self {
        match source {
            RhiError::Timeout { what, timeout } => Self::SynchronizationTimeout { what, timeout },
            RhiError::ResourceCreation { what, source } => Self::creation(what, *source),
            source => Self::ResourceCreation {
                what: what.into(),
                source,
            },
        }
    }

    /// Wraps a failed acquire or present.
    pub fn presentation(source: RhiError) -> Self {
        match source {
            RhiError::Timeout { what, timeout } => Self::SynchronizationTimeout { what, timeout },
            source => Self::Presentation(source),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SynchronizationTimeout { .. })
    }
}

impl From<RhiError> for EngineError {
    fn from(e: RhiError) -> Self {
        match e {
            RhiError::Timeout { what, timeout } => Self::SynchronizationTimeout { what, timeout },
            RhiError::ResourceCreation { what, source } => Self::creation(what, *source),
            e => Self::Rhi(e),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_stay_distinguishable() {
        let timeout = RhiError::Timeout {
            what: "fence",
            timeout: Duration::from_millis(5),
        };
        assert!(EngineError::from(timeout).is_timeout());

        let wrapped = RhiError::creation(
            "staging buffer",
            RhiError::Timeout {
                what: "device idle",
                timeout: Duration::from_millis(5),
            },
        );
        assert!(EngineError::from(wrapped).is_timeout());
    }

    #[test]
    fn creation_failures_keep_their_subject() {
        let err = EngineError::from(RhiError::creation(
            "vertex buffer",
            RhiError::NoSuitableMemoryType {
                type_bits: 0,
                flags: field_rhi::vk::MemoryPropertyFlags::DEVICE_LOCAL,
            },
        ));
        match err {
            EngineError::ResourceCreation { what, .. } => assert_eq!(what, "vertex buffer"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn presentation_maps_other_errors() {
        let err = EngineError::presentation(RhiError::SurfaceError("lost".into()));
        assert!(matches!(err, EngineError::Presentation(_)));
    }
}
