//! Engine configuration.
//!
//! Everything that used to be a compile-time or global toggle lives here and is
//! handed to the engine at construction. The configuration can be loaded from a
//! TOML file; missing keys fall back to [`EngineConfig::default`].
//!
//! ```toml
//! enable_validation = true
//! particle_count = 262144
//! fence_timeout_ms = 5000
//! forced_present_mode = "fifo"
//!
//! [window]
//! width = 1280
//! height = 720
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Local workgroup size of the particle compute shader.
pub const PARTICLE_WORKGROUP_SIZE: u32 = 256;

/// Present mode requested by the user, overriding the MAILBOX → FIFO search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

/// Initial window parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Arbitrary Field Control".to_string(),
        }
    }
}

/// Configuration passed to the engine at construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enables the Khronos validation layer and forwards its messages to tracing.
    pub enable_validation: bool,
    /// Number of simulated particles. Must be a non-zero multiple of
    /// [`PARTICLE_WORKGROUP_SIZE`].
    pub particle_count: u32,
    /// Seed for the initial particle distribution.
    pub particle_seed: u64,
    /// Upper bound for every fence and acquire wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Present mode to use instead of the default preference search.
    pub forced_present_mode: Option<PresentModePreference>,
    /// Directory holding the compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
    pub window: WindowConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            particle_count: 4096 * PARTICLE_WORKGROUP_SIZE,
            particle_seed: 0x5eed,
            fence_timeout_ms: None,
            forced_present_mode: None,
            shader_dir: PathBuf::from("shaders/spirv"),
            window: WindowConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.particle_count == 0 || self.particle_count % PARTICLE_WORKGROUP_SIZE != 0 {
            return Err(Error::Config(format!(
                "particle_count must be a non-zero multiple of {}, got {}",
                PARTICLE_WORKGROUP_SIZE, self.particle_count
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.fence_timeout_ms == Some(0) {
            return Err(Error::Config(
                "fence_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Timeout applied to fence waits, idle waits, uploads and image acquisition.
    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::MAX)
    }

    /// Number of compute workgroups dispatched per frame.
    pub fn workgroup_count(&self) -> u32 {
        self.particle_count / PARTICLE_WORKGROUP_SIZE
    }
}
