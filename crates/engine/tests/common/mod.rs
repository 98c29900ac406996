//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use field_core::{EngineConfig, PARTICLE_WORKGROUP_SIZE};
use field_engine::{Engine, PipelineSet, SurfaceProvider, Vertex};
use field_rhi::mock::MockGpu;
use glam::Vec3;

/// A window whose size and close flag the test can change while the engine
/// holds it.
#[derive(Clone, Default)]
pub struct TestSurface {
    size: Rc<Cell<(u32, u32)>>,
    closing: Rc<Cell<bool>>,
}

impl TestSurface {
    pub fn new(width: u32, height: u32) -> Self {
        let surface = Self::default();
        surface.resize(width, height);
        surface
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.size.set((width, height));
    }

    pub fn close(&self) {
        self.closing.set(true);
    }
}

impl SurfaceProvider for TestSurface {
    fn drawable_size(&self) -> (u32, u32) {
        self.size.get()
    }

    fn should_close(&self) -> bool {
        self.closing.get()
    }
}

pub fn small_config() -> EngineConfig {
    EngineConfig {
        particle_count: 2 * PARTICLE_WORKGROUP_SIZE,
        fence_timeout_ms: Some(100),
        ..EngineConfig::default()
    }
}

/// Two stacked quads with eight distinct vertices.
pub fn quad_mesh() -> (Vec<Vertex>, Vec<u32>) {
    let vertices = vec![
        Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)),
        Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 0.0, 1.0)),
        Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::new(1.0, 1.0, 1.0)),
        Vertex::new(Vec3::new(-0.5, -0.5, -0.5), Vec3::new(1.0, 0.0, 0.0)),
        Vertex::new(Vec3::new(0.5, -0.5, -0.5), Vec3::new(0.0, 1.0, 0.0)),
        Vertex::new(Vec3::new(0.5, 0.5, -0.5), Vec3::new(0.0, 0.0, 1.0)),
        Vertex::new(Vec3::new(-0.5, 0.5, -0.5), Vec3::new(1.0, 1.0, 1.0)),
    ];
    let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
    (vertices, indices)
}

/// An initialised engine on a fresh mock device with the quad mesh loaded.
pub fn running_engine(surface: &TestSurface) -> (Arc<MockGpu>, Engine<MockGpu>) {
    let gpu = Arc::new(MockGpu::new());
    let mut engine = Engine::new(
        gpu.clone(),
        PipelineSet::default(),
        Box::new(surface.clone()),
        small_config(),
    )
    .unwrap();

    let (vertices, indices) = quad_mesh();
    engine.set_mesh(&vertices, &indices).unwrap();
    engine.init().unwrap();
    (gpu, engine)
}
