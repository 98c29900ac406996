//! field-control: a compute-driven particle field drawn over a small mesh.
//!
//! The window is created on the first `resumed` event; everything Vulkan is
//! built right after it. Frames are driven from `RedrawRequested`, and one
//! extra frame is drawn synchronously on every resize so the window contents
//! follow the drag.

mod context;

use anyhow::Result;
use field_core::{EngineConfig, FrameRateCounter};
use field_engine::{Engine, FrameStatus, Vertex};
use field_platform::{EventLoop, Window, WindowEvent};
use field_rhi::vulkan::VulkanGpu;
use glam::Vec3;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::window::WindowId;

use crate::context::GpuContext;

const CONFIG_PATH: &str = "field-control.toml";

/// Two stacked quads, one at z = 0 and one at z = -0.5.
fn quad_mesh() -> (Vec<Vertex>, Vec<u32>) {
    let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
    let colors = [Vec3::X, Vec3::Y, Vec3::Z, Vec3::ONE];

    let vertices = [0.0, -0.5]
        .into_iter()
        .flat_map(|z| {
            corners
                .iter()
                .zip(colors)
                .map(move |(&(x, y), color)| Vertex::new(Vec3::new(x, y, z), color))
        })
        .collect();
    let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
    (vertices, indices)
}

/// Field order is drop order: the engine before the Vulkan objects it uses,
/// and those before the window they present to.
struct App {
    engine: Option<Engine<VulkanGpu>>,
    context: Option<GpuContext>,
    window: Option<Window>,
    config: EngineConfig,
    fps: FrameRateCounter,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            engine: None,
            context: None,
            window: None,
            config,
            fps: FrameRateCounter::new(),
            failure: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut window = Window::new(event_loop, &self.config.window)?;
        let context = GpuContext::new(&window, &self.config)?;

        let mut engine = Engine::new(
            context.gpu(),
            context.pipelines(),
            Box::new(window.surface_provider()),
            self.config.clone(),
        )?;
        window.add_resize_observer(engine.resize_observer());

        let (vertices, indices) = quad_mesh();
        engine.set_mesh(&vertices, &indices)?;
        engine.init()?;

        self.engine = Some(engine);
        self.context = Some(context);
        self.window = Some(window);
        self.fps = FrameRateCounter::new();
        Ok(())
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.should_stop() {
            event_loop.exit();
            return;
        }

        match engine.advance_frame() {
            Ok(FrameStatus::Presented) => self.fps.frame(),
            Ok(FrameStatus::Skipped) => {}
            Err(e) => {
                error!("Frame failed: {}", e);
                self.failure = Some(e.into());
                event_loop.exit();
            }
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{:#}", e);
        self.failure = Some(e);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Some(window) = &self.window {
                    window.request_close();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &self.window {
                    window.handle_resize(size.width, size.height);
                }
                self.draw(event_loop);
            }
            WindowEvent::RedrawRequested => self.draw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.engine = None;
        self.context = None;
        self.window = None;

        if self.fps.frames() > 0 {
            println!("Average framerate: {:.2}", self.fps.average_fps());
            info!("Presented {} frames", self.fps.frames());
        }
    }
}

fn main() -> Result<()> {
    field_core::init_logging();
    info!("Starting field-control");

    let config = EngineConfig::load_or_default(CONFIG_PATH)?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_mesh_survives_deduplication() {
        let (vertices, indices) = quad_mesh();
        assert_eq!(vertices.len(), 8);

        let mesh = field_engine::mesh::deduplicate(&vertices, &indices).unwrap();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices, indices);
    }
}
