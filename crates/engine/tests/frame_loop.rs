//! Steady-state frame loop against the mock device.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestSurface, quad_mesh, running_engine, small_config};
use field_engine::frame::previous_slot;
use field_engine::uniforms::{CameraBlock, ComputeBlock, ModelBlock};
use field_engine::{
    Engine, EngineError, FrameStatus, MAX_FRAMES_IN_FLIGHT, PipelineSet, SwapState, Vertex,
};
use field_rhi::descriptor::{PARTICLES_IN_BINDING, PARTICLES_OUT_BINDING};
use field_rhi::gpu::QueueRole;
use field_rhi::mock::{MOCK_UNIFORM_ALIGNMENT, MockGpu, SubmittedWork};
use field_rhi::vk;
use glam::{Vec3, Vec4};

fn run_frames(engine: &mut Engine<MockGpu>, count: usize) {
    for _ in 0..count {
        assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    }
}

#[test]
fn test_slot_reuse_waits_for_previous_work() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);

    run_frames(&mut engine, 4 * MAX_FRAMES_IN_FLIGHT + 1);

    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    assert!(gpu.compute_records().iter().all(|r| r.outstanding == 0));
    assert!(gpu.draw_records().iter().all(|r| r.outstanding == 0));
    // Never more than one frame per slot queued.
    assert!(gpu.pending_submissions() <= 2 * MAX_FRAMES_IN_FLIGHT);
}

#[test]
fn test_frame_index_cycles_through_slots() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    assert_eq!(engine.slot_count(), MAX_FRAMES_IN_FLIGHT);

    let mut seen = Vec::new();
    for _ in 0..7 {
        seen.push(engine.frame_index());
        engine.advance_frame().unwrap();
    }

    assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(engine.frames_presented(), 7);
    assert_eq!(gpu.presented_images(), vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn test_each_frame_reads_previous_slot_output() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);

    run_frames(&mut engine, 2 * MAX_FRAMES_IN_FLIGHT);

    let frames = engine.frames().unwrap();
    let computes = gpu.compute_records();
    let draws = gpu.draw_records();
    assert_eq!(computes.len(), 2 * MAX_FRAMES_IN_FLIGHT);

    for (frame, (compute, draw)) in computes.iter().zip(&draws).enumerate() {
        let slot = frame % MAX_FRAMES_IN_FLIGHT;
        let input = compute
            .bindings
            .iter()
            .find(|b| b.binding == PARTICLES_IN_BINDING)
            .unwrap();
        let output = compute
            .bindings
            .iter()
            .find(|b| b.binding == PARTICLES_OUT_BINDING)
            .unwrap();

        assert_eq!(input.buffer, frames.storage(previous_slot(slot)).handle());
        assert_eq!(output.buffer, frames.storage(slot).handle());
        assert_eq!(draw.pass.particle_buffer, output.buffer);
        assert_eq!(draw.pass.particle_count, small_config().particle_count);
        assert_eq!(compute.pass.group_count, [small_config().workgroup_count(), 1, 1]);
    }
}

#[test]
fn test_submissions_chain_compute_into_graphics() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);

    run_frames(&mut engine, MAX_FRAMES_IN_FLIGHT);

    let frames = engine.frames().unwrap();
    let submissions = gpu.submissions();
    assert_eq!(submissions.len(), 2 * MAX_FRAMES_IN_FLIGHT);

    for (slot, pair) in submissions.chunks(2).enumerate() {
        let (compute, graphics) = (&pair[0], &pair[1]);
        let frame = frames.slot(slot);

        assert_eq!(compute.role, QueueRole::Compute);
        assert_eq!(compute.work, SubmittedWork::Compute);
        assert!(compute.waits.is_empty());
        assert_eq!(compute.signals, vec![frame.compute_finished()]);
        assert_eq!(compute.fence, Some(frame.compute_in_flight().handle()));

        assert_eq!(graphics.role, QueueRole::Graphics);
        assert_eq!(graphics.work, SubmittedWork::Draw);
        assert_eq!(graphics.waits.len(), 2);
        assert_eq!(graphics.waits[0].semaphore, frame.compute_finished());
        assert_eq!(graphics.waits[0].stage, vk::PipelineStageFlags::VERTEX_INPUT);
        assert_eq!(graphics.waits[1].semaphore, frame.image_available());
        assert_eq!(
            graphics.waits[1].stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(graphics.signals, vec![frame.render_finished()]);
        assert_eq!(graphics.fence, Some(frame.graphics_in_flight().handle()));
    }
}

#[test]
fn test_uniforms_written_before_recording() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);

    run_frames(&mut engine, 1);

    let slot = engine.frames().unwrap().slot(0);
    let compute = gpu.memory_contents(slot.compute_uniforms().handle()).unwrap();
    let block: ComputeBlock = bytemuck::pod_read_unaligned(&compute[..ComputeBlock::SIZE]);
    // First frame has no predecessor, so the attractor has not moved.
    assert_eq!(block.delta_time, 0.0);
    assert_eq!(block.attractor, Vec4::new(0.5, 0.0, 0.0, 1.0));

    let graphics = gpu.memory_contents(slot.graphics_uniforms().handle()).unwrap();
    let camera: CameraBlock = bytemuck::pod_read_unaligned(&graphics[..CameraBlock::SIZE]);
    assert_eq!(camera, CameraBlock::looking_at_origin(800.0 / 600.0));

    let offset = MOCK_UNIFORM_ALIGNMENT as usize;
    let model: ModelBlock =
        bytemuck::pod_read_unaligned(&graphics[offset..offset + ModelBlock::SIZE]);
    assert_eq!(model, ModelBlock::quarter_turn());
}

#[test]
fn test_draw_uses_current_mesh() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);

    run_frames(&mut engine, 1);
    let first = gpu.draw_records()[0].pass;
    assert_eq!(first.mesh.map(|m| m.index_count), Some(12));
    assert_eq!(first.clear_color, [0.0, 0.0, 0.0, 1.0]);
    assert_eq!(first.clear_depth, 1.0);

    let triangle = [
        Vertex::new(Vec3::ZERO, Vec3::X),
        Vertex::new(Vec3::X, Vec3::Y),
        Vertex::new(Vec3::Y, Vec3::Z),
    ];
    let idles = gpu.stats().wait_idles;
    engine.set_mesh(&triangle, &[0, 1, 2]).unwrap();
    assert_eq!(gpu.stats().wait_idles, idles + 1);
    assert_eq!(engine.mesh().vertices.len(), 3);

    run_frames(&mut engine, 1);
    let second = gpu.draw_records()[1].pass;
    assert_eq!(second.mesh.map(|m| m.index_count), Some(3));
    assert_ne!(
        second.mesh.map(|m| m.vertex_buffer),
        first.mesh.map(|m| m.vertex_buffer)
    );
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_invalid_mesh_keeps_previous_one() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    let before = engine.mesh().clone();

    let err = engine
        .set_mesh(&[Vertex::new(Vec3::ZERO, Vec3::ONE)], &[0, 3])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidMesh {
            index: 3,
            vertex_count: 1
        }
    ));
    assert_eq!(engine.mesh(), &before);

    run_frames(&mut engine, 1);
    assert_eq!(gpu.draw_records()[0].pass.mesh.map(|m| m.index_count), Some(12));
}

fn triangle() -> [Vertex; 3] {
    [
        Vertex::new(Vec3::ZERO, Vec3::X),
        Vertex::new(Vec3::X, Vec3::Y),
        Vertex::new(Vec3::Y, Vec3::Z),
    ]
}

#[test]
fn test_failed_mesh_upload_keeps_previous_buffers() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    run_frames(&mut engine, 1);

    let before = engine.mesh().clone();
    let drawn = gpu.draw_records()[0].pass.mesh;
    let live_buffers = gpu.stats().live_buffers;

    gpu.fail_next_copies(1);
    let err = engine.set_mesh(&triangle(), &[0, 1, 2]).unwrap_err();
    assert!(matches!(err, EngineError::ResourceCreation { .. }), "{err}");
    assert_eq!(engine.mesh(), &before);
    assert_eq!(gpu.stats().live_buffers, live_buffers);

    run_frames(&mut engine, 1);
    let next = gpu.draw_records()[1].pass.mesh;
    assert_eq!(next, drawn);
    assert_eq!(next.map(|m| m.index_count), Some(12));
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_mesh_swap_on_hung_device_uses_configured_timeout() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    run_frames(&mut engine, 1);

    gpu.set_hung(true);
    match engine.set_mesh(&triangle(), &[0, 1, 2]).unwrap_err() {
        EngineError::SynchronizationTimeout { what, timeout } => {
            assert_eq!(what, "device idle");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.mesh().indices.len(), 12);

    gpu.set_hung(false);
    run_frames(&mut engine, 1);
    assert_eq!(gpu.draw_records()[1].pass.mesh.map(|m| m.index_count), Some(12));
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_empty_mesh_draws_particles_only() {
    let surface = TestSurface::new(800, 600);
    let gpu = Arc::new(MockGpu::new());
    let mut engine = Engine::new(
        gpu.clone(),
        PipelineSet::default(),
        Box::new(surface.clone()),
        small_config(),
    )
    .unwrap();
    engine.init().unwrap();

    run_frames(&mut engine, 2);
    assert!(gpu.draw_records().iter().all(|r| r.pass.mesh.is_none()));
}

#[test]
fn test_advance_before_init_fails() {
    let surface = TestSurface::new(800, 600);
    let gpu = Arc::new(MockGpu::new());
    let mut engine = Engine::new(
        gpu.clone(),
        PipelineSet::default(),
        Box::new(surface),
        small_config(),
    )
    .unwrap();

    assert!(matches!(
        engine.advance_frame(),
        Err(EngineError::NotInitialized)
    ));
    assert_eq!(gpu.stats().submissions, 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = field_core::EngineConfig {
        particle_count: 100,
        ..small_config()
    };
    let result = Engine::new(
        Arc::new(MockGpu::new()),
        PipelineSet::default(),
        Box::new(TestSurface::new(800, 600)),
        config,
    );
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn test_init_is_idempotent() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    let stats = gpu.stats();

    engine.init().unwrap();

    assert_eq!(gpu.stats(), stats);
    assert_eq!(engine.swap_state(), SwapState::Ready);
}

#[test]
fn test_failed_init_releases_partial_resources() {
    let surface = TestSurface::new(800, 600);
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

    // The mesh upload is the first copy after the swap targets exist.
    gpu.fail_next_copies(1);
    let err = engine.init().unwrap_err();
    assert!(matches!(err, EngineError::ResourceCreation { .. }), "{err}");
    assert_eq!(gpu.stats().copies, 0);

    assert!(!engine.is_initialized());
    let stats = gpu.stats();
    assert_eq!(stats.live_buffers, 0);
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(stats.swap_targets_live, 0);

    engine.init().unwrap();
    run_frames(&mut engine, 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_hung_device_times_out() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    run_frames(&mut engine, MAX_FRAMES_IN_FLIGHT);

    gpu.set_hung(true);
    let err = engine.advance_frame().unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(matches!(
        err,
        EngineError::SynchronizationTimeout { what: "fence", .. }
    ));

    gpu.set_hung(false);
    drop(engine);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_drop_releases_everything() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    run_frames(&mut engine, 5);

    drop(engine);

    let stats = gpu.stats();
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(stats.live_buffers, 0);
    assert_eq!(stats.live_sync_objects, 0);
    assert_eq!(stats.live_command_buffers, 0);
    assert_eq!(stats.live_descriptor_pools, 0);
    assert_eq!(stats.swap_targets_live, 0);
    assert_eq!(stats.allocations, stats.frees);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_should_stop_follows_window() {
    let surface = TestSurface::new(800, 600);
    let (_gpu, engine) = running_engine(&surface);

    assert!(!engine.should_stop());
    surface.close();
    assert!(engine.should_stop());
}
