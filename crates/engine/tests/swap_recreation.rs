//! Swap target recreation triggered by stale surfaces, resizes and minimising.

mod common;

use common::{TestSurface, running_engine};
use field_engine::{FrameStatus, ResizeObserver, SwapState};
use field_rhi::gpu::{AcquireOutcome, PresentOutcome, QueueRole};
use field_rhi::mock::SubmittedWork;
use field_rhi::vk;

#[test]
fn test_stale_acquire_skips_frame_and_recreates() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    gpu.script_acquire([AcquireOutcome::Stale]);

    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(engine.frame_index(), 0);
    assert_eq!(engine.frames_presented(), 0);
    assert_eq!(engine.swap_state(), SwapState::Ready);
    assert_eq!(engine.swap_surface().recreations(), 1);
    assert_eq!(gpu.stats().swap_targets_created, 2);
    assert_eq!(gpu.stats().presents, 0);

    // The skipped frame's compute signal is consumed by an empty batch.
    let slot = engine.frames().unwrap().slot(0);
    let submissions = gpu.submissions();
    assert_eq!(submissions.len(), 2);
    let drain = &submissions[1];
    assert_eq!(drain.role, QueueRole::Graphics);
    assert_eq!(drain.work, SubmittedWork::Empty);
    assert_eq!(drain.waits.len(), 1);
    assert_eq!(drain.waits[0].semaphore, slot.compute_finished());
    assert_eq!(drain.waits[0].stage, vk::PipelineStageFlags::VERTEX_INPUT);
    assert!(drain.signals.is_empty());
    assert_eq!(drain.fence, None);

    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(engine.frame_index(), 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_suboptimal_acquire_presents_then_recreates() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    gpu.script_acquire([AcquireOutcome::Acquired {
        image_index: 0,
        suboptimal: true,
    }]);

    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(gpu.presented_images(), vec![0]);
    assert_eq!(engine.swap_surface().recreations(), 1);
    assert_eq!(engine.swap_state(), SwapState::Ready);

    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(engine.swap_surface().recreations(), 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_stale_present_recreates_after_frame() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    gpu.script_present([PresentOutcome::Stale]);

    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(engine.frame_index(), 1);
    assert_eq!(engine.swap_surface().recreations(), 1);
    assert_eq!(gpu.stats().swap_targets_live, 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_resize_notification_rebuilds_at_new_size() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    engine.advance_frame().unwrap();

    surface.resize(1024, 768);
    engine.resize_observer().on_resize(1024, 768);
    assert_eq!(engine.swap_surface().recreations(), 0);

    engine.advance_frame().unwrap();
    assert_eq!(engine.swap_surface().recreations(), 1);
    assert_eq!(
        engine.swap_surface().extent(),
        Some(vk::Extent2D {
            width: 1024,
            height: 768
        })
    );

    // The flag is consumed by the present that acted on it.
    engine.advance_frame().unwrap();
    assert_eq!(engine.swap_surface().recreations(), 1);

    let last = gpu.draw_records().last().unwrap().pass;
    assert_eq!(last.extent.width, 1024);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_repeated_resizes_do_not_leak_targets() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);

    for step in 1..=6u32 {
        surface.resize(800 + step * 16, 600);
        engine.notify_resized();
        assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    }

    assert_eq!(engine.swap_surface().recreations(), 6);
    assert_eq!(gpu.stats().swap_targets_created, 7);
    assert_eq!(gpu.stats().swap_targets_live, 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_minimised_at_start_skips_until_restored() {
    let surface = TestSurface::new(0, 0);
    let (gpu, mut engine) = running_engine(&surface);
    assert!(engine.is_initialized());
    assert_eq!(engine.swap_state(), SwapState::Stale);

    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(gpu.stats().submissions, 0);
    assert_eq!(gpu.stats().swap_targets_live, 0);

    surface.resize(640, 480);
    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(engine.swap_state(), SwapState::Ready);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_minimise_while_running() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    engine.advance_frame().unwrap();

    surface.resize(0, 0);
    engine.notify_resized();
    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(engine.swap_state(), SwapState::Stale);
    assert_eq!(gpu.stats().swap_targets_live, 0);

    let submitted = gpu.stats().submissions;
    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(gpu.stats().submissions, submitted);

    surface.resize(800, 600);
    assert_eq!(engine.advance_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(gpu.stats().swap_targets_live, 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn test_drop_while_stale_releases_everything() {
    let surface = TestSurface::new(800, 600);
    let (gpu, mut engine) = running_engine(&surface);
    engine.advance_frame().unwrap();
    surface.resize(0, 0);
    engine.notify_resized();
    engine.advance_frame().unwrap();

    drop(engine);

    let stats = gpu.stats();
    assert_eq!(stats.swap_targets_live, 0);
    assert_eq!(stats.live_buffers, 0);
    assert_eq!(stats.live_sync_objects, 0);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}
