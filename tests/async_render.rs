//! Async frame dispatch through the render worker.

use glam::{Mat4, Vec3};

use wavefront::prelude::*;
use wavefront::render::FrameState;

fn cornell_core(async_worker: bool) -> (RenderCore, ViewPyramid) {
    let mut core = RenderCore::init(CoreConfig {
        async_worker,
        ..CoreConfig::default()
    })
    .unwrap();
    core.set_target(24, 24, 1).unwrap();
    let scene = DemoScene::cornell_box();
    scene.apply(&mut core).unwrap();
    (core, scene.camera(1.0))
}

#[test]
fn test_dispatch_then_wait() {
    let (mut core, view) = cornell_core(true);
    core.render(&view, Convergence::Restart, true).unwrap();
    assert_eq!(core.state(), FrameState::Dispatched);
    // Buffers belong to the worker until the frame is collected.
    assert!(core.display().is_none());

    core.wait_for_render().unwrap();
    assert_eq!(core.state(), FrameState::Idle);
    assert_eq!(core.samples_taken(), 1);
    assert_eq!(core.display().unwrap().len(), 24 * 24);
    assert!(core.stats().primary_rays > 0);
}

#[test]
fn test_wait_without_frame_is_noop() {
    let (mut core, _) = cornell_core(true);
    core.wait_for_render().unwrap();
    core.wait_for_render().unwrap();
    assert_eq!(core.state(), FrameState::Idle);
}

#[test]
fn test_worker_spawned_on_demand() {
    let (mut core, view) = cornell_core(false);
    core.render(&view, Convergence::Restart, true).unwrap();
    assert_eq!(core.state(), FrameState::Dispatched);
    core.wait_for_render().unwrap();
    assert_eq!(core.samples_taken(), 1);
}

#[test]
fn test_mutation_settles_in_flight_frame() {
    let (mut core, view) = cornell_core(true);
    core.render(&view, Convergence::Restart, true).unwrap();
    core.set_instance(1, 1, Mat4::from_translation(Vec3::new(-0.3, 0.35, 0.0))).unwrap();
    assert_eq!(core.state(), FrameState::Idle);
    assert_eq!(core.samples_taken(), 1);

    // A render issued over an unfinished frame completes that frame first.
    core.render(&view, Convergence::Converge, true).unwrap();
    core.render(&view, Convergence::Converge, true).unwrap();
    core.wait_for_render().unwrap();
    assert_eq!(core.samples_taken(), 2);
}

#[test]
fn test_async_sequence_matches_sync() {
    let (mut sync_core, view) = cornell_core(false);
    let (mut async_core, _) = cornell_core(true);
    let frames = [Convergence::Restart, Convergence::Converge, Convergence::Converge, Convergence::Converge];
    for c in frames {
        sync_core.render(&view, c, false).unwrap();
        async_core.render(&view, c, true).unwrap();
        async_core.wait_for_render().unwrap();
        assert_eq!(sync_core.samples_taken(), async_core.samples_taken());
        assert_eq!(sync_core.first_converging_frame(), async_core.first_converging_frame());
    }
    assert_eq!(async_core.samples_taken(), 3);
    let a = sync_core.stats();
    let b = async_core.stats();
    assert_eq!(a.primary_rays, b.primary_rays);
    assert_eq!(a.bounce_iterations, b.bounce_iterations);
    assert_eq!(a.samples_taken, b.samples_taken);
}

#[test]
fn test_resize_during_async_frame() {
    let (mut core, view) = cornell_core(true);
    core.render(&view, Convergence::Restart, true).unwrap();
    core.set_target(48, 48, 1).unwrap();
    assert_eq!(core.samples_taken(), 0);
    let layout = core.pool_layout().unwrap();
    assert_eq!((layout.width, layout.height), (48, 48));
    assert!(core.accumulator().unwrap().iter().all(|t| t.is_zero()));
}
