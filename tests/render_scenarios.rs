//! Image-level scenarios on the host accelerator.

use glam::{Mat4, UVec2, Vec3};

use wavefront::prelude::*;
use wavefront::render::FrameState;

fn sync_config() -> CoreConfig {
    CoreConfig {
        async_worker: false,
        ..CoreConfig::default()
    }
}

fn triangle_core(width: u32, height: u32) -> (RenderCore, ViewPyramid) {
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(width, height, 1).unwrap();
    let scene = DemoScene::single_triangle();
    scene.apply(&mut core).unwrap();
    let view = scene.camera(width as f32 / height as f32);
    (core, view)
}

fn total(core: &RenderCore, x: u32, y: u32, width: u32) -> Vec3 {
    core.accumulator().unwrap()[(y * width + x) as usize].total()
}

#[test]
fn test_render_before_scene_is_noop() {
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(16, 16, 1).unwrap();
    core.render(&ViewPyramid::default(), Convergence::Restart, false).unwrap();
    assert_eq!(core.samples_taken(), 0);
    assert_eq!(core.stats().bounce_iterations, 0);
}

#[test]
fn test_restart_then_converge_triangle() {
    let (w, h) = (32, 32);
    let (mut core, view) = triangle_core(w, h);
    assert_eq!(core.samples_taken(), 0);
    assert!(core.accumulator().unwrap().iter().all(|t| t.is_zero()));

    core.render(&view, Convergence::Restart, false).unwrap();
    assert!(core.first_converging_frame());
    core.render(&view, Convergence::Converge, false).unwrap();
    assert!(!core.first_converging_frame());
    // The frame after a restart starts the accumulation over.
    assert_eq!(core.samples_taken(), 1);

    // Centre pixel sees the lit triangle.
    assert!(total(&core, w / 2, h / 2, w).max_element() > 0.0);
    // The apex sits about three rows below the top edge; the corners and the
    // top rows see nothing (no sky, no other geometry).
    for y in 0..2 {
        for x in 0..w {
            assert_eq!(total(&core, x, y, w), Vec3::ZERO, "pixel ({x}, {y})");
        }
    }
    for (x, y) in [(0, h - 1), (w - 1, h - 1), (0, h / 2), (w - 1, h / 2)] {
        assert_eq!(total(&core, x, y, w), Vec3::ZERO, "pixel ({x}, {y})");
    }

    core.render(&view, Convergence::Converge, false).unwrap();
    assert_eq!(core.samples_taken(), 2);
    assert_eq!(core.stats().samples_taken, 2);
}

#[test]
fn test_restart_clears_accumulation() {
    let (w, h) = (16, 16);
    let (mut core, view) = triangle_core(w, h);
    core.render(&view, Convergence::Restart, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    let single: Vec<Vec3> = core.accumulator().unwrap().iter().map(|t| t.total()).collect();
    core.render(&view, Convergence::Converge, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    assert_eq!(core.samples_taken(), 3);

    // Restart, then replay the same frame sequence: the accumulator holds
    // only what was rendered since the restart.
    core.render(&view, Convergence::Restart, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    assert_eq!(core.samples_taken(), 1);
    let sum: f32 = single.iter().map(|c| c.element_sum()).sum();
    let again: f32 = core.accumulator().unwrap().iter().map(|t| t.total().element_sum()).sum();
    assert!(sum > 0.0);
    assert!((again - sum).abs() <= sum * 0.5, "{again} vs {sum}");
}

#[test]
fn test_resize_reallocates() {
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(100, 100, 1).unwrap();
    DemoScene::single_triangle().apply(&mut core).unwrap();
    let view = DemoScene::single_triangle().camera(1.0);
    core.render(&view, Convergence::Restart, false).unwrap();
    assert!(core.samples_taken() > 0);
    let before = core.stats().pool_generation;

    core.set_target(400, 400, 1).unwrap();
    let layout = core.pool_layout().unwrap();
    assert!(layout.max_pixels >= 160_000);
    assert_eq!(layout.max_pixels, 160_000 + (160_000 >> 4));
    assert_eq!(layout.path_capacity, layout.max_pixels);
    assert_eq!(layout.shadow_capacity, layout.max_pixels * 2);
    assert_eq!(core.samples_taken(), 0);
    assert!(core.accumulator().unwrap().iter().all(|t| t.is_zero()));
    assert_eq!(core.display().unwrap().len(), 160_000);

    core.render(&view, Convergence::Restart, false).unwrap();
    assert_eq!(core.stats().pool_generation, before + 1);
}

#[test]
fn test_shrink_keeps_buffers_spp_change_reallocates() {
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(64, 64, 1).unwrap();
    let big = core.pool_layout().unwrap();
    core.set_target(32, 32, 1).unwrap();
    let small = core.pool_layout().unwrap();
    assert_eq!(small.max_pixels, big.max_pixels);
    assert_eq!((small.width, small.height), (32, 32));
    assert_eq!(core.display().unwrap().len(), 32 * 32);

    core.set_target(32, 32, 2).unwrap();
    let two = core.pool_layout().unwrap();
    assert_eq!(two.spp, 2);
    assert_eq!(two.max_pixels, 1024 + 64);
    assert_eq!(two.path_capacity, two.max_pixels * 2);
}

#[test]
fn test_no_lights_no_shadow_work() {
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(16, 16, 1).unwrap();
    let mut scene = DemoScene::single_triangle();
    scene.point_lights.clear();
    scene.apply(&mut core).unwrap();
    core.render(&scene.camera(1.0), Convergence::Restart, false).unwrap();

    let stats = core.stats();
    assert_eq!(stats.total_shadow_rays, 0);
    assert_eq!(stats.shadow_dispatches, 0);
    assert_eq!(stats.primary_rays, 256);
    let display = core.display().unwrap();
    assert_eq!(display.len(), 256);
    assert!(display.iter().all(|p| p.truncate() == Vec3::ZERO));
}

#[test]
fn test_unfiltered_display_is_accumulator_average() {
    let (w, h) = (24, 16);
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(w, h, 2).unwrap();
    let scene = DemoScene::cornell_box();
    scene.apply(&mut core).unwrap();
    let view = scene.camera(w as f32 / h as f32);
    core.render(&view, Convergence::Restart, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    let n = core.samples_taken() as f32;
    assert_eq!(n, 4.0);

    let acc = core.accumulator().unwrap();
    let display = core.display().unwrap();
    for (d, a) in display.iter().zip(acc) {
        let expected = a.total() / n;
        assert!((d.truncate() - expected).abs().max_element() <= 1e-5 * (1.0 + expected.max_element()));
    }
    assert!(display.iter().any(|p| p.x > 0.0));
}

#[test]
fn test_filter_pipeline_produces_finite_image() {
    let (w, h) = (32, 24);
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.setting("filter", 1.0).unwrap();
    core.setting("TAA", 1.0).unwrap();
    core.set_target(w, h, 1).unwrap();
    let scene = DemoScene::cornell_box();
    scene.apply(&mut core).unwrap();
    let view = scene.camera(w as f32 / h as f32);

    core.render(&view, Convergence::Restart, false).unwrap();
    for _ in 0..4 {
        core.render(&view, Convergence::Converge, false).unwrap();
    }
    let display = core.display().unwrap();
    assert_eq!(display.len(), (w * h) as usize);
    assert!(display.iter().all(|p| p.is_finite() && p.min_element() >= 0.0));
    assert!(display.iter().any(|p| p.x > 0.0));
}

#[test]
fn test_filter_toggle_back_matches_direct() {
    let (w, h) = (16, 16);
    let (mut core, view) = triangle_core(w, h);
    core.setting("filter", 1.0).unwrap();
    core.render(&view, Convergence::Restart, false).unwrap();
    core.setting("filter", 0.0).unwrap();
    core.render(&view, Convergence::Restart, false).unwrap();
    let n = core.samples_taken() as f32;
    let acc = core.accumulator().unwrap();
    for (d, a) in core.display().unwrap().iter().zip(acc) {
        assert!((d.truncate() - a.total() / n).abs().max_element() < 1e-5);
    }
}

#[test]
fn test_probe_reports_hit() {
    let (w, h) = (33, 33);
    let (mut core, view) = triangle_core(w, h);
    core.set_probe_pos(UVec2::new(16, 16));
    core.render(&view, Convergence::Restart, false).unwrap();
    let stats = core.stats();
    assert_eq!(stats.probed_instance, Some(0));
    assert_eq!(stats.probed_triangle, Some(0));
    assert!((stats.probed_distance - 3.0).abs() < 0.05, "{}", stats.probed_distance);
    let pos = stats.probed_world_pos.unwrap();
    assert!(pos.z.abs() < 0.05 && pos.truncate().length() < 0.2, "{pos:?}");

    core.set_probe_pos(UVec2::new(0, 0));
    core.render(&view, Convergence::Converge, false).unwrap();
    let stats = core.stats();
    assert_eq!(stats.probed_instance, None);
    assert_eq!(stats.probed_world_pos, None);
}

#[test]
fn test_settings() {
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.setting("clampValue", 4.0).unwrap();
    core.setting("epsilon", 1.0e-3).unwrap();
    assert_eq!(core.settings().clamp_value, 4.0);
    assert_eq!(core.settings().epsilon, 1.0e-3);
    let err = core.setting("exposure", 1.0).unwrap_err();
    assert!(matches!(err, Error::UnknownSetting(_)));
}

#[test]
fn test_stats_snapshot() {
    let (w, h) = (16, 16);
    let mut core = RenderCore::init(sync_config()).unwrap();
    core.set_target(w, h, 1).unwrap();
    let scene = DemoScene::cornell_box();
    scene.apply(&mut core).unwrap();
    core.render(&scene.camera(1.0), Convergence::Restart, false).unwrap();

    let s = core.stats();
    assert!(s.device.name.starts_with("host"));
    assert_eq!(s.primary_rays, w * h);
    assert!(s.bounce1_rays <= s.primary_rays);
    assert_eq!(s.total_rays, s.total_extension_rays + s.total_shadow_rays);
    assert_eq!(s.queue_swaps, s.bounce_iterations);
    assert!(s.bounce_iterations <= 3);
    assert_eq!(s.blas_rebuilds, 3);
    assert_eq!((s.argb32_texels, s.argb128_texels, s.nrm32_texels), (16, 16, 16));
    assert_eq!(core.state(), FrameState::Idle);

    core.render(&scene.camera(1.0), Convergence::Converge, false).unwrap();
    assert_eq!(core.stats().blas_rebuilds, 0);
}

#[test]
fn test_small_shadow_queue_still_renders() {
    let config = CoreConfig {
        shadow_queue_capacity: Some(16),
        ..sync_config()
    };
    let mut core = RenderCore::init(config).unwrap();
    core.set_target(16, 16, 1).unwrap();
    let scene = DemoScene::single_triangle();
    scene.apply(&mut core).unwrap();
    let layout = core.pool_layout().unwrap();
    assert_eq!(layout.shadow_capacity, layout.path_capacity);

    let view = scene.camera(1.0);
    core.render(&view, Convergence::Restart, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    let stats = core.stats();
    assert!(stats.total_shadow_rays > 0);
    assert!(core.display().unwrap().iter().any(|p| p.x > 0.0));
}

#[test]
fn test_picked_instance_uses_caller_index() {
    let (w, h) = (33, 33);
    let (mut core, view) = triangle_core(w, h);
    core.set_instance(0, -1, Mat4::IDENTITY).unwrap();
    core.set_instance(2, 0, Mat4::IDENTITY).unwrap();
    core.set_probe_pos(UVec2::new(16, 16));
    core.render(&view, Convergence::Restart, false).unwrap();
    let stats = core.stats();
    assert_eq!(stats.probed_instance, Some(2));
    assert_eq!(stats.probed_triangle, Some(0));
}
