//! Bounce-loop scheduling against a scripted accelerator.
//!
//! The mock's shading pass reports a fixed number of continuations and
//! appends a fixed number of shadow rays per depth, so the loop's control
//! decisions can be checked exactly. At depth 1 it also adds `frame + 1` to
//! every pixel's direct radiance, which makes accumulation exact.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use parking_lot::Mutex;

use wavefront::device::{Accelerator, Bindings, DeviceInfo, Hit, Kernel, Launch, Ray};
use wavefront::prelude::*;
use wavefront::scene::{InstanceDesc, Mesh};

/// What the mock saw, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
enum Event {
    Spawn(Launch),
    Intersect(usize),
    Shade { depth: u32, launch: Launch },
    Occlusion(usize),
    Connect(u32),
    BuildMesh(usize),
    BuildInstances(usize),
    Finalize,
}

#[derive(Clone, Default)]
struct Script {
    /// Continuations reported after the shading pass of depth i+1.
    extensions: Vec<u32>,
    /// Shadow rays appended by the shading pass of depth i+1.
    shadows: Vec<u32>,
}

struct ScriptedAccelerator {
    script: Script,
    log: Arc<Mutex<Vec<Event>>>,
}

impl ScriptedAccelerator {
    fn new(script: Script) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (Self { script, log: log.clone() }, log)
    }

    fn push(&self, e: Event) {
        self.log.lock().push(e);
    }
}

impl Accelerator for ScriptedAccelerator {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "scripted".into(),
            backend: "mock".into(),
            compute_units: 1,
            memory_mib: 0,
        }
    }

    fn build_mesh(&mut self, index: usize, _mesh: &Mesh) -> wavefront::Result<()> {
        self.push(Event::BuildMesh(index));
        Ok(())
    }

    fn build_instances(&mut self, instances: &[InstanceDesc], _meshes: &[Mesh]) -> wavefront::Result<()> {
        self.push(Event::BuildInstances(instances.len()));
        Ok(())
    }

    fn intersect(&self, rays: &[Ray], hits: &mut [Hit]) -> wavefront::Result<()> {
        hits[..rays.len()].fill(Hit::MISS);
        self.push(Event::Intersect(rays.len()));
        Ok(())
    }

    fn occlusion(&self, rays: &[Ray], occluded: &mut [u32]) -> wavefront::Result<()> {
        occluded.fill(0);
        self.push(Event::Occlusion(rays.len()));
        Ok(())
    }

    fn dispatch(&self, kernel: Kernel, launch: Launch, b: &mut Bindings<'_>) -> wavefront::Result<()> {
        match kernel {
            Kernel::SpawnPrimary => self.push(Event::Spawn(launch)),
            Kernel::Shade { depth } => {
                let i = depth as usize - 1;
                let ext = self.script.extensions.get(i).copied().unwrap_or(0);
                let shadows = self.script.shadows.get(i).copied().unwrap_or(0);
                let pending = b.counters.shadow_rays + shadows;
                let capacity = b.pool.shadow_capacity();
                if pending as usize > capacity {
                    return Err(wavefront::Error::ShadowQueueOverflow {
                        requested: pending as usize,
                        capacity,
                    });
                }
                for slot in b.pool.potentials[b.counters.shadow_rays as usize..pending as usize].iter_mut() {
                    *slot = wavefront::device::Potential::new(Vec3::ONE, 0, false);
                }
                if let Launch::Screen { width, height, .. } = launch {
                    let value = Vec3::splat((b.params.frame + 1) as f32);
                    let pixels = (width * height) as usize;
                    for texel in &mut b.pool.accumulator[..pixels] {
                        texel.add(value, false);
                    }
                }
                b.counters.extension_rays = ext;
                b.counters.shadow_rays = pending;
                self.push(Event::Shade { depth, launch });
            }
            Kernel::Connect => self.push(Event::Connect(launch.len() as u32)),
            Kernel::Finalize => self.push(Event::Finalize),
            _ => {}
        }
        Ok(())
    }
}

const W: u32 = 8;
const H: u32 = 8;

fn core_with(script: Script, config: CoreConfig) -> (RenderCore, Arc<Mutex<Vec<Event>>>) {
    let (accel, log) = ScriptedAccelerator::new(script);
    let mut core = RenderCore::with_accelerator(config, Box::new(accel)).unwrap();
    core.set_target(W, H, 1).unwrap();
    let tri = [Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::new(0.0, 1.0, 0.0, 1.0)];
    let attr = TriangleAttributes::flat([Vec3::ZERO, Vec3::X, Vec3::Y], 0);
    core.set_geometry(0, &tri, &[attr]).unwrap();
    core.set_instance(0, 0, Mat4::IDENTITY).unwrap();
    (core, log)
}

fn config(shadow_capacity: Option<usize>) -> CoreConfig {
    CoreConfig {
        async_worker: false,
        feature_buffers: false,
        shadow_queue_capacity: shadow_capacity,
        ..CoreConfig::default()
    }
}

fn connects(log: &[Event]) -> Vec<u32> {
    log.iter()
        .filter_map(|e| match e {
            Event::Connect(k) => Some(*k),
            _ => None,
        })
        .collect()
}

fn render(core: &mut RenderCore) {
    core.render(&ViewPyramid::default(), Convergence::Restart, false).unwrap();
}

#[test]
fn test_flush_when_queue_would_overrun() {
    // 64 paths. Depth 1: 60 continue, 50 pending -> 110 >= 100 flushes.
    // Depth 2: 30 continue, 40 pending -> 70 < 100, no flush.
    let script = Script {
        extensions: vec![60, 30, 10],
        shadows: vec![50, 40, 5],
    };
    let (mut core, log) = core_with(script, config(Some(100)));
    render(&mut core);

    let log = log.lock();
    assert_eq!(connects(&log), vec![50, 45]);
    let stats = core.stats();
    assert_eq!(stats.overflow_flushes, 1);
    assert_eq!(stats.shadow_dispatches, 2);
    assert_eq!(stats.total_shadow_rays, 95);
    assert_eq!(stats.bounce_iterations, 3);
}

#[test]
fn test_flush_threshold_is_inclusive() {
    // 40 continuing + 60 pending == capacity.
    let script = Script {
        extensions: vec![40, 0],
        shadows: vec![60, 0],
    };
    let (mut core, log) = core_with(script, config(Some(100)));
    render(&mut core);
    assert_eq!(connects(&log.lock()), vec![60]);
    assert_eq!(core.stats().overflow_flushes, 1);

    // One below: no flush, settled once at the end.
    let script = Script {
        extensions: vec![39, 0],
        shadows: vec![60, 0],
    };
    let (mut core, log) = core_with(script, config(Some(100)));
    render(&mut core);
    assert_eq!(connects(&log.lock()), vec![60]);
    assert_eq!(core.stats().overflow_flushes, 0);
}

#[test]
fn test_no_flush_with_default_capacity() {
    let script = Script {
        extensions: vec![64, 64, 64],
        shadows: vec![20, 20, 20],
    };
    // Capacity is (64 + 4) * 2 = 136; the pending count never gets close.
    let (mut core, log) = core_with(script, config(None));
    assert_eq!(core.pool_layout().unwrap().shadow_capacity, 136);
    render(&mut core);
    assert_eq!(connects(&log.lock()), vec![60]);
    let stats = core.stats();
    assert_eq!(stats.overflow_flushes, 0);
    assert_eq!(stats.shadow_dispatches, 1);
}

#[test]
fn test_stops_when_no_path_survives() {
    let script = Script {
        extensions: vec![0],
        shadows: vec![10],
    };
    let (mut core, log) = core_with(script, config(None));
    render(&mut core);
    let log = log.lock();
    let shades = log.iter().filter(|e| matches!(e, Event::Shade { .. })).count();
    assert_eq!(shades, 1);
    assert_eq!(connects(&log), vec![10]);
    let stats = core.stats();
    assert_eq!(stats.bounce_iterations, 1);
    assert_eq!(stats.queue_swaps, 1);
}

#[test]
fn test_depth_ceiling_truncates() {
    let script = Script {
        extensions: vec![64, 64, 64, 64, 64],
        shadows: vec![],
    };
    let (mut core, log) = core_with(script, config(None));
    render(&mut core);
    let log = log.lock();
    let depths: Vec<u32> = log
        .iter()
        .filter_map(|e| match e {
            Event::Shade { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(depths, vec![1, 2, 3]);
    assert_eq!(core.stats().queue_swaps, 3);
}

#[test]
fn test_launch_shapes() {
    let script = Script {
        extensions: vec![20, 5, 0],
        shadows: vec![],
    };
    let (mut core, log) = core_with(script, config(None));
    render(&mut core);
    let log = log.lock();
    let screen = Launch::Screen { width: W, height: H, spp: 1 };
    assert_eq!(log.iter().find(|e| matches!(e, Event::Spawn(_))), Some(&Event::Spawn(screen)));
    let shades: Vec<&Event> = log.iter().filter(|e| matches!(e, Event::Shade { .. })).collect();
    assert_eq!(
        shades,
        vec![
            &Event::Shade { depth: 1, launch: screen },
            &Event::Shade { depth: 2, launch: Launch::Linear(20) },
            &Event::Shade { depth: 3, launch: Launch::Linear(5) },
        ]
    );
    let intersects: Vec<&Event> = log.iter().filter(|e| matches!(e, Event::Intersect(_))).collect();
    assert_eq!(intersects, vec![&Event::Intersect(64), &Event::Intersect(20), &Event::Intersect(5)]);
    let stats = core.stats();
    assert_eq!((stats.primary_rays, stats.bounce1_rays, stats.deep_rays), (64, 20, 5));
    assert_eq!(stats.total_extension_rays, 89);
}

#[test]
fn test_counter_invariant_violation_is_an_error() {
    let script = Script {
        extensions: vec![65],
        shadows: vec![],
    };
    let (mut core, _log) = core_with(script, config(None));
    let err = core.render(&ViewPyramid::default(), Convergence::Restart, false).unwrap_err();
    assert!(matches!(err, wavefront::Error::CounterInvariant { produced: 65, fed: 64 }));
}

#[test]
fn test_no_shadow_rays_no_resolver_dispatch() {
    let script = Script {
        extensions: vec![32, 16, 8],
        shadows: vec![],
    };
    let (mut core, log) = core_with(script, config(None));
    render(&mut core);
    let log = log.lock();
    assert!(connects(&log).is_empty());
    assert!(!log.iter().any(|e| matches!(e, Event::Occlusion(_))));
    assert_eq!(core.stats().shadow_dispatches, 0);
}

#[test]
fn test_acceleration_refresh_each_frame() {
    let script = Script {
        extensions: vec![0],
        shadows: vec![],
    };
    let (mut core, log) = core_with(script, config(None));
    render(&mut core);
    render(&mut core);
    let log = log.lock();
    let meshes = log.iter().filter(|e| matches!(e, Event::BuildMesh(_))).count();
    let tops = log.iter().filter(|e| matches!(e, Event::BuildInstances(1))).count();
    assert_eq!(meshes, 1, "clean meshes are not rebuilt");
    assert_eq!(tops, 2, "top level is rebuilt every frame");
    assert_eq!(log.iter().filter(|e| **e == Event::Finalize).count(), 2);
}

fn pixel_totals(core: &RenderCore) -> Vec<f32> {
    core.accumulator().unwrap().iter().map(|t| t.total().x).collect()
}

#[test]
fn test_accumulator_holds_frames_since_restart() {
    let script = Script {
        extensions: vec![0],
        shadows: vec![],
    };
    let (mut core, _log) = core_with(script, config(None));
    let view = ViewPyramid::default();

    // Frames 0..3 add 1, 2, 3, 4. The Converge right after a restart starts
    // over, so only frames 1..3 remain.
    core.render(&view, Convergence::Restart, false).unwrap();
    assert_eq!(pixel_totals(&core), vec![1.0; 64]);
    core.render(&view, Convergence::Converge, false).unwrap();
    assert_eq!(pixel_totals(&core), vec![2.0; 64]);
    core.render(&view, Convergence::Converge, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    assert_eq!(pixel_totals(&core), vec![2.0 + 3.0 + 4.0; 64]);
    assert_eq!(core.samples_taken(), 3);

    // Frames 4 and 5 add 5 and 6; the restart pair keeps only frame 5.
    core.render(&view, Convergence::Restart, false).unwrap();
    core.render(&view, Convergence::Converge, false).unwrap();
    assert_eq!(pixel_totals(&core), vec![6.0; 64]);
    assert_eq!(core.samples_taken(), 1);

    // A new target drops everything accumulated.
    core.set_target(W, H, 1).unwrap();
    assert_eq!(pixel_totals(&core), vec![0.0; 64]);
}
