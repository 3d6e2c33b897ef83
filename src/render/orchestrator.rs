//! Frame orchestrator: the public face of the render core.

use std::time::Instant;

use glam::{UVec2, Vec2, Vec3, Vec4};
use tracing::{debug, info, info_span, warn};

use super::engine::{FrameEngine, FrameReport};
use super::pool::{BufferPool, PoolLayout};
use super::session::ComputeSession;
use super::settings::{CoreConfig, RenderSettings, Setting};
use super::stats::CoreStats;
use super::view::{Convergence, JitterCycle, ViewPyramid};
use super::worker::RenderWorker;
use crate::device::{AccumTexel, Accelerator, DeviceInfo};
use crate::kernels::KernelParams;
use crate::scene::{HostMaterial, HostTexture, LightSet, SkyDome, TriangleAttributes};
use crate::{Error, Result};

/// Where the orchestrator is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    /// Synchronous frame running on the caller's thread.
    Rendering,
    /// Async frame handed to the worker.
    Dispatched,
    /// Caller blocked in `wait_for_render`.
    Waiting,
    /// Writing the displayable image.
    Finalizing,
}

/// The render core: scene descriptors, buffers, the wavefront loop and
/// the filter, driven one frame at a time.
///
/// Scene mutations and renders issued while an async frame is in flight
/// wait for that frame first.
pub struct RenderCore {
    config: CoreConfig,
    settings: RenderSettings,
    /// `None` while the worker owns it.
    engine: Option<Box<FrameEngine>>,
    worker: Option<RenderWorker>,
    state: FrameState,
    info: DeviceInfo,
    generation: u64,

    samples_taken: u32,
    first_converging: bool,
    jitter: JitterCycle,
    prev_jitter: Vec2,
    prev_view: Option<ViewPyramid>,
    frame: u32,
    probe: Option<UVec2>,

    stats: CoreStats,
    last_frame_end: Option<Instant>,
}

impl RenderCore {
    /// Core on the host accelerator.
    pub fn init(config: CoreConfig) -> Result<Self> {
        let session = ComputeSession::host(&config)?;
        Self::with_session(config, session)
    }

    /// Core whose intersections run on the fastest wgpu adapter.
    #[cfg(feature = "gpu")]
    pub fn init_gpu(config: CoreConfig) -> Result<Self> {
        let session = ComputeSession::gpu(&config)?;
        Self::with_session(config, session)
    }

    /// Core on a caller-provided accelerator.
    pub fn with_accelerator(config: CoreConfig, accelerator: Box<dyn Accelerator>) -> Result<Self> {
        Self::with_session(config, ComputeSession::new(accelerator))
    }

    fn with_session(config: CoreConfig, session: ComputeSession) -> Result<Self> {
        let worker = if config.async_worker { Some(RenderWorker::spawn()?) } else { None };
        let info = session.info().clone();
        info!(max_depth = config.max_path_length, async_worker = worker.is_some(), "render core ready");
        Ok(Self {
            settings: config.settings,
            config,
            engine: Some(Box::new(FrameEngine::new(session))),
            worker,
            state: FrameState::Idle,
            stats: CoreStats {
                device: info.clone(),
                ..CoreStats::default()
            },
            info,
            generation: 0,
            samples_taken: 0,
            first_converging: false,
            jitter: JitterCycle::default(),
            prev_jitter: Vec2::ZERO,
            prev_view: None,
            frame: 0,
            probe: None,
            last_frame_end: None,
        })
    }

    /// Settle any in-flight frame and borrow the engine.
    fn engine_mut(&mut self) -> Result<&mut FrameEngine> {
        self.wait_for_render()?;
        self.engine.as_deref_mut().ok_or(Error::WorkerDisconnected)
    }

    /// Bind a `width` x `height` target at `spp` samples per pixel.
    ///
    /// Buffers are reallocated when the pixel count outgrows the pool or the
    /// sample count changes. The accumulator is always cleared.
    pub fn set_target(&mut self, width: u32, height: u32, spp: u32) -> Result<()> {
        let spp = spp.max(1);
        let features = self.config.feature_buffers;
        let config = self.config.clone();
        let generation = self.generation;
        let engine = self.engine_mut()?;
        let reallocated = !engine.pool.as_ref().is_some_and(|p| p.layout().fits(width, height, spp));
        if reallocated {
            let layout = PoolLayout::new(width, height, spp, &config);
            // Drop the old arena before building the new one.
            engine.pool = None;
            engine.pool = Some(BufferPool::allocate(layout, features, generation + 1));
        }
        if let Some(pool) = engine.pool.as_mut() {
            if !reallocated {
                pool.retarget(width, height);
            }
            pool.clear_accumulator();
        }
        if reallocated {
            self.generation += 1;
            self.prev_view = None;
        }
        self.samples_taken = 0;
        debug!(width, height, spp, reallocated, "target set");
        Ok(())
    }

    /// Replace mesh `index`. Meshes are introduced in increasing order.
    pub fn set_geometry(&mut self, index: usize, vertices: &[Vec4], attributes: &[TriangleAttributes]) -> Result<()> {
        self.engine_mut()?.scene.set_geometry(index, vertices, attributes);
        Ok(())
    }

    /// Set instance `index`; `mesh == -1` truncates the list to `index`.
    pub fn set_instance(&mut self, index: usize, mesh: i32, transform: glam::Mat4) -> Result<()> {
        self.engine_mut()?.scene.set_instance(index, mesh, transform);
        Ok(())
    }

    pub fn set_textures(&mut self, textures: &[HostTexture]) -> Result<()> {
        self.engine_mut()?.scene.set_textures(textures);
        Ok(())
    }

    /// Materials resolve texture ids, so call after [`Self::set_textures`].
    pub fn set_materials(&mut self, materials: &[HostMaterial]) -> Result<()> {
        self.engine_mut()?.scene.set_materials(materials);
        Ok(())
    }

    pub fn set_lights(&mut self, lights: &LightSet<'_>) -> Result<()> {
        self.engine_mut()?.scene.set_lights(lights);
        Ok(())
    }

    pub fn set_sky_data(&mut self, sky: Option<SkyDome>) -> Result<()> {
        self.engine_mut()?.scene.set_sky(sky);
        Ok(())
    }

    /// Set a named control. Booleans treat `0.0` as off.
    pub fn setting(&mut self, name: &str, value: f32) -> Result<()> {
        let setting: Setting = name.parse()?;
        if self.settings.apply(setting, value) {
            debug!(name, value, "setting changed");
        }
        Ok(())
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Report hit diagnostics for `pixel` in the statistics.
    pub fn set_probe_pos(&mut self, pixel: UVec2) {
        self.probe = Some(pixel);
    }

    /// Render one frame of `view`.
    ///
    /// With `async_mode` the dispatches run on the worker and the call
    /// returns at once; [`Self::wait_for_render`] completes the frame. Without
    /// a target or instances this is a no-op.
    pub fn render(&mut self, view: &ViewPyramid, convergence: Convergence, async_mode: bool) -> Result<()> {
        let settings = self.settings;
        let max_depth = self.config.max_path_length;
        let probe = self.probe;
        let engine = self.engine_mut()?;
        if !engine.is_ready() {
            return Ok(());
        }
        let Some(layout) = engine.pool.as_ref().map(|p| *p.layout()) else {
            return Ok(());
        };
        let has_features = engine.pool.as_ref().is_some_and(|p| p.features.is_some());
        let shadows = !engine.scene.no_direct_lights();

        if let Some(end) = self.last_frame_end {
            self.stats.frame_overhead = end.elapsed();
        }

        if convergence == Convergence::Restart || self.first_converging {
            self.samples_taken = 0;
            self.first_converging = true;
        }
        if convergence == Convergence::Converge {
            self.first_converging = false;
        }

        let filter = settings.filter && has_features;
        let jitter = self.jitter.advance(filter && settings.taa);
        let mut base = *view;
        if filter {
            base.aperture = 0.0;
        }
        let (width, height, spp) = (layout.width, layout.height, layout.spp);
        let params = KernelParams {
            width,
            height,
            spp,
            samples_taken: self.samples_taken,
            accumulated: self.samples_taken + spp,
            frame: self.frame,
            blue_slot: self.frame & 0xff,
            view: base.jittered(jitter, width, height),
            prev_view: self.prev_view.unwrap_or(base),
            base_view: base,
            jitter,
            prev_jitter: self.prev_jitter,
            max_depth,
            epsilon: settings.epsilon,
            clamp_value: settings.clamp_value,
            clamp_direct: settings.clamp_direct,
            clamp_indirect: settings.clamp_indirect,
            filter,
            taa: filter && settings.taa,
            stationary: self.samples_taken != 0,
            shadows,
            probe,
        };

        if async_mode {
            if self.worker.is_none() {
                self.worker = Some(RenderWorker::spawn()?);
            }
            let engine = self.engine.take().ok_or(Error::WorkerDisconnected)?;
            let submitted = match self.worker.as_ref() {
                Some(worker) => worker.submit(engine, params),
                None => Err(engine),
            };
            match submitted {
                Ok(()) => {
                    self.state = FrameState::Dispatched;
                    return Ok(());
                }
                Err(engine) => {
                    warn!("render worker unavailable, rendering synchronously");
                    self.engine = Some(engine);
                    self.worker = None;
                }
            }
        }

        self.state = FrameState::Rendering;
        let engine = self.engine.as_deref_mut().ok_or(Error::WorkerDisconnected)?;
        let report = engine.render_frame(&params);
        self.complete(params, report)
    }

    /// Block until the async frame completes and finalize it. No-op when
    /// nothing is in flight.
    pub fn wait_for_render(&mut self) -> Result<()> {
        if self.state != FrameState::Dispatched {
            return Ok(());
        }
        self.state = FrameState::Waiting;
        let done = match self.worker.as_ref().map(RenderWorker::wait) {
            Some(Ok(done)) => done,
            Some(Err(e)) => {
                self.state = FrameState::Idle;
                return Err(e);
            }
            None => {
                self.state = FrameState::Idle;
                return Err(Error::WorkerDisconnected);
            }
        };
        self.engine = Some(done.engine);
        self.complete(done.params, done.report)
    }

    /// Finalize a dispatched frame on the control thread and fold its
    /// report into the statistics.
    fn complete(&mut self, params: KernelParams, report: Result<FrameReport>) -> Result<()> {
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                self.state = FrameState::Idle;
                return Err(e);
            }
        };
        let _span = info_span!("finalize", frame = params.frame).entered();
        self.state = FrameState::Finalizing;
        let engine = self.engine.as_deref_mut().ok_or(Error::WorkerDisconnected)?;
        let finalized = engine.finalize_frame(&params);
        let (path, filter_time) = match finalized {
            Ok(v) => v,
            Err(e) => {
                self.state = FrameState::Idle;
                return Err(e);
            }
        };

        self.samples_taken += params.spp;
        self.prev_view = Some(params.base_view);
        self.prev_jitter = params.jitter;
        self.frame = self.frame.wrapping_add(1);
        self.update_stats(&params, &report);
        self.stats.filter_time = if params.filter { filter_time } else { Default::default() };
        self.state = FrameState::Idle;
        self.last_frame_end = Some(Instant::now());
        debug!(frame = params.frame, samples = self.samples_taken, finalize = ?path, "frame complete");
        Ok(())
    }

    fn update_stats(&mut self, params: &KernelParams, report: &FrameReport) {
        let w = &report.wavefront;
        let depth = |i: usize| w.rays_per_depth.get(i).copied().unwrap_or(0);
        let counters = &w.counters;
        let s = &mut self.stats;
        s.device = self.info.clone();
        s.primary_rays = depth(0);
        s.bounce1_rays = depth(1);
        s.deep_rays = w.rays_per_depth.iter().skip(2).sum();
        s.total_extension_rays = counters.total_extension_rays;
        s.total_shadow_rays = w.total_shadow_rays;
        s.total_rays = counters.total_extension_rays + w.total_shadow_rays;
        s.trace_time_primary = w.trace_time[0];
        s.trace_time_bounce1 = w.trace_time[1];
        s.trace_time_deep = w.trace_time[2];
        s.shade_time = w.shade_time;
        s.shadow_trace_time = w.shadow_time;
        s.render_time = report.render_time;
        s.bounce_iterations = w.iterations;
        s.queue_swaps = w.queue_swaps;
        s.shadow_dispatches = w.shadow_dispatches;
        s.overflow_flushes = w.overflow_flushes;
        s.samples_taken = self.samples_taken;
        s.blas_rebuilds = report.blas_rebuilds;
        s.pool_generation = self.generation;

        let hit = counters.probed_instance >= 0 && params.probe_index().is_some();
        s.probed_instance = hit.then_some(counters.probed_instance as u32);
        s.probed_triangle = hit.then_some(counters.probed_triangle as u32);
        s.probed_distance = if hit { counters.probed_distance } else { 0.0 };
        s.probed_world_pos = params
            .probe
            .filter(|_| hit)
            .map(|p| probe_world_pos(&params.view, p, params.width, params.height, counters.probed_distance));

        if let Some(engine) = self.engine.as_deref() {
            s.counter_readbacks = engine.session.counters.readbacks();
            let [a, b, c] = engine.scene.textures.texel_counts();
            (s.argb32_texels, s.argb128_texels, s.nrm32_texels) = (a, b, c);
        }
    }

    /// Snapshot of the last completed frame's statistics.
    pub fn stats(&self) -> CoreStats {
        self.stats.clone()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Samples accumulated since the last restart.
    pub fn samples_taken(&self) -> u32 {
        self.samples_taken
    }

    /// True between a restart and the next `Converge` frame.
    pub fn first_converging_frame(&self) -> bool {
        self.first_converging
    }

    /// Layout of the current buffer pool. `None` before a target is set or
    /// while a frame is in flight.
    pub fn pool_layout(&self) -> Option<PoolLayout> {
        self.pool().map(|p| *p.layout())
    }

    fn pool(&self) -> Option<&BufferPool> {
        self.engine.as_deref().and_then(|e| e.pool.as_ref())
    }

    /// The displayable image, `width * height` texels.
    pub fn display(&self) -> Option<&[Vec4]> {
        self.pool().map(|p| p.display.as_slice())
    }

    /// Raw per-pixel accumulation for the current target.
    pub fn accumulator(&self) -> Option<&[AccumTexel]> {
        self.pool().map(|p| &p.accumulator[..p.layout().pixels()])
    }
}

/// World position along the probe pixel's primary ray.
fn probe_world_pos(view: &ViewPyramid, pixel: UVec2, width: u32, height: u32, distance: f32) -> Vec3 {
    let target = view.screen_point(
        (pixel.x as f32 + 0.5) / width as f32,
        (pixel.y as f32 + 0.5) / height as f32,
    );
    let dir = (target - view.pos).normalize_or_zero();
    view.pos + dir * distance
}

impl std::fmt::Debug for RenderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCore")
            .field("device", &self.info.name)
            .field("state", &self.state)
            .field("samples_taken", &self.samples_taken)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
