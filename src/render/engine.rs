//! State needed to render one frame, owned by whichever thread runs it.

use std::time::{Duration, Instant};

use tracing::{debug, debug_span};

use super::filter::{finalize_frame, FinalizePath};
use super::pool::BufferPool;
use super::session::ComputeSession;
use super::stats::PhaseTimer;
use super::wavefront::{run_wavefront, LoopReport};
use crate::kernels::KernelParams;
use crate::scene::SceneStore;
use crate::{Error, Result};

/// Session, scene and buffers. Moved to the worker for an async frame and
/// handed back with the result.
pub struct FrameEngine {
    pub session: ComputeSession,
    pub scene: SceneStore,
    pub pool: Option<BufferPool>,
}

/// Result of the dispatch half of a frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub wavefront: LoopReport,
    /// Bottom-level structures rebuilt for this frame.
    pub blas_rebuilds: u32,
    pub build_time: Duration,
    pub render_time: Duration,
}

impl FrameEngine {
    pub fn new(session: ComputeSession) -> Self {
        Self {
            session,
            scene: SceneStore::new(),
            pool: None,
        }
    }

    /// Something to render into and something to render.
    pub fn is_ready(&self) -> bool {
        self.pool.is_some() && self.scene.is_ready()
    }

    /// Refresh acceleration structures and run the wavefront loop.
    pub fn render_frame(&mut self, params: &KernelParams) -> Result<FrameReport> {
        let _span = debug_span!("render_frame", frame = params.frame, samples = params.samples_taken).entered();
        let start = Instant::now();
        let mut report = FrameReport::default();

        let timer = PhaseTimer::start();
        report.blas_rebuilds = self.refresh_acceleration()?;
        timer.stop(&mut report.build_time);

        let Self { session, scene, pool } = self;
        let pool = pool.as_mut().ok_or_else(|| Error::other("render without a target"))?;
        if params.samples_taken == 0 {
            pool.clear_accumulator();
        }
        report.wavefront = run_wavefront(session, pool, scene, params)?;
        report.render_time = start.elapsed();
        debug!(
            rebuilds = report.blas_rebuilds,
            iterations = report.wavefront.iterations,
            elapsed_ms = report.render_time.as_secs_f64() * 1e3,
            "frame dispatched"
        );
        Ok(report)
    }

    /// Write the displayable image; returns the path taken and its duration.
    pub fn finalize_frame(&mut self, params: &KernelParams) -> Result<(FinalizePath, Duration)> {
        let start = Instant::now();
        let Self { session, scene, pool } = self;
        let pool = pool.as_mut().ok_or_else(|| Error::other("finalize without a target"))?;
        let path = finalize_frame(session, pool, scene, params)?;
        Ok((path, start.elapsed()))
    }

    /// Rebuild dirty bottom-level structures, then the top level always.
    fn refresh_acceleration(&mut self) -> Result<u32> {
        let mut rebuilt = 0;
        for (index, mesh) in self.scene.meshes.iter_mut().enumerate() {
            if !mesh.dirty {
                continue;
            }
            self.session.accelerator.build_mesh(index, mesh)?;
            mesh.dirty = false;
            rebuilt += 1;
        }
        self.scene.update_instance_descs();
        self.session
            .accelerator
            .build_instances(&self.scene.instance_descs, &self.scene.meshes)?;
        Ok(rebuilt)
    }
}
