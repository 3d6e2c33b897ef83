//! The per-frame bounce loop.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::pool::BufferPool;
use super::session::ComputeSession;
use super::shadow::{needs_shadow_flush, resolve_shadows};
use super::stats::PhaseTimer;
use crate::device::{Counters, Kernel, Launch};
use crate::kernels::KernelParams;
use crate::scene::SceneStore;
use crate::{Error, Result};

/// What one frame's loop did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopReport {
    /// Bounce iterations completed.
    pub iterations: u32,
    /// Ray queue role swaps during this loop.
    pub queue_swaps: u32,
    /// Mid-loop shadow flushes.
    pub overflow_flushes: u32,
    /// Resolver invocations that dispatched work.
    pub shadow_dispatches: u32,
    /// Paths fed into each bounce, index 0 = primary.
    pub rays_per_depth: Vec<u32>,
    pub total_shadow_rays: u32,
    /// Trace time for depth 1, depth 2 and deeper.
    pub trace_time: [Duration; 3],
    pub shade_time: Duration,
    pub shadow_time: Duration,
    /// Counter record at loop end (totals and probe result).
    pub counters: Counters,
}

/// Run one frame: primary spawn, then intersect / shade / read back per
/// depth until no path survives or the depth ceiling is reached, then
/// settle the pending shadow rays exactly once.
#[tracing::instrument(skip_all, fields(width = params.width, height = params.height, spp = params.spp))]
pub fn run_wavefront(
    session: &mut ComputeSession,
    pool: &mut BufferPool,
    scene: &SceneStore,
    params: &KernelParams,
) -> Result<LoopReport> {
    let mut report = LoopReport::default();
    let screen = Launch::Screen {
        width: params.width,
        height: params.height,
        spp: params.spp,
    };
    let capacity = pool.shadow_capacity();
    let swaps_before = pool.queues.swaps();
    let mut active = screen.len() as u32;
    let mut pending = 0u32;

    session.counters.init_for_extend(active);
    session.dispatch(Kernel::SpawnPrimary, screen, params, scene, pool)?;

    for depth in 1..=params.max_depth.max(1) {
        let n = active as usize;
        report.rays_per_depth.push(active);

        let timer = PhaseTimer::start();
        {
            let BufferPool { queues, hits, .. } = &mut *pool;
            session.accelerator.intersect(&queues.current().rays[..n], &mut hits[..n])?;
        }
        timer.stop(&mut report.trace_time[(depth as usize - 1).min(2)]);

        let launch = if depth == 1 { screen } else { Launch::Linear(active) };
        let timer = PhaseTimer::start();
        session.dispatch(Kernel::Shade { depth }, launch, params, scene, pool)?;
        timer.stop(&mut report.shade_time);
        pool.queues.swap();

        let counters = session.counters.read_back();
        report.iterations += 1;
        if counters.extension_rays > active {
            return Err(Error::CounterInvariant {
                produced: counters.extension_rays,
                fed: active,
            });
        }
        report.total_shadow_rays += counters.shadow_rays - pending;
        pending = counters.shadow_rays;
        let continuing = counters.extension_rays;
        trace!(depth, fed = active, continuing, pending, "bounce done");
        if continuing == 0 || depth >= params.max_depth {
            break;
        }

        if needs_shadow_flush(continuing, pending, capacity) {
            warn!(continuing, pending, capacity, "shadow queue near capacity, flushing early");
            let timer = PhaseTimer::start();
            if resolve_shadows(session, pool, scene, params, pending)? {
                report.shadow_dispatches += 1;
            }
            timer.stop(&mut report.shadow_time);
            session.counters.reset_shadow();
            pending = 0;
            report.overflow_flushes += 1;
        }
        session.counters.init_subsequent();
        active = continuing;
    }

    let timer = PhaseTimer::start();
    if resolve_shadows(session, pool, scene, params, pending)? {
        report.shadow_dispatches += 1;
    }
    timer.stop(&mut report.shadow_time);
    session.counters.reset_shadow();

    report.queue_swaps = (pool.queues.swaps() - swaps_before) as u32;
    report.counters = session.counters.read_back();
    debug!(
        iterations = report.iterations,
        shadow_rays = report.total_shadow_rays,
        flushes = report.overflow_flushes,
        "wavefront loop done"
    );
    Ok(report)
}
