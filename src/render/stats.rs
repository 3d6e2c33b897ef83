//! Per-frame statistics snapshot.

use std::time::{Duration, Instant};

use glam::Vec3;

use crate::device::DeviceInfo;

/// Snapshot returned by `RenderCore::stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreStats {
    pub device: DeviceInfo,

    // Ray counts of the last frame
    pub primary_rays: u32,
    pub bounce1_rays: u32,
    pub deep_rays: u32,
    pub total_extension_rays: u32,
    pub total_shadow_rays: u32,
    pub total_rays: u32,

    // Phase timings of the last frame
    pub trace_time_primary: Duration,
    pub trace_time_bounce1: Duration,
    pub trace_time_deep: Duration,
    pub shade_time: Duration,
    pub shadow_trace_time: Duration,
    pub filter_time: Duration,
    pub render_time: Duration,
    /// Time spent outside `render` since the previous frame finished.
    pub frame_overhead: Duration,

    // Loop bookkeeping
    pub bounce_iterations: u32,
    pub queue_swaps: u32,
    pub shadow_dispatches: u32,
    pub overflow_flushes: u32,
    pub counter_readbacks: u64,
    pub samples_taken: u32,

    // Probe
    pub probed_instance: Option<u32>,
    pub probed_triangle: Option<u32>,
    pub probed_distance: f32,
    pub probed_world_pos: Option<Vec3>,

    // Scene
    pub argb32_texels: usize,
    pub argb128_texels: usize,
    pub nrm32_texels: usize,
    pub blas_rebuilds: u32,
    pub pool_generation: u64,
}

/// Accumulates elapsed time into a duration slot.
#[derive(Debug)]
pub struct PhaseTimer(Instant);

impl PhaseTimer {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn stop(self, slot: &mut Duration) {
        *slot += self.0.elapsed();
    }
}
