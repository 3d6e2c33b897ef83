//! Buffer pool: every per-frame array the kernels read or write.
//!
//! The pool is an arena. Resizing never patches buffers in place: a new
//! pool is built for the new layout and the old one dropped whole.
//! Ping-pong pairs toggle an index instead of moving data.

use glam::{Vec2, Vec3, Vec4};
use tracing::info;

use super::settings::CoreConfig;
use crate::device::{AccumTexel, FilterPlane, Hit, PathState, Potential, Ray};
use crate::{Error, Result};

/// A pair of buffers with a current/previous role designation.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    buffers: [T; 2],
    current: usize,
    swaps: u64,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            buffers: [a, b],
            current: 0,
            swaps: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.buffers[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.buffers[self.current]
    }

    #[inline]
    pub fn previous(&self) -> &T {
        &self.buffers[self.current ^ 1]
    }

    #[inline]
    pub fn previous_mut(&mut self) -> &mut T {
        &mut self.buffers[self.current ^ 1]
    }

    /// Both buffers at once: (current, previous).
    pub fn split_mut(&mut self) -> (&mut T, &mut T) {
        let [a, b] = &mut self.buffers;
        if self.current == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Toggle roles.
    pub fn swap(&mut self) {
        self.current ^= 1;
        self.swaps += 1;
    }

    /// Role toggles since creation.
    pub fn swaps(&self) -> u64 {
        self.swaps
    }
}

impl<T: Clone> PingPong<T> {
    pub fn splat(value: T) -> Self {
        Self::new(value.clone(), value)
    }
}

/// One side of the extension queue: rays plus the path state they carry.
#[derive(Debug, Clone, Default)]
pub struct RayQueue {
    pub rays: Vec<Ray>,
    pub paths: Vec<PathState>,
}

impl RayQueue {
    fn with_capacity(n: usize) -> Self {
        Self {
            rays: vec![Ray::default(); n],
            paths: vec![PathState::default(); n],
        }
    }
}

/// Primary-hit surface data for one pixel (depth 1, sample 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub albedo: Vec3,
    pub normal: Vec3,
    /// -1 when the primary ray escaped.
    pub instance: i32,
}

impl SurfaceSample {
    pub const SKY: Self = Self {
        albedo: Vec3::ONE,
        normal: Vec3::ZERO,
        instance: -1,
    };

    #[inline]
    pub fn is_sky(&self) -> bool {
        self.instance < 0
    }
}

impl Default for SurfaceSample {
    fn default() -> Self {
        Self::SKY
    }
}

/// Per-pixel filter inputs and history. Shading and filtered planes hold
/// two texels per pixel (direct, indirect) with variance in `w`.
#[derive(Debug, Clone)]
pub struct FeatureBuffers {
    pub surface: Vec<SurfaceSample>,
    /// World position in `xyz`, view distance in `w` (0 = sky).
    pub world_pos: PingPong<Vec<Vec4>>,
    /// Screen-space depth gradient.
    pub delta_depth: Vec<Vec2>,
    /// Pixel offset from the previous frame's projection.
    pub motion: Vec<Vec2>,
    /// Matching pixel in the previous frame, `u32::MAX` when invalid.
    pub history: Vec<u32>,
    /// Luminance moments (direct m1, m2, indirect m1, m2).
    pub moments: PingPong<Vec<Vec4>>,
    pub shading: PingPong<Vec<Vec4>>,
    pub filtered: PingPong<Vec<Vec4>>,
}

impl FeatureBuffers {
    fn new(pixels: usize) -> Self {
        Self {
            surface: vec![SurfaceSample::SKY; pixels],
            world_pos: PingPong::splat(vec![Vec4::ZERO; pixels]),
            delta_depth: vec![Vec2::ZERO; pixels],
            motion: vec![Vec2::ZERO; pixels],
            history: vec![u32::MAX; pixels],
            moments: PingPong::splat(vec![Vec4::ZERO; pixels]),
            shading: PingPong::splat(vec![Vec4::ZERO; pixels * 2]),
            filtered: PingPong::splat(vec![Vec4::ZERO; pixels * 2]),
        }
    }

    pub fn plane(&self, plane: FilterPlane) -> &[Vec4] {
        match plane {
            FilterPlane::Shading => self.shading.current(),
            FilterPlane::FilteredCurrent => self.filtered.current(),
            FilterPlane::FilteredPrevious => self.filtered.previous(),
        }
    }

    /// Borrow the guide buffers plus a pass's input and output planes.
    pub fn filter_view(&mut self, input: FilterPlane, output: FilterPlane) -> Result<FilterView<'_>> {
        use FilterPlane::*;
        let Self {
            surface,
            world_pos,
            delta_depth,
            shading,
            filtered,
            ..
        } = self;
        let (input, output): (&Vec<Vec4>, &mut Vec<Vec4>) = match (input, output) {
            (Shading, FilteredCurrent) => (shading.current(), filtered.current_mut()),
            (Shading, FilteredPrevious) => (shading.current(), filtered.previous_mut()),
            (FilteredCurrent, Shading) => (filtered.current(), shading.current_mut()),
            (FilteredPrevious, Shading) => (filtered.previous(), shading.current_mut()),
            (FilteredCurrent, FilteredPrevious) => {
                let (cur, prev) = filtered.split_mut();
                (&*cur, prev)
            }
            (FilteredPrevious, FilteredCurrent) => {
                let (cur, prev) = filtered.split_mut();
                (&*prev, cur)
            }
            (a, b) => return Err(Error::dispatch("apply_filter", format!("{a:?} -> {b:?} aliases one plane"))),
        };
        Ok(FilterView {
            surface,
            world_pos: world_pos.current(),
            delta_depth,
            input,
            output,
        })
    }

    /// End-of-frame role swap for every history pair.
    pub fn swap_history(&mut self) {
        self.world_pos.swap();
        self.moments.swap();
        self.shading.swap();
        self.filtered.swap();
    }
}

/// Borrowed buffers of one edge-aware filter pass.
pub struct FilterView<'a> {
    pub surface: &'a [SurfaceSample],
    pub world_pos: &'a [Vec4],
    pub delta_depth: &'a [Vec2],
    pub input: &'a [Vec4],
    pub output: &'a mut [Vec4],
}

/// Sizes derived from a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    pub width: u32,
    pub height: u32,
    pub spp: u32,
    /// Pixel capacity including slack.
    pub max_pixels: usize,
    /// Extension queue capacity (`max_pixels * spp`).
    pub path_capacity: usize,
    pub shadow_capacity: usize,
}

impl PoolLayout {
    pub fn new(width: u32, height: u32, spp: u32, config: &CoreConfig) -> Self {
        let pixels = width as usize * height as usize;
        let max_pixels = pixels + (pixels >> config.pixel_slack_shift);
        let path_capacity = max_pixels * spp as usize;
        // One shading pass may append a shadow ray per path it is fed.
        let shadow_capacity = config
            .shadow_queue_capacity
            .map_or(path_capacity * config.shadow_rays_per_path as usize, |c| c.max(path_capacity));
        Self {
            width,
            height,
            spp,
            max_pixels,
            path_capacity,
            shadow_capacity,
        }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether a target of this size fits the layout without reallocation.
    pub fn fits(&self, width: u32, height: u32, spp: u32) -> bool {
        width as usize * height as usize <= self.max_pixels && spp == self.spp
    }
}

/// Owned set of device buffers for one target configuration.
#[derive(Debug)]
pub struct BufferPool {
    layout: PoolLayout,
    generation: u64,
    pub queues: PingPong<RayQueue>,
    pub hits: Vec<Hit>,
    pub shadow_rays: Vec<Ray>,
    pub potentials: Vec<Potential>,
    /// One bit per shadow ray.
    pub occluded: Vec<u32>,
    pub accumulator: Vec<AccumTexel>,
    pub features: Option<FeatureBuffers>,
    /// Displayable image, exactly `width * height` texels.
    pub display: Vec<Vec4>,
}

impl BufferPool {
    #[tracing::instrument(skip_all, fields(width = layout.width, height = layout.height, spp = layout.spp))]
    pub fn allocate(layout: PoolLayout, features: bool, generation: u64) -> Self {
        info!(
            max_pixels = layout.max_pixels,
            paths = layout.path_capacity,
            shadow = layout.shadow_capacity,
            "allocating buffer pool"
        );
        Self {
            layout,
            generation,
            queues: PingPong::splat(RayQueue::with_capacity(layout.path_capacity)),
            hits: vec![Hit::MISS; layout.path_capacity],
            shadow_rays: vec![Ray::default(); layout.shadow_capacity],
            potentials: vec![Potential::default(); layout.shadow_capacity],
            occluded: vec![0; layout.shadow_capacity.div_ceil(32)],
            accumulator: vec![AccumTexel::default(); layout.max_pixels],
            features: features.then(|| FeatureBuffers::new(layout.max_pixels)),
            display: vec![Vec4::ZERO; layout.pixels()],
        }
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    /// Number of times a pool has been allocated in this session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn shadow_capacity(&self) -> usize {
        self.layout.shadow_capacity
    }

    /// Retarget within the existing capacity: only the display image follows
    /// the new size.
    pub fn retarget(&mut self, width: u32, height: u32) {
        self.layout.width = width;
        self.layout.height = height;
        self.display.clear();
        self.display.resize(self.layout.pixels(), Vec4::ZERO);
        // History indexed with the old width is meaningless now.
        if let Some(f) = self.features.as_mut() {
            f.world_pos.current_mut().fill(Vec4::ZERO);
            f.world_pos.previous_mut().fill(Vec4::ZERO);
        }
    }

    pub fn clear_accumulator(&mut self) {
        self.accumulator.fill(AccumTexel::default());
    }

    pub fn accumulator_is_clear(&self) -> bool {
        self.accumulator.iter().all(AccumTexel::is_zero)
    }
}
