//! Device-resident record layouts.
//!
//! Every type here is `#[repr(C)]` + `Pod` so it can be uploaded to (or read
//! back from) a compute device without conversion. The layouts follow the
//! wavefront convention of origin/tmin + direction/tmax rays and
//! t/triangle/instance/u/v hit records.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Ray with parametric extent (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Ray {
    pub origin: [f32; 3],
    pub tmin: f32,
    pub direction: [f32; 3],
    pub tmax: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Self {
        Self {
            origin: origin.to_array(),
            tmin,
            direction: direction.to_array(),
            tmax,
        }
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        Vec3::from_array(self.origin)
    }

    #[inline]
    pub fn direction(&self) -> Vec3 {
        Vec3::from_array(self.direction)
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin() + self.direction() * t
    }
}

/// Nearest-hit record (20 bytes). `triangle < 0` is the miss sentinel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Hit {
    pub t: f32,
    pub triangle: i32,
    pub instance: i32,
    pub u: f32,
    pub v: f32,
}

impl Hit {
    pub const MISS: Self = Self {
        t: f32::INFINITY,
        triangle: -1,
        instance: -1,
        u: 0.0,
        v: 0.0,
    };

    #[inline]
    pub fn is_miss(&self) -> bool {
        self.triangle < 0
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self::MISS
    }
}

/// Per-path state carried alongside its ray through the ping-pong queues.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PathState {
    /// Accumulated path throughput.
    pub throughput: [f32; 3],
    /// Target pixel index.
    pub pixel: u32,
    /// Per-path RNG state.
    pub seed: u32,
    /// Bounce depth of the ray this state travels with (1 = primary).
    pub depth: u32,
    /// Sample index within the pixel.
    pub sample: u32,
    /// `PathState::FLAG_*` bits.
    pub flags: u32,
}

impl PathState {
    /// Path has bounced off at least one surface.
    pub const FLAG_BOUNCED: u32 = 1;

    pub fn primary(pixel: u32, sample: u32, seed: u32) -> Self {
        Self {
            throughput: [1.0; 3],
            pixel,
            seed,
            depth: 1,
            sample,
            flags: 0,
        }
    }

    #[inline]
    pub fn throughput(&self) -> Vec3 {
        Vec3::from_array(self.throughput)
    }
}

/// Unconfirmed light contribution of one shadow ray (16 bytes).
///
/// `target` holds the pixel index; the top bit marks an indirect contribution.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Potential {
    pub rgb: [f32; 3],
    pub target: u32,
}

impl Potential {
    pub const INDIRECT_BIT: u32 = 1 << 31;

    pub fn new(rgb: Vec3, pixel: u32, indirect: bool) -> Self {
        Self {
            rgb: rgb.to_array(),
            target: pixel | if indirect { Self::INDIRECT_BIT } else { 0 },
        }
    }

    #[inline]
    pub fn pixel(&self) -> usize {
        (self.target & !Self::INDIRECT_BIT) as usize
    }

    #[inline]
    pub fn is_indirect(&self) -> bool {
        self.target & Self::INDIRECT_BIT != 0
    }
}

/// Accumulator texel, split into direct and indirect radiance.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct AccumTexel {
    pub direct: Vec4,
    pub indirect: Vec4,
}

impl AccumTexel {
    #[inline]
    pub fn add(&mut self, rgb: Vec3, indirect: bool) {
        let slot = if indirect { &mut self.indirect } else { &mut self.direct };
        *slot += rgb.extend(0.0);
    }

    #[inline]
    pub fn total(&self) -> Vec3 {
        (self.direct + self.indirect).truncate()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.direct == Vec4::ZERO && self.indirect == Vec4::ZERO
    }
}

/// Counter record shared between device passes and the host.
///
/// Written by compute passes only; the host reads it back between bounces
/// to size the next launch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Counters {
    /// Paths fed into the current shading pass.
    pub active_paths: u32,
    /// Continuation rays written by the last shading pass.
    pub extension_rays: u32,
    /// Shadow rays pending in the shadow queue.
    pub shadow_rays: u32,
    /// Extension rays traced this frame, primary rays included.
    pub total_extension_rays: u32,
    /// Instance hit under the probe pixel, -1 if none.
    pub probed_instance: i32,
    /// Triangle hit under the probe pixel, -1 if none.
    pub probed_triangle: i32,
    /// Distance to the probed hit.
    pub probed_distance: f32,
    pub _pad: u32,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            active_paths: 0,
            extension_rays: 0,
            shadow_rays: 0,
            total_extension_rays: 0,
            probed_instance: -1,
            probed_triangle: -1,
            probed_distance: 0.0,
            _pad: 0,
        }
    }
}
