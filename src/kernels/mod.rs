//! Host implementations of the per-element compute kernels.
//!
//! Each kernel is data-parallel over its launch width. Appends into shared
//! queues (extension rays, shadow rays) are done in a sequential compaction
//! step after the parallel evaluation, which keeps the output order
//! deterministic.

mod camera;
mod connect;
mod filter;
mod finalize;
mod shade;

pub use camera::spawn_primary;
pub use connect::connect;
pub use filter::{apply_filter, prepare_filter, taa, unsharpen};
pub use finalize::{finalize, finalize_no_taa};
pub use shade::shade;

use glam::{UVec2, Vec2};

use crate::render::ViewPyramid;
use crate::util::wang_hash;

/// Constant block shared by every dispatch of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub spp: u32,
    /// Samples accumulated before this frame.
    pub samples_taken: u32,
    /// Samples the accumulator holds once this frame is finalized.
    pub accumulated: u32,
    /// Monotonic frame counter, for seeding.
    pub frame: u32,
    /// Noise table slot for this frame.
    pub blue_slot: u32,
    /// Jittered view used to spawn primary rays.
    pub view: ViewPyramid,
    /// Unjittered view of the previous frame, for reprojection.
    pub prev_view: ViewPyramid,
    /// Unjittered view of this frame.
    pub base_view: ViewPyramid,
    pub jitter: Vec2,
    pub prev_jitter: Vec2,
    pub max_depth: u32,
    pub epsilon: f32,
    pub clamp_value: f32,
    pub clamp_direct: f32,
    pub clamp_indirect: f32,
    /// Filter pipeline active (feature buffers present and enabled).
    pub filter: bool,
    pub taa: bool,
    /// Not the first frame after a restart.
    pub stationary: bool,
    /// Scene has at least one light for next-event estimation.
    pub shadows: bool,
    pub probe: Option<UVec2>,
}

impl KernelParams {
    #[inline]
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Linear index of the probe pixel.
    #[inline]
    pub fn probe_index(&self) -> Option<u32> {
        self.probe
            .filter(|p| p.x < self.width && p.y < self.height)
            .map(|p| p.y * self.width + p.x)
    }
}

/// Hashed per-pixel noise used to decorrelate sample seeds.
#[derive(Debug, Clone)]
pub struct NoiseTable {
    values: Vec<u32>,
}

impl NoiseTable {
    pub const SIZE: u32 = 128;

    pub fn new() -> Self {
        let n = Self::SIZE * Self::SIZE;
        Self {
            values: (0..n).map(|i| wang_hash(i.wrapping_mul(0x9e37_79b9) ^ 0x5bd1_e995)).collect(),
        }
    }

    /// Value for pixel (x, y); `slot` scrolls the table between frames.
    #[inline]
    pub fn at(&self, x: u32, y: u32, slot: u32) -> u32 {
        let m = Self::SIZE - 1;
        let sx = (x + slot.wrapping_mul(61)) & m;
        let sy = (y + slot.wrapping_mul(37)) & m;
        self.values[(sy * Self::SIZE + sx) as usize]
    }
}

impl Default for NoiseTable {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_wraps() {
        let t = NoiseTable::new();
        assert_eq!(t.at(0, 0, 0), t.at(128, 128, 0));
        assert_ne!(t.at(0, 0, 0), t.at(1, 0, 0));
        assert_ne!(t.at(3, 4, 0), t.at(3, 4, 1));
    }

    #[test]
    fn test_probe_index() {
        let mut p = test_util::params(10, 5, 1);
        assert_eq!(p.probe_index(), None);
        p.probe = Some(UVec2::new(3, 2));
        assert_eq!(p.probe_index(), Some(23));
        p.probe = Some(UVec2::new(10, 0));
        assert_eq!(p.probe_index(), None);
    }
}
