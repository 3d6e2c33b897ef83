//! Camera description and per-frame jitter.

use glam::{Vec2, Vec3};

/// Thin-lens camera as an eye point plus three screen-plane corners:
/// `p1` top-left, `p2` top-right, `p3` bottom-left. The screen plane sits
/// at the focal distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPyramid {
    pub pos: Vec3,
    pub p1: Vec3,
    pub p2: Vec3,
    pub p3: Vec3,
    /// Lens radius; 0 is a pinhole.
    pub aperture: f32,
    /// Angle subtended by one pixel, for ray cones.
    pub spread_angle: f32,
}

impl Default for ViewPyramid {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO, Vec3::Y, 60.0, 1.0)
    }
}

impl ViewPyramid {
    /// Pinhole camera at `eye` focused on `target`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y_deg: f32, aspect: f32) -> Self {
        let to_target = target - eye;
        let dist = to_target.length().max(1.0e-3);
        let forward = to_target / dist;
        let right = forward.cross(up).normalize_or(Vec3::X);
        let up = right.cross(forward);
        let half_h = (fov_y_deg.to_radians() * 0.5).tan() * dist;
        let half_w = half_h * aspect;
        let center = eye + forward * dist;
        Self {
            pos: eye,
            p1: center - right * half_w + up * half_h,
            p2: center + right * half_w + up * half_h,
            p3: center - right * half_w - up * half_h,
            aperture: 0.0,
            spread_angle: 0.0,
        }
    }

    /// Full-width screen vector, left to right.
    #[inline]
    pub fn right(&self) -> Vec3 {
        self.p2 - self.p1
    }

    /// Full-height screen vector, top to bottom.
    #[inline]
    pub fn down(&self) -> Vec3 {
        self.p3 - self.p1
    }

    /// Point on the screen plane for normalized coordinates (0,0 = top-left).
    #[inline]
    pub fn screen_point(&self, sx: f32, sy: f32) -> Vec3 {
        self.p1 + self.right() * sx + self.down() * sy
    }

    /// Shift the frustum by `jitter` pixels of a `width` x `height` target.
    pub fn jittered(&self, jitter: Vec2, width: u32, height: u32) -> Self {
        let offset = self.right() * (jitter.x / width as f32) + self.down() * (jitter.y / height as f32);
        Self {
            p1: self.p1 + offset,
            p2: self.p2 + offset,
            p3: self.p3 + offset,
            ..*self
        }
    }

    /// Continuous pixel coordinates of `world`, or `None` behind the eye.
    pub fn project(&self, world: Vec3, width: u32, height: u32) -> Option<Vec2> {
        let right = self.right();
        let down = self.down();
        let normal = right.cross(down);
        let dir = world - self.pos;
        let denom = dir.dot(normal);
        if denom.abs() < 1.0e-12 {
            return None;
        }
        let t = (self.p1 - self.pos).dot(normal) / denom;
        if t <= 0.0 {
            return None;
        }
        let local = self.pos + dir * t - self.p1;
        Some(Vec2::new(
            local.dot(right) / right.length_squared() * width as f32,
            local.dot(down) / down.length_squared() * height as f32,
        ))
    }
}

/// Whether a frame continues the running accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Convergence {
    /// Clear the accumulator (the view changed).
    #[default]
    Restart,
    /// Keep accumulating.
    Converge,
}

const HALTON_X: [f32; 4] = [0.3, 0.7, 0.2, 0.8];
const HALTON_Y: [f32; 4] = [0.2, 0.8, 0.7, 0.3];

/// Four-entry sub-pixel jitter cycle.
///
/// Offsets are relative to the pixel centre, so a suppressed jitter is
/// simply zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterCycle {
    frame: u32,
}

impl JitterCycle {
    /// This frame's offset, or zero when disabled. The cycle steps every
    /// frame either way.
    pub fn advance(&mut self, enabled: bool) -> Vec2 {
        let i = self.frame as usize;
        self.frame = (self.frame + 1) & 3;
        if !enabled {
            return Vec2::ZERO;
        }
        Vec2::new(HALTON_X[i] - 0.5, HALTON_Y[i] - 0.5)
    }
}
