//! Math type re-exports and sampling helpers shared by the kernels.
//!
//! Vectors and matrices come from `glam`; the random number helpers are the
//! integer hashes used to seed and advance per-path generators.

pub use glam::{Mat3, Mat4, UVec2, Vec2, Vec3, Vec4};

use std::f32::consts::PI;

/// Thomas Wang's 32-bit integer hash.
#[inline]
pub fn wang_hash(mut s: u32) -> u32 {
    s = (s ^ 61) ^ (s >> 16);
    s = s.wrapping_mul(9);
    s ^= s >> 4;
    s = s.wrapping_mul(0x27d4_eb2d);
    s ^ (s >> 15)
}

/// Advance a xorshift32 state and return the new value.
#[inline]
pub fn xorshift32(state: &mut u32) -> u32 {
    // zero is a fixed point of xorshift
    if *state == 0 {
        *state = 0x1234_5678;
    }
    *state ^= *state << 13;
    *state ^= *state >> 17;
    *state ^= *state << 5;
    *state
}

/// Uniform float in [0, 1).
#[inline]
pub fn random_float(state: &mut u32) -> f32 {
    (xorshift32(state) >> 8) as f32 * (1.0 / 16_777_216.0)
}

/// Rec. 709 luminance.
#[inline]
pub fn luminance(c: Vec3) -> f32 {
    0.2126 * c.x + 0.7152 * c.y + 0.0722 * c.z
}

/// Scale `c` down so that its largest component does not exceed `limit`.
#[inline]
pub fn clamp_radiance(c: Vec3, limit: f32) -> Vec3 {
    let m = c.max_element();
    if m > limit && m > 0.0 {
        c * (limit / m)
    } else {
        c
    }
}

/// Orthonormal basis around `n` (Duff et al. 2017).
#[inline]
pub fn basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let t = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bt = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (t, bt)
}

/// Cosine-weighted direction in the hemisphere around `n`.
pub fn cosine_hemisphere(n: Vec3, r0: f32, r1: f32) -> Vec3 {
    let r = r0.sqrt();
    let phi = 2.0 * PI * r1;
    let (t, b) = basis(n);
    let z = (1.0 - r0).max(0.0).sqrt();
    (t * (r * phi.cos()) + b * (r * phi.sin()) + n * z).normalize_or_zero()
}

/// Uniform point on a triangle, as barycentrics `(u, v)`.
#[inline]
pub fn uniform_triangle(r0: f32, r1: f32) -> (f32, f32) {
    let s = r0.sqrt();
    (1.0 - s, r1 * s)
}

/// Uniform point on a unit disk.
#[inline]
pub fn concentric_disk(r0: f32, r1: f32) -> Vec2 {
    let r = r0.sqrt();
    let phi = 2.0 * PI * r1;
    Vec2::new(r * phi.cos(), r * phi.sin())
}
