//! Bounding boxes and the flat BVH node layout.
//!
//! Nodes are 32 bytes and stored depth-first in one array so the same
//! layout can be traversed on the host or uploaded to a compute device.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::device::Ray;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut b = Self::EMPTY;
        for &p in points {
            b.grow_point(p);
        }
        b
    }

    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Surface area (SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Bounds of this box after transforming all eight corners.
    pub fn transformed(&self, m: &glam::Mat4) -> Aabb {
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let c = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow_point(m.transform_point3(c));
        }
        out
    }
}

/// Flat BVH node.
///
/// Internal node: `left_or_first` = left child index (right = left + 1),
/// `count` = 0. Leaf: `left_or_first` = first primitive slot, `count` > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub fn new(bounds: &Aabb, left_or_first: u32, count: u32) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first,
            aabb_max: bounds.max.to_array(),
            count,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    /// Slab test against a ray with precomputed reciprocal direction.
    /// Returns the entry distance, or `None` when the box is missed within
    /// `[ray.tmin, tmax]`.
    #[inline]
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, tmin: f32, tmax: f32) -> Option<f32> {
        let t0 = (Vec3::from_array(self.aabb_min) - origin) * inv_dir;
        let t1 = (Vec3::from_array(self.aabb_max) - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(tmin);
        let far = t0.max(t1).min_element().min(tmax);
        (near <= far).then_some(near)
    }
}

/// Reciprocal direction with zero components pushed to large finite values
/// so the slab test never produces NaN.
#[inline]
pub fn safe_inverse(dir: Vec3) -> Vec3 {
    let f = |d: f32| {
        if d.abs() < 1e-12 {
            1.0e12_f32.copysign(d)
        } else {
            1.0 / d
        }
    };
    Vec3::new(f(dir.x), f(dir.y), f(dir.z))
}

/// Moller-Trumbore. Returns (t, u, v) for hits inside `(tmin, tmax)`.
#[inline]
pub fn intersect_triangle(ray: &Ray, v: &[Vec3; 3], tmax: f32) -> Option<(f32, f32, f32)> {
    let e1 = v[1] - v[0];
    let e2 = v[2] - v[0];
    let dir = ray.direction();
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    let s = ray.origin() - v[0];
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let w = dir.dot(q) * inv;
    if w < 0.0 || u + w > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t > ray.tmin && t < tmax).then_some((t, u, w))
}
