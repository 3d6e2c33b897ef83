//! Mesh geometry and instance placement.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Per-triangle shading attributes supplied alongside the vertex stream.
#[derive(Debug, Clone, Copy)]
pub struct TriangleAttributes {
    pub normals: [Vec3; 3],
    pub uvs: [Vec2; 3],
    pub material: u32,
}

impl Default for TriangleAttributes {
    fn default() -> Self {
        Self {
            normals: [Vec3::Z; 3],
            uvs: [Vec2::ZERO, Vec2::X, Vec2::Y],
            material: 0,
        }
    }
}

impl TriangleAttributes {
    /// Flat attributes derived from the winding of `v`.
    pub fn flat(v: [Vec3; 3], material: u32) -> Self {
        let n = (v[1] - v[0]).cross(v[2] - v[0]).normalize_or_zero();
        Self {
            normals: [n; 3],
            material,
            ..Default::default()
        }
    }

    /// Interpolated shading normal at barycentrics (u, v).
    #[inline]
    pub fn normal_at(&self, u: f32, v: f32) -> Vec3 {
        let w = 1.0 - u - v;
        (self.normals[0] * w + self.normals[1] * u + self.normals[2] * v).normalize_or_zero()
    }

    #[inline]
    pub fn uv_at(&self, u: f32, v: f32) -> Vec2 {
        let w = 1.0 - u - v;
        self.uvs[0] * w + self.uvs[1] * u + self.uvs[2] * v
    }
}

/// Non-indexed triangle mesh: three `Vec4` vertices per triangle.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vec4>,
    pub attributes: Vec<TriangleAttributes>,
    /// Set when the geometry changed since the last acceleration build.
    pub dirty: bool,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.attributes.len()
    }

    /// Object-space corners of triangle `i`.
    #[inline]
    pub fn triangle(&self, i: usize) -> [Vec3; 3] {
        let base = i * 3;
        [
            self.vertices[base].truncate(),
            self.vertices[base + 1].truncate(),
            self.vertices[base + 2].truncate(),
        ]
    }
}

/// Placement of a mesh in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub mesh: usize,
    pub transform: Mat4,
}

/// Per-instance descriptor consumed by shading and traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDesc {
    /// Index the caller gave the instance.
    pub slot: u32,
    pub mesh: usize,
    pub transform: Mat4,
    pub inverse: Mat4,
    /// Inverse-transpose of the upper 3x3, for normals.
    pub normal_matrix: Mat3,
}

impl InstanceDesc {
    pub fn new(slot: usize, instance: &Instance) -> Self {
        let inverse = instance.transform.inverse();
        Self {
            slot: slot as u32,
            mesh: instance.mesh,
            transform: instance.transform,
            inverse,
            normal_matrix: Mat3::from_mat4(inverse).transpose(),
        }
    }

    #[inline]
    pub fn to_world_normal(&self, n: Vec3) -> Vec3 {
        (self.normal_matrix * n).normalize_or_zero()
    }
}
