//! Two-level BVH tracer.
//!
//! One bottom-level tree per mesh, rebuilt only when the mesh is dirty, and
//! a top-level tree over instance world bounds rebuilt every frame. Rays are
//! moved into object space with the instance inverse without renormalizing,
//! so hit distances stay in world units.

use glam::{Mat4, Vec3};
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::build::{build_bvh, Bvh};
use super::bvh::{intersect_triangle, safe_inverse, Aabb};
use crate::device::{Hit, Ray, RayTracer};
use crate::scene::{InstanceDesc, Mesh};
use crate::Result;

type Stack = SmallVec<[u32; 64]>;

#[derive(Debug, Default)]
struct Blas {
    bvh: Bvh,
    /// Triangles in leaf-slot order.
    triangles: Vec<[Vec3; 3]>,
}

impl Blas {
    fn build(mesh: &Mesh) -> Self {
        let bounds: Vec<Aabb> = (0..mesh.triangle_count()).map(|i| Aabb::from_points(&mesh.triangle(i))).collect();
        let bvh = build_bvh(&bounds);
        let triangles = bvh.prim_indices.iter().map(|&i| mesh.triangle(i as usize)).collect();
        Self { bvh, triangles }
    }

    /// Closest (or any) hit below `tmax`: (t, triangle, u, v).
    fn trace(&self, ray: &Ray, mut tmax: f32, any: bool) -> Option<(f32, u32, f32, f32)> {
        if self.bvh.is_empty() {
            return None;
        }
        let origin = ray.origin();
        let inv = safe_inverse(ray.direction());
        let mut best = None;
        let mut stack: Stack = smallvec![0];
        while let Some(ni) = stack.pop() {
            let node = &self.bvh.nodes[ni as usize];
            if node.hit(origin, inv, ray.tmin, tmax).is_none() {
                continue;
            }
            if !node.is_leaf() {
                stack.push(node.left_or_first + 1);
                stack.push(node.left_or_first);
                continue;
            }
            let first = node.left_or_first as usize;
            for slot in first..first + node.count as usize {
                if let Some((t, u, v)) = intersect_triangle(ray, &self.triangles[slot], tmax) {
                    tmax = t;
                    best = Some((t, self.bvh.prim_indices[slot], u, v));
                    if any {
                        return best;
                    }
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy)]
struct TlasEntry {
    inverse: Mat4,
    mesh: usize,
    /// Index into the instance descriptors.
    instance: u32,
}

/// Host intersection service over a two-level SAH BVH.
#[derive(Debug, Default)]
pub struct BvhTracer {
    blas: Vec<Blas>,
    tlas: Bvh,
    entries: Vec<TlasEntry>,
    blas_builds: u64,
}

impl BvhTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bottom-level builds performed so far.
    pub fn blas_builds(&self) -> u64 {
        self.blas_builds
    }

    fn trace(&self, ray: &Ray, any: bool) -> Hit {
        let mut hit = Hit::MISS;
        if self.tlas.is_empty() {
            return hit;
        }
        let origin = ray.origin();
        let inv = safe_inverse(ray.direction());
        let mut tmax = ray.tmax;
        let mut stack: Stack = smallvec![0];
        while let Some(ni) = stack.pop() {
            let node = &self.tlas.nodes[ni as usize];
            if node.hit(origin, inv, ray.tmin, tmax).is_none() {
                continue;
            }
            if !node.is_leaf() {
                stack.push(node.left_or_first + 1);
                stack.push(node.left_or_first);
                continue;
            }
            let first = node.left_or_first as usize;
            for &slot in &self.tlas.prim_indices[first..first + node.count as usize] {
                let entry = self.entries[slot as usize];
                let local = Ray::new(
                    entry.inverse.transform_point3(origin),
                    entry.inverse.transform_vector3(ray.direction()),
                    ray.tmin,
                    tmax,
                );
                if let Some((t, tri, u, v)) = self.blas[entry.mesh].trace(&local, tmax, any) {
                    tmax = t;
                    hit = Hit {
                        t,
                        triangle: tri as i32,
                        instance: entry.instance as i32,
                        u,
                        v,
                    };
                    if any {
                        return hit;
                    }
                }
            }
        }
        hit
    }
}

impl RayTracer for BvhTracer {
    fn name(&self) -> &str {
        "host bvh"
    }

    fn build_mesh(&mut self, index: usize, mesh: &Mesh) -> Result<()> {
        if index >= self.blas.len() {
            self.blas.resize_with(index + 1, Blas::default);
        }
        self.blas[index] = Blas::build(mesh);
        self.blas_builds += 1;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    fn build_instances(&mut self, instances: &[InstanceDesc], _meshes: &[Mesh]) -> Result<()> {
        self.entries.clear();
        let mut bounds = Vec::with_capacity(instances.len());
        for (index, desc) in instances.iter().enumerate() {
            let Some(blas) = self.blas.get(desc.mesh) else { continue };
            let local = blas.bvh.bounds();
            if local.is_empty() {
                continue;
            }
            bounds.push(local.transformed(&desc.transform));
            self.entries.push(TlasEntry {
                inverse: desc.inverse,
                mesh: desc.mesh,
                instance: index as u32,
            });
        }
        self.tlas = build_bvh(&bounds);
        debug!(nodes = self.tlas.nodes.len(), "top-level rebuilt");
        Ok(())
    }

    fn intersect(&self, rays: &[Ray], hits: &mut [Hit]) -> Result<()> {
        hits.par_iter_mut().zip(rays.par_iter()).for_each(|(h, r)| *h = self.trace(r, false));
        Ok(())
    }

    fn occlusion(&self, rays: &[Ray], occluded: &mut [u32]) -> Result<()> {
        let words = rays.len().div_ceil(32);
        occluded[..words].par_iter_mut().enumerate().for_each(|(w, word)| {
            let start = w * 32;
            let end = (start + 32).min(rays.len());
            *word = rays[start..end]
                .iter()
                .enumerate()
                .filter(|(_, r)| !self.trace(r, true).is_miss())
                .fold(0u32, |bits, (b, _)| bits | (1 << b));
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Instance, TriangleAttributes};

    fn quad_mesh() -> Mesh {
        let v = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        let tris = [[v[0], v[1], v[2]], [v[0], v[2], v[3]]];
        Mesh {
            vertices: tris.iter().flatten().map(|p| p.extend(1.0)).collect(),
            attributes: tris.iter().map(|t| TriangleAttributes::flat(*t, 0)).collect(),
            dirty: true,
        }
    }

    fn tracer(transforms: &[Mat4]) -> BvhTracer {
        let mesh = quad_mesh();
        let mut t = BvhTracer::new();
        t.build_mesh(0, &mesh).unwrap();
        let descs: Vec<_> = transforms
            .iter()
            .enumerate()
            .map(|(slot, &transform)| InstanceDesc::new(slot, &Instance { mesh: 0, transform }))
            .collect();
        t.build_instances(&descs, std::slice::from_ref(&mesh)).unwrap();
        t
    }

    #[test]
    fn test_dense_mesh_traversal() {
        // 64x64 grid of small triangles; the tree is deep enough to need a
        // spilled traversal stack if the inline one were too short.
        let mut tris = Vec::new();
        for y in 0..64 {
            for x in 0..64 {
                let o = Vec3::new(x as f32, y as f32, 0.0);
                tris.push([o, o + Vec3::X, o + Vec3::Y]);
            }
        }
        let mesh = Mesh {
            vertices: tris.iter().flatten().map(|p| p.extend(1.0)).collect(),
            attributes: tris.iter().map(|t| TriangleAttributes::flat(*t, 0)).collect(),
            dirty: true,
        };
        let mut t = BvhTracer::new();
        t.build_mesh(0, &mesh).unwrap();
        let desc = InstanceDesc::new(0, &Instance { mesh: 0, transform: Mat4::IDENTITY });
        t.build_instances(&[desc], std::slice::from_ref(&mesh)).unwrap();

        let rays = [
            Ray::new(Vec3::new(37.2, 11.2, 3.0), -Vec3::Z, 0.0, f32::INFINITY),
            Ray::new(Vec3::new(37.8, 11.8, 3.0), -Vec3::Z, 0.0, f32::INFINITY),
        ];
        let mut hits = [Hit::MISS; 2];
        t.intersect(&rays, &mut hits).unwrap();
        assert_eq!(hits[0].triangle, 11 * 64 + 37);
        assert!((hits[0].t - 3.0).abs() < 1e-5);
        assert!(hits[1].is_miss(), "upper half of the cell is empty");
    }

    #[test]
    fn test_closest_hit_across_instances() {
        let t = tracer(&[Mat4::IDENTITY, Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0))]);
        let rays = [Ray::new(Vec3::new(0.2, 0.1, 5.0), -Vec3::Z, 0.0, f32::INFINITY)];
        let mut hits = [Hit::MISS];
        t.intersect(&rays, &mut hits).unwrap();
        assert_eq!(hits[0].instance, 1);
        assert!((hits[0].t - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_scaled_instance_keeps_world_distance() {
        let t = tracer(&[Mat4::from_scale(Vec3::splat(3.0))]);
        let rays = [Ray::new(Vec3::new(2.5, 0.0, 10.0), -Vec3::Z, 0.0, f32::INFINITY)];
        let mut hits = [Hit::MISS];
        t.intersect(&rays, &mut hits).unwrap();
        assert!(!hits[0].is_miss());
        assert!((hits[0].t - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_occlusion_bits() {
        let t = tracer(&[Mat4::IDENTITY]);
        let blocked = Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::Z, 0.0, 2.0);
        let short = Ray::new(Vec3::new(0.0, 0.0, 1.0), -Vec3::Z, 0.0, 0.5);
        let outside = Ray::new(Vec3::new(5.0, 0.0, 1.0), -Vec3::Z, 0.0, 2.0);
        let mut rays = vec![outside; 33];
        rays[0] = blocked;
        rays[1] = short;
        rays[32] = blocked;
        let mut mask = [0u32; 2];
        t.occlusion(&rays, &mut mask).unwrap();
        assert_eq!(mask, [1, 1]);
    }

    #[test]
    fn test_empty_scene_misses() {
        let t = BvhTracer::new();
        let mut hits = [Hit::default()];
        t.intersect(&[Ray::new(Vec3::ZERO, Vec3::Z, 0.0, 1.0)], &mut hits).unwrap();
        assert!(hits[0].is_miss());
    }
}
