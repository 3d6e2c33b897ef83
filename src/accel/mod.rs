//! Acceleration structures and the host ray-intersection service.

mod build;
mod bvh;
mod tracer;

pub use build::{build_bvh, Bvh};
pub use bvh::{intersect_triangle, safe_inverse, Aabb, BvhNode};
pub use tracer::BvhTracer;
