//! SAH-based BVH builder.
//!
//! Builds over primitive bounds only, so the same builder serves the
//! per-mesh triangle trees and the top-level tree over instance boxes.

use super::bvh::{Aabb, BvhNode};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Built BVH: flat nodes plus the primitive order leaves index into.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    /// Node 0 is the root.
    pub nodes: Vec<BvhNode>,
    /// `prim_indices[slot]` = original primitive index.
    pub prim_indices: Vec<u32>,
}

impl Bvh {
    pub fn bounds(&self) -> Aabb {
        match self.nodes.first() {
            Some(root) if !self.prim_indices.is_empty() => Aabb {
                min: root.aabb_min.into(),
                max: root.aabb_max.into(),
            },
            _ => Aabb::EMPTY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prim_indices.is_empty()
    }
}

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

const EMPTY_BIN: Bin = Bin {
    bounds: Aabb::EMPTY,
    count: 0,
};

struct Task {
    node: usize,
    start: usize,
    end: usize,
}

/// Build a BVH over primitive bounding boxes.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[Aabb]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::default()],
            prim_indices: Vec::new(),
        };
    }

    let centroids: Vec<glam::Vec3> = bounds.iter().map(Aabb::centroid).collect();
    let mut indices: Vec<u32> = (0..n as u32).collect();
    let mut nodes = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::default());

    let mut stack = vec![Task { node: 0, start: 0, end: n }];
    while let Some(Task { node, start, end }) = stack.pop() {
        let range = &mut indices[start..end];
        let mut node_bounds = Aabb::EMPTY;
        let mut centroid_bounds = Aabb::EMPTY;
        for &i in range.iter() {
            node_bounds.grow(&bounds[i as usize]);
            centroid_bounds.grow_point(centroids[i as usize]);
        }
        let count = end - start;
        let leaf = BvhNode::new(&node_bounds, start as u32, count as u32);
        if count <= MAX_LEAF_SIZE {
            nodes[node] = leaf;
            continue;
        }

        let split = find_best_split(range, bounds, &centroids, &centroid_bounds);
        let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.area();
        let Some((axis, pos, cost)) = split else {
            nodes[node] = leaf;
            continue;
        };
        if cost >= leaf_cost {
            nodes[node] = leaf;
            continue;
        }

        let mid = match partition(range, |&i| centroids[i as usize][axis] < pos) {
            0 => count / 2,
            m if m == count => count / 2,
            m => m,
        } + start;

        let left = nodes.len();
        nodes.push(BvhNode::default());
        nodes.push(BvhNode::default());
        nodes[node] = BvhNode::new(&node_bounds, left as u32, 0);
        stack.push(Task { node: left + 1, start: mid, end });
        stack.push(Task { node: left, start, end: mid });
    }

    Bvh { nodes, prim_indices: indices }
}

/// Binned SAH search over all three axes: (axis, split position, cost).
fn find_best_split(
    indices: &[u32],
    bounds: &[Aabb],
    centroids: &[glam::Vec3],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;
    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        if extent < 1e-8 {
            continue;
        }
        let mut bins = [EMPTY_BIN; NUM_BINS];
        let scale = NUM_BINS as f32 / extent;
        for &i in indices {
            let b = (((centroids[i as usize][axis] - lo) * scale) as usize).min(NUM_BINS - 1);
            bins[b].bounds.grow(&bounds[i as usize]);
            bins[b].count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut acc = EMPTY_BIN;
        for i in 0..NUM_BINS - 1 {
            acc.bounds.grow(&bins[i].bounds);
            acc.count += bins[i].count;
            left_area[i] = acc.bounds.area();
            left_count[i] = acc.count;
        }
        let mut acc = EMPTY_BIN;
        for i in (1..NUM_BINS).rev() {
            acc.bounds.grow(&bins[i].bounds);
            acc.count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST * (left_count[i - 1] as f32 * left_area[i - 1] + acc.count as f32 * acc.bounds.area());
            if best.is_none_or(|(_, _, c)| cost < c) {
                best = Some((axis, lo + i as f32 / NUM_BINS as f32 * extent, cost));
            }
        }
    }
    best
}

/// In-place partition; returns the number of elements satisfying `pred`.
fn partition<T>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let (mut left, mut right) = (0, slice.len());
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn boxes_along_x(n: usize) -> Vec<Aabb> {
        (0..n)
            .map(|i| {
                let c = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
                Aabb::from_points(&[c - Vec3::splat(0.5), c + Vec3::splat(0.5)])
            })
            .collect()
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.is_empty());
        assert!(bvh.bounds().is_empty());
    }

    #[test]
    fn test_single_primitive() {
        let bvh = build_bvh(&boxes_along_x(1));
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
    }

    #[test]
    fn test_many_primitives_builds_tree() {
        let bvh = build_bvh(&boxes_along_x(100));
        assert!(bvh.nodes.len() > 1);
        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
        let root = bvh.bounds();
        assert!(root.min.x < 0.0);
        assert!(root.max.x > 198.0);
        // Every leaf stays within the size limit or holds coincident boxes.
        assert!(bvh.nodes.iter().filter(|n| n.is_leaf()).all(|n| n.count as usize <= MAX_LEAF_SIZE));
    }

    #[test]
    fn test_coincident_primitives_make_leaf() {
        let b = Aabb::from_points(&[Vec3::ZERO, Vec3::ONE]);
        let bvh = build_bvh(&vec![b; 9]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 9);
    }
}
