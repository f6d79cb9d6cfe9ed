//! Spatial split bounding volume hierarchy.
//!
//! ## Architecture
//! ```text
//! Scene triangles → SBVH build (CPU, SAH + spatial splits) → hierarchy_<hash>.bin
//!                                      ↓                          ↑ (next visit)
//!                               GpuSceneData  →  ComputeBackend::upload_scene
//! ```
//!
//! The hierarchy owns no triangle data: leaves hold ranges into [`Sbvh::indices`],
//! which in turn index the scene triangle list.

mod aabb;
pub mod build;
pub mod cache;
pub mod gpu_data;

use glam::Vec3;

pub use aabb::Aabb;
pub use build::{build_sbvh, SbvhConfig, SplitMode, MAX_DEPTH};
pub use cache::{hierarchy_path, load_or_build};
pub use gpu_data::{BvhNode, GpuMaterial, GpuSceneData, GpuTriangle};

use crate::scene::{Hit, Triangle};

/// Traversal stack depth; matches the kernel's fixed stack. Visiting an
/// interior node at depth `d` leaves up to `d` pending siblings, so a tree no
/// deeper than [`MAX_DEPTH`] never overflows it.
pub const STACK_SIZE: usize = 64;

/// Flat SBVH: node array (index 0 = root) plus leaf reference list.
#[derive(Debug, Clone, PartialEq)]
pub struct Sbvh {
    pub nodes: Vec<BvhNode>,
    /// Triangle indices referenced by leaves; may contain duplicates.
    pub indices: Vec<u32>,
}

impl Sbvh {
    /// Build with the given configuration.
    pub fn build(triangles: &[Triangle], config: &SbvhConfig) -> Self {
        build_sbvh(triangles, config)
    }

    /// Union AABB of the whole scene (root bounds).
    pub fn scene_bounds(&self) -> Aabb {
        self.nodes.first().map(BvhNode::bounds).unwrap_or_default()
    }

    /// Half of the scene bounding diagonal.
    pub fn world_radius(&self) -> f32 {
        0.5 * self.scene_bounds().diagonal()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Closest hit along `origin + t * dir`, `t > 0`.
    pub fn intersect(&self, triangles: &[Triangle], origin: Vec3, dir: Vec3) -> Option<Hit> {
        if self.indices.is_empty() {
            return None;
        }
        let inv_dir = dir.recip();
        let mut best: Option<Hit> = None;
        let mut t_max = f32::INFINITY;

        let mut stack = [0u32; STACK_SIZE];
        let mut sp = 1;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if node.bounds().hit(origin, inv_dir, t_max).is_none() {
                continue;
            }

            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &idx in &self.indices[first..first + node.count as usize] {
                    if let Some((t, u, v)) = triangles[idx as usize].intersect(origin, dir, t_max) {
                        t_max = t;
                        best = Some(Hit { t, u, v, triangle: idx });
                    }
                }
            } else {
                debug_assert!(sp + 2 <= STACK_SIZE, "traversal stack overflow");
                if sp + 2 > STACK_SIZE {
                    continue;
                }
                stack[sp] = node.left_or_first + 1;
                stack[sp + 1] = node.left_or_first;
                sp += 2;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_grid(n: usize) -> Vec<Triangle> {
        let mut tris = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let (x, y) = (i as f32, j as f32);
                let z = ((i * 7 + j * 3) % 5) as f32 * 0.1;
                tris.push(Triangle::flat(
                    Vec3::new(x, y, z),
                    Vec3::new(x + 1.0, y, z),
                    Vec3::new(x + 1.0, y + 1.0, z),
                    0,
                ));
                tris.push(Triangle::flat(
                    Vec3::new(x, y, z),
                    Vec3::new(x + 1.0, y + 1.0, z),
                    Vec3::new(x, y + 1.0, z),
                    0,
                ));
            }
        }
        tris
    }

    fn brute_force(tris: &[Triangle], origin: Vec3, dir: Vec3) -> Option<f32> {
        tris.iter()
            .filter_map(|t| t.intersect(origin, dir, f32::INFINITY).map(|h| h.0))
            .min_by(|a, b| a.total_cmp(b))
    }

    #[test]
    fn test_intersect_matches_brute_force() {
        let tris = quad_grid(6);
        let sbvh = Sbvh::build(&tris, &SbvhConfig::default());
        for i in 0..24 {
            let origin = Vec3::new(0.3 + i as f32 * 0.25, 0.7 + (i % 5) as f32, 5.0);
            let dir = Vec3::new(0.01 * i as f32, -0.02, -1.0).normalize();
            let got = sbvh.intersect(&tris, origin, dir).map(|h| h.t);
            let want = brute_force(&tris, origin, dir);
            match (got, want) {
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-4, "ray {i}: {a} vs {b}"),
                (None, None) => {}
                other => panic!("ray {i}: mismatch {other:?}"),
            }
        }
    }

    #[test]
    fn test_world_radius() {
        let tris = vec![Triangle::flat(
            Vec3::ZERO,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 2.0),
            0,
        )];
        let sbvh = Sbvh::build(&tris, &SbvhConfig::default());
        let expected = 0.5 * Vec3::splat(2.0).length();
        assert!((sbvh.world_radius() - expected).abs() < 1e-6);
        assert_eq!(sbvh.leaf_count(), 1);
    }

    #[test]
    fn test_empty_intersect() {
        let sbvh = Sbvh::build(&[], &SbvhConfig::default());
        assert!(sbvh.intersect(&[], Vec3::ZERO, Vec3::Z).is_none());
        assert_eq!(sbvh.world_radius(), 0.0);
    }

    /// Left-leaning chain whose right children are leaves, so every level
    /// leaves one pending sibling on the stack. The hit sits in the deepest leaf.
    #[test]
    fn test_deepest_tree_fits_stack() {
        let bounds = Aabb::new(Vec3::splat(-200.0), Vec3::splat(200.0));
        let mut nodes = vec![BvhNode::interior(&bounds, 1)];
        for depth in 1..=MAX_DEPTH {
            if depth < MAX_DEPTH {
                nodes.push(BvhNode::interior(&bounds, nodes.len() as u32 + 2));
            } else {
                nodes.push(BvhNode::leaf(&bounds, 1, 1));
            }
            nodes.push(BvhNode::leaf(&bounds, 0, 1));
        }
        let sbvh = Sbvh { nodes, indices: vec![0, 1] };
        let tris = vec![
            Triangle::flat(Vec3::new(100.0, 0.0, 0.0), Vec3::new(101.0, 0.0, 0.0), Vec3::new(100.0, 1.0, 0.0), 0),
            Triangle::flat(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0), 0),
        ];

        let hit = sbvh.intersect(&tris, Vec3::new(0.0, 0.0, -5.0), Vec3::Z).unwrap();
        assert_eq!(hit.triangle, 1);
        assert!((hit.t - 5.0).abs() < 1e-5);
    }
}
