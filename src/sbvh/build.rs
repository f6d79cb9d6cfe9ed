//! Spatial split BVH builder.
//!
//! Works on primitive *references* (triangle index + clipped bounds) instead of
//! triangles, so a spatial split can place one triangle in both children. Each
//! node first tries a binned SAH object split; when the two object children
//! overlap by more than `alpha` times the root surface area, a binned spatial
//! split is also evaluated and the cheaper one wins.

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::aabb::Aabb;
use super::gpu_data::BvhNode;
use super::Sbvh;
use crate::scene::Triangle;

/// Number of SAH bins for object split evaluation.
const OBJECT_BINS: usize = 12;

/// Number of bins for spatial split evaluation.
const SPATIAL_BINS: usize = 16;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Leaves above this size are split even when SAH prefers a leaf.
const MAX_COST_LEAF: usize = 32;

/// How nodes may be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Object and spatial splits.
    #[default]
    Sah,
    /// Plain binned SAH, no reference duplication.
    ObjectOnly,
}

/// Deepest leaf the builder produces; fits the fixed traversal stack.
pub const MAX_DEPTH: usize = super::STACK_SIZE - 2;

/// Builder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbvhConfig {
    pub split_mode: SplitMode,
    /// Overlap threshold, relative to the root surface area, that enables spatial splits.
    pub alpha: f32,
    /// Nodes with at most this many references become leaves.
    pub max_leaf_size: usize,
    /// Clamped to [`MAX_DEPTH`].
    pub max_depth: usize,
}

impl Default for SbvhConfig {
    fn default() -> Self {
        Self {
            split_mode: SplitMode::Sah,
            alpha: 1e-5,
            max_leaf_size: 4,
            max_depth: MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Reference {
    index: u32,
    bounds: Aabb,
}

/// Best split found for a node.
#[derive(Debug, Clone, Copy)]
enum Split {
    Object {
        axis: usize,
        /// Last bin (inclusive) that goes left.
        bin: usize,
        cmin: f32,
        scale: f32,
        cost: f32,
        overlap: f32,
    },
    Spatial {
        axis: usize,
        plane: f32,
        cost: f32,
    },
    /// Halve the reference list; used when no binned split is usable.
    Middle,
}

impl Split {
    fn cost(&self) -> f32 {
        match *self {
            Split::Object { cost, .. } | Split::Spatial { cost, .. } => cost,
            Split::Middle => f32::INFINITY,
        }
    }
}

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: Aabb::EMPTY,
        count: 0,
    };
}

/// Bin counters for spatial splits: references entering and leaving each bin.
#[derive(Clone, Copy)]
struct SpatialBin {
    bounds: Aabb,
    enter: usize,
    exit: usize,
}

struct Task {
    node_idx: usize,
    refs: Vec<Reference>,
    depth: usize,
}

#[derive(Default)]
struct BuildStats {
    spatial_splits: usize,
    object_splits: usize,
    leaves: usize,
}

/// Build an SBVH over `triangles`.
///
/// Leaves reference triangles by index; a triangle cut by a spatial split is
/// referenced from more than one leaf.
#[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
pub fn build_sbvh(triangles: &[Triangle], config: &SbvhConfig) -> Sbvh {
    if triangles.is_empty() {
        return Sbvh {
            nodes: vec![BvhNode::leaf(&Aabb::new(Vec3::ZERO, Vec3::ZERO), 0, 0)],
            indices: Vec::new(),
        };
    }

    let refs: Vec<Reference> = triangles
        .par_iter()
        .enumerate()
        .map(|(i, t)| Reference {
            index: i as u32,
            bounds: t.aabb(),
        })
        .collect();

    let root_bounds = union_bounds(&refs);
    let spatial_threshold = config.alpha * root_bounds.area();
    let max_leaf = config.max_leaf_size.max(1);
    let max_depth = config.max_depth.min(MAX_DEPTH);

    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * triangles.len());
    let mut indices: Vec<u32> = Vec::with_capacity(triangles.len());
    let mut stats = BuildStats::default();

    nodes.push(BvhNode::leaf(&root_bounds, 0, 0));
    let mut stack = vec![Task {
        node_idx: 0,
        refs,
        depth: 0,
    }];

    while let Some(task) = stack.pop() {
        let count = task.refs.len();
        let node_bounds = union_bounds(&task.refs);

        if count <= max_leaf || task.depth >= max_depth {
            make_leaf(&mut nodes, &mut indices, task.node_idx, &node_bounds, &task.refs);
            stats.leaves += 1;
            continue;
        }

        let object = find_object_split(&task.refs, &node_bounds);
        let mut best = object;
        if config.split_mode == SplitMode::Sah {
            let overlap = match object {
                Some(Split::Object { overlap, .. }) => overlap,
                _ => f32::INFINITY,
            };
            if overlap > spatial_threshold {
                if let Some(spatial) = find_spatial_split(triangles, &task.refs, &node_bounds) {
                    if best.is_none_or(|b| spatial.cost() < b.cost()) {
                        best = Some(spatial);
                    }
                }
            }
        }

        let leaf_cost = INTERSECT_COST * count as f32;
        let split = match best {
            Some(s) if s.cost() < leaf_cost => Some(s),
            // Forced splits never duplicate references.
            _ if count > MAX_COST_LEAF => Some(object.unwrap_or(Split::Middle)),
            _ => None,
        };
        let Some(split) = split else {
            make_leaf(&mut nodes, &mut indices, task.node_idx, &node_bounds, &task.refs);
            stats.leaves += 1;
            continue;
        };

        let (left, right) = match split {
            Split::Spatial { axis, plane, .. } => {
                let (l, r) = partition_spatial(triangles, task.refs, axis, plane);
                if l.is_empty() || r.is_empty() || l.len() >= count || r.len() >= count {
                    // Degenerate clip; fall back to a middle split.
                    let mut all = l;
                    all.extend(r);
                    partition_fallback(all)
                } else {
                    stats.spatial_splits += 1;
                    (l, r)
                }
            }
            Split::Object {
                axis,
                bin,
                cmin,
                scale,
                ..
            } => {
                let (l, r): (Vec<_>, Vec<_>) = task.refs.into_iter().partition(|r| {
                    object_bin(r.bounds.centroid()[axis], cmin, scale) <= bin
                });
                if l.is_empty() || r.is_empty() {
                    let mut all = l;
                    all.extend(r);
                    partition_fallback(all)
                } else {
                    stats.object_splits += 1;
                    (l, r)
                }
            }
            Split::Middle => partition_fallback(task.refs),
        };

        // Children are allocated adjacent: right = left + 1.
        let left_idx = nodes.len();
        nodes.push(BvhNode::leaf(&Aabb::EMPTY, 0, 0));
        nodes.push(BvhNode::leaf(&Aabb::EMPTY, 0, 0));
        nodes[task.node_idx] = BvhNode::interior(&node_bounds, left_idx as u32);

        // Right first so left is processed first (depth-first order).
        stack.push(Task {
            node_idx: left_idx + 1,
            refs: right,
            depth: task.depth + 1,
        });
        stack.push(Task {
            node_idx: left_idx,
            refs: left,
            depth: task.depth + 1,
        });
    }

    log::debug!(
        "SBVH: {} nodes, {} references for {} triangles ({} spatial / {} object splits, {} leaves)",
        nodes.len(),
        indices.len(),
        triangles.len(),
        stats.spatial_splits,
        stats.object_splits,
        stats.leaves
    );

    Sbvh { nodes, indices }
}

fn union_bounds(refs: &[Reference]) -> Aabb {
    refs.iter().fold(Aabb::EMPTY, |acc, r| acc.union(&r.bounds))
}

fn make_leaf(
    nodes: &mut [BvhNode],
    indices: &mut Vec<u32>,
    node_idx: usize,
    bounds: &Aabb,
    refs: &[Reference],
) {
    nodes[node_idx] = BvhNode::leaf(bounds, indices.len() as u32, refs.len() as u32);
    indices.extend(refs.iter().map(|r| r.index));
}

/// Split in the middle of the list, used when both split kinds degenerate.
fn partition_fallback(mut refs: Vec<Reference>) -> (Vec<Reference>, Vec<Reference>) {
    let right = refs.split_off(refs.len() / 2);
    (refs, right)
}

#[inline]
fn object_bin(c: f32, cmin: f32, scale: f32) -> usize {
    (((c - cmin) * scale) as usize).min(OBJECT_BINS - 1)
}

#[inline]
fn sah_cost(left: &Aabb, left_count: usize, right: &Aabb, right_count: usize, inv_area: f32) -> f32 {
    TRAVERSAL_COST
        + INTERSECT_COST
            * (left.area() * left_count as f32 + right.area() * right_count as f32)
            * inv_area
}

/// SAH binned object split across all 3 axes, on reference centroids.
fn find_object_split(refs: &[Reference], node_bounds: &Aabb) -> Option<Split> {
    let mut centroid_bounds = Aabb::EMPTY;
    for r in refs {
        centroid_bounds.grow_point(r.bounds.centroid());
    }
    let area = node_bounds.area();
    let inv_area = if area > 0.0 { 1.0 / area } else { 0.0 };

    let mut best: Option<Split> = None;
    for axis in 0..3 {
        let cmin = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - cmin;
        if extent < 1e-8 {
            continue; // degenerate axis
        }
        let scale = OBJECT_BINS as f32 / extent;

        let mut bins = [Bin::EMPTY; OBJECT_BINS];
        for r in refs {
            let b = &mut bins[object_bin(r.bounds.centroid()[axis], cmin, scale)];
            b.bounds.grow(&r.bounds);
            b.count += 1;
        }

        // Suffix sweep from the right.
        let mut right_bounds = [Aabb::EMPTY; OBJECT_BINS];
        let mut right_count = [0usize; OBJECT_BINS];
        let mut acc = Bin::EMPTY;
        for i in (1..OBJECT_BINS).rev() {
            acc.bounds.grow(&bins[i].bounds);
            acc.count += bins[i].count;
            right_bounds[i] = acc.bounds;
            right_count[i] = acc.count;
        }

        let mut left = Bin::EMPTY;
        for i in 0..OBJECT_BINS - 1 {
            left.bounds.grow(&bins[i].bounds);
            left.count += bins[i].count;
            let (rb, rc) = (right_bounds[i + 1], right_count[i + 1]);
            if left.count == 0 || rc == 0 {
                continue;
            }
            let cost = sah_cost(&left.bounds, left.count, &rb, rc, inv_area);
            if best.is_none_or(|b| cost < b.cost()) {
                best = Some(Split::Object {
                    axis,
                    bin: i,
                    cmin,
                    scale,
                    cost,
                    overlap: left.bounds.intersection(&rb).area(),
                });
            }
        }
    }
    best
}

/// Binned spatial split: references are chopped at bin planes so each bin
/// only accounts for the part of a triangle that lies inside it.
fn find_spatial_split(triangles: &[Triangle], refs: &[Reference], node_bounds: &Aabb) -> Option<Split> {
    let area = node_bounds.area();
    let inv_area = if area > 0.0 { 1.0 / area } else { 0.0 };

    let mut best: Option<Split> = None;
    for axis in 0..3 {
        let origin = node_bounds.min[axis];
        let extent = node_bounds.max[axis] - origin;
        if extent < 1e-8 {
            continue;
        }
        let width = extent / SPATIAL_BINS as f32;
        let inv_width = 1.0 / width;
        let bin_of = |x: f32| (((x - origin) * inv_width).max(0.0) as usize).min(SPATIAL_BINS - 1);

        let mut bins = [SpatialBin {
            bounds: Aabb::EMPTY,
            enter: 0,
            exit: 0,
        }; SPATIAL_BINS];

        for r in refs {
            let first = bin_of(r.bounds.min[axis]);
            let last = bin_of(r.bounds.max[axis]);
            bins[first].enter += 1;
            bins[last].exit += 1;

            let tri = &triangles[r.index as usize];
            let mut rest = r.bounds;
            for (b, bin) in bins.iter_mut().enumerate().take(last).skip(first) {
                let plane = origin + (b + 1) as f32 * width;
                let (l, rr) = split_reference(tri, &rest, axis, plane);
                bin.bounds.grow(&l);
                rest = rr;
            }
            bins[last].bounds.grow(&rest);
        }

        let mut right_bounds = [Aabb::EMPTY; SPATIAL_BINS];
        let mut right_count = [0usize; SPATIAL_BINS];
        let mut acc = Aabb::EMPTY;
        let mut acc_count = 0;
        for i in (1..SPATIAL_BINS).rev() {
            acc.grow(&bins[i].bounds);
            acc_count += bins[i].exit;
            right_bounds[i] = acc;
            right_count[i] = acc_count;
        }

        let mut left = Aabb::EMPTY;
        let mut left_count = 0;
        for i in 0..SPATIAL_BINS - 1 {
            left.grow(&bins[i].bounds);
            left_count += bins[i].enter;
            let (rb, rc) = (right_bounds[i + 1], right_count[i + 1]);
            // Both children must shrink, or duplication never terminates.
            if left_count == 0 || rc == 0 || left_count >= refs.len() || rc >= refs.len() {
                continue;
            }
            let cost = sah_cost(&left, left_count, &rb, rc, inv_area);
            if best.is_none_or(|b| cost < b.cost()) {
                best = Some(Split::Spatial {
                    axis,
                    plane: origin + (i + 1) as f32 * width,
                    cost,
                });
            }
        }
    }
    best
}

/// Distribute references across `plane`; straddling references are split and
/// land in both children.
fn partition_spatial(
    triangles: &[Triangle],
    refs: Vec<Reference>,
    axis: usize,
    plane: f32,
) -> (Vec<Reference>, Vec<Reference>) {
    let mut left = Vec::with_capacity(refs.len());
    let mut right = Vec::with_capacity(refs.len());
    for r in refs {
        if r.bounds.max[axis] <= plane {
            left.push(r);
        } else if r.bounds.min[axis] >= plane {
            right.push(r);
        } else {
            let (lb, rb) = split_reference(&triangles[r.index as usize], &r.bounds, axis, plane);
            if lb.is_valid() {
                left.push(Reference { index: r.index, bounds: lb });
            }
            if rb.is_valid() {
                right.push(Reference { index: r.index, bounds: rb });
            }
        }
    }
    (left, right)
}

/// Clip a triangle reference against an axis-aligned plane by walking its
/// edges. Both halves are intersected with the incoming reference bounds.
fn split_reference(tri: &Triangle, bounds: &Aabb, axis: usize, plane: f32) -> (Aabb, Aabb) {
    let mut left = Aabb::EMPTY;
    let mut right = Aabb::EMPTY;

    for i in 0..3 {
        let v0 = tri.v[i];
        let v1 = tri.v[(i + 1) % 3];
        let (p0, p1) = (v0[axis], v1[axis]);

        if p0 <= plane {
            left.grow_point(v0);
        }
        if p0 >= plane {
            right.grow_point(v0);
        }
        if (p0 < plane && p1 > plane) || (p0 > plane && p1 < plane) {
            let t = ((plane - p0) / (p1 - p0)).clamp(0.0, 1.0);
            let mut x = v0.lerp(v1, t);
            x[axis] = plane;
            left.grow_point(x);
            right.grow_point(x);
        }
    }

    left.max[axis] = plane;
    right.min[axis] = plane;
    (left.intersection(bounds), right.intersection(bounds))
}
