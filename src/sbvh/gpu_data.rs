//! GPU storage layouts for the hierarchy and scene geometry.
//!
//! All structs are `repr(C)` + `Pod` and match the WGSL declarations in
//! `backend/gpu/kernels.wgsl` field for field.

use bytemuck::{Pod, Zeroable};

use super::{Aabb, Sbvh};
use crate::scene::{Material, Triangle};

/// GPU-friendly BVH node (32 bytes, matches WGSL struct).
///
/// Internal node: `left_or_first` = left child index (right child is `left + 1`), count = 0.
/// Leaf node: `left_or_first` = first reference index, count > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub fn leaf(bounds: &Aabb, first: u32, count: u32) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: first,
            aabb_max: bounds.max.to_array(),
            count,
        }
    }

    pub fn interior(bounds: &Aabb, left: u32) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: left,
            aabb_max: bounds.max.to_array(),
            count: 0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.aabb_min.into(), self.aabb_max.into())
    }
}

/// Triangle primitive for GPU storage (96 bytes).
/// Packed: 3 vertices × (pos + normal), each vec3 padded to 16 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 3],
    pub material_id: u32,
    pub v1: [f32; 3],
    pub _pad0: u32,
    pub v2: [f32; 3],
    pub _pad1: u32,
    pub n0: [f32; 3],
    pub _pad2: u32,
    pub n1: [f32; 3],
    pub _pad3: u32,
    pub n2: [f32; 3],
    pub _pad4: u32,
}

impl From<&Triangle> for GpuTriangle {
    fn from(t: &Triangle) -> Self {
        Self {
            v0: t.v[0].to_array(),
            material_id: t.material_id,
            v1: t.v[1].to_array(),
            _pad0: 0,
            v2: t.v[2].to_array(),
            _pad1: 0,
            n0: t.n[0].to_array(),
            _pad2: 0,
            n1: t.n[1].to_array(),
            _pad3: 0,
            n2: t.n[2].to_array(),
            _pad4: 0,
        }
    }
}

/// Lambertian material (32 bytes). `w` components are unused.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuMaterial {
    pub albedo: [f32; 4],
    pub emission: [f32; 4],
}

impl From<&Material> for GpuMaterial {
    fn from(m: &Material) -> Self {
        Self {
            albedo: m.albedo.extend(0.0).to_array(),
            emission: m.emission.extend(0.0).to_array(),
        }
    }
}

/// Complete scene data ready for GPU upload.
pub struct GpuSceneData {
    /// Flat BVH node array (bytemuck-castable).
    pub nodes: Vec<BvhNode>,
    /// Packed triangles in reference order; spatially split triangles appear more than once.
    pub triangles: Vec<GpuTriangle>,
    pub materials: Vec<GpuMaterial>,
}

impl GpuSceneData {
    /// Flatten leaf references into GPU triangle order.
    ///
    /// A leaf's `left_or_first` indexes `triangles` directly after this step,
    /// so the kernels never see the reference indirection.
    pub fn new(sbvh: &Sbvh, triangles: &[Triangle], materials: &[Material]) -> Self {
        let triangles = sbvh
            .indices
            .iter()
            .map(|&idx| GpuTriangle::from(&triangles[idx as usize]))
            .collect();
        let mut materials: Vec<GpuMaterial> = materials.iter().map(GpuMaterial::from).collect();
        if materials.is_empty() {
            materials.push(GpuMaterial::from(&Material::default()));
        }

        Self {
            nodes: sbvh.nodes.clone(),
            triangles,
            materials,
        }
    }

    pub fn tri_count(&self) -> u32 {
        self.triangles.len() as u32
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// BVH nodes as bytes.
    pub fn nodes_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    /// Triangle data as bytes.
    pub fn triangles_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }

    /// Material data as bytes.
    pub fn materials_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.materials)
    }
}
