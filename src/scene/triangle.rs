//! CPU-side scene primitives.

use glam::Vec3;

use crate::sbvh::Aabb;

/// Triangle with per-vertex normals, as loaded from a mesh file.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub v: [Vec3; 3],
    pub n: [Vec3; 3],
    pub material_id: u32,
}

/// Ray/triangle hit record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    /// Index into the scene triangle list.
    pub triangle: u32,
}

impl Triangle {
    /// Flat-shaded triangle: all three normals set to the face normal.
    pub fn flat(v0: Vec3, v1: Vec3, v2: Vec3, material_id: u32) -> Self {
        let n = (v1 - v0).cross(v2 - v0).normalize_or_zero();
        Self {
            v: [v0, v1, v2],
            n: [n; 3],
            material_id,
        }
    }

    /// Compute AABB of this triangle.
    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        for p in self.v {
            b.grow_point(p);
        }
        b
    }

    /// Centroid of the triangle.
    pub fn centroid(&self) -> Vec3 {
        (self.v[0] + self.v[1] + self.v[2]) / 3.0
    }

    pub fn area(&self) -> f32 {
        0.5 * (self.v[1] - self.v[0]).cross(self.v[2] - self.v[0]).length()
    }

    /// Moller-Trumbore intersection. Returns `(t, u, v)` for hits in `(eps, t_max)`.
    pub fn intersect(&self, origin: Vec3, dir: Vec3, t_max: f32) -> Option<(f32, f32, f32)> {
        const EPS: f32 = 1e-7;
        let e1 = self.v[1] - self.v[0];
        let e2 = self.v[2] - self.v[0];
        let p = dir.cross(e2);
        let det = e1.dot(p);
        if det.abs() < EPS {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = origin - self.v[0];
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = dir.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > 1e-5 && t < t_max).then_some((t, u, v))
    }
}

/// Lambertian material. Non-zero emission marks an emissive triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub albedo: Vec3,
    pub emission: Vec3,
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self {
            albedo,
            emission: Vec3::ZERO,
        }
    }

    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.emission.max_element() > 0.0
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::diffuse(Vec3::splat(0.8))
    }
}
