//! Axis-aligned bounding box used by the SBVH builder and traversal.

use glam::Vec3;

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

    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Union of two boxes.
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Intersection of two boxes (may be empty).
    #[inline]
    pub fn intersection(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.max(other.min), self.max.min(other.max))
    }

    /// True if min <= max on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    #[inline]
    pub fn extent(&self) -> Vec3 {
        (self.max - self.min).max(Vec3::ZERO)
    }

    /// Surface area (for SAH cost). Empty boxes have zero area.
    #[inline]
    pub fn area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let d = self.extent();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Length of the box diagonal.
    #[inline]
    pub fn diagonal(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        (self.max - self.min).length()
    }

    /// Longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.extent();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Centroid of the AABB.
    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test. Returns the entry distance if the ray hits within `[0, t_max]`.
    #[inline]
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let t_near = t0.min(t1).max_element().max(0.0);
        let t_far = t0.max(t1).min_element().min(t_max);
        (t_near <= t_far).then_some(t_near)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_area_is_zero() {
        assert_eq!(Aabb::EMPTY.area(), 0.0);
        assert!(!Aabb::EMPTY.is_valid());
        assert_eq!(Aabb::EMPTY.diagonal(), 0.0);
    }

    #[test]
    fn test_grow_and_area() {
        let mut b = Aabb::EMPTY;
        b.grow_point(Vec3::ZERO);
        b.grow_point(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(b.area(), 2.0 * (2.0 + 6.0 + 3.0));
        assert_eq!(b.longest_axis(), 2);
        assert_eq!(b.centroid(), Vec3::new(0.5, 1.0, 1.5));
    }

    #[test]
    fn test_intersection_disjoint_is_invalid() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert!(!a.intersection(&b).is_valid());
        assert_eq!(a.intersection(&b).area(), 0.0);
    }

    #[test]
    fn test_slab_hit() {
        let b = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let dir = Vec3::new(0.0, 0.0, -1.0);
        let t = b.hit(Vec3::new(0.0, 0.0, 5.0), dir.recip(), f32::INFINITY);
        assert_eq!(t, Some(4.0));
        assert!(b.hit(Vec3::new(5.0, 0.0, 5.0), dir.recip(), f32::INFINITY).is_none());
    }
}
