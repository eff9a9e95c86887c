//! Axis-aligned bounding boxes for the broadphase and shape bounds.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any point or box will grow.
    pub const INVALID: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest box containing both endpoints of a segment.
    #[inline]
    pub fn from_segment(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Test whether two AABBs overlap.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    #[inline]
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn include(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    #[inline]
    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Box covering this box swept along `displacement`.
    #[inline]
    pub fn swept(&self, displacement: Vec3) -> Aabb {
        self.merged(&self.translated(displacement))
    }

    /// Surface area, used as the broadphase tree insertion cost metric.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// World-space box of this local box under rotation + translation.
    ///
    /// Projects the rotated local axes onto each world axis.
    pub fn transformed(&self, rotation: Quat, translation: Vec3) -> Aabb {
        let center = rotation * self.center() + translation;
        let he = self.half_extents();
        let abs_x = (rotation * Vec3::X).abs();
        let abs_y = (rotation * Vec3::Y).abs();
        let abs_z = (rotation * Vec3::Z).abs();
        let extent = abs_x * he.x + abs_y * he.y + abs_z * he.z;
        Aabb {
            min: center - extent,
            max: center + extent,
        }
    }

    /// Slab test against a ray `origin + t * dir` for `t` in `[0, max_t]`.
    ///
    /// Returns the entry parameter, or `None` when the ray misses.
    /// `inv_dir` components may be infinite for axis-parallel rays.
    #[inline]
    pub fn ray_hit(&self, origin: Vec3, inv_dir: Vec3, max_t: f32) -> Option<f32> {
        let t1 = (self.min - origin) * inv_dir;
        let t2 = (self.max - origin) * inv_dir;
        let t_min = t1.min(t2);
        let t_max = t1.max(t2);
        let near = t_min.max_element().max(0.0);
        let far = t_max.min_element().min(max_t);
        if near <= far {
            Some(near)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap() {
        let a = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let c = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_contains() {
        let outer = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        let inner = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains_point(Vec3::new(1.5, 0.0, -1.5)));
        assert!(!outer.contains_point(Vec3::new(2.5, 0.0, 0.0)));
    }

    #[test]
    fn test_transformed_rotation() {
        // A 2x2x2 box rotated 45 degrees around Y grows to sqrt(2) along X/Z.
        let local = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        let rot = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        let world = local.transformed(rot, Vec3::new(0.0, 5.0, 0.0));
        let eps = 1e-5;
        assert!((world.max.x - 2f32.sqrt()).abs() < eps);
        assert!((world.max.y - 6.0).abs() < eps);
        assert!((world.center() - Vec3::new(0.0, 5.0, 0.0)).length() < eps);
    }

    #[test]
    fn test_ray_hit() {
        let aabb = Aabb::new(Vec3::new(-1.0, 4.0, -1.0), Vec3::new(1.0, 6.0, 1.0));
        let origin = Vec3::new(0.0, 0.0, 0.0);
        let dir = Vec3::new(0.0, 1.0, 0.0);
        let t = aabb.ray_hit(origin, dir.recip(), 100.0);
        assert_eq!(t, Some(4.0));

        // Pointing away.
        assert!(aabb.ray_hit(origin, (-dir).recip(), 100.0).is_none());
        // Too short.
        assert!(aabb.ray_hit(origin, dir.recip(), 3.0).is_none());
    }

    #[test]
    fn test_swept() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let swept = aabb.swept(Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(swept.min, Vec3::ZERO);
        assert_eq!(swept.max, Vec3::new(3.0, 1.0, 1.0));
    }
}
