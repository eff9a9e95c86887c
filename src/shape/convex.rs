//! Support functions for the convex shapes.
//!
//! GJK runs on the "core" shape (convex radius stripped) and adds the radius
//! analytically; EPA and the cast paths run on the full geometry. The
//! [`SupportMode`] selects between the two.

use glam::Vec3;

use crate::shape::{Pose, Shape};

/// How the convex radius enters the support function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportMode {
    /// Exact full geometry.
    Default,
    /// Core shape plus the radius along the query direction.
    IncludeConvexRadius,
    /// Core shape only; the caller accounts for the radius.
    ExcludeConvexRadius,
}

/// A convex point set queried by direction.
pub trait Support {
    /// Farthest point of the set along `direction` (world space).
    /// `direction` need not be normalized.
    fn support(&self, direction: Vec3) -> Vec3;
}

/// Support function of a shape's local geometry, before scale.
///
/// `direction` is in (scaled) local space. Only convex variants are valid.
fn local_support(shape: &Shape, direction: Vec3, mode: SupportMode) -> Vec3 {
    let dir_n = direction.normalize_or(Vec3::X);
    match shape {
        Shape::Sphere(s) => match mode {
            SupportMode::ExcludeConvexRadius => Vec3::ZERO,
            _ => dir_n * s.radius,
        },
        Shape::Box(s) => {
            let he = match mode {
                SupportMode::Default => s.half_extents,
                _ => s.half_extents - Vec3::splat(s.convex_radius),
            };
            let mut p = Vec3::new(
                if direction.x >= 0.0 { he.x } else { -he.x },
                if direction.y >= 0.0 { he.y } else { -he.y },
                if direction.z >= 0.0 { he.z } else { -he.z },
            );
            if mode == SupportMode::IncludeConvexRadius {
                p += dir_n * s.convex_radius;
            }
            p
        }
        Shape::Capsule(s) => {
            let base = Vec3::new(
                0.0,
                if direction.y >= 0.0 {
                    s.half_height
                } else {
                    -s.half_height
                },
                0.0,
            );
            match mode {
                SupportMode::ExcludeConvexRadius => base,
                _ => base + dir_n * s.radius,
            }
        }
        Shape::Cylinder(s) => {
            let (radius, half_height) = match mode {
                SupportMode::Default => (s.radius, s.half_height),
                _ => (
                    s.radius - s.convex_radius,
                    s.half_height - s.convex_radius,
                ),
            };
            let y = if direction.y >= 0.0 {
                half_height
            } else {
                -half_height
            };
            let xz = Vec3::new(direction.x, 0.0, direction.z);
            let xz_len = xz.length();
            let mut p = if xz_len > 1.0e-6 {
                Vec3::new(xz.x * radius / xz_len, y, xz.z * radius / xz_len)
            } else {
                Vec3::new(0.0, y, 0.0)
            };
            if mode == SupportMode::IncludeConvexRadius {
                p += dir_n * s.convex_radius;
            }
            p
        }
        Shape::ConvexHull(s) => {
            let mut p = s.support_point(direction);
            if mode == SupportMode::IncludeConvexRadius && s.convex_radius > 0.0 {
                p += dir_n * s.convex_radius;
            }
            p
        }
        _ => unreachable!("support function queried on a non-convex shape"),
    }
}

/// A convex shape instanced at a world pose, usable as a GJK support.
#[derive(Clone, Copy)]
pub struct TransformedConvex<'a> {
    shape: &'a Shape,
    pose: Pose,
    mode: SupportMode,
}

impl<'a> TransformedConvex<'a> {
    pub fn new(shape: &'a Shape, pose: Pose, mode: SupportMode) -> Self {
        debug_assert!(shape.is_convex(), "GJK support needs a convex shape");
        Self { shape, pose, mode }
    }

    /// World-space convex radius stripped by `ExcludeConvexRadius`.
    ///
    /// Non-uniform scale rounds the radius down to the smallest axis.
    #[inline]
    pub fn convex_radius(&self) -> f32 {
        self.shape.convex_radius() * self.pose.scale.min_element()
    }

    #[inline]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        self.shape
    }

    #[inline]
    pub fn with_mode(&self, mode: SupportMode) -> TransformedConvex<'a> {
        TransformedConvex { mode, ..*self }
    }
}

impl Support for TransformedConvex<'_> {
    fn support(&self, direction: Vec3) -> Vec3 {
        // Support of S(A) along d is S * support_A(S^T d); the scale here is
        // diagonal so S^T = S.
        let dir_local = self.pose.rotation.conjugate() * direction;
        let p = self.pose.scale
            * local_support(self.shape, dir_local * self.pose.scale, self.mode);
        self.pose.position + self.pose.rotation * p
    }
}

/// A world-space triangle used as a degenerate convex (mesh leaves).
#[derive(Clone, Copy, Debug)]
pub struct TriangleSupport {
    pub vertices: [Vec3; 3],
}

impl TriangleSupport {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            vertices: [a, b, c],
        }
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        (self.vertices[1] - self.vertices[0])
            .cross(self.vertices[2] - self.vertices[0])
            .normalize_or_zero()
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.vertices[0] + self.vertices[1] + self.vertices[2]) / 3.0
    }
}

impl Support for TriangleSupport {
    fn support(&self, direction: Vec3) -> Vec3 {
        let d0 = self.vertices[0].dot(direction);
        let d1 = self.vertices[1].dot(direction);
        let d2 = self.vertices[2].dot(direction);
        if d0 >= d1 && d0 >= d2 {
            self.vertices[0]
        } else if d1 >= d2 {
            self.vertices[1]
        } else {
            self.vertices[2]
        }
    }
}

/// A single world-space point (shape casts sweep these).
#[derive(Clone, Copy, Debug)]
pub struct PointSupport(pub Vec3);

impl Support for PointSupport {
    fn support(&self, _direction: Vec3) -> Vec3 {
        self.0
    }
}

/// Collect the world-space face of `shape` that supports `direction`
/// (the face whose outward normal is most aligned with it).
///
/// Produces 0 points for point-like contacts (spheres), 2 for edge contacts
/// (capsule side, cylinder wall), and a CCW polygon otherwise.
pub fn supporting_face(shape: &Shape, direction: Vec3, pose: &Pose, out: &mut Vec<Vec3>) {
    out.clear();
    let dir_local = (pose.rotation.conjugate() * direction) * pose.scale;
    match shape {
        Shape::Sphere(_) => {}
        Shape::Box(s) => {
            let he = s.half_extents;
            let a = dir_local.abs();
            // Dominant axis picks the face, direction sign picks the side.
            let (axis, u, v) = if a.x >= a.y && a.x >= a.z {
                (Vec3::X * he.x.copysign(dir_local.x), Vec3::Y * he.y, Vec3::Z * he.z)
            } else if a.y >= a.z {
                (Vec3::Y * he.y.copysign(dir_local.y), Vec3::Z * he.z, Vec3::X * he.x)
            } else {
                (Vec3::Z * he.z.copysign(dir_local.z), Vec3::X * he.x, Vec3::Y * he.y)
            };
            out.push(axis + u + v);
            out.push(axis - u + v);
            out.push(axis - u - v);
            out.push(axis + u - v);
        }
        Shape::Capsule(s) => {
            // Side contact only; cap contacts are point-like.
            if dir_local.y.abs() < 0.99 * dir_local.length() {
                out.push(Vec3::new(0.0, -s.half_height, 0.0));
                out.push(Vec3::new(0.0, s.half_height, 0.0));
            }
        }
        Shape::Cylinder(s) => {
            let radial = Vec3::new(dir_local.x, 0.0, dir_local.z);
            let radial_len = radial.length();
            if dir_local.y.abs() > radial_len {
                // Cap face, approximated by a regular polygon.
                let y = s.half_height.copysign(dir_local.y);
                const SEGMENTS: usize = 12;
                for i in 0..SEGMENTS {
                    let angle = i as f32 / SEGMENTS as f32 * std::f32::consts::TAU;
                    // Wind so the polygon is CCW seen from the face normal.
                    let angle = if dir_local.y >= 0.0 { angle } else { -angle };
                    out.push(Vec3::new(
                        s.radius * angle.cos(),
                        y,
                        s.radius * angle.sin(),
                    ));
                }
            } else if radial_len > 1.0e-6 {
                let r = radial * (s.radius / radial_len);
                out.push(Vec3::new(r.x, -s.half_height, r.z));
                out.push(Vec3::new(r.x, s.half_height, r.z));
            }
        }
        Shape::ConvexHull(s) => {
            s.supporting_face(dir_local, out);
        }
        _ => {}
    }
    for p in out.iter_mut() {
        *p = pose.position + pose.rotation * (pose.scale * *p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_sphere_support_world() {
        let shape = Shape::sphere(2.0);
        let pose = Pose::new(Vec3::new(0.0, 5.0, 0.0), Quat::IDENTITY);
        let support = TransformedConvex::new(&shape, pose, SupportMode::Default);
        let p = support.support(Vec3::Y);
        assert!((p - Vec3::new(0.0, 7.0, 0.0)).length() < 1e-5);

        // Core is the center point.
        let core = support.with_mode(SupportMode::ExcludeConvexRadius);
        let p = core.support(Vec3::Y);
        assert!((p - Vec3::new(0.0, 5.0, 0.0)).length() < 1e-5);
        assert!((support.convex_radius() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_support_modes() {
        let shape = Shape::Box(crate::shape::BoxShape::with_convex_radius(
            Vec3::ONE,
            0.1,
        ));
        let support = TransformedConvex::new(&shape, Pose::IDENTITY, SupportMode::Default);
        let corner = support.support(Vec3::new(1.0, 1.0, 1.0));
        assert!((corner - Vec3::ONE).length() < 1e-5);

        let core = support.with_mode(SupportMode::ExcludeConvexRadius);
        let corner = core.support(Vec3::new(1.0, 1.0, 1.0));
        assert!((corner - Vec3::splat(0.9)).length() < 1e-5);
    }

    #[test]
    fn test_scaled_support_is_ellipsoid() {
        let shape = Shape::sphere(1.0);
        let pose = Pose::with_scale(Vec3::ZERO, Quat::IDENTITY, Vec3::new(2.0, 1.0, 1.0));
        let support = TransformedConvex::new(&shape, pose, SupportMode::Default);
        let px = support.support(Vec3::X);
        assert!((px - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
        let py = support.support(Vec3::Y);
        assert!((py - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_capsule_support_rotated() {
        let shape = Shape::capsule(1.0, 0.5);
        let pose = Pose::new(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let support = TransformedConvex::new(&shape, pose, SupportMode::Default);
        // Local Y maps to world -X after +90 degrees around Z... the +X query
        // should reach half_height + radius along X.
        let p = support.support(Vec3::X);
        assert!((p.x.abs() - 1.5).abs() < 1e-4, "support x = {}", p.x);
    }

    #[test]
    fn test_box_supporting_face() {
        let shape = Shape::cuboid(Vec3::new(1.0, 2.0, 3.0));
        let mut face = Vec::new();
        supporting_face(&shape, Vec3::Y, &Pose::IDENTITY, &mut face);
        assert_eq!(face.len(), 4);
        for p in &face {
            assert!((p.y - 2.0).abs() < 1e-5);
            assert!(p.x.abs() <= 1.0 + 1e-5);
            assert!(p.z.abs() <= 3.0 + 1e-5);
        }
    }

    #[test]
    fn test_triangle_support() {
        let tri = TriangleSupport::new(Vec3::ZERO, Vec3::X, Vec3::Y);
        assert_eq!(tri.support(Vec3::X), Vec3::X);
        assert_eq!(tri.support(Vec3::Y), Vec3::Y);
        assert_eq!(tri.support(Vec3::new(-1.0, -1.0, 0.0)), Vec3::ZERO);
    }
}
