//! Ray-vs-shape and point-vs-shape tests.
//!
//! Rays are given as `origin + fraction * direction` with the hit fraction
//! in `[0, 1]`, so `direction` carries the ray length. Shapes are solid:
//! a ray starting inside reports fraction 0.

use glam::Vec3;

use crate::collide::{Collector, EarlyOutHit};
use crate::shape::{Pose, Shape, SubShapeId};

/// Settings for ray casts.
#[derive(Debug, Clone)]
pub struct RayCastSettings {
    /// Cull triangle hits whose face points away from the ray.
    pub backface_culling: bool,
    /// Report a fraction-0 hit when the ray starts inside a solid shape.
    pub treat_convex_as_solid: bool,
}

impl Default for RayCastSettings {
    fn default() -> Self {
        Self {
            backface_culling: true,
            treat_convex_as_solid: true,
        }
    }
}

/// A ray hit on a shape.
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub fraction: f32,
    /// Hit point in world space.
    pub point: Vec3,
    /// Outward surface normal at the hit (zero for inside hits).
    pub normal: Vec3,
    pub sub_shape: SubShapeId,
}

impl EarlyOutHit for RayHit {
    fn early_out_value(&self) -> f32 {
        self.fraction
    }
}

/// A point-overlap hit.
#[derive(Debug, Clone, Copy)]
pub struct PointHit {
    pub sub_shape: SubShapeId,
}

impl EarlyOutHit for PointHit {
    fn early_out_value(&self) -> f32 {
        0.0
    }
}

/// Cast a world-space ray against a shape at a pose.
pub fn cast_ray_vs_shape(
    origin: Vec3,
    direction: Vec3,
    shape: &Shape,
    pose: &Pose,
    prefix: SubShapeId,
    settings: &RayCastSettings,
    collector: &mut dyn Collector<RayHit>,
) {
    shape.for_each_leaf(pose, prefix, &mut |leaf, leaf_pose, id| {
        if collector.should_exit() {
            return false;
        }
        cast_ray_vs_leaf(origin, direction, leaf, leaf_pose, id, settings, collector);
        true
    });
}

fn cast_ray_vs_leaf(
    origin: Vec3,
    direction: Vec3,
    shape: &Shape,
    pose: &Pose,
    sub_shape: SubShapeId,
    settings: &RayCastSettings,
    collector: &mut dyn Collector<RayHit>,
) {
    // To local space; fractions are invariant under the affine transform.
    let local_origin = pose.inverse_transform_point(origin);
    let local_dir = (pose.rotation.conjugate() * direction) / pose.scale;

    let local_hit = match shape {
        Shape::Sphere(s) => ray_vs_sphere(local_origin, local_dir, s.radius),
        Shape::Box(s) => ray_vs_box(local_origin, local_dir, s.half_extents),
        Shape::Capsule(s) => ray_vs_capsule(local_origin, local_dir, s.half_height, s.radius),
        Shape::Cylinder(s) => ray_vs_cylinder(local_origin, local_dir, s.half_height, s.radius),
        Shape::Plane(s) => ray_vs_plane(local_origin, local_dir, s.normal, s.constant),
        Shape::ConvexHull(s) => s.cast_ray(local_origin, local_dir),
        Shape::Mesh(mesh) => {
            cast_ray_vs_mesh(
                origin, local_origin, local_dir, direction, mesh, pose, sub_shape, settings,
                collector,
            );
            return;
        }
        _ => unreachable!("composite shapes are resolved by the leaf walker"),
    };

    if let Some((fraction, local_normal)) = local_hit {
        if fraction >= collector.early_out_fraction() {
            return;
        }
        if fraction == 0.0 && !settings.treat_convex_as_solid {
            return;
        }
        collector.add_hit(RayHit {
            fraction,
            point: origin + direction * fraction,
            normal: world_normal(local_normal, pose),
            sub_shape,
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn cast_ray_vs_mesh(
    origin: Vec3,
    local_origin: Vec3,
    local_dir: Vec3,
    direction: Vec3,
    mesh: &crate::shape::TriangleMesh,
    pose: &Pose,
    prefix: SubShapeId,
    settings: &RayCastSettings,
    collector: &mut dyn Collector<RayHit>,
) {
    let bits = mesh.sub_shape_bits();
    let inv_dir = local_dir.recip();
    let mut hits: Vec<(f32, u32, Vec3)> = Vec::new();
    mesh.for_each_along_ray(local_origin, inv_dir, 1.0, &mut |tri| {
        let [a, b, c] = mesh.triangle(tri);
        let (t, normal) = ray_vs_triangle(local_origin, local_dir, a, b, c)?;
        if settings.backface_culling && normal.dot(local_dir) > 0.0 {
            return None;
        }
        hits.push((t, tri, normal));
        // Tighten traversal only for single-hit collectors.
        None
    });
    for (t, tri, normal) in hits {
        if t >= collector.early_out_fraction() || collector.should_exit() {
            continue;
        }
        collector.add_hit(RayHit {
            fraction: t,
            point: origin + direction * t,
            normal: world_normal(normal, pose),
            sub_shape: prefix.pushed(tri, bits),
        });
    }
}

/// Test whether a world-space point is inside a shape.
pub fn collide_point_vs_shape(
    point: Vec3,
    shape: &Shape,
    pose: &Pose,
    prefix: SubShapeId,
    collector: &mut dyn Collector<PointHit>,
) {
    shape.for_each_leaf(pose, prefix, &mut |leaf, leaf_pose, id| {
        if collector.should_exit() {
            return false;
        }
        let local = leaf_pose.inverse_transform_point(point);
        let inside = match leaf {
            Shape::Sphere(s) => local.length_squared() <= s.radius * s.radius,
            Shape::Box(s) => {
                local.abs().cmple(s.half_extents).all()
            }
            Shape::Capsule(s) => {
                let clamped_y = local.y.clamp(-s.half_height, s.half_height);
                (local - Vec3::new(0.0, clamped_y, 0.0)).length_squared()
                    <= s.radius * s.radius
            }
            Shape::Cylinder(s) => {
                local.y.abs() <= s.half_height
                    && local.x * local.x + local.z * local.z <= s.radius * s.radius
            }
            Shape::Plane(s) => s.signed_distance(local) <= 0.0,
            Shape::ConvexHull(s) => s.contains_point(local),
            // Meshes are surfaces; they contain no points.
            Shape::Mesh(_) => false,
            _ => unreachable!("composite shapes are resolved by the leaf walker"),
        };
        if inside {
            collector.add_hit(PointHit { sub_shape: id });
        }
        true
    });
}

#[inline]
fn world_normal(local_normal: Vec3, pose: &Pose) -> Vec3 {
    if local_normal == Vec3::ZERO {
        return Vec3::ZERO;
    }
    // Normals transform by the inverse transpose; the scale is diagonal.
    (pose.rotation * (local_normal / pose.scale)).normalize_or_zero()
}

fn ray_vs_sphere(origin: Vec3, dir: Vec3, radius: f32) -> Option<(f32, Vec3)> {
    if origin.length_squared() <= radius * radius {
        return Some((0.0, Vec3::ZERO));
    }
    let a = dir.length_squared();
    if a < 1.0e-12 {
        return None;
    }
    let b = origin.dot(dir);
    let c = origin.length_squared() - radius * radius;
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let point = origin + dir * t;
    Some((t, point / radius))
}

fn ray_vs_box(origin: Vec3, dir: Vec3, half_extents: Vec3) -> Option<(f32, Vec3)> {
    let mut t_enter = 0.0f32;
    let mut t_exit = 1.0f32;
    let mut normal = Vec3::ZERO;
    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        let h = half_extents[axis];
        if d.abs() < 1.0e-12 {
            if o.abs() > h {
                return None;
            }
            continue;
        }
        let mut t0 = (-h - o) / d;
        let mut t1 = (h - o) / d;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        if t0 > t_enter {
            t_enter = t0;
            normal = -Vec3::AXES[axis] * d.signum();
        }
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    if normal == Vec3::ZERO {
        // Started inside.
        return Some((0.0, Vec3::ZERO));
    }
    Some((t_enter, normal))
}

fn ray_vs_capsule(origin: Vec3, dir: Vec3, half_height: f32, radius: f32) -> Option<(f32, Vec3)> {
    // Inside test first.
    let clamped = origin.y.clamp(-half_height, half_height);
    if (origin - Vec3::new(0.0, clamped, 0.0)).length_squared() <= radius * radius {
        return Some((0.0, Vec3::ZERO));
    }

    let mut best: Option<(f32, Vec3)> = None;
    let mut consider = |t: f32, normal: Vec3| {
        if (0.0..=1.0).contains(&t) && best.map_or(true, |(bt, _)| t < bt) {
            best = Some((t, normal));
        }
    };

    // Infinite side tube clipped to the cylindrical section.
    let a = dir.x * dir.x + dir.z * dir.z;
    if a > 1.0e-12 {
        let b = origin.x * dir.x + origin.z * dir.z;
        let c = origin.x * origin.x + origin.z * origin.z - radius * radius;
        let disc = b * b - a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / a;
            let y = origin.y + dir.y * t;
            if y.abs() <= half_height {
                let p = origin + dir * t;
                consider(t, Vec3::new(p.x, 0.0, p.z) / radius);
            }
        }
    }

    // Cap spheres.
    for cap_y in [half_height, -half_height] {
        let cap = Vec3::new(0.0, cap_y, 0.0);
        let o = origin - cap;
        let aa = dir.length_squared();
        if aa < 1.0e-12 {
            continue;
        }
        let b = o.dot(dir);
        let c = o.length_squared() - radius * radius;
        let disc = b * b - aa * c;
        if disc < 0.0 {
            continue;
        }
        let t = (-b - disc.sqrt()) / aa;
        let p = origin + dir * t;
        // Only the hemisphere beyond the cylindrical section.
        if (p.y - cap_y).signum() == cap_y.signum() || (p.y - cap_y).abs() < 1.0e-9 {
            consider(t, (p - cap) / radius);
        }
    }

    best
}

fn ray_vs_cylinder(origin: Vec3, dir: Vec3, half_height: f32, radius: f32) -> Option<(f32, Vec3)> {
    if origin.y.abs() <= half_height
        && origin.x * origin.x + origin.z * origin.z <= radius * radius
    {
        return Some((0.0, Vec3::ZERO));
    }

    let mut best: Option<(f32, Vec3)> = None;
    let mut consider = |t: f32, normal: Vec3| {
        if (0.0..=1.0).contains(&t) && best.map_or(true, |(bt, _)| t < bt) {
            best = Some((t, normal));
        }
    };

    // Wall.
    let a = dir.x * dir.x + dir.z * dir.z;
    if a > 1.0e-12 {
        let b = origin.x * dir.x + origin.z * dir.z;
        let c = origin.x * origin.x + origin.z * origin.z - radius * radius;
        let disc = b * b - a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / a;
            let y = origin.y + dir.y * t;
            if y.abs() <= half_height {
                let p = origin + dir * t;
                consider(t, Vec3::new(p.x, 0.0, p.z) / radius);
            }
        }
    }

    // Cap disks.
    if dir.y.abs() > 1.0e-12 {
        for cap_y in [half_height, -half_height] {
            let t = (cap_y - origin.y) / dir.y;
            let p = origin + dir * t;
            if p.x * p.x + p.z * p.z <= radius * radius {
                consider(t, Vec3::new(0.0, cap_y.signum(), 0.0));
            }
        }
    }

    best
}

fn ray_vs_plane(origin: Vec3, dir: Vec3, normal: Vec3, constant: f32) -> Option<(f32, Vec3)> {
    let dist = normal.dot(origin) - constant;
    if dist <= 0.0 {
        return Some((0.0, Vec3::ZERO));
    }
    let denom = normal.dot(dir);
    if denom >= -1.0e-12 {
        return None;
    }
    let t = -dist / denom;
    if t > 1.0 {
        return None;
    }
    Some((t, normal))
}

/// Möller-Trumbore, returning the fraction and the (unnormalized side)
/// geometric normal.
fn ray_vs_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, Vec3)> {
    let ab = b - a;
    let ac = c - a;
    let normal = ab.cross(ac);
    let p = dir.cross(ac);
    let det = ab.dot(p);
    if det.abs() < 1.0e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(ab);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = ac.dot(q) * inv_det;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    Some((t, normal.normalize_or_zero()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{AllCollector, ClosestCollector};
    use glam::Quat;

    fn closest_hit(
        origin: Vec3,
        direction: Vec3,
        shape: &Shape,
        pose: &Pose,
    ) -> Option<RayHit> {
        let mut collector = ClosestCollector::default();
        cast_ray_vs_shape(
            origin,
            direction,
            shape,
            pose,
            SubShapeId::empty(),
            &RayCastSettings::default(),
            &mut collector,
        );
        collector.hit
    }

    #[test]
    fn test_ray_vs_sphere_head_on() {
        let shape = Shape::sphere(1.0);
        let hit = closest_hit(
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(0.0, -100.0, 0.0),
            &shape,
            &Pose::IDENTITY,
        )
        .unwrap();
        assert!((hit.fraction - 0.04).abs() < 1e-4, "fraction {}", hit.fraction);
        assert!((hit.point - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-3);
        assert!((hit.normal - Vec3::Y).length() < 1e-3);
    }

    #[test]
    fn test_ray_vs_box_rotated() {
        let shape = Shape::cuboid(Vec3::ONE);
        let pose = Pose::new(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let hit = closest_hit(
            Vec3::new(5.0, 0.0, 0.0),
            Vec3::new(-10.0, 0.0, 0.0),
            &shape,
            &pose,
        )
        .unwrap();
        assert!((hit.fraction - 0.4).abs() < 1e-4);
        assert!((hit.normal - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn test_ray_miss_and_inside() {
        let shape = Shape::sphere(1.0);
        assert!(closest_hit(
            Vec3::new(0.0, 5.0, 3.0),
            Vec3::new(0.0, -10.0, 0.0),
            &shape,
            &Pose::IDENTITY
        )
        .is_none());

        let inside = closest_hit(
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, -10.0, 0.0),
            &shape,
            &Pose::IDENTITY,
        )
        .unwrap();
        assert_eq!(inside.fraction, 0.0);
    }

    #[test]
    fn test_ray_vs_capsule_side_and_cap() {
        let shape = Shape::capsule(1.0, 0.5);
        let side = closest_hit(
            Vec3::new(5.0, 0.5, 0.0),
            Vec3::new(-10.0, 0.0, 0.0),
            &shape,
            &Pose::IDENTITY,
        )
        .unwrap();
        assert!((side.point.x - 0.5).abs() < 1e-3);
        assert!((side.normal - Vec3::X).length() < 1e-3);

        let cap = closest_hit(
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(0.0, -10.0, 0.0),
            &shape,
            &Pose::IDENTITY,
        )
        .unwrap();
        assert!((cap.point.y - 1.5).abs() < 1e-3);
        assert!((cap.normal - Vec3::Y).length() < 1e-3);
    }

    #[test]
    fn test_ray_vs_cylinder_cap() {
        let shape = Shape::cylinder(1.0, 0.5);
        let hit = closest_hit(
            Vec3::new(0.2, 5.0, 0.0),
            Vec3::new(0.0, -10.0, 0.0),
            &shape,
            &Pose::IDENTITY,
        )
        .unwrap();
        assert!((hit.point.y - 1.0).abs() < 1e-3);
        assert!((hit.normal - Vec3::Y).length() < 1e-3);
    }

    #[test]
    fn test_ray_vs_mesh_backface() {
        let mesh = Shape::Mesh(
            crate::shape::TriangleMesh::new(
                vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                vec![[0, 2, 1]],
            )
            .unwrap(),
        );
        // Triangle normal is -Z; a ray flying towards +Z sees the front.
        let front = closest_hit(
            Vec3::new(0.25, 0.25, -1.0),
            Vec3::new(0.0, 0.0, 2.0),
            &mesh,
            &Pose::IDENTITY,
        );
        assert!(front.is_some());
        assert!((front.unwrap().fraction - 0.5).abs() < 1e-4);

        // From the other side the face is culled.
        let back = closest_hit(
            Vec3::new(0.25, 0.25, 1.0),
            Vec3::new(0.0, 0.0, -2.0),
            &mesh,
            &Pose::IDENTITY,
        );
        assert!(back.is_none());

        // Unless culling is off.
        let mut collector = AllCollector::default();
        cast_ray_vs_shape(
            Vec3::new(0.25, 0.25, 1.0),
            Vec3::new(0.0, 0.0, -2.0),
            &mesh,
            &Pose::IDENTITY,
            SubShapeId::empty(),
            &RayCastSettings {
                backface_culling: false,
                ..Default::default()
            },
            &mut collector,
        );
        assert_eq!(collector.hits.len(), 1);
    }

    #[test]
    fn test_point_vs_shapes() {
        let shape = Shape::cuboid(Vec3::ONE);
        let mut collector = AllCollector::default();
        collide_point_vs_shape(
            Vec3::new(0.5, 0.5, 0.5),
            &shape,
            &Pose::IDENTITY,
            SubShapeId::empty(),
            &mut collector,
        );
        assert_eq!(collector.hits.len(), 1);

        let mut collector = AllCollector::default();
        collide_point_vs_shape(
            Vec3::new(1.5, 0.0, 0.0),
            &shape,
            &Pose::IDENTITY,
            SubShapeId::empty(),
            &mut collector,
        );
        assert!(collector.hits.is_empty());
    }
}
