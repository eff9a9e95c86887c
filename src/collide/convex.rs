//! Convex-vs-convex and convex-vs-plane narrow phase.

use glam::Vec3;

use crate::collide::{
    epa, gjk, CastArgs, CastStatus, CollideArgs, CollideShapeResult, Collector, ShapeCastResult,
};
use crate::shape::convex::{supporting_face, Support, SupportMode, TransformedConvex};
use crate::shape::Shape;

/// Generic convex pair: GJK on the cores with analytic radii, EPA when the
/// cores overlap, supporting faces on request.
pub(crate) fn collide_convex_vs_convex(
    args: &CollideArgs,
    collector: &mut dyn Collector<CollideShapeResult>,
) {
    let core_a =
        TransformedConvex::new(args.shape_a, args.pose_a, SupportMode::ExcludeConvexRadius);
    let core_b =
        TransformedConvex::new(args.shape_b, args.pose_b, SupportMode::ExcludeConvexRadius);
    let ra = core_a.convex_radius();
    let rb = core_b.convex_radius();
    let limit = ra + rb + args.settings.max_separation;

    let initial = args.pose_b.position - args.pose_a.position;
    let gjk_result = gjk::closest_points(
        &core_a,
        &core_b,
        args.settings.tolerance,
        (limit + args.settings.tolerance) * (limit + args.settings.tolerance),
        initial,
    );

    let (point_a, point_b, normal, depth) = if gjk_result.colliding {
        let full_a = core_a.with_mode(SupportMode::IncludeConvexRadius);
        let full_b = core_b.with_mode(SupportMode::IncludeConvexRadius);
        match epa::penetration_depth(&full_a, &full_b, &gjk_result.simplex, args.settings.tolerance)
        {
            Some(pen) => (pen.point_a, pen.point_b, pen.axis, pen.depth),
            None => {
                tracing::debug!("epa failed on a convex pair, dropping the contact");
                return;
            }
        }
    } else {
        let dist = gjk_result.distance_sq.sqrt();
        let separation = dist - (ra + rb);
        if separation > args.settings.max_separation || dist <= 0.0 {
            return;
        }
        let normal = gjk_result.axis / dist;
        let point_a = gjk_result.point_a + normal * ra;
        let point_b = gjk_result.point_b - normal * rb;
        (point_a, point_b, normal, -separation)
    };

    push_convex_result(args, collector, point_a, point_b, normal, depth);
}

/// Closed-form sphere pair.
pub(crate) fn collide_sphere_vs_sphere(
    args: &CollideArgs,
    collector: &mut dyn Collector<CollideShapeResult>,
) {
    let (Shape::Sphere(sa), Shape::Sphere(sb)) = (args.shape_a, args.shape_b) else {
        return;
    };
    let ra = sa.radius * args.pose_a.scale.min_element();
    let rb = sb.radius * args.pose_b.scale.min_element();
    let delta = args.pose_b.position - args.pose_a.position;
    let dist = delta.length();
    let separation = dist - (ra + rb);
    if separation > args.settings.max_separation {
        return;
    }
    let normal = if dist > 1.0e-6 { delta / dist } else { Vec3::Y };
    let point_a = args.pose_a.position + normal * ra;
    let point_b = args.pose_b.position - normal * rb;
    push_convex_result(args, collector, point_a, point_b, normal, -separation);
}

/// Convex shape A against a half space B.
pub(crate) fn collide_convex_vs_plane(
    args: &CollideArgs,
    collector: &mut dyn Collector<CollideShapeResult>,
) {
    let Shape::Plane(plane) = args.shape_b else {
        return;
    };
    let plane_normal = args.pose_b.rotation * plane.normal;
    let plane_point = args
        .pose_b
        .transform_point(plane.normal * plane.constant);
    let plane_d = plane_normal.dot(plane_point);

    let support = TransformedConvex::new(args.shape_a, args.pose_a, SupportMode::Default);
    let deepest = support.support(-plane_normal);
    let distance = plane_normal.dot(deepest) - plane_d;
    if distance > args.settings.max_separation {
        return;
    }

    // B is the half space, so the contact normal (A to B) is the inward
    // plane direction.
    let normal = -plane_normal;
    let point_a = deepest;
    let point_b = deepest - plane_normal * distance;
    let depth = -distance;

    if -depth >= collector.early_out_fraction() {
        return;
    }
    let mut result = CollideShapeResult {
        point_a,
        point_b,
        axis: normal,
        normal,
        depth,
        sub_shape_a: args.sub_shape_a,
        sub_shape_b: args.sub_shape_b,
        face_a: Vec::new(),
        face_b: Vec::new(),
    };
    if args.settings.collect_faces {
        supporting_face(args.shape_a, normal, &args.pose_a, &mut result.face_a);
        // A quad on the plane, big enough to cover A's face.
        let radius = args.shape_a.world_aabb(&args.pose_a).half_extents().length() + 1.0;
        let u = plane_normal.any_orthonormal_vector() * radius;
        let v = plane_normal.cross(u.normalize_or_zero()) * radius;
        result.face_b = vec![
            point_b + u + v,
            point_b - u + v,
            point_b - u - v,
            point_b + u - v,
        ];
    }
    collector.add_hit(result);
}

fn push_convex_result(
    args: &CollideArgs,
    collector: &mut dyn Collector<CollideShapeResult>,
    point_a: Vec3,
    point_b: Vec3,
    normal: Vec3,
    depth: f32,
) {
    if -depth >= collector.early_out_fraction() {
        return;
    }
    let mut result = CollideShapeResult {
        point_a,
        point_b,
        axis: normal,
        normal,
        depth,
        sub_shape_a: args.sub_shape_a,
        sub_shape_b: args.sub_shape_b,
        face_a: Vec::new(),
        face_b: Vec::new(),
    };
    if args.settings.collect_faces {
        supporting_face(args.shape_a, normal, &args.pose_a, &mut result.face_a);
        supporting_face(args.shape_b, -normal, &args.pose_b, &mut result.face_b);
    }
    collector.add_hit(result);
}

/// Sweep convex A against convex B.
pub(crate) fn cast_convex_vs_convex(
    args: &CastArgs,
    collector: &mut dyn Collector<ShapeCastResult>,
) {
    let full_a = TransformedConvex::new(args.shape_a, args.pose_a, SupportMode::Default);
    let full_b = TransformedConvex::new(args.shape_b, args.pose_b, SupportMode::Default);

    let Some(hit) = gjk::cast(&full_a, args.displacement, &full_b, args.settings.tolerance)
    else {
        return;
    };

    if hit.fraction == 0.0 && hit.normal == Vec3::ZERO {
        // Already overlapping at the start of the sweep.
        if !args.settings.return_deepest_point {
            return;
        }
        let core_a =
            full_a.with_mode(SupportMode::ExcludeConvexRadius);
        let core_b =
            full_b.with_mode(SupportMode::ExcludeConvexRadius);
        let gjk_result = gjk::closest_points(
            &core_a,
            &core_b,
            args.settings.tolerance,
            f32::MAX,
            args.pose_b.position - args.pose_a.position,
        );
        let (point_a, point_b, normal, depth) = if gjk_result.colliding {
            match epa::penetration_depth(
                &full_a,
                &full_b,
                &gjk_result.simplex,
                args.settings.tolerance,
            ) {
                Some(pen) => (pen.point_a, pen.point_b, pen.axis, pen.depth),
                None => return,
            }
        } else {
            // Core separated, overlap within the convex radii.
            let dist = gjk_result.distance_sq.sqrt();
            if dist <= 0.0 {
                return;
            }
            let normal = gjk_result.axis / dist;
            let ra = core_a.convex_radius();
            let rb = core_b.convex_radius();
            (
                gjk_result.point_a + normal * ra,
                gjk_result.point_b - normal * rb,
                normal,
                (ra + rb) - dist,
            )
        };
        collector.add_hit(ShapeCastResult {
            status: CastStatus::Colliding,
            fraction: 0.0,
            point_a,
            point_b,
            normal,
            depth,
            sub_shape_a: args.sub_shape_a,
            sub_shape_b: args.sub_shape_b,
        });
        return;
    }

    if hit.fraction >= collector.early_out_fraction() {
        return;
    }
    collector.add_hit(ShapeCastResult {
        status: CastStatus::Colliding,
        fraction: hit.fraction,
        point_a: hit.point_a,
        point_b: hit.point_b,
        normal: hit.normal,
        depth: 0.0,
        sub_shape_a: args.sub_shape_a,
        sub_shape_b: args.sub_shape_b,
    });
}

/// Sweep convex A against a half space.
pub(crate) fn cast_convex_vs_plane(
    args: &CastArgs,
    collector: &mut dyn Collector<ShapeCastResult>,
) {
    let Shape::Plane(plane) = args.shape_b else {
        return;
    };
    let plane_normal = args.pose_b.rotation * plane.normal;
    let plane_d = plane_normal.dot(
        args.pose_b
            .transform_point(plane.normal * plane.constant),
    );

    let support = TransformedConvex::new(args.shape_a, args.pose_a, SupportMode::Default);
    let deepest = support.support(-plane_normal);
    let distance = plane_normal.dot(deepest) - plane_d;
    let approach = plane_normal.dot(args.displacement);

    if distance < 0.0 {
        if args.settings.return_deepest_point {
            collector.add_hit(ShapeCastResult {
                status: CastStatus::Colliding,
                fraction: 0.0,
                point_a: deepest,
                point_b: deepest - plane_normal * distance,
                normal: -plane_normal,
                depth: -distance,
                sub_shape_a: args.sub_shape_a,
                sub_shape_b: args.sub_shape_b,
            });
        }
        return;
    }
    if approach >= 0.0 {
        return;
    }
    let fraction = distance / -approach;
    if fraction > 1.0 || fraction >= collector.early_out_fraction() {
        return;
    }
    let point = deepest + args.displacement * fraction;
    collector.add_hit(ShapeCastResult {
        status: CastStatus::Colliding,
        fraction,
        point_a: point,
        point_b: point,
        normal: -plane_normal,
        depth: 0.0,
        sub_shape_a: args.sub_shape_a,
        sub_shape_b: args.sub_shape_b,
    });
}

/// One clipped manifold contact: points on A and B plus penetration depth.
pub type ManifoldPoint = (Vec3, Vec3, f32);

/// Build a polygonal contact patch from the two supporting faces.
///
/// The incident face is clipped against the side planes of the reference
/// face; surviving points within `max_separation` of the reference plane
/// become manifold contacts. Falls back to an empty set when either face is
/// too small; callers then use the single deepest point.
pub fn clip_faces(
    face_a: &[Vec3],
    face_b: &[Vec3],
    normal: Vec3,
    max_separation: f32,
    out: &mut Vec<ManifoldPoint>,
) {
    out.clear();
    if face_a.len() < 3 && face_b.len() < 3 {
        return;
    }

    // Prefer the polygonal face as the reference; `swapped` remembers which
    // side the clipped points live on.
    let (reference, incident, swapped) = if face_a.len() >= 3 {
        (face_a, face_b, false)
    } else {
        (face_b, face_a, true)
    };
    // Winding-consistent normal for the side planes, outward-oriented
    // normal for depth measurement.
    let winding_normal = polygon_normal(reference);
    if winding_normal == Vec3::ZERO {
        return;
    }
    let outward = if swapped { -normal } else { normal };
    let ref_normal = if winding_normal.dot(outward) >= 0.0 {
        winding_normal
    } else {
        -winding_normal
    };

    // Clip the incident polygon (or edge) by every side plane of the
    // reference face.
    let mut polygon: Vec<Vec3> = incident.to_vec();
    if polygon.is_empty() {
        return;
    }
    let n = reference.len();
    for i in 0..n {
        let e0 = reference[i];
        let e1 = reference[(i + 1) % n];
        let inward = winding_normal.cross(e1 - e0);
        clip_by_plane(&mut polygon, e0, inward);
        if polygon.is_empty() {
            return;
        }
    }

    let ref_point = reference[0];
    for p in polygon {
        // Height of the clipped point above the reference surface; points
        // behind the surface are penetrating.
        let s = ref_normal.dot(p - ref_point);
        let depth = -s;
        if depth < -max_separation {
            continue;
        }
        let projected = p - ref_normal * s;
        if swapped {
            // Reference face is on B; the clipped points lie on A.
            out.push((p, projected, depth));
        } else {
            out.push((projected, p, depth));
        }
    }

    reduce_manifold(out);
}

fn polygon_normal(points: &[Vec3]) -> Vec3 {
    if points.len() < 3 {
        return Vec3::ZERO;
    }
    let mut n = Vec3::ZERO;
    for i in 1..points.len() - 1 {
        n += (points[i] - points[0]).cross(points[i + 1] - points[0]);
    }
    n.normalize_or_zero()
}

/// Sutherland-Hodgman step against the plane through `point` with inward
/// direction `inward` (keep the inward side).
fn clip_by_plane(polygon: &mut Vec<Vec3>, point: Vec3, inward: Vec3) {
    if polygon.len() == 1 {
        if inward.dot(polygon[0] - point) < 0.0 {
            polygon.clear();
        }
        return;
    }
    let input = std::mem::take(polygon);
    let n = input.len();
    for i in 0..n {
        // For a 2-point "polygon" (an edge) only clip the single segment.
        if n == 2 && i == 1 {
            break;
        }
        let current = input[i];
        let next = input[(i + 1) % n];
        let d0 = inward.dot(current - point);
        let d1 = inward.dot(next - point);
        if d0 >= 0.0 {
            polygon.push(current);
        }
        if (d0 > 0.0 && d1 < 0.0) || (d0 < 0.0 && d1 > 0.0) {
            let t = d0 / (d0 - d1);
            polygon.push(current + (next - current) * t);
        }
    }
    if n == 2 {
        // Keep the tail vertex of the edge when it survived.
        let d1 = inward.dot(input[1] - point);
        if d1 >= 0.0 {
            polygon.push(input[1]);
        }
    }
}

/// Keep at most four well-spread points, always including the deepest.
fn reduce_manifold(points: &mut Vec<ManifoldPoint>) {
    if points.len() <= 4 {
        return;
    }
    let mut kept: Vec<ManifoldPoint> = Vec::with_capacity(4);

    // Deepest first.
    let deepest = points
        .iter()
        .enumerate()
        .max_by(|a, b| a.1 .2.partial_cmp(&b.1 .2).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    kept.push(points.swap_remove(deepest));

    // Then the points that maximise spread.
    while kept.len() < 4 && !points.is_empty() {
        let mut best = 0;
        let mut best_score = -1.0f32;
        for (i, p) in points.iter().enumerate() {
            let score: f32 = kept
                .iter()
                .map(|k| (p.1 - k.1).length_squared())
                .fold(f32::MAX, f32::min);
            if score > best_score {
                best_score = score;
                best = i;
            }
        }
        kept.push(points.swap_remove(best));
    }
    *points = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collide::CollideSettings;
    use crate::query::AllCollector;
    use crate::shape::{Pose, SubShapeId};
    use glam::Quat;

    fn collide(
        shape_a: &Shape,
        pose_a: Pose,
        shape_b: &Shape,
        pose_b: Pose,
        settings: &CollideSettings,
    ) -> Vec<CollideShapeResult> {
        let args = CollideArgs {
            shape_a,
            pose_a,
            shape_b,
            pose_b,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings,
        };
        let mut collector = AllCollector::default();
        collide_convex_vs_convex(&args, &mut collector);
        collector.hits
    }

    #[test]
    fn test_box_on_box_contact() {
        let shape = Shape::cuboid(Vec3::splat(0.5));
        // B resting on top of A with slight overlap.
        let hits = collide(
            &shape,
            Pose::new(Vec3::ZERO, Quat::IDENTITY),
            &shape,
            Pose::new(Vec3::new(0.0, 0.98, 0.0), Quat::IDENTITY),
            &CollideSettings::default(),
        );
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert!((hit.normal - Vec3::Y).length() < 0.1, "normal {:?}", hit.normal);
        assert!((hit.depth - 0.02).abs() < 0.02, "depth {}", hit.depth);
        assert!(hit.face_a.len() >= 3);
        assert!(hit.face_b.len() >= 3);
    }

    #[test]
    fn test_speculative_margin() {
        let shape = Shape::sphere(0.5);
        // Gap of 0.1, margin of 0.2: reported with negative depth.
        let settings = CollideSettings {
            max_separation: 0.2,
            ..Default::default()
        };
        let hits = collide(
            &shape,
            Pose::new(Vec3::ZERO, Quat::IDENTITY),
            &shape,
            Pose::new(Vec3::new(1.1, 0.0, 0.0), Quat::IDENTITY),
            &settings,
        );
        assert_eq!(hits.len(), 1);
        assert!((hits[0].depth + 0.1).abs() < 1e-3, "depth {}", hits[0].depth);

        // Gap beyond the margin: nothing.
        let hits = collide(
            &shape,
            Pose::new(Vec3::ZERO, Quat::IDENTITY),
            &shape,
            Pose::new(Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY),
            &settings,
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn test_clip_faces_box_stack() {
        // Two unit squares directly on top of each other.
        let face_a = vec![
            Vec3::new(-0.5, 0.5, -0.5),
            Vec3::new(0.5, 0.5, -0.5),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(-0.5, 0.5, 0.5),
        ];
        let face_b: Vec<Vec3> = face_a.iter().map(|p| *p - Vec3::Y * 0.02).collect();
        let mut out = Vec::new();
        clip_faces(&face_a, &face_b, Vec3::Y, 0.05, &mut out);
        assert_eq!(out.len(), 4);
        for (pa, pb, depth) in &out {
            assert!((depth - 0.02).abs() < 1e-4);
            assert!((pa.y - 0.5).abs() < 1e-4);
            assert!((pb.y - 0.48).abs() < 1e-4);
        }
    }

    #[test]
    fn test_clip_faces_offset_overlap() {
        // B offset by half a box: the patch is the overlapping half.
        let face_a = vec![
            Vec3::new(-0.5, 0.0, -0.5),
            Vec3::new(0.5, 0.0, -0.5),
            Vec3::new(0.5, 0.0, 0.5),
            Vec3::new(-0.5, 0.0, 0.5),
        ];
        let face_b: Vec<Vec3> = face_a
            .iter()
            .map(|p| *p + Vec3::new(0.5, -0.01, 0.0))
            .collect();
        let mut out = Vec::new();
        clip_faces(&face_a, &face_b, Vec3::Y, 0.05, &mut out);
        assert!(!out.is_empty());
        for (_, pb, _) in &out {
            assert!(pb.x >= -0.01);
            assert!(pb.x <= 0.51);
        }
    }

    #[test]
    fn test_manifold_reduction() {
        let mut points: Vec<ManifoldPoint> = (0..8)
            .map(|i| {
                let angle = i as f32 / 8.0 * std::f32::consts::TAU;
                let p = Vec3::new(angle.cos(), 0.0, angle.sin());
                (p, p, 0.01 * i as f32)
            })
            .collect();
        reduce_manifold(&mut points);
        assert_eq!(points.len(), 4);
        // The deepest point survived.
        assert!(points.iter().any(|p| (p.2 - 0.07).abs() < 1e-6));
    }
}
