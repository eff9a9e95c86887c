//! Convex-vs-triangle-mesh narrow phase.
//!
//! Mesh queries walk the triangle tree with the convex shape's (swept)
//! bounds, treat each triangle as a one-sided convex, and fix up contact
//! normals on inactive edges so interior edges of flat or smooth surfaces
//! cannot produce ghost collisions.

use glam::Vec3;

use crate::aabb::Aabb;
use crate::collide::{
    epa, gjk, CastArgs, CastStatus, CollideArgs, CollideShapeResult, Collector, ShapeCastResult,
};
use crate::shape::convex::{supporting_face, SupportMode, TransformedConvex, TriangleSupport};
use crate::shape::{Pose, Shape, TriangleFlags, TriangleMesh};

/// World AABB conservatively expressed in a pose's local space.
fn to_local_aabb(aabb: &Aabb, pose: &Pose) -> Aabb {
    let rotated = aabb
        .translated(-pose.position)
        .transformed(pose.rotation.conjugate(), Vec3::ZERO);
    Aabb {
        min: rotated.min / pose.scale,
        max: rotated.max / pose.scale,
    }
}

fn world_triangle(mesh: &TriangleMesh, tri: u32, pose: &Pose) -> TriangleSupport {
    let [a, b, c] = mesh.triangle(tri);
    TriangleSupport::new(
        pose.transform_point(a),
        pose.transform_point(b),
        pose.transform_point(c),
    )
}

pub(crate) fn collide_convex_vs_mesh(
    args: &CollideArgs,
    collector: &mut dyn Collector<CollideShapeResult>,
) {
    let Shape::Mesh(mesh) = args.shape_b else {
        return;
    };
    let bits = mesh.sub_shape_bits();
    let bounds = args
        .shape_a
        .world_aabb(&args.pose_a)
        .expanded(args.settings.max_separation);
    let local_bounds = to_local_aabb(&bounds, &args.pose_b);

    let core_a =
        TransformedConvex::new(args.shape_a, args.pose_a, SupportMode::ExcludeConvexRadius);
    let full_a = core_a.with_mode(SupportMode::IncludeConvexRadius);
    let ra = core_a.convex_radius();

    mesh.for_each_in_aabb(&local_bounds, &mut |tri| {
        if collector.should_exit() {
            return false;
        }
        let triangle = world_triangle(mesh, tri, &args.pose_b);
        let tri_normal = triangle.normal();
        if tri_normal == Vec3::ZERO {
            return true;
        }

        // One-sided: skip when the convex sits fully behind the face.
        let front = tri_normal.dot(args.pose_a.position - triangle.vertices[0]) >= 0.0;
        if !front && !args.settings.collide_with_backfaces {
            return true;
        }

        let limit = ra + args.settings.max_separation;
        let initial = triangle.centroid() - args.pose_a.position;
        let gjk_result = gjk::closest_points(
            &core_a,
            &triangle,
            args.settings.tolerance,
            (limit + args.settings.tolerance) * (limit + args.settings.tolerance),
            initial,
        );

        let (point_a, point_b, mut normal, depth) = if gjk_result.colliding {
            match epa::penetration_depth(
                &full_a,
                &triangle,
                &gjk_result.simplex,
                args.settings.tolerance,
            ) {
                Some(pen) => (pen.point_a, pen.point_b, pen.axis, pen.depth),
                None => return true,
            }
        } else {
            let dist = gjk_result.distance_sq.sqrt();
            let separation = dist - ra;
            if separation > args.settings.max_separation || dist <= 0.0 {
                return true;
            }
            let normal = gjk_result.axis / dist;
            (
                gjk_result.point_a + normal * ra,
                gjk_result.point_b,
                normal,
                -separation,
            )
        };

        // Internal-edge removal: when the contact feature is an inactive
        // edge or vertex, its normal is not a valid contact direction; use
        // the face normal instead.
        let surface_normal = if front { -tri_normal } else { tri_normal };
        if normal.dot(surface_normal) < 0.999
            && !edge_is_active(mesh.triangle_flags(tri), &triangle, point_b)
        {
            normal = surface_normal;
        }

        if -depth >= collector.early_out_fraction() {
            return true;
        }
        let mut result = CollideShapeResult {
            point_a,
            point_b,
            axis: normal,
            normal,
            depth,
            sub_shape_a: args.sub_shape_a,
            sub_shape_b: args.sub_shape_b.pushed(tri, bits),
            face_a: Vec::new(),
            face_b: Vec::new(),
        };
        if args.settings.collect_faces {
            supporting_face(args.shape_a, normal, &args.pose_a, &mut result.face_a);
            result.face_b = triangle.vertices.to_vec();
        }
        collector.add_hit(result);
        true
    });
}

/// Whether the triangle feature nearest to `point` can act as a contact
/// feature on its own. Face-interior contacts always can; edge and vertex
/// contacts only when one of the adjacent edges is active.
fn edge_is_active(flags: TriangleFlags, triangle: &TriangleSupport, point: Vec3) -> bool {
    let [a, b, c] = triangle.vertices;
    let (lambda, _) = gjk::triangle_weights(a - point, b - point, c - point);

    const EDGE_EPS: f32 = 1.0e-3;
    let on_edge = [
        lambda[2] < EDGE_EPS, // edge a-b
        lambda[0] < EDGE_EPS, // edge b-c
        lambda[1] < EDGE_EPS, // edge c-a
    ];
    let active = [
        flags.contains(TriangleFlags::ACTIVE_EDGE0),
        flags.contains(TriangleFlags::ACTIVE_EDGE1),
        flags.contains(TriangleFlags::ACTIVE_EDGE2),
    ];

    if !on_edge.iter().any(|&e| e) {
        // Interior contact.
        return true;
    }
    (0..3).any(|i| on_edge[i] && active[i])
}

pub(crate) fn cast_convex_vs_mesh(
    args: &CastArgs,
    collector: &mut dyn Collector<ShapeCastResult>,
) {
    let Shape::Mesh(mesh) = args.shape_b else {
        return;
    };
    let bits = mesh.sub_shape_bits();
    let bounds = args.shape_a.world_aabb(&args.pose_a).swept(args.displacement);
    let local_bounds = to_local_aabb(&bounds, &args.pose_b);

    let full_a = TransformedConvex::new(args.shape_a, args.pose_a, SupportMode::Default);

    mesh.for_each_in_aabb(&local_bounds, &mut |tri| {
        if collector.should_exit() {
            return false;
        }
        let triangle = world_triangle(mesh, tri, &args.pose_b);
        let tri_normal = triangle.normal();
        if tri_normal == Vec3::ZERO {
            return true;
        }
        // Back-face cull against the sweep direction.
        if args.settings.backface_culling && tri_normal.dot(args.displacement) >= 0.0 {
            return true;
        }

        let Some(hit) = gjk::cast(&full_a, args.displacement, &triangle, args.settings.tolerance)
        else {
            return true;
        };

        if hit.fraction == 0.0 && hit.normal == Vec3::ZERO {
            // Initial overlap with this triangle.
            if args.settings.return_deepest_point {
                let core_a = full_a.with_mode(SupportMode::ExcludeConvexRadius);
                let gjk_result = gjk::closest_points(
                    &core_a,
                    &triangle,
                    args.settings.tolerance,
                    f32::MAX,
                    triangle.centroid() - args.pose_a.position,
                );
                if let Some(pen) = epa::penetration_depth(
                    &full_a,
                    &triangle,
                    &gjk_result.simplex,
                    args.settings.tolerance,
                ) {
                    collector.add_hit(ShapeCastResult {
                        status: CastStatus::Colliding,
                        fraction: 0.0,
                        point_a: pen.point_a,
                        point_b: pen.point_b,
                        normal: pen.axis,
                        depth: pen.depth,
                        sub_shape_a: args.sub_shape_a,
                        sub_shape_b: args.sub_shape_b.pushed(tri, bits),
                    });
                }
            }
            return true;
        }

        if hit.fraction >= collector.early_out_fraction() {
            return true;
        }
        collector.add_hit(ShapeCastResult {
            status: CastStatus::Colliding,
            fraction: hit.fraction,
            point_a: hit.point_a,
            point_b: hit.point_b,
            normal: hit.normal,
            depth: 0.0,
            sub_shape_a: args.sub_shape_a,
            sub_shape_b: args.sub_shape_b.pushed(tri, bits),
        });
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collide::{CastSettings, CollideSettings};
    use crate::query::{AllCollector, ClosestCollector};
    use crate::shape::SubShapeId;
    use glam::Quat;

    fn single_triangle(winding: [u32; 3]) -> Shape {
        Shape::Mesh(
            TriangleMesh::new(
                vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)],
                vec![winding],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_sphere_cast_head_on() {
        // Winding [0, 2, 1] gives a -Z facing triangle; the sphere flies +Z
        // into the front.
        let mesh = single_triangle([0, 2, 1]);
        let sphere = Shape::sphere(0.5);
        let args = CastArgs {
            shape_a: &sphere,
            pose_a: Pose::new(Vec3::new(0.5, 0.5, -2.0), Quat::IDENTITY),
            displacement: Vec3::new(0.0, 0.0, 2.0),
            shape_b: &mesh,
            pose_b: Pose::IDENTITY,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CastSettings::default(),
        };
        let mut collector = ClosestCollector::default();
        cast_convex_vs_mesh(&args, &mut collector);
        let hit = collector.hit.expect("head-on cast must hit");
        assert!((hit.fraction - 0.75).abs() < 1e-3, "fraction {}", hit.fraction);
        assert!(hit.point_b.z.abs() < 1e-3, "point_b {:?}", hit.point_b);
        assert!(hit.point_a.z.abs() < 1e-3, "point_a {:?}", hit.point_a);
    }

    #[test]
    fn test_backface_cull() {
        // Winding [0, 1, 2] faces +Z: the sphere approaches the back side.
        let mesh = single_triangle([0, 1, 2]);
        let sphere = Shape::sphere(0.5);
        let culling = CastSettings::default();
        let no_culling = CastSettings {
            backface_culling: false,
            ..Default::default()
        };
        let args = |settings| CastArgs {
            shape_a: &sphere,
            pose_a: Pose::new(Vec3::new(0.5, 0.5, -2.0), Quat::IDENTITY),
            displacement: Vec3::new(0.0, 0.0, 3.0),
            shape_b: &mesh,
            pose_b: Pose::IDENTITY,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings,
        };
        let mut collector = AllCollector::default();
        cast_convex_vs_mesh(&args(&culling), &mut collector);
        assert!(collector.hits.is_empty());

        let mut collector = AllCollector::default();
        cast_convex_vs_mesh(&args(&no_culling), &mut collector);
        assert_eq!(collector.hits.len(), 1);
        assert_eq!(collector.hits[0].status, CastStatus::Colliding);
    }

    #[test]
    fn test_collide_sphere_on_quad() {
        let mesh = Shape::Mesh(
            TriangleMesh::new(
                vec![
                    Vec3::new(-2.0, 0.0, -2.0),
                    Vec3::new(2.0, 0.0, -2.0),
                    Vec3::new(2.0, 0.0, 2.0),
                    Vec3::new(-2.0, 0.0, 2.0),
                ],
                vec![[0, 2, 1], [0, 3, 2]],
            )
            .unwrap(),
        );
        let sphere = Shape::sphere(0.5);
        let args = CollideArgs {
            shape_a: &sphere,
            pose_a: Pose::new(Vec3::new(0.5, 0.45, 0.5), Quat::IDENTITY),
            shape_b: &mesh,
            pose_b: Pose::IDENTITY,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CollideSettings::default(),
        };
        let mut collector = AllCollector::default();
        collide_convex_vs_mesh(&args, &mut collector);
        assert!(!collector.hits.is_empty());
        let hit = &collector.hits[0];
        // Resting on a +Y facing surface: the contact normal (A to B)
        // points down.
        assert!(
            (hit.normal - Vec3::NEG_Y).length() < 1e-2,
            "normal {:?}",
            hit.normal
        );
        assert!((hit.depth - 0.05).abs() < 1e-2, "depth {}", hit.depth);
    }

    #[test]
    fn test_internal_edge_suppressed() {
        // Sphere resting exactly on the shared diagonal of a flat quad: the
        // reported normal must be the face normal, not an edge normal.
        let mesh = Shape::Mesh(
            TriangleMesh::new(
                vec![
                    Vec3::new(-2.0, 0.0, -2.0),
                    Vec3::new(2.0, 0.0, -2.0),
                    Vec3::new(2.0, 0.0, 2.0),
                    Vec3::new(-2.0, 0.0, 2.0),
                ],
                vec![[0, 2, 1], [0, 3, 2]],
            )
            .unwrap(),
        );
        let sphere = Shape::sphere(0.5);
        // The shared diagonal runs from (-2,0,-2) to (2,0,2); put the
        // sphere right above its midpoint.
        let args = CollideArgs {
            shape_a: &sphere,
            pose_a: Pose::new(Vec3::new(0.0, 0.45, 0.0), Quat::IDENTITY),
            shape_b: &mesh,
            pose_b: Pose::IDENTITY,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CollideSettings::default(),
        };
        let mut collector = AllCollector::default();
        collide_convex_vs_mesh(&args, &mut collector);
        assert!(!collector.hits.is_empty());
        for hit in &collector.hits {
            assert!(
                (hit.normal - Vec3::NEG_Y).length() < 1e-2,
                "normal {:?}",
                hit.normal
            );
        }
    }
}
