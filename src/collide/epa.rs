//! EPA: penetration depth for overlapping convex shapes.
//!
//! Expands the terminal GJK simplex into a polytope around the origin of
//! the Minkowski difference, popping the face nearest the origin and
//! growing through its support until the surface stops moving.

use glam::Vec3;

use crate::collide::gjk::{self, Simplex, SupportPoint};
use crate::shape::convex::Support;

const MAX_ITERATIONS: usize = 64;
const MAX_FACES: usize = 128;

/// Penetration between two overlapping convex shapes.
#[derive(Debug, Clone, Copy)]
pub struct PenetrationResult {
    /// Unit penetration axis, pointing from A towards B.
    pub axis: Vec3,
    pub depth: f32,
    /// Deepest point on the surface of A.
    pub point_a: Vec3,
    /// Deepest point on the surface of B.
    pub point_b: Vec3,
}

#[derive(Debug, Clone, Copy)]
struct Face {
    verts: [usize; 3],
    normal: Vec3,
    distance: f32,
    alive: bool,
}

fn make_face(polytope: &[SupportPoint], verts: [usize; 3]) -> Option<Face> {
    let a = polytope[verts[0]].w;
    let b = polytope[verts[1]].w;
    let c = polytope[verts[2]].w;
    let n = (b - a).cross(c - a);
    let len = n.length();
    if len < 1.0e-10 {
        return None;
    }
    let normal = n / len;
    Some(Face {
        verts,
        normal,
        distance: normal.dot(a),
        alive: true,
    })
}

/// Penetration depth of two overlapping support sets.
///
/// `simplex` is the terminal GJK simplex; it is grown to a tetrahedron when
/// needed. Returns `None` when the seed is too degenerate to enclose the
/// origin.
pub fn penetration_depth<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    b: &B,
    simplex: &Simplex,
    tolerance: f32,
) -> Option<PenetrationResult> {
    let mut polytope: Vec<SupportPoint> = Vec::with_capacity(16);
    for p in simplex.points() {
        if !polytope
            .iter()
            .any(|q| (q.w - p.w).length_squared() < 1.0e-12)
        {
            polytope.push(*p);
        }
    }
    grow_to_tetrahedron(a, b, &mut polytope)?;

    // Orient so vertex 3 is behind face (0 1 2).
    {
        let d = (polytope[1].w - polytope[0].w)
            .cross(polytope[2].w - polytope[0].w)
            .dot(polytope[3].w - polytope[0].w);
        if d > 0.0 {
            polytope.swap(1, 2);
        }
    }

    let mut faces = Vec::with_capacity(MAX_FACES);
    for verts in [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]] {
        faces.push(make_face(&polytope, verts)?);
    }

    for _ in 0..MAX_ITERATIONS {
        // Nearest live face to the origin.
        let mut nearest: Option<usize> = None;
        for (i, face) in faces.iter().enumerate() {
            if face.alive
                && nearest.map_or(true, |n: usize| face.distance < faces[n].distance)
            {
                nearest = Some(i);
            }
        }
        let nearest = nearest?;
        let face = faces[nearest];

        let support = {
            let pa = a.support(face.normal);
            let pb = b.support(-face.normal);
            SupportPoint {
                w: pa - pb,
                a: pa,
                b: pb,
            }
        };
        let growth = support.w.dot(face.normal) - face.distance;
        if growth < tolerance || faces.len() >= MAX_FACES {
            if faces.len() >= MAX_FACES {
                tracing::debug!("epa face budget exhausted, reporting nearest face");
            }
            return Some(extract(&polytope, &face));
        }

        // Remove faces visible from the new vertex and collect the horizon.
        let new_index = polytope.len();
        polytope.push(support);
        let mut horizon: Vec<[usize; 2]> = Vec::new();
        for f in faces.iter_mut() {
            if !f.alive {
                continue;
            }
            if f.normal.dot(support.w - polytope[f.verts[0]].w) > 0.0 {
                f.alive = false;
                for e in 0..3 {
                    let edge = [f.verts[e], f.verts[(e + 1) % 3]];
                    if let Some(pos) = horizon
                        .iter()
                        .position(|h| h[0] == edge[1] && h[1] == edge[0])
                    {
                        horizon.swap_remove(pos);
                    } else {
                        horizon.push(edge);
                    }
                }
            }
        }
        if horizon.is_empty() {
            // The support did not see any face: numerical stall.
            tracing::debug!("epa stalled, reporting nearest face");
            return Some(extract(&polytope, &face));
        }
        for edge in horizon {
            match make_face(&polytope, [edge[0], edge[1], new_index]) {
                Some(f) => faces.push(f),
                None => {
                    tracing::debug!("epa produced a degenerate face, stopping early");
                    return Some(extract(&polytope, &face));
                }
            }
        }
    }

    // Iteration cap: report the nearest remaining face.
    let mut nearest: Option<Face> = None;
    for face in &faces {
        if face.alive && nearest.map_or(true, |n| face.distance < n.distance) {
            nearest = Some(*face);
        }
    }
    nearest.map(|face| extract(&polytope, &face))
}

fn extract(polytope: &[SupportPoint], face: &Face) -> PenetrationResult {
    let p0 = &polytope[face.verts[0]];
    let p1 = &polytope[face.verts[1]];
    let p2 = &polytope[face.verts[2]];
    let (lambda, _) = gjk::triangle_weights(p0.w, p1.w, p2.w);
    PenetrationResult {
        axis: face.normal,
        depth: face.distance.max(0.0),
        point_a: p0.a * lambda[0] + p1.a * lambda[1] + p2.a * lambda[2],
        point_b: p0.b * lambda[0] + p1.b * lambda[1] + p2.b * lambda[2],
    }
}

/// Grow the seed polytope to 4 affinely independent vertices.
fn grow_to_tetrahedron<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    b: &B,
    polytope: &mut Vec<SupportPoint>,
) -> Option<()> {
    let sample = |dir: Vec3| SupportPoint::sample(a, b, dir);
    let distinct = |polytope: &[SupportPoint], w: Vec3| {
        !polytope
            .iter()
            .any(|p| (p.w - w).length_squared() < 1.0e-10)
    };

    if polytope.is_empty() {
        polytope.push(sample(Vec3::X));
    }
    if polytope.len() == 1 {
        for dir in [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ] {
            let p = sample(dir);
            if distinct(polytope, p.w) {
                polytope.push(p);
                break;
            }
        }
        if polytope.len() == 1 {
            return None;
        }
    }
    if polytope.len() == 2 {
        let axis = (polytope[1].w - polytope[0].w).normalize_or_zero();
        let u = axis.any_orthonormal_vector();
        let v = axis.cross(u);
        for i in 0..6 {
            let angle = i as f32 * std::f32::consts::TAU / 6.0;
            let dir = u * angle.cos() + v * angle.sin();
            let p = sample(dir);
            if distinct(polytope, p.w) {
                polytope.push(p);
                break;
            }
        }
        if polytope.len() == 2 {
            return None;
        }
    }
    if polytope.len() == 3 {
        let n = (polytope[1].w - polytope[0].w)
            .cross(polytope[2].w - polytope[0].w)
            .normalize_or_zero();
        if n == Vec3::ZERO {
            return None;
        }
        for dir in [n, -n] {
            let p = sample(dir);
            if distinct(polytope, p.w)
                && (p.w - polytope[0].w).dot(n).abs() > 1.0e-8
            {
                polytope.push(p);
                break;
            }
        }
        if polytope.len() == 3 {
            return None;
        }
    }

    // Volume check.
    let d = (polytope[1].w - polytope[0].w)
        .cross(polytope[2].w - polytope[0].w)
        .dot(polytope[3].w - polytope[0].w);
    if d.abs() < 1.0e-12 {
        return None;
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collide::gjk::closest_points;
    use crate::shape::convex::{SupportMode, TransformedConvex};
    use crate::shape::{Pose, Shape};
    use glam::Quat;

    fn convex_at(shape: &Shape, pos: Vec3) -> TransformedConvex<'_> {
        TransformedConvex::new(shape, Pose::new(pos, Quat::IDENTITY), SupportMode::Default)
    }

    #[test]
    fn test_sphere_penetration() {
        let s = Shape::sphere(1.0);
        let a = convex_at(&s, Vec3::ZERO);
        let b = convex_at(&s, Vec3::new(1.0, 0.0, 0.0));
        let gjk = closest_points(&a, &b, 1.0e-4, f32::MAX, Vec3::X);
        assert!(gjk.colliding);
        let pen = penetration_depth(&a, &b, &gjk.simplex, 1.0e-4).unwrap();
        assert!((pen.depth - 1.0).abs() < 2e-2, "depth {}", pen.depth);
        assert!((pen.axis - Vec3::X).length() < 5e-2);
        assert!((pen.point_a.x - 1.0).abs() < 2e-2);
        assert!((pen.point_b.x - 0.0).abs() < 2e-2);
    }

    #[test]
    fn test_box_overlap_depth_linear() {
        // Invariant: boxes overlapping by delta report depth close to delta.
        let shape = Shape::Box(crate::shape::BoxShape::with_convex_radius(Vec3::ONE, 0.0));
        for delta in [0.1f32, 0.4, 0.9] {
            let a = convex_at(&shape, Vec3::ZERO);
            let b = convex_at(&shape, Vec3::new(2.0 - delta, 0.0, 0.0));
            let gjk = closest_points(&a, &b, 1.0e-4, f32::MAX, Vec3::X);
            assert!(gjk.colliding, "delta {delta} should overlap");
            let pen = penetration_depth(&a, &b, &gjk.simplex, 1.0e-4).unwrap();
            assert!(
                (pen.depth - delta).abs() < 0.05,
                "delta {delta}: depth {}",
                pen.depth
            );
            assert!((pen.axis - Vec3::X).length() < 1e-2);
        }
    }

    #[test]
    fn test_deep_overlap_centered() {
        let s = Shape::sphere(1.0);
        let a = convex_at(&s, Vec3::ZERO);
        let b = convex_at(&s, Vec3::new(1.0e-3, 0.0, 0.0));
        let gjk = closest_points(&a, &b, 1.0e-4, f32::MAX, Vec3::X);
        assert!(gjk.colliding);
        let pen = penetration_depth(&a, &b, &gjk.simplex, 1.0e-4).unwrap();
        // Nearly concentric spheres: depth close to 2.
        assert!(pen.depth > 1.8, "depth {}", pen.depth);
    }
}
