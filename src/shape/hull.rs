//! Convex hull shape built from a point cloud.

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::shape::{MassProperties, ShapeError};

/// One triangular face of the hull, indexing into the point table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HullFace {
    pub indices: [u32; 3],
    pub normal: Vec3,
}

/// Convex hull over a set of points.
///
/// The hull is triangulated at build time; faces and edges reference the
/// shape's own point table so the serialized layout is self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvexHullShape {
    points: Vec<Vec3>,
    faces: Vec<HullFace>,
    /// Unique undirected edges as point-index pairs.
    edges: Vec<[u32; 2]>,
    center_of_mass: Vec3,
    inertia: Mat3,
    volume: f32,
    local_bounds: Aabb,
    pub convex_radius: f32,
}

impl ConvexHullShape {
    /// Build the hull of `points`.
    ///
    /// Fails with [`ShapeError::DegenerateHull`] when the cloud has fewer
    /// than 4 points or spans no volume.
    pub fn new(points: &[Vec3]) -> Result<Self, ShapeError> {
        Self::with_convex_radius(points, 0.0)
    }

    pub fn with_convex_radius(points: &[Vec3], convex_radius: f32) -> Result<Self, ShapeError> {
        let faces = quickhull(points)?;

        // Keep only the points the hull actually uses, remapped densely.
        let mut remap = vec![u32::MAX; points.len()];
        let mut used = Vec::new();
        for face in &faces {
            for &i in &face.indices {
                if remap[i as usize] == u32::MAX {
                    remap[i as usize] = used.len() as u32;
                    used.push(points[i as usize]);
                }
            }
        }
        let faces: Vec<HullFace> = faces
            .into_iter()
            .map(|f| HullFace {
                indices: [
                    remap[f.indices[0] as usize],
                    remap[f.indices[1] as usize],
                    remap[f.indices[2] as usize],
                ],
                normal: f.normal,
            })
            .collect();

        let mut edges = Vec::new();
        for face in &faces {
            for e in 0..3 {
                let a = face.indices[e];
                let b = face.indices[(e + 1) % 3];
                let key = [a.min(b), a.max(b)];
                if !edges.contains(&key) {
                    edges.push(key);
                }
            }
        }

        let mut local_bounds = Aabb::INVALID;
        for p in &used {
            local_bounds.include(*p);
        }

        let (volume, center_of_mass, inertia) = integrate_hull(&used, &faces);
        if volume <= 1.0e-12 {
            return Err(ShapeError::DegenerateHull);
        }

        Ok(Self {
            points: used,
            faces,
            edges,
            center_of_mass,
            inertia,
            volume,
            local_bounds,
            convex_radius,
        })
    }

    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    #[inline]
    pub fn faces(&self) -> &[HullFace] {
        &self.faces
    }

    #[inline]
    pub fn edges(&self) -> &[[u32; 2]] {
        &self.edges
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    #[inline]
    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    #[inline]
    pub fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }

    /// Density-1 mass properties about the center of mass.
    pub fn mass_properties(&self) -> MassProperties {
        MassProperties {
            mass: self.volume,
            inertia: self.inertia,
        }
    }

    /// Farthest point along `direction`.
    #[inline]
    pub fn support_point(&self, direction: Vec3) -> Vec3 {
        let mut best = self.points[0];
        let mut best_dot = best.dot(direction);
        for p in &self.points[1..] {
            let d = p.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = *p;
            }
        }
        best
    }

    /// Vertices of the face supporting `direction`, ordered around the face.
    pub fn supporting_face(&self, direction: Vec3, out: &mut Vec<Vec3>) {
        let dir = direction.normalize_or(Vec3::X);
        let max_proj = self.support_point(dir).dot(dir);

        // Every vertex within tolerance of the supporting plane is part of
        // the contact face (merges coplanar triangles).
        let tolerance = 1.0e-4 * (1.0 + self.local_bounds.size().max_element());
        for p in &self.points {
            if max_proj - p.dot(dir) < tolerance {
                out.push(*p);
            }
        }
        if out.len() < 3 {
            return;
        }

        // Order around the face center by angle in the plane.
        let center = out.iter().sum::<Vec3>() / out.len() as f32;
        let u = dir.any_orthonormal_vector();
        let v = dir.cross(u);
        out.sort_by(|a, b| {
            let pa = *a - center;
            let pb = *b - center;
            let aa = pa.dot(v).atan2(pa.dot(u));
            let ab = pb.dot(v).atan2(pb.dot(u));
            aa.partial_cmp(&ab).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Point-in-hull test against the face planes.
    pub fn contains_point(&self, p: Vec3) -> bool {
        self.faces.iter().all(|face| {
            let v = self.points[face.indices[0] as usize];
            face.normal.dot(p - v) <= 0.0
        })
    }

    /// Ray test against the face planes; returns the entry fraction and the
    /// entry face normal for a ray `origin + t * direction`, `t` in
    /// `[0, 1]`. A ray starting inside reports fraction 0 with a zero
    /// normal.
    pub fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<(f32, Vec3)> {
        let mut t_enter = 0.0f32;
        let mut t_exit = 1.0f32;
        let mut entry_normal = Vec3::ZERO;
        for face in &self.faces {
            let v = self.points[face.indices[0] as usize];
            let denom = face.normal.dot(direction);
            let dist = face.normal.dot(origin - v);
            if denom.abs() < 1.0e-12 {
                if dist > 0.0 {
                    return None;
                }
                continue;
            }
            let t = -dist / denom;
            if denom < 0.0 {
                if t > t_enter {
                    t_enter = t;
                    entry_normal = face.normal;
                }
            } else {
                t_exit = t_exit.min(t);
            }
            if t_enter > t_exit {
                return None;
            }
        }
        Some((t_enter, entry_normal))
    }
}

struct BuildFace {
    indices: [u32; 3],
    normal: Vec3,
    /// Cloud points in front of this face, with the farthest first.
    outside: Vec<u32>,
    alive: bool,
}

fn face_of(points: &[Vec3], a: u32, b: u32, c: u32) -> BuildFace {
    let normal = (points[b as usize] - points[a as usize])
        .cross(points[c as usize] - points[a as usize])
        .normalize_or_zero();
    BuildFace {
        indices: [a, b, c],
        normal,
        outside: Vec::new(),
        alive: true,
    }
}

/// Quickhull over a point cloud, returning outward-facing triangles.
fn quickhull(points: &[Vec3]) -> Result<Vec<HullFace>, ShapeError> {
    if points.len() < 4 {
        return Err(ShapeError::DegenerateHull);
    }

    let scale = points
        .iter()
        .fold(0.0f32, |acc, p| acc.max(p.abs().max_element()));
    let eps = 1.0e-6 * (1.0 + scale);

    // Initial tetrahedron: extreme pair, farthest from the line, farthest
    // from the plane.
    let (mut i0, mut i1) = (0usize, 0usize);
    let mut best = -1.0f32;
    for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
        let lo = (0..points.len()).min_by(|&a, &b| cmp(points[a].dot(axis), points[b].dot(axis)));
        let hi = (0..points.len()).max_by(|&a, &b| cmp(points[a].dot(axis), points[b].dot(axis)));
        if let (Some(lo), Some(hi)) = (lo, hi) {
            let d = (points[hi] - points[lo]).length_squared();
            if d > best {
                best = d;
                i0 = lo;
                i1 = hi;
            }
        }
    }
    if best < eps * eps {
        return Err(ShapeError::DegenerateHull);
    }

    let line = (points[i1] - points[i0]).normalize();
    let i2 = (0..points.len())
        .max_by(|&a, &b| {
            let da = (points[a] - points[i0]).reject_from_normalized(line).length_squared();
            let db = (points[b] - points[i0]).reject_from_normalized(line).length_squared();
            cmp(da, db)
        })
        .unwrap();
    let plane_n = (points[i1] - points[i0])
        .cross(points[i2] - points[i0])
        .normalize_or_zero();
    if plane_n == Vec3::ZERO {
        return Err(ShapeError::DegenerateHull);
    }

    let i3 = (0..points.len())
        .max_by(|&a, &b| {
            cmp(
                plane_n.dot(points[a] - points[i0]).abs(),
                plane_n.dot(points[b] - points[i0]).abs(),
            )
        })
        .unwrap();
    if plane_n.dot(points[i3] - points[i0]).abs() < eps {
        return Err(ShapeError::DegenerateHull);
    }

    let (a, b, c, d) = (i0 as u32, i1 as u32, i2 as u32, i3 as u32);
    let mut faces = if plane_n.dot(points[i3] - points[i0]) < 0.0 {
        vec![
            face_of(points, a, b, c),
            face_of(points, a, d, b),
            face_of(points, b, d, c),
            face_of(points, c, d, a),
        ]
    } else {
        vec![
            face_of(points, a, c, b),
            face_of(points, a, b, d),
            face_of(points, b, c, d),
            face_of(points, c, a, d),
        ]
    };

    // Assign each point to the first face that sees it.
    for (i, p) in points.iter().enumerate() {
        if [i0, i1, i2, i3].contains(&i) {
            continue;
        }
        for face in faces.iter_mut() {
            if face.normal.dot(*p - points[face.indices[0] as usize]) > eps {
                face.outside.push(i as u32);
                break;
            }
        }
    }

    loop {
        // Furthest outside point over all live faces.
        let mut chosen: Option<(usize, u32, f32)> = None;
        for (fi, face) in faces.iter().enumerate() {
            if !face.alive {
                continue;
            }
            for &pi in &face.outside {
                let d = face
                    .normal
                    .dot(points[pi as usize] - points[face.indices[0] as usize]);
                if chosen.map_or(true, |(_, _, best)| d > best) {
                    chosen = Some((fi, pi, d));
                }
            }
        }
        let Some((_, apex, _)) = chosen else { break };
        let apex_p = points[apex as usize];

        // Faces visible from the apex; their boundary is the horizon.
        let mut horizon: Vec<[u32; 2]> = Vec::new();
        let mut orphaned: Vec<u32> = Vec::new();
        for face in faces.iter_mut() {
            if !face.alive {
                continue;
            }
            if face
                .normal
                .dot(apex_p - points[face.indices[0] as usize])
                > eps
            {
                face.alive = false;
                orphaned.extend(face.outside.drain(..));
                for e in 0..3 {
                    let edge = [face.indices[e], face.indices[(e + 1) % 3]];
                    // Shared edges appear once per direction and cancel out.
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

        let first_new = faces.len();
        for edge in &horizon {
            faces.push(face_of(points, edge[0], edge[1], apex));
        }
        for pi in orphaned {
            if pi == apex {
                continue;
            }
            let p = points[pi as usize];
            for face in faces[first_new..].iter_mut() {
                if face.normal.dot(p - points[face.indices[0] as usize]) > eps {
                    face.outside.push(pi);
                    break;
                }
            }
        }
    }

    let result: Vec<HullFace> = faces
        .into_iter()
        .filter(|f| f.alive && f.normal != Vec3::ZERO)
        .map(|f| HullFace {
            indices: f.indices,
            normal: f.normal,
        })
        .collect();
    if result.len() < 4 {
        return Err(ShapeError::DegenerateHull);
    }
    Ok(result)
}

#[inline]
fn cmp(a: f32, b: f32) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}

/// Volume, center of mass, and COM-relative inertia (density 1) by summing
/// signed tetrahedra between the origin and each face.
fn integrate_hull(points: &[Vec3], faces: &[HullFace]) -> (f32, Vec3, Mat3) {
    // Second moments of the canonical tetrahedron (0, e1, e2, e3).
    let diag = 1.0 / 60.0;
    let off = 1.0 / 120.0;
    let canonical = Mat3::from_cols(
        Vec3::new(diag, off, off),
        Vec3::new(off, diag, off),
        Vec3::new(off, off, diag),
    );

    let mut volume = 0.0f32;
    let mut weighted_com = Vec3::ZERO;
    let mut second = Mat3::ZERO;

    for face in faces {
        let p0 = points[face.indices[0] as usize];
        let p1 = points[face.indices[1] as usize];
        let p2 = points[face.indices[2] as usize];
        let a = Mat3::from_cols(p0, p1, p2);
        let det = a.determinant();
        volume += det / 6.0;
        weighted_com += det / 6.0 * (p0 + p1 + p2) / 4.0;
        let contribution = a * canonical * a.transpose() * det;
        second += contribution;
    }

    if volume.abs() < 1.0e-12 {
        return (0.0, Vec3::ZERO, Mat3::ZERO);
    }
    let com = weighted_com / volume;

    // Shift second moments to the COM, then convert to inertia.
    let com_outer = Mat3::from_cols(com * com.x, com * com.y, com * com.z);
    let second_com = second - com_outer * volume;
    let trace = second_com.x_axis.x + second_com.y_axis.y + second_com.z_axis.z;
    let inertia = Mat3::from_diagonal(Vec3::splat(trace)) - second_com;
    (volume, com, inertia)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box_points() -> Vec<Vec3> {
        let mut pts = Vec::new();
        for x in [-1.0f32, 1.0] {
            for y in [-1.0f32, 1.0] {
                for z in [-1.0f32, 1.0] {
                    pts.push(Vec3::new(x, y, z));
                }
            }
        }
        pts
    }

    #[test]
    fn test_box_hull() {
        let hull = ConvexHullShape::new(&unit_box_points()).unwrap();
        assert_eq!(hull.points().len(), 8);
        assert_eq!(hull.faces().len(), 12);
        assert_eq!(hull.edges().len(), 18);
        assert_relative_eq!(hull.volume(), 8.0, epsilon = 1e-3);
        assert!(hull.center_of_mass().length() < 1e-4);

        // Box inertia: m/3 * (1 + 1) with m = 8.
        let mp = hull.mass_properties();
        assert_relative_eq!(mp.inertia.x_axis.x, 8.0 * 2.0 / 3.0, max_relative = 1e-3);
    }

    #[test]
    fn test_interior_points_discarded() {
        let mut pts = unit_box_points();
        pts.push(Vec3::ZERO);
        pts.push(Vec3::splat(0.25));
        let hull = ConvexHullShape::new(&pts).unwrap();
        assert_eq!(hull.points().len(), 8);
    }

    #[test]
    fn test_degenerate_rejected() {
        assert!(ConvexHullShape::new(&[Vec3::ZERO, Vec3::X, Vec3::Y]).is_err());
        // Coplanar cloud.
        let flat: Vec<Vec3> = (0..10)
            .map(|i| Vec3::new(i as f32, (i * 7 % 5) as f32, 0.0))
            .collect();
        assert!(ConvexHullShape::new(&flat).is_err());
    }

    #[test]
    fn test_support_and_face() {
        let hull = ConvexHullShape::new(&unit_box_points()).unwrap();
        let s = hull.support_point(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(s, Vec3::ONE);

        let mut face = Vec::new();
        hull.supporting_face(Vec3::Y, &mut face);
        assert_eq!(face.len(), 4);
        for p in &face {
            assert_relative_eq!(p.y, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_contains_and_ray() {
        let hull = ConvexHullShape::new(&unit_box_points()).unwrap();
        assert!(hull.contains_point(Vec3::splat(0.5)));
        assert!(!hull.contains_point(Vec3::new(1.5, 0.0, 0.0)));

        let (t, normal) = hull
            .cast_ray(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0))
            .unwrap();
        assert_relative_eq!(t, 0.4, epsilon = 1e-5);
        assert!((normal - Vec3::NEG_X).length() < 1e-4);
        assert!(hull
            .cast_ray(Vec3::new(-5.0, 3.0, 0.0), Vec3::new(10.0, 0.0, 0.0))
            .is_none());
    }
}
