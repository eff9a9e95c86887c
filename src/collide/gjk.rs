//! GJK: closest points, overlap, and linear casts on Minkowski differences.
//!
//! The simplex tracks witness points on both shapes so closest points fall
//! out of the barycentric weights. Degenerate terminations (stagnation,
//! iteration cap) are reported as separations; the callers treat them
//! conservatively.

use glam::Vec3;

use crate::shape::convex::Support;

pub const MAX_ITERATIONS: usize = 64;

/// A point of the Minkowski difference `A - B` with its witnesses.
#[derive(Debug, Clone, Copy)]
pub struct SupportPoint {
    /// `a - b`.
    pub w: Vec3,
    pub a: Vec3,
    pub b: Vec3,
}

impl SupportPoint {
    #[inline]
    pub fn sample<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B, dir: Vec3) -> Self {
        let pa = a.support(dir);
        let pb = b.support(-dir);
        SupportPoint {
            w: pa - pb,
            a: pa,
            b: pb,
        }
    }
}

/// Up to four Minkowski-difference points.
#[derive(Debug, Clone, Copy)]
pub struct Simplex {
    points: [SupportPoint; 4],
    lambda: [f32; 4],
    len: usize,
}

impl Simplex {
    pub fn new() -> Self {
        let zero = SupportPoint {
            w: Vec3::ZERO,
            a: Vec3::ZERO,
            b: Vec3::ZERO,
        };
        Self {
            points: [zero; 4],
            lambda: [0.0; 4],
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn points(&self) -> &[SupportPoint] {
        &self.points[..self.len]
    }

    #[inline]
    pub fn push(&mut self, p: SupportPoint) {
        debug_assert!(self.len < 4);
        self.points[self.len] = p;
        self.len += 1;
    }

    #[inline]
    fn contains(&self, w: Vec3, tolerance_sq: f32) -> bool {
        self.points[..self.len]
            .iter()
            .any(|p| (p.w - w).length_squared() <= tolerance_sq)
    }

    /// Witness point on shape A for the current barycentric weights.
    #[inline]
    pub fn witness_a(&self) -> Vec3 {
        let mut p = Vec3::ZERO;
        for i in 0..self.len {
            p += self.points[i].a * self.lambda[i];
        }
        p
    }

    /// Witness point on shape B.
    #[inline]
    pub fn witness_b(&self) -> Vec3 {
        let mut p = Vec3::ZERO;
        for i in 0..self.len {
            p += self.points[i].b * self.lambda[i];
        }
        p
    }

    /// Reduce to the feature closest to `target`, returning the closest
    /// point. Barycentric weights are stored for the witness accessors.
    /// When `target` is inside a tetrahedron the simplex is kept whole and
    /// `target` itself is returned.
    pub fn reduce_towards(&mut self, target: Vec3) -> Vec3 {
        match self.len {
            0 => target,
            1 => {
                self.lambda = [1.0, 0.0, 0.0, 0.0];
                self.points[0].w
            }
            2 => self.reduce_segment(target),
            3 => self.reduce_triangle(target),
            _ => self.reduce_tetrahedron(target),
        }
    }

    fn keep(&mut self, kept: &[(usize, f32)]) {
        let old = self.points;
        for (slot, &(src, l)) in kept.iter().enumerate() {
            self.points[slot] = old[src];
            self.lambda[slot] = l;
        }
        self.len = kept.len();
    }

    fn reduce_segment(&mut self, target: Vec3) -> Vec3 {
        let a = self.points[0].w - target;
        let b = self.points[1].w - target;
        let ab = b - a;
        let len_sq = ab.length_squared();
        let t = if len_sq > 1.0e-12 {
            (-a.dot(ab) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        if t <= 0.0 {
            self.keep(&[(0, 1.0)]);
            self.points[0].w
        } else if t >= 1.0 {
            self.keep(&[(1, 1.0)]);
            self.points[0].w
        } else {
            self.keep(&[(0, 1.0 - t), (1, t)]);
            target + a + ab * t
        }
    }

    fn reduce_triangle(&mut self, target: Vec3) -> Vec3 {
        let (lambda, _) = triangle_weights(
            self.points[0].w - target,
            self.points[1].w - target,
            self.points[2].w - target,
        );
        // The weights were computed against translated points, but they sum
        // to one, so they reproduce the world-space closest point directly.
        self.apply_weights(&lambda)
    }

    fn reduce_tetrahedron(&mut self, target: Vec3) -> Vec3 {
        let w = [
            self.points[0].w - target,
            self.points[1].w - target,
            self.points[2].w - target,
            self.points[3].w - target,
        ];

        // Face list: (vertices, opposite vertex).
        const FACES: [([usize; 3], usize); 4] = [
            ([0, 1, 2], 3),
            ([0, 3, 1], 2),
            ([0, 2, 3], 1),
            ([1, 3, 2], 0),
        ];

        let mut inside = true;
        let mut best: Option<([f32; 3], [usize; 3], f32)> = None;
        for (verts, opposite) in FACES {
            let [i, j, k] = verts;
            let n = (w[j] - w[i]).cross(w[k] - w[i]);
            let plane = n.dot(w[i]);
            let opp = n.dot(w[opposite]);
            // The target sits at the translated origin; it is outside this
            // face when it falls on the far side from the opposite vertex.
            let outside = if opp > plane {
                plane > 0.0
            } else {
                plane < 0.0
            };
            if !outside {
                continue;
            }
            inside = false;
            let (lambda, dist_sq) = triangle_weights(w[i], w[j], w[k]);
            if best.map_or(true, |(_, _, d)| dist_sq < d) {
                best = Some((lambda, verts, dist_sq));
            }
        }

        if inside {
            // Target is contained; weights are not meaningful but keep the
            // full simplex for EPA seeding.
            self.lambda = [0.25; 4];
            return target;
        }

        let (lambda, verts, _) = best.expect("origin outside a degenerate tetrahedron");
        let full = [
            (verts[0], lambda[0]),
            (verts[1], lambda[1]),
            (verts[2], lambda[2]),
        ];
        let kept: Vec<(usize, f32)> = full.iter().copied().filter(|&(_, l)| l > 0.0).collect();
        self.keep(&kept);
        let mut closest = Vec3::ZERO;
        for i in 0..self.len {
            closest += self.points[i].w * self.lambda[i];
        }
        closest
    }

    fn apply_weights(&mut self, lambda: &[f32; 3]) -> Vec3 {
        let full = [(0usize, lambda[0]), (1, lambda[1]), (2, lambda[2])];
        let kept: Vec<(usize, f32)> = full.iter().copied().filter(|&(_, l)| l > 0.0).collect();
        self.keep(&kept);
        let mut closest = Vec3::ZERO;
        for i in 0..self.len {
            closest += self.points[i].w * self.lambda[i];
        }
        closest
    }
}

impl Default for Simplex {
    fn default() -> Self {
        Self::new()
    }
}

/// Barycentric weights of the point of triangle `abc` closest to the
/// origin, with zero weights for vertices outside the supporting feature.
/// Also returns the squared distance.
pub(crate) fn triangle_weights(a: Vec3, b: Vec3, c: Vec3) -> ([f32; 3], f32) {
    let ab = b - a;
    let ac = c - a;
    let ap = -a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return ([1.0, 0.0, 0.0], a.length_squared());
    }

    let bp = -b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return ([0.0, 1.0, 0.0], b.length_squared());
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = if (d1 - d3).abs() > 1.0e-12 {
            d1 / (d1 - d3)
        } else {
            0.0
        };
        let p = a + ab * t;
        return ([1.0 - t, t, 0.0], p.length_squared());
    }

    let cp = -c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return ([0.0, 0.0, 1.0], c.length_squared());
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = if (d2 - d6).abs() > 1.0e-12 {
            d2 / (d2 - d6)
        } else {
            0.0
        };
        let p = a + ac * t;
        return ([1.0 - t, 0.0, t], p.length_squared());
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let p = b + (c - b) * t;
        return ([0.0, 1.0 - t, t], p.length_squared());
    }

    let sum = va + vb + vc;
    if sum.abs() < 1.0e-18 {
        // Degenerate (zero area) triangle.
        return ([1.0, 0.0, 0.0], a.length_squared());
    }
    let denom = 1.0 / sum;
    let v = vb * denom;
    let w = vc * denom;
    let p = a + ab * v + ac * w;
    ([1.0 - v - w, v, w], p.length_squared())
}

/// Result of a closest-point query.
#[derive(Debug, Clone)]
pub struct GjkResult {
    pub colliding: bool,
    /// Squared distance between the shapes (0 when colliding).
    pub distance_sq: f32,
    /// Closest point on A, world space (valid when separated).
    pub point_a: Vec3,
    /// Closest point on B.
    pub point_b: Vec3,
    /// Separation axis pointing from A towards B, length = distance.
    pub axis: Vec3,
    /// Terminal simplex, used to seed EPA when colliding.
    pub simplex: Simplex,
}

/// Closest points between two convex support sets.
///
/// `max_distance_sq` lets the search exit as soon as the shapes are proven
/// farther apart than the caller cares about; the result then reports a
/// conservative (lower-bound) distance.
pub fn closest_points<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    b: &B,
    tolerance: f32,
    max_distance_sq: f32,
    initial_dir: Vec3,
) -> GjkResult {
    let dir = if initial_dir.length_squared() > 1.0e-12 {
        initial_dir
    } else {
        Vec3::X
    };
    let tol_sq = tolerance * tolerance;

    let mut simplex = Simplex::new();
    simplex.push(SupportPoint::sample(a, b, dir));

    for iteration in 0.. {
        let v = simplex.reduce_towards(Vec3::ZERO);
        let v_len_sq = v.length_squared();

        if v_len_sq <= tol_sq || simplex.len() == 4 {
            return GjkResult {
                colliding: true,
                distance_sq: 0.0,
                point_a: simplex.witness_a(),
                point_b: simplex.witness_b(),
                axis: Vec3::ZERO,
                simplex,
            };
        }

        if iteration >= MAX_ITERATIONS {
            tracing::trace!("gjk hit the iteration cap, treating as separated");
            return separated(v, v_len_sq, simplex);
        }

        let p = SupportPoint::sample(a, b, -v);
        let v_dot_w = v.dot(p.w);

        // Beyond the caller's maximum separation: the projection of the new
        // support is already a lower bound on the distance.
        if v_dot_w > 0.0 && v_dot_w * v_dot_w / v_len_sq > max_distance_sq {
            return separated(v, v_len_sq, simplex);
        }

        // Converged: the support plane is within tolerance of the simplex.
        if v_len_sq - v_dot_w <= tolerance * v_len_sq.sqrt().max(tolerance) {
            return separated(v, v_len_sq, simplex);
        }

        // A repeated support point cannot improve the simplex.
        if simplex.contains(p.w, 1.0e-12) {
            return separated(v, v_len_sq, simplex);
        }

        simplex.push(p);
    }
    unreachable!()
}

fn separated(v: Vec3, v_len_sq: f32, simplex: Simplex) -> GjkResult {
    GjkResult {
        colliding: false,
        distance_sq: v_len_sq,
        point_a: simplex.witness_a(),
        point_b: simplex.witness_b(),
        axis: -v,
        simplex,
    }
}

/// Hit from a linear shape sweep.
#[derive(Debug, Clone, Copy)]
pub struct GjkCastHit {
    /// Fraction along the displacement at first touch.
    pub fraction: f32,
    /// Contact point on the moving shape A at the time of impact.
    pub point_a: Vec3,
    /// Contact point on B.
    pub point_b: Vec3,
    /// Unit contact normal from A towards B; zero when the shapes already
    /// overlap at fraction 0.
    pub normal: Vec3,
}

/// Sweep support set A along `displacement` against B.
///
/// Returns the earliest touching fraction in `[0, 1]`, or `None` for a
/// miss. An initial overlap reports fraction 0 with a zero normal.
pub fn cast<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    displacement: Vec3,
    b: &B,
    tolerance: f32,
) -> Option<GjkCastHit> {
    // Ray x(t) = t * d against C = B (-) A: support_C(v) = b(v) - a(-v).
    let d = displacement;
    let tol_sq = tolerance * tolerance;

    let mut t = 0.0f32;
    let mut x = Vec3::ZERO;
    let mut normal = Vec3::ZERO;

    let sample = |dir: Vec3| -> SupportPoint {
        let pb = b.support(dir);
        let pa = a.support(-dir);
        SupportPoint {
            w: pb - pa,
            a: pa,
            b: pb,
        }
    };

    let mut simplex = Simplex::new();
    let first = sample(d);
    let mut v = x - first.w;
    simplex.push(first);

    for _ in 0..MAX_ITERATIONS {
        if v.length_squared() <= tol_sq {
            break;
        }
        let p = sample(v);
        let w = x - p.w;
        let v_dot_w = v.dot(w);
        if v_dot_w > 0.0 {
            let v_dot_d = v.dot(d);
            if v_dot_d >= 0.0 {
                return None;
            }
            t -= v_dot_w / v_dot_d;
            if t > 1.0 {
                return None;
            }
            x = d * t;
            normal = v;
        }
        if simplex.contains(p.w, 1.0e-12) {
            // A repeated support cannot refine the simplex further.
            break;
        }
        if simplex.len() == 4 {
            // Numerical corner: the simplex is full but we have not
            // converged; re-reduce and keep the best feature.
            simplex.reduce_towards(x);
        }
        if simplex.len() < 4 {
            simplex.push(p);
        }
        let closest = simplex.reduce_towards(x);
        v = x - closest;
    }

    // Witnesses: the contact point on B, and on A advanced to impact time.
    let point_b = simplex.witness_b();
    let point_a = simplex.witness_a() + d * t;
    Some(GjkCastHit {
        fraction: t,
        point_a,
        point_b,
        normal: (-normal).normalize_or_zero(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::convex::{PointSupport, SupportMode, TransformedConvex};
    use crate::shape::{Pose, Shape};
    use glam::Quat;

    fn sphere_at(shape: &Shape, pos: Vec3) -> TransformedConvex<'_> {
        TransformedConvex::new(shape, Pose::new(pos, Quat::IDENTITY), SupportMode::Default)
    }

    #[test]
    fn test_separated_spheres_distance() {
        let s = Shape::sphere(1.0);
        let a = sphere_at(&s, Vec3::ZERO);
        let b = sphere_at(&s, Vec3::new(5.0, 0.0, 0.0));
        let result = closest_points(&a, &b, 1.0e-4, f32::MAX, Vec3::X);
        assert!(!result.colliding);
        // Centers 5 apart, radii 1 each: gap of 3.
        assert!((result.distance_sq.sqrt() - 3.0).abs() < 1e-2);
        assert!((result.point_a - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-2);
        assert!((result.point_b - Vec3::new(4.0, 0.0, 0.0)).length() < 1e-2);
        // Axis points from A towards B.
        assert!(result.axis.x > 0.0);
    }

    #[test]
    fn test_overlapping_spheres_collide() {
        let s = Shape::sphere(1.0);
        let a = sphere_at(&s, Vec3::ZERO);
        let b = sphere_at(&s, Vec3::new(1.0, 0.0, 0.0));
        let result = closest_points(&a, &b, 1.0e-4, f32::MAX, Vec3::X);
        assert!(result.colliding);
    }

    #[test]
    fn test_box_point_distance() {
        let shape = Shape::cuboid(Vec3::ONE);
        let a = TransformedConvex::new(&shape, Pose::IDENTITY, SupportMode::Default);
        let p = PointSupport(Vec3::new(3.0, 0.0, 0.0));
        let result = closest_points(&a, &p, 1.0e-4, f32::MAX, Vec3::X);
        assert!(!result.colliding);
        assert!((result.distance_sq.sqrt() - 2.0).abs() < 1e-3);
        assert!((result.point_a - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn test_point_inside_box() {
        let shape = Shape::cuboid(Vec3::ONE);
        let a = TransformedConvex::new(&shape, Pose::IDENTITY, SupportMode::Default);
        let p = PointSupport(Vec3::new(0.5, 0.25, 0.0));
        let result = closest_points(&a, &p, 1.0e-4, f32::MAX, Vec3::X);
        assert!(result.colliding);
    }

    #[test]
    fn test_distance_quadratic_in_gap() {
        // Invariant: separation by delta gives distance_sq of delta^2.
        let s = Shape::sphere(0.5);
        for delta in [0.1f32, 0.5, 2.0] {
            let a = sphere_at(&s, Vec3::ZERO);
            let b = sphere_at(&s, Vec3::new(1.0 + delta, 0.0, 0.0));
            let result = closest_points(&a, &b, 1.0e-4, f32::MAX, Vec3::X);
            assert!(
                (result.distance_sq - delta * delta).abs() < 1e-2 * (1.0 + delta * delta),
                "delta {delta}: distance_sq {}",
                result.distance_sq
            );
        }
    }

    #[test]
    fn test_cast_sphere_vs_sphere() {
        let s = Shape::sphere(0.5);
        let a = sphere_at(&s, Vec3::ZERO);
        let b = sphere_at(&s, Vec3::new(5.0, 0.0, 0.0));
        let hit = cast(&a, Vec3::new(8.0, 0.0, 0.0), &b, 1.0e-4).unwrap();
        // Touch when centers are 1 apart: after travelling 4 of 8.
        assert!((hit.fraction - 0.5).abs() < 1e-3, "fraction {}", hit.fraction);
        assert!((hit.normal - Vec3::X).length() < 1e-2);
        assert!((hit.point_b - Vec3::new(4.5, 0.0, 0.0)).length() < 1e-2);
    }

    #[test]
    fn test_cast_miss() {
        let s = Shape::sphere(0.5);
        let a = sphere_at(&s, Vec3::ZERO);
        let b = sphere_at(&s, Vec3::new(5.0, 3.0, 0.0));
        assert!(cast(&a, Vec3::new(8.0, 0.0, 0.0), &b, 1.0e-4).is_none());
        // Too short to reach.
        let c = sphere_at(&s, Vec3::new(5.0, 0.0, 0.0));
        assert!(cast(&a, Vec3::new(2.0, 0.0, 0.0), &c, 1.0e-4).is_none());
    }

    #[test]
    fn test_cast_initial_overlap() {
        let s = Shape::sphere(1.0);
        let a = sphere_at(&s, Vec3::ZERO);
        let b = sphere_at(&s, Vec3::new(0.5, 0.0, 0.0));
        let hit = cast(&a, Vec3::new(1.0, 0.0, 0.0), &b, 1.0e-4).unwrap();
        assert_eq!(hit.fraction, 0.0);
        assert_eq!(hit.normal, Vec3::ZERO);
    }
}
