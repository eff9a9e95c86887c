//! Math helpers on top of glam: eigen-decomposition, bases, quaternion steps.

use glam::{Mat3, Quat, Vec3};

/// Jacobi eigen-decomposition of a symmetric 3x3 matrix.
///
/// Returns the eigenvalues and a right-handed rotation matrix whose columns
/// are the corresponding eigenvectors, or `None` when the sweep limit is hit
/// before the off-diagonal terms vanish.
pub fn jacobi_eigen_decomposition(m: Mat3, max_sweeps: u32) -> Option<(Vec3, Mat3)> {
    let mut a = [
        [m.x_axis.x, m.y_axis.x, m.z_axis.x],
        [m.x_axis.y, m.y_axis.y, m.z_axis.y],
        [m.x_axis.z, m.y_axis.z, m.z_axis.z],
    ];
    let mut v = [[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..max_sweeps {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        if off < 1.0e-12 {
            let values = Vec3::new(a[0][0], a[1][1], a[2][2]);
            let mut vectors = Mat3::from_cols(
                Vec3::new(v[0][0], v[1][0], v[2][0]),
                Vec3::new(v[0][1], v[1][1], v[2][1]),
                Vec3::new(v[0][2], v[1][2], v[2][2]),
            );
            // Flip one axis if the sweep produced a reflection.
            if vectors.determinant() < 0.0 {
                vectors.z_axis = -vectors.z_axis;
            }
            return Some((values, vectors));
        }

        for (p, q) in [(0usize, 1usize), (0, 2), (1, 2)] {
            if a[p][q].abs() < 1.0e-12 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = if theta >= 0.0 {
                1.0 / (theta + (1.0 + theta * theta).sqrt())
            } else {
                1.0 / (theta - (1.0 + theta * theta).sqrt())
            };
            let c = 1.0 / (1.0 + t * t).sqrt();
            let s = t * c;

            for k in 0..3 {
                let akp = a[k][p];
                let akq = a[k][q];
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let apk = a[p][k];
                let aqk = a[q][k];
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for k in 0..3 {
                let vkp = v[k][p];
                let vkq = v[k][q];
                v[k][p] = c * vkp - s * vkq;
                v[k][q] = s * vkp + c * vkq;
            }
        }
    }

    None
}

/// Two unit vectors orthogonal to `n` and to each other.
///
/// `n` must be non-zero; it does not need to be normalized.
pub fn tangent_basis(n: Vec3) -> (Vec3, Vec3) {
    let t1 = n.any_orthonormal_vector();
    let t2 = n.normalize().cross(t1);
    (t1, t2)
}

/// One explicit Euler step of the quaternion kinematic equation,
/// `q' = normalize(q + 0.5 * h * omega_quat * q)`.
pub fn integrate_orientation(q: Quat, omega: Vec3, dt: f32) -> Quat {
    if omega.length_squared() * dt * dt < 1.0e-16 {
        return q;
    }
    let dq = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0) * q;
    Quat::from_xyzw(
        q.x + 0.5 * dt * dq.x,
        q.y + 0.5 * dt * dq.y,
        q.z + 0.5 * dt * dq.z,
        q.w + 0.5 * dt * dq.w,
    )
    .normalize()
}

/// Axis-angle vector taking orientation `from` to `to` (shortest arc).
pub fn rotation_delta(from: Quat, to: Quat) -> Vec3 {
    let mut d = to * from.conjugate();
    if d.w < 0.0 {
        d = -d;
    }
    let (axis, angle) = d.to_axis_angle();
    if angle.abs() < 1.0e-6 {
        Vec3::ZERO
    } else {
        axis * angle
    }
}

/// `diag(d)` conjugated by `r`: `r * diag(d) * r^T`.
#[inline]
pub fn rotated_diagonal(r: Mat3, d: Vec3) -> Mat3 {
    Mat3::from_cols(r.x_axis * d.x, r.y_axis * d.y, r.z_axis * d.z) * r.transpose()
}
