//! Reusable constraint rows ("parts").
//!
//! Each part caches the Jacobian terms and effective mass for one scalar or
//! small-vector constraint between two bodies. Per sub-step a part is
//! recalculated, warm-started with last step's accumulated impulse, then
//! iterated by the velocity and position solvers.
//!
//! Parts only ever write to dynamic bodies; kinematic and static bodies
//! contribute velocity to `J v` but never receive impulses.

use glam::{Mat2, Mat3, Quat, Vec2, Vec3};

use crate::body::{BodyId, MotionType};
use crate::math;

/// Snapshot of one body's state inside the solver.
///
/// Velocities and the position-solve corrections accumulate here and are
/// written back to the world once per sub-step.
#[derive(Debug, Clone)]
pub struct SolverBody {
    pub id: BodyId,
    pub motion_type: MotionType,
    /// World-space center of mass.
    pub com: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub inv_mass: f32,
    /// World-space inverse inertia, DOF-masked.
    pub inv_inertia: Mat3,
    pub translation_mask: Vec3,
    pub rotation_mask: Vec3,
}

impl SolverBody {
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    /// Velocity of a point at offset `r` from the COM.
    #[inline]
    pub fn point_velocity(&self, r: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    /// Apply a linear/angular impulse pair (dynamic bodies only).
    #[inline]
    pub fn apply_impulse(&mut self, linear: Vec3, angular: Vec3) {
        if self.is_dynamic() {
            self.linear_velocity += linear * self.translation_mask;
            self.angular_velocity += angular * self.rotation_mask;
        }
    }

    /// Translate during the position solve.
    #[inline]
    pub fn add_position_step(&mut self, delta: Vec3) {
        if self.is_dynamic() {
            self.com += delta * self.translation_mask;
        }
    }

    /// Rotate during the position solve.
    #[inline]
    pub fn add_rotation_step(&mut self, delta: Vec3) {
        if self.is_dynamic() {
            let delta = delta * self.rotation_mask;
            self.rotation = math::integrate_orientation(self.rotation, delta, 1.0);
        }
    }
}

/// Mutable access to both bodies of a constraint.
#[inline]
pub fn two_bodies(bodies: &mut [SolverBody], a: usize, b: usize) -> (&mut SolverBody, &mut SolverBody) {
    debug_assert!(a != b);
    if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// 1D constraint along a world axis, applied at moment arms `r1`/`r2`.
///
/// Used by contact normals, contact friction, distance constraints, and
/// linear motors.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisConstraintPart {
    inv_i1_r1xn: Vec3,
    inv_i2_r2xn: Vec3,
    r1_cross_n: Vec3,
    r2_cross_n: Vec3,
    effective_mass: f32,
    bias: f32,
    softness: f32,
    total_lambda: f32,
}

impl AxisConstraintPart {
    /// Build the Jacobian and effective mass. Deactivates the part when the
    /// effective mass is singular.
    pub fn calculate(
        &mut self,
        b1: &SolverBody,
        b2: &SolverBody,
        r1: Vec3,
        r2: Vec3,
        axis: Vec3,
    ) {
        self.r1_cross_n = r1.cross(axis);
        self.r2_cross_n = r2.cross(axis);
        self.inv_i1_r1xn = b1.inv_inertia * self.r1_cross_n;
        self.inv_i2_r2xn = b2.inv_inertia * self.r2_cross_n;
        let k = b1.inv_mass
            + b2.inv_mass
            + self.r1_cross_n.dot(self.inv_i1_r1xn)
            + self.r2_cross_n.dot(self.inv_i2_r2xn);
        self.effective_mass = if k > 1.0e-10 { 1.0 / k } else { 0.0 };
        self.bias = 0.0;
        self.softness = 0.0;
    }

    /// Velocity bias added to `J v` each iteration (restitution, motor
    /// target velocity as `-target`).
    #[inline]
    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias;
    }

    /// Turn the row into a soft (spring) constraint with position error
    /// `c`, frequency in Hz and a damping ratio.
    pub fn calculate_spring(
        &mut self,
        b1: &SolverBody,
        b2: &SolverBody,
        r1: Vec3,
        r2: Vec3,
        axis: Vec3,
        c: f32,
        frequency: f32,
        damping: f32,
        dt: f32,
    ) {
        self.calculate(b1, b2, r1, r2, axis);
        if self.effective_mass == 0.0 || frequency <= 0.0 {
            return;
        }
        // Soft constraint terms: with ks = m w^2 and kd = 2 m zeta w,
        //   gamma = 1 / (h (kd + h ks)),  bias = C h ks gamma.
        let k_inv = 1.0 / self.effective_mass;
        let omega = std::f32::consts::TAU * frequency;
        let m_eff = self.effective_mass;
        let ks = m_eff * omega * omega;
        let kd = 2.0 * m_eff * damping * omega;
        let gamma = dt * (kd + dt * ks);
        if gamma < 1.0e-12 {
            return;
        }
        let gamma = 1.0 / gamma;
        self.bias = c * dt * ks * gamma;
        self.softness = gamma;
        self.effective_mass = 1.0 / (k_inv + gamma);
    }

    #[inline]
    pub fn deactivate(&mut self) {
        self.effective_mass = 0.0;
        self.total_lambda = 0.0;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.effective_mass > 0.0
    }

    #[inline]
    pub fn total_lambda(&self) -> f32 {
        self.total_lambda
    }

    #[inline]
    pub fn set_total_lambda(&mut self, lambda: f32) {
        self.total_lambda = lambda;
    }

    fn apply(&self, b1: &mut SolverBody, b2: &mut SolverBody, axis: Vec3, lambda: f32) {
        b1.apply_impulse(
            -axis * (lambda * b1.inv_mass),
            -self.inv_i1_r1xn * lambda,
        );
        b2.apply_impulse(axis * (lambda * b2.inv_mass), self.inv_i2_r2xn * lambda);
    }

    /// Re-apply last step's impulse, scaled by the warm-start ratio.
    pub fn warm_start(&mut self, b1: &mut SolverBody, b2: &mut SolverBody, axis: Vec3, ratio: f32) {
        if !self.is_active() {
            self.total_lambda = 0.0;
            return;
        }
        self.total_lambda *= ratio;
        self.apply(b1, b2, axis, self.total_lambda);
    }

    /// One velocity iteration; the accumulated impulse is clamped to
    /// `[min_lambda, max_lambda]`. Returns whether an impulse was applied.
    pub fn solve_velocity(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        axis: Vec3,
        min_lambda: f32,
        max_lambda: f32,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        // Relative velocity of B with respect to A along the axis.
        let jv = axis.dot(b2.linear_velocity - b1.linear_velocity)
            + self.r2_cross_n.dot(b2.angular_velocity)
            - self.r1_cross_n.dot(b1.angular_velocity);
        let delta =
            -self.effective_mass * (jv + self.bias + self.softness * self.total_lambda);
        let new_total = (self.total_lambda + delta).clamp(min_lambda, max_lambda);
        let delta = new_total - self.total_lambda;
        if delta == 0.0 {
            return false;
        }
        self.total_lambda = new_total;
        self.apply(b1, b2, axis, delta);
        true
    }

    /// One position (Baumgarte) iteration for error `c` along the axis
    /// (negative `c` = violated towards `-axis`).
    pub fn solve_position(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        axis: Vec3,
        c: f32,
        baumgarte: f32,
    ) -> bool {
        if !self.is_active() || c == 0.0 {
            return false;
        }
        let lambda = -self.effective_mass * baumgarte * c;
        b1.add_position_step(-axis * (lambda * b1.inv_mass));
        b1.add_rotation_step(-self.inv_i1_r1xn * lambda);
        b2.add_position_step(axis * (lambda * b2.inv_mass));
        b2.add_rotation_step(self.inv_i2_r2xn * lambda);
        true
    }
}

/// 1D angular constraint about a world axis (hinge limits/motors, twist
/// and cone limits).
#[derive(Debug, Clone, Copy, Default)]
pub struct AngularConstraintPart {
    inv_i1_axis: Vec3,
    inv_i2_axis: Vec3,
    effective_mass: f32,
    bias: f32,
    softness: f32,
    total_lambda: f32,
}

impl AngularConstraintPart {
    pub fn calculate(&mut self, b1: &SolverBody, b2: &SolverBody, axis: Vec3) {
        self.inv_i1_axis = b1.inv_inertia * axis;
        self.inv_i2_axis = b2.inv_inertia * axis;
        let k = axis.dot(self.inv_i1_axis) + axis.dot(self.inv_i2_axis);
        self.effective_mass = if k > 1.0e-10 { 1.0 / k } else { 0.0 };
        self.bias = 0.0;
        self.softness = 0.0;
    }

    pub fn calculate_spring(
        &mut self,
        b1: &SolverBody,
        b2: &SolverBody,
        axis: Vec3,
        c: f32,
        frequency: f32,
        damping: f32,
        dt: f32,
    ) {
        self.calculate(b1, b2, axis);
        if self.effective_mass == 0.0 || frequency <= 0.0 {
            return;
        }
        let k_inv = 1.0 / self.effective_mass;
        let m_eff = self.effective_mass;
        let omega = std::f32::consts::TAU * frequency;
        let ks = m_eff * omega * omega;
        let kd = 2.0 * m_eff * damping * omega;
        let gamma = dt * (kd + dt * ks);
        if gamma < 1.0e-12 {
            return;
        }
        let gamma = 1.0 / gamma;
        self.bias = c * dt * ks * gamma;
        self.softness = gamma;
        self.effective_mass = 1.0 / (k_inv + gamma);
    }

    #[inline]
    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias;
    }

    #[inline]
    pub fn deactivate(&mut self) {
        self.effective_mass = 0.0;
        self.total_lambda = 0.0;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.effective_mass > 0.0
    }

    #[inline]
    pub fn total_lambda(&self) -> f32 {
        self.total_lambda
    }

    fn apply(&self, b1: &mut SolverBody, b2: &mut SolverBody, lambda: f32) {
        b1.apply_impulse(Vec3::ZERO, -self.inv_i1_axis * lambda);
        b2.apply_impulse(Vec3::ZERO, self.inv_i2_axis * lambda);
    }

    pub fn warm_start(&mut self, b1: &mut SolverBody, b2: &mut SolverBody, ratio: f32) {
        if !self.is_active() {
            self.total_lambda = 0.0;
            return;
        }
        self.total_lambda *= ratio;
        self.apply(b1, b2, self.total_lambda);
    }

    pub fn solve_velocity(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        axis: Vec3,
        min_lambda: f32,
        max_lambda: f32,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        let jv = axis.dot(b2.angular_velocity - b1.angular_velocity);
        let delta =
            -self.effective_mass * (jv + self.bias + self.softness * self.total_lambda);
        let new_total = (self.total_lambda + delta).clamp(min_lambda, max_lambda);
        let delta = new_total - self.total_lambda;
        if delta == 0.0 {
            return false;
        }
        self.total_lambda = new_total;
        self.apply(b1, b2, delta);
        true
    }

    pub fn solve_position(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        axis: Vec3,
        c: f32,
        baumgarte: f32,
    ) -> bool {
        if !self.is_active() || c == 0.0 {
            return false;
        }
        let lambda = -self.effective_mass * baumgarte * c;
        b1.add_rotation_step(-self.inv_i1_axis * lambda);
        b2.add_rotation_step(self.inv_i2_axis * lambda);
        true
    }
}

/// 2D constraint in the plane spanned by two axes perpendicular to a
/// sliding direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DualAxisConstraintPart {
    inv_i1_r1xn: [Vec3; 2],
    inv_i2_r2xn: [Vec3; 2],
    r1_cross_n: [Vec3; 2],
    r2_cross_n: [Vec3; 2],
    effective_mass: Mat2,
    active: bool,
    total_lambda: Vec2,
}

impl DualAxisConstraintPart {
    pub fn calculate(
        &mut self,
        b1: &SolverBody,
        b2: &SolverBody,
        r1: Vec3,
        r2: Vec3,
        n1: Vec3,
        n2: Vec3,
    ) {
        let axes = [n1, n2];
        for i in 0..2 {
            self.r1_cross_n[i] = r1.cross(axes[i]);
            self.r2_cross_n[i] = r2.cross(axes[i]);
            self.inv_i1_r1xn[i] = b1.inv_inertia * self.r1_cross_n[i];
            self.inv_i2_r2xn[i] = b2.inv_inertia * self.r2_cross_n[i];
        }
        let shared = b1.inv_mass + b2.inv_mass;
        let mut k = [[0.0f32; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                k[i][j] = shared * axes[i].dot(axes[j])
                    + self.r1_cross_n[i].dot(self.inv_i1_r1xn[j])
                    + self.r2_cross_n[i].dot(self.inv_i2_r2xn[j]);
            }
        }
        let m = Mat2::from_cols(Vec2::new(k[0][0], k[1][0]), Vec2::new(k[0][1], k[1][1]));
        if m.determinant().abs() > 1.0e-12 {
            self.effective_mass = m.inverse();
            self.active = true;
        } else {
            self.active = false;
            self.total_lambda = Vec2::ZERO;
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn apply(&self, b1: &mut SolverBody, b2: &mut SolverBody, n1: Vec3, n2: Vec3, lambda: Vec2) {
        let impulse = n1 * lambda.x + n2 * lambda.y;
        b1.apply_impulse(
            -impulse * b1.inv_mass,
            -(self.inv_i1_r1xn[0] * lambda.x + self.inv_i1_r1xn[1] * lambda.y),
        );
        b2.apply_impulse(
            impulse * b2.inv_mass,
            self.inv_i2_r2xn[0] * lambda.x + self.inv_i2_r2xn[1] * lambda.y,
        );
    }

    pub fn warm_start(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        n1: Vec3,
        n2: Vec3,
        ratio: f32,
    ) {
        if !self.active {
            self.total_lambda = Vec2::ZERO;
            return;
        }
        self.total_lambda *= ratio;
        self.apply(b1, b2, n1, n2, self.total_lambda);
    }

    pub fn solve_velocity(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        n1: Vec3,
        n2: Vec3,
    ) -> bool {
        if !self.active {
            return false;
        }
        let rel = b2.linear_velocity - b1.linear_velocity;
        let jv = Vec2::new(
            n1.dot(rel) + self.r2_cross_n[0].dot(b2.angular_velocity)
                - self.r1_cross_n[0].dot(b1.angular_velocity),
            n2.dot(rel) + self.r2_cross_n[1].dot(b2.angular_velocity)
                - self.r1_cross_n[1].dot(b1.angular_velocity),
        );
        let delta = -(self.effective_mass * jv);
        if delta == Vec2::ZERO {
            return false;
        }
        self.total_lambda += delta;
        self.apply(b1, b2, n1, n2, delta);
        true
    }

    /// Positional correction for the 2-vector error `c` (measured along
    /// `n1`/`n2`).
    pub fn solve_position(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        n1: Vec3,
        n2: Vec3,
        c: Vec2,
        baumgarte: f32,
    ) -> bool {
        if !self.active || c == Vec2::ZERO {
            return false;
        }
        let lambda = -(self.effective_mass * (c * baumgarte));
        let impulse = n1 * lambda.x + n2 * lambda.y;
        b1.add_position_step(-impulse * b1.inv_mass);
        b1.add_rotation_step(-(self.inv_i1_r1xn[0] * lambda.x + self.inv_i1_r1xn[1] * lambda.y));
        b2.add_position_step(impulse * b2.inv_mass);
        b2.add_rotation_step(self.inv_i2_r2xn[0] * lambda.x + self.inv_i2_r2xn[1] * lambda.y);
        true
    }
}

/// 3D positional coincidence of two attachment points.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointConstraintPart {
    r1: Vec3,
    r2: Vec3,
    inv_effective_mass: Mat3,
    active: bool,
    total_lambda: Vec3,
}

impl PointConstraintPart {
    pub fn calculate(&mut self, b1: &SolverBody, b2: &SolverBody, r1: Vec3, r2: Vec3) {
        self.r1 = r1;
        self.r2 = r2;
        let k = |p: Vec3, b1: &SolverBody, b2: &SolverBody, r1: Vec3, r2: Vec3| -> Vec3 {
            (b1.inv_mass + b2.inv_mass) * p
                + (b1.inv_inertia * r1.cross(p)).cross(r1)
                + (b2.inv_inertia * r2.cross(p)).cross(r2)
        };
        let m = Mat3::from_cols(
            k(Vec3::X, b1, b2, r1, r2),
            k(Vec3::Y, b1, b2, r1, r2),
            k(Vec3::Z, b1, b2, r1, r2),
        );
        if m.determinant().abs() > 1.0e-12 {
            self.inv_effective_mass = m.inverse();
            self.active = true;
        } else {
            self.active = false;
            self.total_lambda = Vec3::ZERO;
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn apply(&self, b1: &mut SolverBody, b2: &mut SolverBody, lambda: Vec3) {
        b1.apply_impulse(
            -lambda * b1.inv_mass,
            -(b1.inv_inertia * self.r1.cross(lambda)),
        );
        b2.apply_impulse(lambda * b2.inv_mass, b2.inv_inertia * self.r2.cross(lambda));
    }

    pub fn warm_start(&mut self, b1: &mut SolverBody, b2: &mut SolverBody, ratio: f32) {
        if !self.active {
            self.total_lambda = Vec3::ZERO;
            return;
        }
        self.total_lambda *= ratio;
        self.apply(b1, b2, self.total_lambda);
    }

    pub fn solve_velocity(&mut self, b1: &mut SolverBody, b2: &mut SolverBody) -> bool {
        if !self.active {
            return false;
        }
        let jv = b2.point_velocity(self.r2) - b1.point_velocity(self.r1);
        let lambda = -(self.inv_effective_mass * jv);
        if lambda == Vec3::ZERO {
            return false;
        }
        self.total_lambda += lambda;
        self.apply(b1, b2, lambda);
        true
    }

    /// Positional correction for the separation `c = p2 - p1`.
    pub fn solve_position(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        c: Vec3,
        baumgarte: f32,
    ) -> bool {
        if !self.active || c == Vec3::ZERO {
            return false;
        }
        let lambda = -(self.inv_effective_mass * (c * baumgarte));
        b1.add_position_step(-lambda * b1.inv_mass);
        b1.add_rotation_step(-(b1.inv_inertia * self.r1.cross(lambda)));
        b2.add_position_step(lambda * b2.inv_mass);
        b2.add_rotation_step(b2.inv_inertia * self.r2.cross(lambda));
        true
    }
}

/// 3D angular lock (fixed constraint, slider orientation lock).
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationConstraintPart {
    inv_effective_mass: Mat3,
    active: bool,
    total_lambda: Vec3,
}

impl RotationConstraintPart {
    pub fn calculate(&mut self, b1: &SolverBody, b2: &SolverBody) {
        let m = b1.inv_inertia + b2.inv_inertia;
        if m.determinant().abs() > 1.0e-12 {
            self.inv_effective_mass = m.inverse();
            self.active = true;
        } else {
            self.active = false;
            self.total_lambda = Vec3::ZERO;
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn apply(&self, b1: &mut SolverBody, b2: &mut SolverBody, lambda: Vec3) {
        b1.apply_impulse(Vec3::ZERO, -(b1.inv_inertia * lambda));
        b2.apply_impulse(Vec3::ZERO, b2.inv_inertia * lambda);
    }

    pub fn warm_start(&mut self, b1: &mut SolverBody, b2: &mut SolverBody, ratio: f32) {
        if !self.active {
            self.total_lambda = Vec3::ZERO;
            return;
        }
        self.total_lambda *= ratio;
        self.apply(b1, b2, self.total_lambda);
    }

    pub fn solve_velocity(&mut self, b1: &mut SolverBody, b2: &mut SolverBody) -> bool {
        if !self.active {
            return false;
        }
        let jv = b2.angular_velocity - b1.angular_velocity;
        let lambda = -(self.inv_effective_mass * jv);
        if lambda == Vec3::ZERO {
            return false;
        }
        self.total_lambda += lambda;
        self.apply(b1, b2, lambda);
        true
    }

    /// Positional correction for an axis-angle error `c` rotating body 1's
    /// frame onto body 2's target frame.
    pub fn solve_position(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        c: Vec3,
        baumgarte: f32,
    ) -> bool {
        if !self.active || c == Vec3::ZERO {
            return false;
        }
        let lambda = -(self.inv_effective_mass * (c * baumgarte));
        b1.add_rotation_step(-(b1.inv_inertia * lambda));
        b2.add_rotation_step(b2.inv_inertia * lambda);
        true
    }
}

/// 2D angular constraint restricting relative rotation to one hinge axis:
/// rows along two world axes perpendicular to the hinge.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationEulerConstraintPart {
    inv_i1_n: [Vec3; 2],
    inv_i2_n: [Vec3; 2],
    effective_mass: Mat2,
    active: bool,
    total_lambda: Vec2,
}

impl RotationEulerConstraintPart {
    pub fn calculate(&mut self, b1: &SolverBody, b2: &SolverBody, n1: Vec3, n2: Vec3) {
        let axes = [n1, n2];
        for i in 0..2 {
            self.inv_i1_n[i] = b1.inv_inertia * axes[i];
            self.inv_i2_n[i] = b2.inv_inertia * axes[i];
        }
        let mut k = [[0.0f32; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                k[i][j] =
                    axes[i].dot(self.inv_i1_n[j]) + axes[i].dot(self.inv_i2_n[j]);
            }
        }
        let m = Mat2::from_cols(Vec2::new(k[0][0], k[1][0]), Vec2::new(k[0][1], k[1][1]));
        if m.determinant().abs() > 1.0e-12 {
            self.effective_mass = m.inverse();
            self.active = true;
        } else {
            self.active = false;
            self.total_lambda = Vec2::ZERO;
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn apply(&self, b1: &mut SolverBody, b2: &mut SolverBody, lambda: Vec2) {
        b1.apply_impulse(
            Vec3::ZERO,
            -(self.inv_i1_n[0] * lambda.x + self.inv_i1_n[1] * lambda.y),
        );
        b2.apply_impulse(
            Vec3::ZERO,
            self.inv_i2_n[0] * lambda.x + self.inv_i2_n[1] * lambda.y,
        );
    }

    pub fn warm_start(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        ratio: f32,
    ) {
        if !self.active {
            self.total_lambda = Vec2::ZERO;
            return;
        }
        self.total_lambda *= ratio;
        self.apply(b1, b2, self.total_lambda);
    }

    pub fn solve_velocity(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        n1: Vec3,
        n2: Vec3,
    ) -> bool {
        if !self.active {
            return false;
        }
        let rel = b2.angular_velocity - b1.angular_velocity;
        let jv = Vec2::new(n1.dot(rel), n2.dot(rel));
        let lambda = -(self.effective_mass * jv);
        if lambda == Vec2::ZERO {
            return false;
        }
        self.total_lambda += lambda;
        self.apply(b1, b2, lambda);
        true
    }

    /// Positional correction for the 2-vector error `c` measured along the
    /// axes last passed to [`Self::calculate`].
    pub fn solve_position(
        &mut self,
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        c: Vec2,
        baumgarte: f32,
    ) -> bool {
        if !self.active || c == Vec2::ZERO {
            return false;
        }
        let lambda = -(self.effective_mass * (c * baumgarte));
        b1.add_rotation_step(-(self.inv_i1_n[0] * lambda.x + self.inv_i1_n[1] * lambda.y));
        b2.add_rotation_step(self.inv_i2_n[0] * lambda.x + self.inv_i2_n[1] * lambda.y);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn body(id: BodyId, motion_type: MotionType, inv_mass: f32) -> SolverBody {
        SolverBody {
            id,
            motion_type,
            com: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass,
            inv_inertia: Mat3::from_diagonal(Vec3::splat(inv_mass * 2.5)),
            translation_mask: Vec3::ONE,
            rotation_mask: Vec3::ONE,
        }
    }

    fn test_pair() -> (SolverBody, SolverBody) {
        let mut world = hecs::World::new();
        let a = world.spawn((0u8,));
        let b = world.spawn((0u8,));
        (
            body(a, MotionType::Dynamic, 1.0),
            body(b, MotionType::Dynamic, 1.0),
        )
    }

    #[test]
    fn test_axis_part_stops_approach() {
        let (mut b1, mut b2) = test_pair();
        // B moving towards A along -X, contact normal +X.
        b2.linear_velocity = Vec3::new(-2.0, 0.0, 0.0);
        let mut part = AxisConstraintPart::default();
        part.calculate(&b1, &b2, Vec3::ZERO, Vec3::ZERO, Vec3::X);
        assert!(part.is_active());
        // Iterate until the approach velocity is gone.
        for _ in 0..8 {
            part.solve_velocity(&mut b1, &mut b2, Vec3::X, 0.0, f32::MAX);
        }
        let approach = Vec3::X.dot(b2.linear_velocity - b1.linear_velocity);
        assert!(approach >= -1e-4, "still approaching: {approach}");
        assert!(part.total_lambda() > 0.0);
    }

    #[test]
    fn test_axis_part_static_untouched() {
        let mut world = hecs::World::new();
        let ids = (world.spawn((0u8,)), world.spawn((0u8,)));
        let mut b1 = body(ids.0, MotionType::Static, 0.0);
        b1.inv_inertia = Mat3::ZERO;
        let mut b2 = body(ids.1, MotionType::Dynamic, 1.0);
        b2.linear_velocity = Vec3::new(0.0, -3.0, 0.0);

        let mut part = AxisConstraintPart::default();
        part.calculate(&b1, &b2, Vec3::ZERO, Vec3::ZERO, Vec3::Y);
        for _ in 0..4 {
            part.solve_velocity(&mut b1, &mut b2, Vec3::Y, 0.0, f32::MAX);
        }
        assert_eq!(b1.linear_velocity, Vec3::ZERO);
        assert!(b2.linear_velocity.y.abs() < 1e-4);
    }

    #[test]
    fn test_impulse_clamping() {
        let (mut b1, mut b2) = test_pair();
        b2.linear_velocity = Vec3::new(-10.0, 0.0, 0.0);
        let mut part = AxisConstraintPart::default();
        part.calculate(&b1, &b2, Vec3::ZERO, Vec3::ZERO, Vec3::X);
        part.solve_velocity(&mut b1, &mut b2, Vec3::X, 0.0, 1.0);
        assert!(part.total_lambda() <= 1.0 + 1e-6);
    }

    #[test]
    fn test_point_part_pins_velocity() {
        let (mut b1, mut b2) = test_pair();
        b2.linear_velocity = Vec3::new(1.0, 2.0, -3.0);
        let mut part = PointConstraintPart::default();
        part.calculate(&b1, &b2, Vec3::ZERO, Vec3::ZERO);
        for _ in 0..4 {
            part.solve_velocity(&mut b1, &mut b2);
        }
        let rel = b2.point_velocity(Vec3::ZERO) - b1.point_velocity(Vec3::ZERO);
        assert!(rel.length() < 1e-4, "residual {rel:?}");
    }

    #[test]
    fn test_rotation_part_locks_relative_spin() {
        let (mut b1, mut b2) = test_pair();
        b2.angular_velocity = Vec3::new(0.0, 4.0, 0.0);
        let mut part = RotationConstraintPart::default();
        part.calculate(&b1, &b2);
        for _ in 0..4 {
            part.solve_velocity(&mut b1, &mut b2);
        }
        let rel = b2.angular_velocity - b1.angular_velocity;
        assert!(rel.length() < 1e-4);
        // Momentum exchanged, not destroyed: both spin the same way now.
        assert!(b1.angular_velocity.y > 0.0);
        assert!(b2.angular_velocity.y > 0.0);
    }

    #[test]
    fn test_warm_start_ratio() {
        let (mut b1, mut b2) = test_pair();
        let mut part = AxisConstraintPart::default();
        part.calculate(&b1, &b2, Vec3::ZERO, Vec3::ZERO, Vec3::X);
        part.set_total_lambda(2.0);
        part.warm_start(&mut b1, &mut b2, Vec3::X, 0.8);
        assert!((part.total_lambda() - 1.6).abs() < 1e-6);
        // Impulse went out: bodies separated along X.
        assert!(b2.linear_velocity.x > 0.0);
        assert!(b1.linear_velocity.x < 0.0);
    }

    #[test]
    fn test_two_bodies_split() {
        let mut world = hecs::World::new();
        let ids: Vec<BodyId> = (0..3).map(|_| world.spawn((0u8,))).collect();
        let mut bodies: Vec<SolverBody> = ids
            .iter()
            .map(|&id| body(id, MotionType::Dynamic, 1.0))
            .collect();
        let (a, b) = two_bodies(&mut bodies, 2, 0);
        assert_eq!(a.id, ids[2]);
        assert_eq!(b.id, ids[0]);
    }
}
