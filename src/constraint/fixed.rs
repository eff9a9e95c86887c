//! Fixed (weld) constraint: removes all 6 DOF between two bodies.

use glam::{Quat, Vec3};

use crate::body::{Body, BodyId};
use crate::constraint::part::{
    two_bodies, PointConstraintPart, RotationConstraintPart, SolverBody,
};
use crate::constraint::{to_local_anchor, ConstraintSpace};
use crate::math;

#[derive(Debug, Clone)]
pub struct FixedConstraintSettings {
    pub space: ConstraintSpace,
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// Weld point; defaults to body B's center of mass at creation.
    pub point: Option<Vec3>,
}

impl FixedConstraintSettings {
    pub fn new(body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            space: ConstraintSpace::World,
            body_a,
            body_b,
            point: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixedConstraint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) enabled: bool,
    pub(crate) idx_a: usize,
    pub(crate) idx_b: usize,
    local_a: Vec3,
    local_b: Vec3,
    /// Relative orientation captured at creation: `qa^-1 * qb`.
    initial_orientation: Quat,
    point_part: PointConstraintPart,
    rotation_part: RotationConstraintPart,
}

impl FixedConstraint {
    pub fn new(settings: &FixedConstraintSettings, body_a: &Body, body_b: &Body) -> Self {
        let point = settings.point.unwrap_or_else(|| match settings.space {
            ConstraintSpace::World => body_b.center_of_mass(),
            ConstraintSpace::Local => body_b.center_of_mass_local,
        });
        Self {
            body_a: settings.body_a,
            body_b: settings.body_b,
            enabled: true,
            idx_a: usize::MAX,
            idx_b: usize::MAX,
            local_a: to_local_anchor(settings.space, body_a, point),
            local_b: to_local_anchor(settings.space, body_b, point),
            initial_orientation: body_a.rotation.conjugate() * body_b.rotation,
            point_part: PointConstraintPart::default(),
            rotation_part: RotationConstraintPart::default(),
        }
    }

    /// Orientation body B should have for zero rotational error.
    #[inline]
    fn target_rotation(&self, b1: &SolverBody) -> Quat {
        b1.rotation * self.initial_orientation
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], _dt: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let r1 = b1.rotation * self.local_a;
        let r2 = b2.rotation * self.local_b;
        self.point_part.calculate(b1, b2, r1, r2);
        self.rotation_part.calculate(b1, b2);
    }

    pub(crate) fn warm_start(&mut self, bodies: &mut [SolverBody], ratio: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        self.rotation_part.warm_start(b1, b2, ratio);
        self.point_part.warm_start(b1, b2, ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], _dt: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let mut applied = self.rotation_part.solve_velocity(b1, b2);
        applied |= self.point_part.solve_velocity(b1, b2);
        applied
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let target = self.target_rotation(b1);
        let c_rot = math::rotation_delta(target, b2.rotation);
        let mut applied = self.rotation_part.solve_position(b1, b2, c_rot, baumgarte);

        let p1 = b1.com + b1.rotation * self.local_a;
        let p2 = b2.com + b2.rotation * self.local_b;
        applied |= self.point_part.solve_position(b1, b2, p2 - p1, baumgarte);
        applied
    }
}
