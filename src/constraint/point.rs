//! Point (ball-and-socket) constraint: removes 3 translational DOF.

use glam::Vec3;

use crate::body::{Body, BodyId};
use crate::constraint::part::{two_bodies, PointConstraintPart, SolverBody};
use crate::constraint::{to_local_anchor, ConstraintSpace};

#[derive(Debug, Clone)]
pub struct PointConstraintSettings {
    pub space: ConstraintSpace,
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// Attachment on A (same point as `point_b` in a typical setup).
    pub point_a: Vec3,
    /// Attachment on B.
    pub point_b: Vec3,
}

impl PointConstraintSettings {
    pub fn new(body_a: BodyId, body_b: BodyId, world_point: Vec3) -> Self {
        Self {
            space: ConstraintSpace::World,
            body_a,
            body_b,
            point_a: world_point,
            point_b: world_point,
        }
    }
}

/// Keeps two body-local attachment points coincident.
#[derive(Debug, Clone)]
pub struct PointConstraint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) enabled: bool,
    pub(crate) idx_a: usize,
    pub(crate) idx_b: usize,
    local_a: Vec3,
    local_b: Vec3,
    part: PointConstraintPart,
}

impl PointConstraint {
    pub fn new(settings: &PointConstraintSettings, body_a: &Body, body_b: &Body) -> Self {
        Self {
            body_a: settings.body_a,
            body_b: settings.body_b,
            enabled: true,
            idx_a: usize::MAX,
            idx_b: usize::MAX,
            local_a: to_local_anchor(settings.space, body_a, settings.point_a),
            local_b: to_local_anchor(settings.space, body_b, settings.point_b),
            part: PointConstraintPart::default(),
        }
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], _dt: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let r1 = b1.rotation * self.local_a;
        let r2 = b2.rotation * self.local_b;
        self.part.calculate(b1, b2, r1, r2);
    }

    pub(crate) fn warm_start(&mut self, bodies: &mut [SolverBody], ratio: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        self.part.warm_start(b1, b2, ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], _dt: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        self.part.solve_velocity(b1, b2)
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let p1 = b1.com + b1.rotation * self.local_a;
        let p2 = b2.com + b2.rotation * self.local_b;
        self.part.solve_position(b1, b2, p2 - p1, baumgarte)
    }
}
