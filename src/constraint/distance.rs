//! Distance constraint: keeps the attachment distance inside `[min, max]`,
//! optionally through a spring.

use glam::Vec3;

use crate::body::{Body, BodyId};
use crate::constraint::part::{two_bodies, AxisConstraintPart, SolverBody};
use crate::constraint::{to_local_anchor, ConstraintSpace, SpringSettings};

#[derive(Debug, Clone)]
pub struct DistanceConstraintSettings {
    pub space: ConstraintSpace,
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub point_a: Vec3,
    pub point_b: Vec3,
    /// Minimum distance; defaults to the creation-time distance.
    pub min_distance: Option<f32>,
    /// Maximum distance; defaults to the creation-time distance.
    pub max_distance: Option<f32>,
    /// Spring; rigid when the frequency is 0.
    pub spring: SpringSettings,
}

impl DistanceConstraintSettings {
    pub fn new(body_a: BodyId, body_b: BodyId, point_a: Vec3, point_b: Vec3) -> Self {
        Self {
            space: ConstraintSpace::World,
            body_a,
            body_b,
            point_a,
            point_b,
            min_distance: None,
            max_distance: None,
            spring: SpringSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistanceConstraint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) enabled: bool,
    pub(crate) idx_a: usize,
    pub(crate) idx_b: usize,
    local_a: Vec3,
    local_b: Vec3,
    min_distance: f32,
    max_distance: f32,
    spring: SpringSettings,
    part: AxisConstraintPart,
    /// World axis from A's to B's attachment, fixed for the sub-step.
    axis: Vec3,
    /// Impulse sign bounds for the current violation.
    lambda_range: (f32, f32),
}

impl DistanceConstraint {
    pub fn new(settings: &DistanceConstraintSettings, body_a: &Body, body_b: &Body) -> Self {
        let local_a = to_local_anchor(settings.space, body_a, settings.point_a);
        let local_b = to_local_anchor(settings.space, body_b, settings.point_b);
        let world_a = body_a.center_of_mass() + body_a.rotation * local_a;
        let world_b = body_b.center_of_mass() + body_b.rotation * local_b;
        let rest = world_a.distance(world_b);
        let min_distance = settings.min_distance.unwrap_or(rest).max(0.0);
        let max_distance = settings.max_distance.unwrap_or(rest).max(min_distance);
        Self {
            body_a: settings.body_a,
            body_b: settings.body_b,
            enabled: true,
            idx_a: usize::MAX,
            idx_b: usize::MAX,
            local_a,
            local_b,
            min_distance,
            max_distance,
            spring: settings.spring,
            part: AxisConstraintPart::default(),
            axis: Vec3::X,
            lambda_range: (0.0, 0.0),
        }
    }

    pub fn set_limits(&mut self, min_distance: f32, max_distance: f32) {
        assert!(min_distance >= 0.0 && max_distance >= min_distance);
        self.min_distance = min_distance;
        self.max_distance = max_distance;
    }

    /// Signed violation of the nearer limit: negative below `min`,
    /// positive above `max`, 0 inside the range.
    fn violation(&self, distance: f32) -> f32 {
        if distance < self.min_distance {
            distance - self.min_distance
        } else if distance > self.max_distance {
            distance - self.max_distance
        } else {
            0.0
        }
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], dt: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let r1 = b1.rotation * self.local_a;
        let r2 = b2.rotation * self.local_b;
        let delta = (b2.com + r2) - (b1.com + r1);
        let distance = delta.length();
        self.axis = if distance > 1.0e-6 {
            delta / distance
        } else {
            Vec3::X
        };

        let equality = self.min_distance >= self.max_distance - 1.0e-6;
        let c = self.violation(distance);

        // Impulse bounds: pushing apart is positive along the axis.
        self.lambda_range = if equality {
            (f32::MIN, f32::MAX)
        } else if distance <= self.min_distance {
            (0.0, f32::MAX)
        } else if distance >= self.max_distance {
            (f32::MIN, 0.0)
        } else {
            // Inside the range: nothing to do this sub-step.
            self.part.deactivate();
            return;
        };

        if self.spring.is_rigid() {
            self.part.calculate(b1, b2, r1, r2, self.axis);
        } else {
            self.part.calculate_spring(
                b1,
                b2,
                r1,
                r2,
                self.axis,
                c,
                self.spring.frequency,
                self.spring.damping,
                dt,
            );
        }
    }

    pub(crate) fn warm_start(&mut self, bodies: &mut [SolverBody], ratio: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        self.part.warm_start(b1, b2, self.axis, ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], _dt: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        self.part
            .solve_velocity(b1, b2, self.axis, self.lambda_range.0, self.lambda_range.1)
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        // Springs leave the error to the velocity solve.
        if !self.spring.is_rigid() {
            return false;
        }
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let p1 = b1.com + b1.rotation * self.local_a;
        let p2 = b2.com + b2.rotation * self.local_b;
        let c = self.violation(p2.distance(p1));
        if c == 0.0 {
            return false;
        }
        self.part.solve_position(b1, b2, self.axis, c, baumgarte)
    }
}
