//! Hinge constraint: rotation about one shared axis, with optional angle
//! limits and a motor.

use glam::{Vec2, Vec3};

use crate::body::{Body, BodyId};
use crate::constraint::part::{
    two_bodies, AngularConstraintPart, PointConstraintPart, RotationEulerConstraintPart,
    SolverBody,
};
use crate::constraint::{
    signed_angle_around, to_local_anchor, to_local_axis, ConstraintSpace, MotorSettings,
    MotorState, SpringSettings,
};

#[derive(Debug, Clone)]
pub struct HingeConstraintSettings {
    pub space: ConstraintSpace,
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub point_a: Vec3,
    pub point_b: Vec3,
    /// Hinge axis on each body (world space by default).
    pub hinge_axis_a: Vec3,
    pub hinge_axis_b: Vec3,
    /// Reference directions perpendicular to the hinge axes; the hinge
    /// angle is measured between them.
    pub normal_axis_a: Vec3,
    pub normal_axis_b: Vec3,
    /// `(min, max)` angle in radians.
    pub limits: Option<(f32, f32)>,
    /// Soft limits when the frequency is non-zero.
    pub limits_spring: SpringSettings,
    pub motor: MotorSettings,
}

impl HingeConstraintSettings {
    pub fn new(body_a: BodyId, body_b: BodyId, point: Vec3, axis: Vec3) -> Self {
        let normal = axis.any_orthonormal_vector();
        Self {
            space: ConstraintSpace::World,
            body_a,
            body_b,
            point_a: point,
            point_b: point,
            hinge_axis_a: axis,
            hinge_axis_b: axis,
            normal_axis_a: normal,
            normal_axis_b: normal,
            limits: None,
            limits_spring: SpringSettings::default(),
            motor: MotorSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HingeConstraint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) enabled: bool,
    pub(crate) idx_a: usize,
    pub(crate) idx_b: usize,
    local_anchor_a: Vec3,
    local_anchor_b: Vec3,
    local_axis_a: Vec3,
    local_axis_b: Vec3,
    local_normal_a: Vec3,
    local_normal_b: Vec3,
    limits: Option<(f32, f32)>,
    limits_spring: SpringSettings,
    motor: MotorSettings,
    motor_state: MotorState,
    motor_target_velocity: f32,
    motor_target_angle: f32,

    point_part: PointConstraintPart,
    rotation_part: RotationEulerConstraintPart,
    limit_part: AngularConstraintPart,
    motor_part: AngularConstraintPart,

    // Per-sub-step state.
    world_axis: Vec3,
    rotation_n1: Vec3,
    rotation_n2: Vec3,
    limit_range: (f32, f32),
    motor_range: (f32, f32),
}

impl HingeConstraint {
    pub fn new(settings: &HingeConstraintSettings, body_a: &Body, body_b: &Body) -> Self {
        Self {
            body_a: settings.body_a,
            body_b: settings.body_b,
            enabled: true,
            idx_a: usize::MAX,
            idx_b: usize::MAX,
            local_anchor_a: to_local_anchor(settings.space, body_a, settings.point_a),
            local_anchor_b: to_local_anchor(settings.space, body_b, settings.point_b),
            local_axis_a: to_local_axis(settings.space, body_a, settings.hinge_axis_a).normalize(),
            local_axis_b: to_local_axis(settings.space, body_b, settings.hinge_axis_b).normalize(),
            local_normal_a: to_local_axis(settings.space, body_a, settings.normal_axis_a)
                .normalize(),
            local_normal_b: to_local_axis(settings.space, body_b, settings.normal_axis_b)
                .normalize(),
            limits: settings.limits,
            limits_spring: settings.limits_spring,
            motor: settings.motor,
            motor_state: MotorState::Off,
            motor_target_velocity: 0.0,
            motor_target_angle: 0.0,
            point_part: PointConstraintPart::default(),
            rotation_part: RotationEulerConstraintPart::default(),
            limit_part: AngularConstraintPart::default(),
            motor_part: AngularConstraintPart::default(),
            world_axis: Vec3::Y,
            rotation_n1: Vec3::X,
            rotation_n2: Vec3::Z,
            limit_range: (0.0, 0.0),
            motor_range: (0.0, 0.0),
        }
    }

    pub fn set_limits(&mut self, limits: Option<(f32, f32)>) {
        if let Some((min, max)) = limits {
            assert!(min <= max, "hinge limits out of order");
        }
        self.limits = limits;
    }

    pub fn set_motor_state(&mut self, state: MotorState) {
        self.motor_state = state;
    }

    pub fn set_target_angular_velocity(&mut self, velocity: f32) {
        self.motor_target_velocity = velocity;
    }

    pub fn set_target_angle(&mut self, angle: f32) {
        self.motor_target_angle = angle;
    }

    pub fn set_motor_settings(&mut self, motor: MotorSettings) {
        self.motor = motor;
    }

    /// Current hinge angle for the given solver bodies.
    fn angle(&self, b1: &SolverBody, b2: &SolverBody) -> f32 {
        let axis = b1.rotation * self.local_axis_a;
        let na = b1.rotation * self.local_normal_a;
        let nb = b2.rotation * self.local_normal_b;
        signed_angle_around(axis, na, nb)
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], dt: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let r1 = b1.rotation * self.local_anchor_a;
        let r2 = b2.rotation * self.local_anchor_b;
        self.point_part.calculate(b1, b2, r1, r2);

        self.world_axis = (b1.rotation * self.local_axis_a).normalize();
        self.rotation_n1 = self.world_axis.any_orthonormal_vector();
        self.rotation_n2 = self.world_axis.cross(self.rotation_n1);
        self.rotation_part
            .calculate(b1, b2, self.rotation_n1, self.rotation_n2);

        let angle = self.angle(b1, b2);

        // Limits: one row along the hinge axis, active at either stop.
        match self.limits {
            Some((min, max)) if angle <= min || angle >= max => {
                let (c, range) = if angle <= min {
                    (angle - min, (0.0, f32::MAX))
                } else {
                    (angle - max, (f32::MIN, 0.0))
                };
                self.limit_range = range;
                if self.limits_spring.is_rigid() {
                    self.limit_part.calculate(b1, b2, self.world_axis);
                } else {
                    self.limit_part.calculate_spring(
                        b1,
                        b2,
                        self.world_axis,
                        c,
                        self.limits_spring.frequency,
                        self.limits_spring.damping,
                        dt,
                    );
                }
            }
            _ => self.limit_part.deactivate(),
        }

        // Motor row.
        match self.motor_state {
            MotorState::Off => self.motor_part.deactivate(),
            MotorState::Velocity => {
                self.motor_part.calculate(b1, b2, self.world_axis);
                self.motor_part.set_bias(-self.motor_target_velocity);
                let max = self.motor.max_force * dt;
                self.motor_range = (-max, max);
            }
            MotorState::Position => {
                let c = angle - self.motor_target_angle;
                self.motor_part.calculate_spring(
                    b1,
                    b2,
                    self.world_axis,
                    c,
                    self.motor.spring.frequency,
                    self.motor.spring.damping,
                    dt,
                );
                let max = self.motor.max_force * dt;
                self.motor_range = (-max, max);
            }
        }
    }

    pub(crate) fn warm_start(&mut self, bodies: &mut [SolverBody], ratio: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        self.motor_part.warm_start(b1, b2, ratio);
        self.limit_part.warm_start(b1, b2, ratio);
        self.rotation_part.warm_start(b1, b2, ratio);
        self.point_part.warm_start(b1, b2, ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], _dt: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let mut applied = self.motor_part.solve_velocity(
            b1,
            b2,
            self.world_axis,
            self.motor_range.0,
            self.motor_range.1,
        );
        applied |= self.limit_part.solve_velocity(
            b1,
            b2,
            self.world_axis,
            self.limit_range.0,
            self.limit_range.1,
        );
        applied |= self
            .rotation_part
            .solve_velocity(b1, b2, self.rotation_n1, self.rotation_n2);
        applied |= self.point_part.solve_velocity(b1, b2);
        applied
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let mut applied = false;

        // Align the hinge axes.
        let a1 = b1.rotation * self.local_axis_a;
        let a2 = b2.rotation * self.local_axis_b;
        let misalignment = a1.cross(a2);
        let c = Vec2::new(
            self.rotation_n1.dot(misalignment),
            self.rotation_n2.dot(misalignment),
        );
        applied |= self.rotation_part.solve_position(b1, b2, c, baumgarte);

        // Hard angle limits.
        if let Some((min, max)) = self.limits {
            if self.limits_spring.is_rigid() {
                let angle = self.angle(b1, b2);
                let c = if angle < min {
                    angle - min
                } else if angle > max {
                    angle - max
                } else {
                    0.0
                };
                if c != 0.0 {
                    applied |= self.limit_part.solve_position(
                        b1,
                        b2,
                        self.world_axis,
                        c,
                        baumgarte,
                    );
                }
            }
        }

        // Anchor coincidence.
        let p1 = b1.com + b1.rotation * self.local_anchor_a;
        let p2 = b2.com + b2.rotation * self.local_anchor_b;
        applied |= self.point_part.solve_position(b1, b2, p2 - p1, baumgarte);
        applied
    }
}
