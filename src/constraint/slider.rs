//! Slider (prismatic) constraint: translation along one axis, no relative
//! rotation, with optional travel limits and a linear motor.

use glam::{Quat, Vec2, Vec3};

use crate::body::{Body, BodyId};
use crate::constraint::part::{
    two_bodies, AxisConstraintPart, DualAxisConstraintPart, RotationConstraintPart, SolverBody,
};
use crate::constraint::{
    to_local_anchor, to_local_axis, ConstraintSpace, MotorSettings, MotorState, SpringSettings,
};
use crate::math;

#[derive(Debug, Clone)]
pub struct SliderConstraintSettings {
    pub space: ConstraintSpace,
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub point_a: Vec3,
    pub point_b: Vec3,
    /// Sliding direction.
    pub slider_axis: Vec3,
    /// `(min, max)` translation along the axis.
    pub limits: Option<(f32, f32)>,
    pub limits_spring: SpringSettings,
    pub motor: MotorSettings,
}

impl SliderConstraintSettings {
    pub fn new(body_a: BodyId, body_b: BodyId, point: Vec3, axis: Vec3) -> Self {
        Self {
            space: ConstraintSpace::World,
            body_a,
            body_b,
            point_a: point,
            point_b: point,
            slider_axis: axis,
            limits: None,
            limits_spring: SpringSettings::default(),
            motor: MotorSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SliderConstraint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) enabled: bool,
    pub(crate) idx_a: usize,
    pub(crate) idx_b: usize,
    local_anchor_a: Vec3,
    local_anchor_b: Vec3,
    local_axis_a: Vec3,
    initial_orientation: Quat,
    limits: Option<(f32, f32)>,
    limits_spring: SpringSettings,
    motor: MotorSettings,
    motor_state: MotorState,
    motor_target_velocity: f32,
    motor_target_position: f32,

    translation_part: DualAxisConstraintPart,
    rotation_part: RotationConstraintPart,
    limit_part: AxisConstraintPart,
    motor_part: AxisConstraintPart,

    world_axis: Vec3,
    n1: Vec3,
    n2: Vec3,
    limit_range: (f32, f32),
    motor_range: (f32, f32),
}

impl SliderConstraint {
    pub fn new(settings: &SliderConstraintSettings, body_a: &Body, body_b: &Body) -> Self {
        Self {
            body_a: settings.body_a,
            body_b: settings.body_b,
            enabled: true,
            idx_a: usize::MAX,
            idx_b: usize::MAX,
            local_anchor_a: to_local_anchor(settings.space, body_a, settings.point_a),
            local_anchor_b: to_local_anchor(settings.space, body_b, settings.point_b),
            local_axis_a: to_local_axis(settings.space, body_a, settings.slider_axis).normalize(),
            initial_orientation: body_a.rotation.conjugate() * body_b.rotation,
            limits: settings.limits,
            limits_spring: settings.limits_spring,
            motor: settings.motor,
            motor_state: MotorState::Off,
            motor_target_velocity: 0.0,
            motor_target_position: 0.0,
            translation_part: DualAxisConstraintPart::default(),
            rotation_part: RotationConstraintPart::default(),
            limit_part: AxisConstraintPart::default(),
            motor_part: AxisConstraintPart::default(),
            world_axis: Vec3::X,
            n1: Vec3::Y,
            n2: Vec3::Z,
            limit_range: (0.0, 0.0),
            motor_range: (0.0, 0.0),
        }
    }

    pub fn set_limits(&mut self, limits: Option<(f32, f32)>) {
        if let Some((min, max)) = limits {
            assert!(min <= max, "slider limits out of order");
        }
        self.limits = limits;
    }

    pub fn set_motor_state(&mut self, state: MotorState) {
        self.motor_state = state;
    }

    pub fn set_target_velocity(&mut self, velocity: f32) {
        self.motor_target_velocity = velocity;
    }

    pub fn set_target_position(&mut self, position: f32) {
        self.motor_target_position = position;
    }

    /// Translation of B's anchor along the slider axis.
    fn translation(&self, b1: &SolverBody, b2: &SolverBody) -> f32 {
        let axis = b1.rotation * self.local_axis_a;
        let p1 = b1.com + b1.rotation * self.local_anchor_a;
        let p2 = b2.com + b2.rotation * self.local_anchor_b;
        axis.dot(p2 - p1)
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], dt: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let r1 = b1.rotation * self.local_anchor_a;
        let r2 = b2.rotation * self.local_anchor_b;

        self.world_axis = (b1.rotation * self.local_axis_a).normalize();
        self.n1 = self.world_axis.any_orthonormal_vector();
        self.n2 = self.world_axis.cross(self.n1);

        self.translation_part
            .calculate(b1, b2, r1, r2, self.n1, self.n2);
        self.rotation_part.calculate(b1, b2);

        let d = self.translation(b1, b2);
        match self.limits {
            Some((min, max)) if d <= min || d >= max => {
                let (c, range) = if d <= min {
                    (d - min, (0.0, f32::MAX))
                } else {
                    (d - max, (f32::MIN, 0.0))
                };
                self.limit_range = range;
                if self.limits_spring.is_rigid() {
                    self.limit_part.calculate(b1, b2, r1, r2, self.world_axis);
                } else {
                    self.limit_part.calculate_spring(
                        b1,
                        b2,
                        r1,
                        r2,
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

        match self.motor_state {
            MotorState::Off => self.motor_part.deactivate(),
            MotorState::Velocity => {
                self.motor_part.calculate(b1, b2, r1, r2, self.world_axis);
                self.motor_part.set_bias(-self.motor_target_velocity);
                let max = self.motor.max_force * dt;
                self.motor_range = (-max, max);
            }
            MotorState::Position => {
                let c = d - self.motor_target_position;
                self.motor_part.calculate_spring(
                    b1,
                    b2,
                    r1,
                    r2,
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
        self.motor_part.warm_start(b1, b2, self.world_axis, ratio);
        self.limit_part.warm_start(b1, b2, self.world_axis, ratio);
        self.rotation_part.warm_start(b1, b2, ratio);
        self.translation_part
            .warm_start(b1, b2, self.n1, self.n2, ratio);
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
        applied |= self.rotation_part.solve_velocity(b1, b2);
        applied |= self
            .translation_part
            .solve_velocity(b1, b2, self.n1, self.n2);
        applied
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let mut applied = false;

        // Orientation lock.
        let target = b1.rotation * self.initial_orientation;
        let c_rot = math::rotation_delta(target, b2.rotation);
        applied |= self.rotation_part.solve_position(b1, b2, c_rot, baumgarte);

        // Perpendicular drift.
        let p1 = b1.com + b1.rotation * self.local_anchor_a;
        let p2 = b2.com + b2.rotation * self.local_anchor_b;
        let u = p2 - p1;
        let c = Vec2::new(self.n1.dot(u), self.n2.dot(u));
        applied |= self
            .translation_part
            .solve_position(b1, b2, self.n1, self.n2, c, baumgarte);

        // Hard travel limits.
        if let Some((min, max)) = self.limits {
            if self.limits_spring.is_rigid() {
                let d = self.translation(b1, b2);
                let c = if d < min {
                    d - min
                } else if d > max {
                    d - max
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
        applied
    }
}
