//! Swing-twist constraint: a ball socket with a cone limit on the swing
//! and a range limit on the twist, plus an optional twist motor.

use glam::Vec3;

use crate::body::{Body, BodyId};
use crate::constraint::part::{
    two_bodies, AngularConstraintPart, PointConstraintPart, SolverBody,
};
use crate::constraint::{
    to_local_anchor, to_local_axis, twist_angle, ConstraintSpace, MotorSettings, MotorState,
};

#[derive(Debug, Clone)]
pub struct SwingTwistConstraintSettings {
    pub space: ConstraintSpace,
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// Socket position.
    pub point: Vec3,
    /// Twist axis on each body; aligned at creation in a typical setup.
    pub twist_axis_a: Vec3,
    pub twist_axis_b: Vec3,
    /// Half angle of the swing cone, radians.
    pub cone_half_angle: f32,
    /// Twist range, radians.
    pub twist_min: f32,
    pub twist_max: f32,
    pub motor: MotorSettings,
}

impl SwingTwistConstraintSettings {
    pub fn new(body_a: BodyId, body_b: BodyId, point: Vec3, twist_axis: Vec3) -> Self {
        Self {
            space: ConstraintSpace::World,
            body_a,
            body_b,
            point,
            twist_axis_a: twist_axis,
            twist_axis_b: twist_axis,
            cone_half_angle: std::f32::consts::FRAC_PI_4,
            twist_min: -std::f32::consts::FRAC_PI_4,
            twist_max: std::f32::consts::FRAC_PI_4,
            motor: MotorSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwingTwistConstraint {
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    pub(crate) enabled: bool,
    pub(crate) idx_a: usize,
    pub(crate) idx_b: usize,
    local_anchor_a: Vec3,
    local_anchor_b: Vec3,
    local_twist_a: Vec3,
    local_twist_b: Vec3,
    cone_half_angle: f32,
    twist_min: f32,
    twist_max: f32,
    motor: MotorSettings,
    motor_state: MotorState,
    motor_target_velocity: f32,
    motor_target_angle: f32,

    point_part: PointConstraintPart,
    swing_part: AngularConstraintPart,
    twist_part: AngularConstraintPart,
    motor_part: AngularConstraintPart,

    swing_axis: Vec3,
    twist_axis_world: Vec3,
    swing_range: (f32, f32),
    twist_range: (f32, f32),
    motor_range: (f32, f32),
}

impl SwingTwistConstraint {
    pub fn new(settings: &SwingTwistConstraintSettings, body_a: &Body, body_b: &Body) -> Self {
        assert!(
            settings.twist_min <= settings.twist_max,
            "twist limits out of order"
        );
        Self {
            body_a: settings.body_a,
            body_b: settings.body_b,
            enabled: true,
            idx_a: usize::MAX,
            idx_b: usize::MAX,
            local_anchor_a: to_local_anchor(settings.space, body_a, settings.point),
            local_anchor_b: to_local_anchor(settings.space, body_b, settings.point),
            local_twist_a: to_local_axis(settings.space, body_a, settings.twist_axis_a)
                .normalize(),
            local_twist_b: to_local_axis(settings.space, body_b, settings.twist_axis_b)
                .normalize(),
            cone_half_angle: settings.cone_half_angle,
            twist_min: settings.twist_min,
            twist_max: settings.twist_max,
            motor: settings.motor,
            motor_state: MotorState::Off,
            motor_target_velocity: 0.0,
            motor_target_angle: 0.0,
            point_part: PointConstraintPart::default(),
            swing_part: AngularConstraintPart::default(),
            twist_part: AngularConstraintPart::default(),
            motor_part: AngularConstraintPart::default(),
            swing_axis: Vec3::X,
            twist_axis_world: Vec3::Y,
            swing_range: (0.0, 0.0),
            twist_range: (0.0, 0.0),
            motor_range: (0.0, 0.0),
        }
    }

    pub fn set_cone_half_angle(&mut self, angle: f32) {
        self.cone_half_angle = angle;
    }

    pub fn set_twist_limits(&mut self, min: f32, max: f32) {
        assert!(min <= max);
        self.twist_min = min;
        self.twist_max = max;
    }

    pub fn set_motor_state(&mut self, state: MotorState) {
        self.motor_state = state;
    }

    pub fn set_target_twist_velocity(&mut self, velocity: f32) {
        self.motor_target_velocity = velocity;
    }

    pub fn set_target_twist_angle(&mut self, angle: f32) {
        self.motor_target_angle = angle;
    }

    /// `(swing angle, twist angle)` for the current body states.
    fn angles(&self, b1: &SolverBody, b2: &SolverBody) -> (f32, f32) {
        let ta = b1.rotation * self.local_twist_a;
        let tb = b2.rotation * self.local_twist_b;
        let swing = ta.dot(tb).clamp(-1.0, 1.0).acos();
        let relative = b1.rotation.conjugate() * b2.rotation;
        let twist = twist_angle(relative, self.local_twist_a);
        (swing, twist)
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], dt: f32) {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let r1 = b1.rotation * self.local_anchor_a;
        let r2 = b2.rotation * self.local_anchor_b;
        self.point_part.calculate(b1, b2, r1, r2);

        let ta = (b1.rotation * self.local_twist_a).normalize();
        let tb = (b2.rotation * self.local_twist_b).normalize();
        self.twist_axis_world = tb;
        let (swing, twist) = self.angles(b1, b2);

        // Cone limit: active when the twist axes splay past the cone.
        if swing >= self.cone_half_angle {
            let cross = ta.cross(tb);
            self.swing_axis = if cross.length_squared() > 1.0e-12 {
                cross.normalize()
            } else {
                ta.any_orthonormal_vector()
            };
            self.swing_part.calculate(b1, b2, self.swing_axis);
            // Only impulses that reduce the swing.
            self.swing_range = (f32::MIN, 0.0);
        } else {
            self.swing_part.deactivate();
        }

        // Twist limit.
        if twist <= self.twist_min || twist >= self.twist_max {
            self.twist_part.calculate(b1, b2, self.twist_axis_world);
            self.twist_range = if twist <= self.twist_min {
                (0.0, f32::MAX)
            } else {
                (f32::MIN, 0.0)
            };
        } else {
            self.twist_part.deactivate();
        }

        // Twist motor.
        match self.motor_state {
            MotorState::Off => self.motor_part.deactivate(),
            MotorState::Velocity => {
                self.motor_part.calculate(b1, b2, self.twist_axis_world);
                self.motor_part.set_bias(-self.motor_target_velocity);
                let max = self.motor.max_force * dt;
                self.motor_range = (-max, max);
            }
            MotorState::Position => {
                let c = twist - self.motor_target_angle;
                self.motor_part.calculate_spring(
                    b1,
                    b2,
                    self.twist_axis_world,
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
        self.swing_part.warm_start(b1, b2, ratio);
        self.twist_part.warm_start(b1, b2, ratio);
        self.point_part.warm_start(b1, b2, ratio);
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], _dt: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let mut applied = self.motor_part.solve_velocity(
            b1,
            b2,
            self.twist_axis_world,
            self.motor_range.0,
            self.motor_range.1,
        );
        applied |= self.swing_part.solve_velocity(
            b1,
            b2,
            self.swing_axis,
            self.swing_range.0,
            self.swing_range.1,
        );
        applied |= self.twist_part.solve_velocity(
            b1,
            b2,
            self.twist_axis_world,
            self.twist_range.0,
            self.twist_range.1,
        );
        applied |= self.point_part.solve_velocity(b1, b2);
        applied
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        let (b1, b2) = two_bodies(bodies, self.idx_a, self.idx_b);
        let mut applied = false;

        let (swing, twist) = self.angles(b1, b2);
        if swing > self.cone_half_angle {
            applied |= self.swing_part.solve_position(
                b1,
                b2,
                self.swing_axis,
                swing - self.cone_half_angle,
                baumgarte,
            );
        }
        if twist < self.twist_min {
            applied |= self.twist_part.solve_position(
                b1,
                b2,
                self.twist_axis_world,
                twist - self.twist_min,
                baumgarte,
            );
        } else if twist > self.twist_max {
            applied |= self.twist_part.solve_position(
                b1,
                b2,
                self.twist_axis_world,
                twist - self.twist_max,
                baumgarte,
            );
        }

        let p1 = b1.com + b1.rotation * self.local_anchor_a;
        let p2 = b2.com + b2.rotation * self.local_anchor_b;
        applied |= self.point_part.solve_position(b1, b2, p2 - p1, baumgarte);
        applied
    }
}
