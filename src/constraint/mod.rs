//! User constraints: joints built from the reusable constraint parts.

pub mod part;

mod distance;
mod fixed;
mod hinge;
mod point;
mod slider;
mod swing_twist;

pub use distance::{DistanceConstraint, DistanceConstraintSettings};
pub use fixed::{FixedConstraint, FixedConstraintSettings};
pub use hinge::{HingeConstraint, HingeConstraintSettings};
pub use point::{PointConstraint, PointConstraintSettings};
pub use slider::{SliderConstraint, SliderConstraintSettings};
pub use swing_twist::{SwingTwistConstraint, SwingTwistConstraintSettings};

use glam::{Quat, Vec3};

use crate::body::{Body, BodyId};
use part::SolverBody;

/// Space the attachment points/axes of a constraint config are given in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSpace {
    /// World coordinates, converted to body-local at creation.
    World,
    /// Body-local coordinates (relative to the body origin).
    Local,
}

/// Motor operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Off,
    /// Drive towards a target velocity, clipped by the force/torque limit.
    Velocity,
    /// Drive towards a target position through a spring.
    Position,
}

/// Spring parameters for soft limits and position motors.
#[derive(Debug, Clone, Copy)]
pub struct SpringSettings {
    /// Frequency in Hz; 0 means rigid.
    pub frequency: f32,
    /// Damping ratio (1 = critical).
    pub damping: f32,
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self {
            frequency: 0.0,
            damping: 1.0,
        }
    }
}

impl SpringSettings {
    pub fn new(frequency: f32, damping: f32) -> Self {
        Self { frequency, damping }
    }

    #[inline]
    pub fn is_rigid(&self) -> bool {
        self.frequency <= 0.0
    }
}

/// Motor configuration shared by the linear and angular motors.
#[derive(Debug, Clone, Copy)]
pub struct MotorSettings {
    /// Maximum force (linear) or torque (angular) the motor may apply.
    pub max_force: f32,
    /// Spring used in position mode.
    pub spring: SpringSettings,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            max_force: f32::MAX,
            spring: SpringSettings::new(2.0, 1.0),
        }
    }
}

/// Handle to a constraint stored in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintId(pub u32);

/// Attachment helper: world or local point to a COM-relative body-local
/// offset.
pub(crate) fn to_local_anchor(space: ConstraintSpace, body: &Body, point: Vec3) -> Vec3 {
    match space {
        ConstraintSpace::World => {
            body.rotation.conjugate() * (point - body.center_of_mass())
        }
        ConstraintSpace::Local => point - body.center_of_mass_local,
    }
}

/// Axis helper: world or local direction to body-local.
pub(crate) fn to_local_axis(space: ConstraintSpace, body: &Body, axis: Vec3) -> Vec3 {
    match space {
        ConstraintSpace::World => body.rotation.conjugate() * axis,
        ConstraintSpace::Local => axis,
    }
}

/// Signed angle of `from` to `to` around `axis` (all unit, axis
/// perpendicular to both).
pub(crate) fn signed_angle_around(axis: Vec3, from: Vec3, to: Vec3) -> f32 {
    from.cross(to).dot(axis).atan2(from.dot(to))
}

/// Twist angle of a relative rotation about a unit axis.
pub(crate) fn twist_angle(relative: Quat, axis: Vec3) -> f32 {
    let projected = Vec3::new(relative.x, relative.y, relative.z).dot(axis);
    let mut angle = 2.0 * projected.atan2(relative.w);
    if angle > std::f32::consts::PI {
        angle -= std::f32::consts::TAU;
    } else if angle < -std::f32::consts::PI {
        angle += std::f32::consts::TAU;
    }
    angle
}

/// A joint between two bodies.
///
/// The closed set of constraint kinds; contact constraints are built
/// separately by the solver from manifolds.
#[derive(Debug, Clone)]
pub enum Constraint {
    Point(PointConstraint),
    Distance(DistanceConstraint),
    Hinge(HingeConstraint),
    Slider(SliderConstraint),
    Fixed(FixedConstraint),
    SwingTwist(SwingTwistConstraint),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Constraint::Point($inner) => $body,
            Constraint::Distance($inner) => $body,
            Constraint::Hinge($inner) => $body,
            Constraint::Slider($inner) => $body,
            Constraint::Fixed($inner) => $body,
            Constraint::SwingTwist($inner) => $body,
        }
    };
}

impl Constraint {
    #[inline]
    pub fn body_a(&self) -> BodyId {
        dispatch!(self, c => c.body_a)
    }

    #[inline]
    pub fn body_b(&self) -> BodyId {
        dispatch!(self, c => c.body_b)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        dispatch!(self, c => c.enabled)
    }

    /// Enable or disable participation in the solver.
    pub fn set_enabled(&mut self, enabled: bool) {
        dispatch!(self, c => c.enabled = enabled);
    }

    pub fn as_hinge_mut(&mut self) -> Option<&mut HingeConstraint> {
        match self {
            Constraint::Hinge(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_slider_mut(&mut self) -> Option<&mut SliderConstraint> {
        match self {
            Constraint::Slider(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_distance_mut(&mut self) -> Option<&mut DistanceConstraint> {
        match self {
            Constraint::Distance(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_swing_twist_mut(&mut self) -> Option<&mut SwingTwistConstraint> {
        match self {
            Constraint::SwingTwist(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn set_solver_indices(&mut self, a: usize, b: usize) {
        dispatch!(self, c => {
            c.idx_a = a;
            c.idx_b = b;
        });
    }

    pub(crate) fn prepare(&mut self, bodies: &mut [SolverBody], dt: f32) {
        dispatch!(self, c => c.prepare(bodies, dt))
    }

    pub(crate) fn warm_start(&mut self, bodies: &mut [SolverBody], ratio: f32) {
        dispatch!(self, c => c.warm_start(bodies, ratio))
    }

    pub(crate) fn solve_velocity(&mut self, bodies: &mut [SolverBody], dt: f32) -> bool {
        dispatch!(self, c => c.solve_velocity(bodies, dt))
    }

    pub(crate) fn solve_position(&mut self, bodies: &mut [SolverBody], baumgarte: f32) -> bool {
        dispatch!(self, c => c.solve_position(bodies, baumgarte))
    }
}
