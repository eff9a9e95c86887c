//! Rigid bodies and their motion state.
//!
//! A [`Body`] is the transform + shape + layer record every body carries;
//! non-static bodies additionally carry [`Motion`] (velocities, mass,
//! inertia, damping, DOF mask, sleep state). Bodies live in the world's
//! entity table; [`BodyId`] is the generation-tagged entity id.

use std::sync::Arc;

use bitflags::bitflags;
use glam::{Mat3, Quat, Vec3};

use crate::aabb::Aabb;
use crate::layers::ObjectLayer;
use crate::math;
use crate::shape::{MassProperties, Pose, Shape};

/// Stable, generation-tagged body handle.
pub type BodyId = hecs::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionType {
    /// Immovable; contributes no velocity.
    Static,
    /// Scripted motion; contributes velocity but never receives impulses.
    Kinematic,
    /// Fully simulated.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionQuality {
    /// Collision detection at the final position only.
    Discrete,
    /// Sweep from the previous position to catch tunnelling.
    LinearCast,
}

bitflags! {
    /// Degrees of freedom a dynamic body is allowed to use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dof: u8 {
        const TRANSLATION_X = 1 << 0;
        const TRANSLATION_Y = 1 << 1;
        const TRANSLATION_Z = 1 << 2;
        const ROTATION_X = 1 << 3;
        const ROTATION_Y = 1 << 4;
        const ROTATION_Z = 1 << 5;

        const TRANSLATION = Self::TRANSLATION_X.bits()
            | Self::TRANSLATION_Y.bits()
            | Self::TRANSLATION_Z.bits();
        const ROTATION = Self::ROTATION_X.bits()
            | Self::ROTATION_Y.bits()
            | Self::ROTATION_Z.bits();
        const ALL = Self::TRANSLATION.bits() | Self::ROTATION.bits();
        /// A common configuration: free movement in a plane.
        const PLANE_2D = Self::TRANSLATION_X.bits()
            | Self::TRANSLATION_Y.bits()
            | Self::ROTATION_Z.bits();
    }
}

impl Dof {
    /// Component mask (1 = free) over the translation axes.
    #[inline]
    pub fn translation_mask(self) -> Vec3 {
        Vec3::new(
            if self.contains(Dof::TRANSLATION_X) { 1.0 } else { 0.0 },
            if self.contains(Dof::TRANSLATION_Y) { 1.0 } else { 0.0 },
            if self.contains(Dof::TRANSLATION_Z) { 1.0 } else { 0.0 },
        )
    }

    /// Component mask (1 = free) over the rotation axes.
    #[inline]
    pub fn rotation_mask(self) -> Vec3 {
        Vec3::new(
            if self.contains(Dof::ROTATION_X) { 1.0 } else { 0.0 },
            if self.contains(Dof::ROTATION_Y) { 1.0 } else { 0.0 },
            if self.contains(Dof::ROTATION_Z) { 1.0 } else { 0.0 },
        )
    }
}

/// Transform + shape + layer record of a body.
#[derive(Debug, Clone)]
pub struct Body {
    pub position: Vec3,
    /// Unit orientation quaternion (renormalised each step).
    pub rotation: Quat,
    pub shape: Arc<Shape>,
    pub object_layer: ObjectLayer,
    pub motion_type: MotionType,
    pub friction: f32,
    pub restitution: f32,
    /// Bitset of groups this body belongs to.
    pub collision_group: u32,
    /// Bitset of groups this body collides with.
    pub collision_mask: u32,
    pub user_data: u64,
    pub(crate) center_of_mass_local: Vec3,
    pub(crate) world_aabb: Aabb,
    pub(crate) active: bool,
}

impl Body {
    #[inline]
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    /// Center of mass in world space.
    #[inline]
    pub fn center_of_mass(&self) -> Vec3 {
        self.position + self.rotation * self.center_of_mass_local
    }

    /// Cached world bounds (tight).
    #[inline]
    pub fn world_aabb(&self) -> Aabb {
        self.world_aabb
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.motion_type == MotionType::Static
    }

    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.motion_type == MotionType::Kinematic
    }

    pub(crate) fn refresh_world_aabb(&mut self) {
        self.world_aabb = self.shape.world_aabb(&self.pose());
    }
}

/// Motion state of a non-static body.
#[derive(Debug, Clone)]
pub struct Motion {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub(crate) force: Vec3,
    pub(crate) torque: Vec3,
    pub inv_mass: f32,
    /// Inverse of the principal moments of inertia.
    pub inv_inertia_diagonal: Vec3,
    /// Rotation from body space to the principal axes.
    pub inertia_rotation: Quat,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub max_linear_velocity: f32,
    pub max_angular_velocity: f32,
    pub gravity_factor: f32,
    pub quality: MotionQuality,
    pub allowed_dofs: Dof,
    /// Per-body velocity iteration override; 0 uses the world default.
    pub num_velocity_steps_override: u32,
    /// Per-body position iteration override; 0 uses the world default.
    pub num_position_steps_override: u32,
    pub allow_sleeping: bool,
    /// Body-local sleep test points (COM-relative).
    pub(crate) sleep_offsets: [Vec3; 3],
    /// Last anchored world positions of the sleep test points.
    pub(crate) sleep_anchors: [Vec3; 3],
    pub(crate) sleep_timer: f32,
    pub(crate) prev_position: Vec3,
    pub(crate) prev_rotation: Quat,
}

impl Motion {
    pub(crate) fn new(quality: MotionQuality, allowed_dofs: Dof) -> Self {
        Self {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            inv_mass: 0.0,
            inv_inertia_diagonal: Vec3::ZERO,
            inertia_rotation: Quat::IDENTITY,
            linear_damping: 0.05,
            angular_damping: 0.05,
            max_linear_velocity: 500.0,
            max_angular_velocity: 0.25 * std::f32::consts::PI * 60.0,
            gravity_factor: 1.0,
            quality,
            allowed_dofs,
            num_velocity_steps_override: 0,
            num_position_steps_override: 0,
            allow_sleeping: true,
            sleep_offsets: [Vec3::ZERO; 3],
            sleep_anchors: [Vec3::ZERO; 3],
            sleep_timer: 0.0,
            prev_position: Vec3::ZERO,
            prev_rotation: Quat::IDENTITY,
        }
    }

    /// Install mass and inertia from shape-space mass properties,
    /// decomposing the inertia tensor into principal moments.
    ///
    /// Locked translation axes force the inverse mass to zero; locked
    /// rotation axes zero the whole inverse-inertia diagonal when all
    /// three are locked (per-axis locks are applied at multiplication
    /// time).
    pub fn set_mass_properties(&mut self, properties: &MassProperties) {
        if !self.allowed_dofs.intersects(Dof::TRANSLATION) || properties.mass <= 0.0 {
            self.inv_mass = 0.0;
        } else {
            self.inv_mass = 1.0 / properties.mass;
        }

        if !self.allowed_dofs.intersects(Dof::ROTATION) {
            self.inv_inertia_diagonal = Vec3::ZERO;
            self.inertia_rotation = Quat::IDENTITY;
            return;
        }

        match math::jacobi_eigen_decomposition(properties.inertia, 32) {
            Some((moments, axes)) if moments.min_element() > 0.0 => {
                self.inv_inertia_diagonal = moments.recip();
                self.inertia_rotation = Quat::from_mat3(&axes).normalize();
            }
            _ => {
                // Degenerate tensor: unit-sphere inertia for the body mass.
                tracing::debug!("inertia decomposition failed, using sphere inertia");
                let mass = if self.inv_mass > 0.0 {
                    1.0 / self.inv_mass
                } else {
                    1.0
                };
                self.inv_inertia_diagonal = Vec3::splat(1.0 / (0.4 * mass));
                self.inertia_rotation = Quat::IDENTITY;
            }
        }
    }

    /// World-space inverse inertia for a body orientation, with locked
    /// rotation axes zeroed out (rows and columns).
    pub fn inverse_inertia_for_rotation(&self, body_rotation: Quat) -> Mat3 {
        let r = Mat3::from_quat(body_rotation * self.inertia_rotation);
        let m = math::rotated_diagonal(r, self.inv_inertia_diagonal);
        let mask = self.allowed_dofs.rotation_mask();
        // P * M * P with P = diag(mask).
        Mat3::from_cols(
            m.x_axis * mask * mask.x,
            m.y_axis * mask * mask.y,
            m.z_axis * mask * mask.z,
        )
    }

    /// `inverse_inertia_for_rotation(q) * v` without materialising the
    /// matrix.
    pub fn multiply_world_inverse_inertia(&self, body_rotation: Quat, v: Vec3) -> Vec3 {
        let mask = self.allowed_dofs.rotation_mask();
        let q = body_rotation * self.inertia_rotation;
        let local = q.conjugate() * (v * mask);
        (q * (self.inv_inertia_diagonal * local)) * mask
    }

    /// Zero locked translation components of a velocity.
    #[inline]
    pub fn apply_translation_dofs(&self, v: Vec3) -> Vec3 {
        v * self.allowed_dofs.translation_mask()
    }

    /// Zero locked rotation components of an angular velocity.
    #[inline]
    pub fn apply_rotation_dofs(&self, w: Vec3) -> Vec3 {
        w * self.allowed_dofs.rotation_mask()
    }

    /// Clamp, DOF-mask, and store a linear velocity.
    pub fn set_linear_velocity(&mut self, v: Vec3) {
        let v = self.apply_translation_dofs(v);
        self.linear_velocity = v.clamp_length_max(self.max_linear_velocity);
    }

    /// Clamp, DOF-mask, and store an angular velocity.
    pub fn set_angular_velocity(&mut self, w: Vec3) {
        let w = self.apply_rotation_dofs(w);
        self.angular_velocity = w.clamp_length_max(self.max_angular_velocity);
    }

    /// Re-anchor the sleep test points at the body's current placement.
    pub(crate) fn reset_sleep_test(&mut self, position: Vec3, rotation: Quat, com_local: Vec3) {
        let com = position + rotation * com_local;
        for (anchor, offset) in self.sleep_anchors.iter_mut().zip(self.sleep_offsets) {
            *anchor = com + rotation * offset;
        }
        self.sleep_timer = 0.0;
    }

    /// Largest distance any sleep test point has moved from its anchor.
    pub(crate) fn sleep_test_drift(&self, position: Vec3, rotation: Quat, com_local: Vec3) -> f32 {
        let com = position + rotation * com_local;
        let mut worst = 0.0f32;
        for (anchor, offset) in self.sleep_anchors.iter().zip(self.sleep_offsets) {
            let current = com + rotation * offset;
            worst = worst.max(current.distance(*anchor));
        }
        worst
    }
}

/// Everything needed to create a body.
#[derive(Clone)]
pub struct BodySettings {
    pub shape: Arc<Shape>,
    pub motion_type: MotionType,
    pub object_layer: ObjectLayer,
    pub position: Vec3,
    pub rotation: Quat,
    pub friction: f32,
    pub restitution: f32,
    /// Target mass; inertia is scaled from the shape's density-1 inertia.
    pub mass: Option<f32>,
    /// Full override, required for dynamic mesh bodies.
    pub mass_properties_override: Option<MassProperties>,
    pub collision_group: u32,
    pub collision_mask: u32,
    pub user_data: u64,
    pub allowed_dofs: Dof,
    pub motion_quality: MotionQuality,
    pub allow_sleeping: bool,
    pub gravity_factor: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
}

impl BodySettings {
    pub fn new(shape: Arc<Shape>, motion_type: MotionType, object_layer: ObjectLayer) -> Self {
        Self {
            shape,
            motion_type,
            object_layer,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            friction: 0.5,
            restitution: 0.0,
            mass: None,
            mass_properties_override: None,
            collision_group: 1,
            collision_mask: u32::MAX,
            user_data: 0,
            allowed_dofs: Dof::ALL,
            motion_quality: MotionQuality::Discrete,
            allow_sleeping: true,
            gravity_factor: 1.0,
            linear_damping: 0.05,
            angular_damping: 0.05,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }
}
