//! The physics world and its simulation step.
//!
//! `World::update` advances the simulation by a fixed time step, running a
//! number of sub-steps through the pipeline: apply forces, refresh the
//! broadphase, discover and collide pairs, build islands, run the
//! warm-started velocity solve, integrate, run the position solve, update
//! sleeping, and fire contact bookkeeping events.

use std::collections::HashSet;
use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::body::{Body, BodyId, BodySettings, Motion, MotionQuality, MotionType};
use crate::broadphase::BroadPhase;
use crate::collide::{
    self, collide_shape_vs_shape, CastSettings, CollideArgs, CollideSettings,
};
use crate::constraint::part::SolverBody;
use crate::constraint::{Constraint, ConstraintId};
use crate::contact::{
    ContactCache, ContactListener, ContactManifold, ContactPoint, ContactSettings,
    ContactValidateResult,
};
use crate::layers::LayerConfig;
use crate::math;
use crate::query::ClosestCollector;
use crate::shape::{Pose, EMPTY_SUB_SHAPE_ID};
use crate::solver::{
    self, build_island_groups, ContactConstraint, Islands, SolveConfig, SolverContext,
};

/// Construction-time configuration of a [`World`].
#[derive(Debug, Clone)]
pub struct WorldSettings {
    pub gravity: Vec3,
    /// Sub-steps per `update` call.
    pub num_sub_steps: u32,
    pub num_velocity_steps: u32,
    pub num_position_steps: u32,
    /// Fraction of position error corrected per position iteration.
    pub baumgarte: f32,
    /// Fraction of last step's impulses re-applied at warm start.
    pub warm_start_ratio: f32,
    /// Penetration tolerated before the position solve reacts.
    pub penetration_slop: f32,
    /// Speculative contact margin: pairs separated by less than this
    /// produce (negative-depth) contacts.
    pub contact_max_separation: f32,
    /// Below this approach speed restitution is not applied.
    pub min_bounce_velocity: f32,
    /// Fat-AABB margin of the broadphase trees.
    pub broadphase_margin: f32,
    /// Distance a sleep test point may drift before the sleep timer
    /// resets.
    pub sleep_drift_threshold: f32,
    /// Seconds of stillness before a body sleeps.
    pub time_before_sleep: f32,
    /// Fixed time step used by [`World::tick`].
    pub fixed_time_step: f32,
    /// Sub-step budget of one `tick` call.
    pub max_steps_per_tick: u32,
    pub layers: LayerConfig,
}

impl Default for WorldSettings {
    fn default() -> Self {
        // A single broadphase layer and a single self-colliding object
        // layer; real applications configure their own.
        let mut layers = LayerConfig::new();
        let bp = layers.add_broadphase_layer();
        let layer = layers.add_object_layer(bp);
        layers.enable_collision(layer, layer);
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            num_sub_steps: 1,
            num_velocity_steps: 10,
            num_position_steps: 2,
            baumgarte: 0.2,
            warm_start_ratio: 0.8,
            penetration_slop: 0.005,
            contact_max_separation: 0.02,
            min_bounce_velocity: 1.0,
            broadphase_margin: 0.05,
            sleep_drift_threshold: 0.03,
            time_before_sleep: 0.5,
            fixed_time_step: 1.0 / 60.0,
            max_steps_per_tick: 4,
            layers,
        }
    }
}

/// Listener that ignores every event.
pub struct NoopListener;

impl ContactListener for NoopListener {}

/// A rigid-body simulation world.
pub struct World {
    settings: WorldSettings,
    bodies: hecs::World,
    broadphase: BroadPhase,
    contact_cache: ContactCache,
    constraints: Vec<Option<Constraint>>,
    free_constraints: Vec<u32>,
    step_count: u64,
    in_step: bool,
    accumulator: f64,
    ctx: SolverContext,
}

/// Immutable borrow of a body.
pub struct BodyRef<'a>(hecs::Ref<'a, Body>);

impl std::ops::Deref for BodyRef<'_> {
    type Target = Body;

    fn deref(&self) -> &Body {
        &self.0
    }
}

/// Immutable borrow of a body's motion state.
pub struct MotionRef<'a>(hecs::Ref<'a, Motion>);

impl std::ops::Deref for MotionRef<'_> {
    type Target = Motion;

    fn deref(&self) -> &Motion {
        &self.0
    }
}

impl World {
    pub fn new(settings: WorldSettings) -> Self {
        let broadphase = BroadPhase::new(
            settings.layers.num_broadphase_layers(),
            settings.broadphase_margin,
        );
        Self {
            settings,
            bodies: hecs::World::new(),
            broadphase,
            contact_cache: ContactCache::new(),
            constraints: Vec::new(),
            free_constraints: Vec::new(),
            step_count: 0,
            in_step: false,
            accumulator: 0.0,
            ctx: SolverContext::new(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    #[inline]
    pub fn layers(&self) -> &LayerConfig {
        &self.settings.layers
    }

    #[inline]
    pub fn gravity(&self) -> Vec3 {
        self.settings.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        self.settings.gravity = gravity;
    }

    #[inline]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    #[inline]
    pub(crate) fn broadphase(&self) -> &BroadPhase {
        &self.broadphase
    }

    #[inline]
    pub(crate) fn bodies(&self) -> &hecs::World {
        &self.bodies
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len() as usize
    }

    /// Create a body from its settings.
    ///
    /// Caller bugs (invalid layer, non-unit rotation, a dynamic mesh body
    /// without a mass override, all DOFs locked, zero-volume dynamic
    /// shapes) are fatal assertions.
    pub fn create_body(&mut self, settings: &BodySettings) -> BodyId {
        assert!(!self.in_step, "world mutation during update");
        assert!(
            (settings.object_layer.0 as usize) < self.settings.layers.num_object_layers(),
            "unknown object layer"
        );
        assert!(
            (settings.rotation.length() - 1.0).abs() < 1.0e-3,
            "body rotation must be a unit quaternion"
        );

        let is_dynamic = settings.motion_type == MotionType::Dynamic;
        if is_dynamic {
            assert!(
                !settings.allowed_dofs.is_empty(),
                "a dynamic body needs at least one degree of freedom"
            );
            assert!(
                !settings.shape.contains_mesh() || settings.mass_properties_override.is_some(),
                "triangle meshes are static-only unless mass properties are supplied"
            );
        }

        let mut body = Body {
            position: settings.position,
            rotation: settings.rotation.normalize(),
            shape: Arc::clone(&settings.shape),
            object_layer: settings.object_layer,
            motion_type: settings.motion_type,
            friction: settings.friction,
            restitution: settings.restitution,
            collision_group: settings.collision_group,
            collision_mask: settings.collision_mask,
            user_data: settings.user_data,
            center_of_mass_local: settings.shape.center_of_mass(),
            world_aabb: crate::aabb::Aabb::INVALID,
            active: settings.motion_type != MotionType::Static,
        };
        body.refresh_world_aabb();
        let tight = body.world_aabb;
        let bp_layer = self.settings.layers.broadphase_layer_of(settings.object_layer);

        let id = if settings.motion_type == MotionType::Static {
            self.bodies.spawn((body,))
        } else {
            let mut motion = Motion::new(settings.motion_quality, settings.allowed_dofs);
            motion.linear_damping = settings.linear_damping;
            motion.angular_damping = settings.angular_damping;
            motion.gravity_factor = settings.gravity_factor;
            motion.allow_sleeping = settings.allow_sleeping;

            if is_dynamic {
                let mut properties = settings
                    .mass_properties_override
                    .unwrap_or_else(|| settings.shape.mass_properties());
                if let Some(mass) = settings.mass {
                    properties = properties.scaled_to_mass(mass);
                }
                assert!(
                    properties.mass > 0.0 || !settings.allowed_dofs.intersects(crate::body::Dof::TRANSLATION),
                    "a dynamic body with translation degrees of freedom needs mass"
                );
                motion.set_mass_properties(&properties);
            }

            let radius = settings
                .shape
                .local_aabb()
                .half_extents()
                .max_element()
                .clamp(0.05, 10.0);
            motion.sleep_offsets = [Vec3::ZERO, Vec3::X * radius, Vec3::Y * radius];
            motion.reset_sleep_test(
                settings.position,
                settings.rotation,
                settings.shape.center_of_mass(),
            );
            motion.prev_position = settings.position;
            motion.prev_rotation = settings.rotation;

            self.bodies.spawn((body, motion))
        };

        self.broadphase.add_body(bp_layer, id, tight);
        id
    }

    /// Remove a body; constraints referencing it are removed as well.
    pub fn remove_body(&mut self, id: BodyId) {
        assert!(!self.in_step, "world mutation during update");
        let bp_layer = {
            let body = self.bodies.get::<&Body>(id).expect("unknown body");
            self.settings.layers.broadphase_layer_of(body.object_layer)
        };
        self.broadphase.remove_body(bp_layer, id);
        self.contact_cache.forget_body(id);
        for slot in self.constraints.iter_mut() {
            if let Some(c) = slot {
                if c.body_a() == id || c.body_b() == id {
                    *slot = None;
                }
            }
        }
        let _ = self.bodies.despawn(id);
    }

    #[inline]
    pub fn contains_body(&self, id: BodyId) -> bool {
        self.bodies.contains(id)
    }

    /// Borrow a body. Panics on an unknown id.
    pub fn body(&self, id: BodyId) -> BodyRef<'_> {
        BodyRef(self.bodies.get::<&Body>(id).expect("unknown body"))
    }

    pub fn try_body(&self, id: BodyId) -> Option<BodyRef<'_>> {
        self.bodies.get::<&Body>(id).ok().map(BodyRef)
    }

    /// Borrow a body's motion state (non-static bodies only).
    pub fn motion(&self, id: BodyId) -> Option<MotionRef<'_>> {
        self.bodies.get::<&Motion>(id).ok().map(MotionRef)
    }

    /// Reposition a body (forbidden during `update`).
    pub fn set_position(&mut self, id: BodyId, position: Vec3, rotation: Quat) {
        assert!(!self.in_step, "world mutation during update");
        assert!(
            (rotation.length() - 1.0).abs() < 1.0e-3,
            "rotation must be a unit quaternion"
        );
        let (tight, bp_layer) = {
            let mut body = self.bodies.get::<&mut Body>(id).expect("unknown body");
            body.position = position;
            body.rotation = rotation.normalize();
            body.refresh_world_aabb();
            (
                body.world_aabb,
                self.settings.layers.broadphase_layer_of(body.object_layer),
            )
        };
        if let Ok(mut motion) = self.bodies.get::<&mut Motion>(id) {
            motion.prev_position = position;
            motion.prev_rotation = rotation;
        }
        self.broadphase.update_body(bp_layer, id, tight);
        self.activate(id);
    }

    /// Drive a kinematic body so the integrator carries it exactly to the
    /// target placement over `dt`.
    pub fn move_kinematic(&mut self, id: BodyId, target_position: Vec3, target_rotation: Quat, dt: f32) {
        assert!(!self.in_step, "world mutation during update");
        assert!(dt > 0.0, "move_kinematic needs a positive dt");
        let (position, rotation) = {
            let body = self.bodies.get::<&Body>(id).expect("unknown body");
            assert!(
                body.motion_type == MotionType::Kinematic,
                "move_kinematic on a non-kinematic body"
            );
            (body.position, body.rotation)
        };
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("kinematic body");
        motion.set_linear_velocity((target_position - position) / dt);
        motion.set_angular_velocity(math::rotation_delta(rotation, target_rotation) / dt);
        drop(motion);
        self.activate(id);
    }

    pub fn set_linear_velocity(&mut self, id: BodyId, velocity: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        motion.set_linear_velocity(velocity);
        drop(motion);
        self.activate(id);
    }

    pub fn set_angular_velocity(&mut self, id: BodyId, velocity: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        motion.set_angular_velocity(velocity);
        drop(motion);
        self.activate(id);
    }

    /// Accumulate a force (applied at the COM) for the next step.
    pub fn add_force(&mut self, id: BodyId, force: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        motion.force += force;
        drop(motion);
        self.activate(id);
    }

    pub fn add_torque(&mut self, id: BodyId, torque: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        motion.torque += torque;
        drop(motion);
        self.activate(id);
    }

    /// Apply an instantaneous impulse at the COM.
    pub fn add_impulse(&mut self, id: BodyId, impulse: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        let v = motion.linear_velocity + impulse * motion.inv_mass;
        motion.set_linear_velocity(v);
        drop(motion);
        self.activate(id);
    }

    /// Apply an impulse at a world-space point.
    pub fn add_impulse_at(&mut self, id: BodyId, impulse: Vec3, point: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let com = self.body(id).center_of_mass();
        let rotation = self.body(id).rotation;
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        let v = motion.linear_velocity + impulse * motion.inv_mass;
        motion.set_linear_velocity(v);
        let torque = (point - com).cross(impulse);
        let w = motion.angular_velocity + motion.multiply_world_inverse_inertia(rotation, torque);
        motion.set_angular_velocity(w);
        drop(motion);
        self.activate(id);
    }

    pub fn add_angular_impulse(&mut self, id: BodyId, impulse: Vec3) {
        assert!(!self.in_step, "world mutation during update");
        let rotation = self.body(id).rotation;
        let mut motion = self.bodies.get::<&mut Motion>(id).expect("non-static body");
        let w = motion.angular_velocity + motion.multiply_world_inverse_inertia(rotation, impulse);
        motion.set_angular_velocity(w);
        drop(motion);
        self.activate(id);
    }

    /// Wake a body (and reset its sleep timer).
    pub fn activate(&mut self, id: BodyId) {
        let Ok(mut body) = self.bodies.get::<&mut Body>(id) else {
            return;
        };
        if body.motion_type == MotionType::Static {
            return;
        }
        body.active = true;
        let (position, rotation, com_local) =
            (body.position, body.rotation, body.center_of_mass_local);
        drop(body);
        if let Ok(mut motion) = self.bodies.get::<&mut Motion>(id) {
            motion.reset_sleep_test(position, rotation, com_local);
        }
    }

    /// Put a body to sleep immediately.
    pub fn deactivate(&mut self, id: BodyId) {
        assert!(!self.in_step, "world mutation during update");
        if let Ok(mut body) = self.bodies.get::<&mut Body>(id) {
            if body.motion_type != MotionType::Static {
                body.active = false;
            }
        }
        if let Ok(mut motion) = self.bodies.get::<&mut Motion>(id) {
            motion.linear_velocity = Vec3::ZERO;
            motion.angular_velocity = Vec3::ZERO;
        }
    }

    pub fn is_active(&self, id: BodyId) -> bool {
        self.try_body(id).map_or(false, |b| b.active)
    }

    /// Add a user constraint. The referenced bodies must exist.
    pub fn add_constraint(&mut self, settings: impl Into<ConstraintSettings>) -> ConstraintId {
        assert!(!self.in_step, "world mutation during update");
        let settings = settings.into();
        let (id_a, id_b) = settings.body_ids();
        assert!(id_a != id_b, "a constraint needs two distinct bodies");
        let constraint = {
            let body_a = self.bodies.get::<&Body>(id_a).expect("unknown body A");
            let body_b = self.bodies.get::<&Body>(id_b).expect("unknown body B");
            settings.build(&body_a, &body_b)
        };
        let slot = match self.free_constraints.pop() {
            Some(slot) => {
                self.constraints[slot as usize] = Some(constraint);
                slot
            }
            None => {
                self.constraints.push(Some(constraint));
                self.constraints.len() as u32 - 1
            }
        };
        self.activate(id_a);
        self.activate(id_b);
        ConstraintId(slot)
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) {
        assert!(!self.in_step, "world mutation during update");
        let slot = id.0 as usize;
        assert!(
            slot < self.constraints.len() && self.constraints[slot].is_some(),
            "unknown constraint"
        );
        self.constraints[slot] = None;
        self.free_constraints.push(id.0);
    }

    pub fn constraint(&self, id: ConstraintId) -> &Constraint {
        self.constraints
            .get(id.0 as usize)
            .and_then(|c| c.as_ref())
            .expect("unknown constraint")
    }

    pub fn constraint_mut(&mut self, id: ConstraintId) -> &mut Constraint {
        assert!(!self.in_step, "world mutation during update");
        self.constraints
            .get_mut(id.0 as usize)
            .and_then(|c| c.as_mut())
            .expect("unknown constraint")
    }

    /// Advance the world by `dt` seconds without contact events.
    pub fn update(&mut self, dt: f32) {
        self.update_with_listener(dt, &mut NoopListener);
    }

    /// Advance the world by `dt` seconds, split over the configured number
    /// of sub-steps. Events fire on `listener` in pair-discovery order.
    pub fn update_with_listener(&mut self, dt: f32, listener: &mut dyn ContactListener) {
        assert!(!self.in_step, "re-entrant world update");
        assert!(dt > 0.0, "update needs a positive dt");
        self.in_step = true;
        let h = dt / self.settings.num_sub_steps.max(1) as f32;
        for _ in 0..self.settings.num_sub_steps.max(1) {
            self.step_count += 1;
            self.sub_step(h, listener);
        }
        self.in_step = false;
    }

    /// Fixed-timestep accumulator over `update`, clamped to avoid the
    /// spiral of death.
    pub fn tick(&mut self, real_dt: f64, listener: &mut dyn ContactListener) {
        self.accumulator += real_dt;
        let step = self.settings.fixed_time_step as f64;
        let mut steps = 0;
        while self.accumulator >= step && steps < self.settings.max_steps_per_tick {
            self.update_with_listener(step as f32, listener);
            self.accumulator -= step;
            steps += 1;
        }
        if self.accumulator > step * self.settings.max_steps_per_tick as f64 {
            self.accumulator = 0.0;
        }
    }

    /// Bodies in ascending id order, optionally only the active ones.
    fn collect_bodies(&self, only_active_non_static: bool) -> Vec<BodyId> {
        let mut ids: Vec<BodyId> = self
            .bodies
            .query::<&Body>()
            .iter()
            .filter(|(_, body)| {
                !only_active_non_static || (body.active && body.motion_type != MotionType::Static)
            })
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn sub_step(&mut self, h: f32, listener: &mut dyn ContactListener) {
        let step = self.step_count;

        // 1. Forces, gravity, gyroscopic torque.
        self.apply_forces(h);

        // 2. Broadphase refresh for moved bodies.
        let active = self.collect_bodies(true);
        for &id in &active {
            let (tight, bp_layer) = {
                let mut body = self.bodies.get::<&mut Body>(id).unwrap();
                body.refresh_world_aabb();
                (
                    body.world_aabb,
                    self.settings.layers.broadphase_layer_of(body.object_layer),
                )
            };
            self.broadphase.update_body(bp_layer, id, tight);
        }

        // Linear-cast bodies: clamp this sub-step's position to the first
        // time of impact along last sub-step's motion.
        self.apply_linear_cast(&active);

        // 3. Pair discovery and narrow phase.
        let pairs = self.collect_pairs(&active, listener);
        let mut manifolds: Vec<(ContactManifold, ContactSettings)> = Vec::new();
        self.collide_pairs(&pairs, listener, step, &mut manifolds);

        // 4-5. Gather solver bodies, islands, velocity solve.
        let mut solver_bodies_involved: Vec<BodyId> = active.clone();
        for (manifold, _) in &manifolds {
            solver_bodies_involved.push(manifold.body_a);
            solver_bodies_involved.push(manifold.body_b);
        }
        let mut user: Vec<(usize, usize, usize)> = Vec::new();
        for (slot, constraint) in self.constraints.iter().enumerate() {
            if let Some(c) = constraint {
                if c.is_enabled() {
                    solver_bodies_involved.push(c.body_a());
                    solver_bodies_involved.push(c.body_b());
                    user.push((slot, 0, 0));
                }
            }
        }
        solver_bodies_involved.sort_unstable();
        solver_bodies_involved.dedup();

        self.ctx.clear();
        for &id in &solver_bodies_involved {
            let Ok(body) = self.bodies.get::<&Body>(id) else {
                continue;
            };
            let motion = self.bodies.get::<&Motion>(id).ok();
            let solver_body = match motion {
                Some(motion) => SolverBody {
                    id,
                    motion_type: body.motion_type,
                    com: body.center_of_mass(),
                    rotation: body.rotation,
                    linear_velocity: motion.linear_velocity,
                    angular_velocity: motion.angular_velocity,
                    inv_mass: motion.inv_mass,
                    inv_inertia: motion.inverse_inertia_for_rotation(body.rotation),
                    translation_mask: motion.allowed_dofs.translation_mask(),
                    rotation_mask: motion.allowed_dofs.rotation_mask(),
                },
                None => SolverBody {
                    id,
                    motion_type: MotionType::Static,
                    com: body.center_of_mass(),
                    rotation: body.rotation,
                    linear_velocity: Vec3::ZERO,
                    angular_velocity: Vec3::ZERO,
                    inv_mass: 0.0,
                    inv_inertia: glam::Mat3::ZERO,
                    translation_mask: Vec3::ZERO,
                    rotation_mask: Vec3::ZERO,
                },
            };
            self.ctx.push(solver_body);
        }

        // Resolve user constraint body indices; skip constraints whose
        // bodies are inactive or gone.
        let mut resolved_user: Vec<(usize, usize, usize)> = Vec::new();
        for (slot, _, _) in user {
            let (id_a, id_b) = {
                let c = self.constraints[slot].as_ref().unwrap();
                (c.body_a(), c.body_b())
            };
            let (Some(idx_a), Some(idx_b)) = (self.ctx.index(id_a), self.ctx.index(id_b))
            else {
                continue;
            };
            let active_a = self.ctx.bodies[idx_a].is_dynamic() && self.is_active(id_a);
            let active_b = self.ctx.bodies[idx_b].is_dynamic() && self.is_active(id_b);
            if !active_a && !active_b {
                continue;
            }
            // An active partner keeps the other side awake.
            if active_a != active_b {
                let sleeping = if active_a { id_b } else { id_a };
                if self
                    .bodies
                    .get::<&Body>(sleeping)
                    .map(|b| b.motion_type == MotionType::Dynamic)
                    .unwrap_or(false)
                {
                    self.activate(sleeping);
                }
            }
            resolved_user.push((slot, idx_a, idx_b));
        }

        let config = SolveConfig {
            num_velocity_steps: self.settings.num_velocity_steps,
            num_position_steps: self.settings.num_position_steps,
            warm_start_ratio: self.settings.warm_start_ratio,
            baumgarte: self.settings.baumgarte,
            penetration_slop: self.settings.penetration_slop,
            min_bounce_velocity: self.settings.min_bounce_velocity,
        };

        let mut contacts: Vec<ContactConstraint> = Vec::new();
        for (i, (manifold, settings)) in manifolds.iter().enumerate() {
            let (Some(idx_a), Some(idx_b)) = (
                self.ctx.index(manifold.body_a),
                self.ctx.index(manifold.body_b),
            ) else {
                continue;
            };
            contacts.push(ContactConstraint::prepare(
                manifold,
                i,
                settings,
                &mut self.ctx,
                idx_a,
                idx_b,
                &config,
                h,
            ));
        }

        for &(slot, idx_a, idx_b) in &resolved_user {
            let c = self.constraints[slot].as_mut().unwrap();
            c.set_solver_indices(idx_a, idx_b);
            c.prepare(&mut self.ctx.bodies, h);
        }

        let mut islands = Islands::new(self.ctx.bodies.len());
        for contact in &contacts {
            islands.link(&self.ctx.bodies, contact.idx_a, contact.idx_b);
        }
        for &(_, idx_a, idx_b) in &resolved_user {
            islands.link(&self.ctx.bodies, idx_a, idx_b);
        }
        let groups = {
            let ctx = &self.ctx;
            let bodies = &self.bodies;
            build_island_groups(
                &mut islands,
                ctx,
                &contacts,
                &resolved_user,
                |i| {
                    bodies
                        .get::<&Motion>(ctx.bodies[i].id)
                        .map(|m| m.num_velocity_steps_override)
                        .unwrap_or(0)
                },
                |i| {
                    bodies
                        .get::<&Motion>(ctx.bodies[i].id)
                        .map(|m| m.num_position_steps_override)
                        .unwrap_or(0)
                },
                config.num_velocity_steps,
                config.num_position_steps,
            )
        };

        solver::solve_velocity(
            &mut self.ctx,
            &mut contacts,
            &mut self.constraints,
            &resolved_user,
            &groups,
            &config,
            h,
        );

        // 6. Integrate positions inside the solver snapshot.
        for body in self.ctx.bodies.iter_mut() {
            if body.motion_type == MotionType::Static {
                continue;
            }
            body.com += body.linear_velocity * h;
            body.rotation = math::integrate_orientation(body.rotation, body.angular_velocity, h);
        }

        // 7. Position (Baumgarte) solve.
        solver::solve_position(
            &mut self.ctx,
            &mut contacts,
            &mut self.constraints,
            &resolved_user,
            &groups,
            &config,
        );

        // Write the snapshot back to the bodies (ascending id order is the
        // order of `ctx.bodies`).
        for solver_body in &self.ctx.bodies {
            if solver_body.motion_type == MotionType::Static {
                continue;
            }
            let mut body = self.bodies.get::<&mut Body>(solver_body.id).unwrap();
            let rotation = solver_body.rotation.normalize();
            body.rotation = rotation;
            body.position = solver_body.com - rotation * body.center_of_mass_local;
            let position = body.position;
            drop(body);
            let mut motion = self.bodies.get::<&mut Motion>(solver_body.id).unwrap();
            motion.set_linear_velocity(solver_body.linear_velocity);
            motion.set_angular_velocity(solver_body.angular_velocity);
            motion.prev_position = position;
            motion.prev_rotation = rotation;
        }

        // 8. Sleeping, per island.
        self.update_sleeping(&groups, h);

        // 9. Contact bookkeeping: persist solved impulses, evict stale
        // contacts.
        for contact in &contacts {
            contact.store_impulses(&mut manifolds[contact.manifold_index].0);
        }
        for (manifold, _) in &manifolds {
            self.contact_cache.store(manifold, step);
        }
        self.contact_cache
            .evict_stale(step, |key| listener.on_contact_removed(key));
    }

    fn apply_forces(&mut self, h: f32) {
        let gravity = self.settings.gravity;
        for (_, (body, motion)) in self.bodies.query_mut::<(&Body, &mut Motion)>() {
            if !body.active || body.motion_type != MotionType::Dynamic {
                continue;
            }
            let mut v = motion.linear_velocity
                + h * (motion.gravity_factor * gravity + motion.inv_mass * motion.force);
            v *= (1.0 - h * motion.linear_damping).max(0.0);
            motion.set_linear_velocity(v);

            let torque_response =
                motion.multiply_world_inverse_inertia(body.rotation, motion.torque);
            let mut w = motion.angular_velocity + h * torque_response;
            w *= (1.0 - h * motion.angular_damping).max(0.0);
            w = apply_gyroscopic_torque(motion, body.rotation, w, h);
            motion.set_angular_velocity(w);

            motion.force = Vec3::ZERO;
            motion.torque = Vec3::ZERO;
        }
    }

    /// Sweep linear-cast bodies along last sub-step's motion and clamp
    /// their position to the first impact so fast bodies cannot tunnel.
    fn apply_linear_cast(&mut self, active: &[BodyId]) {
        for &id in active {
            let (shape, prev_position, prev_rotation, displacement, layer) = {
                let Ok(body) = self.bodies.get::<&Body>(id) else {
                    continue;
                };
                let Ok(motion) = self.bodies.get::<&Motion>(id) else {
                    continue;
                };
                if motion.quality != MotionQuality::LinearCast
                    || body.motion_type != MotionType::Dynamic
                {
                    continue;
                }
                let displacement = body.position - motion.prev_position;
                // Only worth sweeping when the motion is large relative to
                // the shape.
                let extent = body.shape.local_aabb().half_extents().min_element();
                if displacement.length() < extent {
                    continue;
                }
                (
                    Arc::clone(&body.shape),
                    motion.prev_position,
                    motion.prev_rotation,
                    displacement,
                    body.object_layer,
                )
            };

            let filter = crate::query::QueryFilter::from_body(&self.settings.layers, &self.body(id));
            let mut collector: ClosestCollector<crate::query::WorldShapeCastHit> =
                ClosestCollector::new();
            let cast_settings = CastSettings::default();
            self.cast_shape_filtered(
                &shape,
                &Pose::new(prev_position, prev_rotation),
                displacement,
                &cast_settings,
                &filter,
                &mut collector,
                Some(id),
            );
            if let Some(hit) = collector.hit {
                if hit.cast.fraction < 1.0 {
                    let clamped = prev_position + displacement * hit.cast.fraction;
                    let mut body = self.bodies.get::<&mut Body>(id).unwrap();
                    body.position = clamped;
                    body.refresh_world_aabb();
                    let tight = body.world_aabb;
                    drop(body);
                    let bp = self.settings.layers.broadphase_layer_of(layer);
                    self.broadphase.update_body(bp, id, tight);
                }
            }
        }
    }

    /// Candidate pairs from the broadphase, in deterministic discovery
    /// order, filtered by layers, groups, and the pair-validate callback.
    fn collect_pairs(
        &mut self,
        active: &[BodyId],
        listener: &mut dyn ContactListener,
    ) -> Vec<(BodyId, BodyId)> {
        let mut pairs = Vec::new();
        let mut seen: HashSet<(BodyId, BodyId)> = HashSet::new();

        for &a in active {
            let (aabb_a, layer_a, group_a, mask_a, bp_a, a_dynamic) = {
                let body = self.bodies.get::<&Body>(a).unwrap();
                (
                    body.world_aabb
                        .expanded(self.settings.contact_max_separation),
                    body.object_layer,
                    body.collision_group,
                    body.collision_mask,
                    self.settings.layers.broadphase_layer_of(body.object_layer),
                    body.motion_type == MotionType::Dynamic,
                )
            };

            for tree_layer in 0..self.broadphase.num_layers() {
                let tree_layer = crate::layers::BroadPhaseLayer(tree_layer as u8);
                if !self
                    .settings
                    .layers
                    .broadphase_layers_collide(bp_a, tree_layer)
                {
                    continue;
                }
                let mut candidates = Vec::new();
                self.broadphase
                    .tree(tree_layer)
                    .for_each_in_aabb(&aabb_a, &mut |b| {
                        if b != a {
                            candidates.push(b);
                        }
                        true
                    });
                for b in candidates {
                    let Ok(body_b) = self.bodies.get::<&Body>(b) else {
                        continue;
                    };
                    // Each two-active pair is found twice; keep one order.
                    let b_active = body_b.active && body_b.motion_type != MotionType::Static;
                    if b_active && b < a {
                        continue;
                    }
                    // At least one side must be dynamic.
                    if !a_dynamic && body_b.motion_type != MotionType::Dynamic {
                        continue;
                    }
                    if !self
                        .settings
                        .layers
                        .object_layers_collide(layer_a, body_b.object_layer)
                    {
                        continue;
                    }
                    if (mask_a & body_b.collision_group) == 0
                        || (group_a & body_b.collision_mask) == 0
                    {
                        continue;
                    }
                    drop(body_b);
                    let key = if a < b { (a, b) } else { (b, a) };
                    if !seen.insert(key) {
                        continue;
                    }
                    if !listener.on_body_pair_validate(a, b) {
                        continue;
                    }
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    /// Narrow phase over the candidate pairs, producing manifolds and
    /// firing the contact listener pipeline.
    fn collide_pairs(
        &mut self,
        pairs: &[(BodyId, BodyId)],
        listener: &mut dyn ContactListener,
        step: u64,
        manifolds: &mut Vec<(ContactManifold, ContactSettings)>,
    ) {
        let collide_settings = CollideSettings {
            max_separation: self.settings.contact_max_separation,
            collect_faces: true,
            ..Default::default()
        };

        for &(a, b) in pairs {
            if self.contact_cache.pair_disabled(a, b, step) {
                continue;
            }
            let (shape_a, pose_a, friction_a, restitution_a) = {
                let body = self.bodies.get::<&Body>(a).unwrap();
                (
                    Arc::clone(&body.shape),
                    body.pose(),
                    body.friction,
                    body.restitution,
                )
            };
            let (shape_b, pose_b, friction_b, restitution_b) = {
                let body = self.bodies.get::<&Body>(b).unwrap();
                (
                    Arc::clone(&body.shape),
                    body.pose(),
                    body.friction,
                    body.restitution,
                )
            };

            let mut collector = crate::query::AllCollector::default();
            collide_shape_vs_shape(
                &CollideArgs {
                    shape_a: &shape_a,
                    pose_a,
                    shape_b: &shape_b,
                    pose_b,
                    sub_shape_a: EMPTY_SUB_SHAPE_ID,
                    sub_shape_b: EMPTY_SUB_SHAPE_ID,
                    settings: &collide_settings,
                },
                &mut collector,
            );
            if collector.hits.is_empty() {
                continue;
            }

            let mut accept_all = false;
            let mut clipped = Vec::new();
            for result in &collector.hits {
                let mut manifold = ContactManifold {
                    body_a: a,
                    body_b: b,
                    sub_shape_a: result.sub_shape_a,
                    sub_shape_b: result.sub_shape_b,
                    normal: result.normal,
                    points: Vec::new(),
                };
                collide::convex::clip_faces(
                    &result.face_a,
                    &result.face_b,
                    result.normal,
                    self.settings.contact_max_separation,
                    &mut clipped,
                );
                if clipped.is_empty() {
                    manifold.points.push(ContactPoint::new(
                        result.point_a,
                        result.point_b,
                        result.depth,
                    ));
                } else {
                    for &(on_a, on_b, depth) in &clipped {
                        manifold.points.push(ContactPoint::new(on_a, on_b, depth));
                    }
                }

                if !accept_all {
                    let verdict = {
                        let body_a = self.bodies.get::<&Body>(a).unwrap();
                        let body_b = self.bodies.get::<&Body>(b).unwrap();
                        listener.on_contact_validate(&body_a, &body_b, &manifold)
                    };
                    match verdict {
                        ContactValidateResult::RejectContact => continue,
                        ContactValidateResult::AcceptContact => {}
                        ContactValidateResult::AcceptAll => accept_all = true,
                        ContactValidateResult::AcceptAllAndDisablePair => {
                            accept_all = true;
                            self.contact_cache.disable_pair(a, b, step);
                        }
                    }
                }

                // A touching pair keeps both bodies awake.
                self.wake_for_contact(a, b);

                let mut settings = ContactSettings {
                    friction: (friction_a * friction_b).sqrt(),
                    restitution: restitution_a.max(restitution_b),
                    ..Default::default()
                };
                let persisted = self.contact_cache.warm_start(&mut manifold, step);
                if persisted {
                    listener.on_contact_persisted(a, b, &manifold, &mut settings);
                } else {
                    listener.on_contact_added(a, b, &manifold, &mut settings);
                }
                manifolds.push((manifold, settings));
            }
        }
    }

    /// Contacts with an active body wake sleeping partners.
    fn wake_for_contact(&mut self, a: BodyId, b: BodyId) {
        let active_a = self.is_active(a);
        let active_b = self.is_active(b);
        if active_a && !active_b {
            self.activate(b);
        } else if active_b && !active_a {
            self.activate(a);
        }
    }

    fn update_sleeping(&mut self, groups: &[solver::IslandGroup], h: f32) {
        let threshold = self.settings.sleep_drift_threshold;
        let time_before_sleep = self.settings.time_before_sleep;

        for group in groups {
            let mut island_can_sleep = !group.members.is_empty();
            for &member in &group.members {
                let id = self.ctx.bodies[member].id;
                let Ok(body) = self.bodies.get::<&Body>(id) else {
                    island_can_sleep = false;
                    continue;
                };
                let (position, rotation, com_local, active) = (
                    body.position,
                    body.rotation,
                    body.center_of_mass_local,
                    body.active,
                );
                drop(body);
                if !active {
                    continue;
                }
                let mut motion = self.bodies.get::<&mut Motion>(id).unwrap();
                if !motion.allow_sleeping {
                    island_can_sleep = false;
                    continue;
                }
                let drift = motion.sleep_test_drift(position, rotation, com_local);
                if drift > threshold {
                    motion.reset_sleep_test(position, rotation, com_local);
                    island_can_sleep = false;
                } else {
                    motion.sleep_timer += h;
                    if motion.sleep_timer < time_before_sleep {
                        island_can_sleep = false;
                    }
                }
            }

            if island_can_sleep {
                for &member in &group.members {
                    let id = self.ctx.bodies[member].id;
                    if let Ok(mut body) = self.bodies.get::<&mut Body>(id) {
                        body.active = false;
                    }
                    if let Ok(mut motion) = self.bodies.get::<&mut Motion>(id) {
                        motion.linear_velocity = Vec3::ZERO;
                        motion.angular_velocity = Vec3::ZERO;
                    }
                }
            }
        }
    }
}

/// Gyroscopic torque in body space with angular-momentum renormalisation,
/// keeping tumbling bodies (the Dzhanibekov effect) energy-stable.
fn apply_gyroscopic_torque(motion: &Motion, rotation: Quat, w: Vec3, h: f32) -> Vec3 {
    let inv = motion.inv_inertia_diagonal;
    if inv.min_element() <= 0.0 {
        return w;
    }
    let to_principal = rotation * motion.inertia_rotation;
    let w_local = to_principal.conjugate() * w;
    let momentum = w_local / inv;
    let momentum_len = momentum.length();
    if momentum_len < 1.0e-9 {
        return w;
    }
    // Euler's equations: I dw/dt = (I w) x w.
    let w_new = w_local + h * (inv * momentum.cross(w_local));
    let momentum_new = w_new / inv;
    let scale = momentum_len / momentum_new.length().max(1.0e-12);
    to_principal * (w_new * scale)
}

/// Settings for any of the constraint families, used by
/// [`World::add_constraint`].
pub enum ConstraintSettings {
    Point(crate::constraint::PointConstraintSettings),
    Distance(crate::constraint::DistanceConstraintSettings),
    Hinge(crate::constraint::HingeConstraintSettings),
    Slider(crate::constraint::SliderConstraintSettings),
    Fixed(crate::constraint::FixedConstraintSettings),
    SwingTwist(crate::constraint::SwingTwistConstraintSettings),
}

impl ConstraintSettings {
    fn body_ids(&self) -> (BodyId, BodyId) {
        match self {
            ConstraintSettings::Point(s) => (s.body_a, s.body_b),
            ConstraintSettings::Distance(s) => (s.body_a, s.body_b),
            ConstraintSettings::Hinge(s) => (s.body_a, s.body_b),
            ConstraintSettings::Slider(s) => (s.body_a, s.body_b),
            ConstraintSettings::Fixed(s) => (s.body_a, s.body_b),
            ConstraintSettings::SwingTwist(s) => (s.body_a, s.body_b),
        }
    }

    fn build(&self, body_a: &Body, body_b: &Body) -> Constraint {
        match self {
            ConstraintSettings::Point(s) => {
                Constraint::Point(crate::constraint::PointConstraint::new(s, body_a, body_b))
            }
            ConstraintSettings::Distance(s) => Constraint::Distance(
                crate::constraint::DistanceConstraint::new(s, body_a, body_b),
            ),
            ConstraintSettings::Hinge(s) => {
                Constraint::Hinge(crate::constraint::HingeConstraint::new(s, body_a, body_b))
            }
            ConstraintSettings::Slider(s) => {
                Constraint::Slider(crate::constraint::SliderConstraint::new(s, body_a, body_b))
            }
            ConstraintSettings::Fixed(s) => {
                Constraint::Fixed(crate::constraint::FixedConstraint::new(s, body_a, body_b))
            }
            ConstraintSettings::SwingTwist(s) => Constraint::SwingTwist(
                crate::constraint::SwingTwistConstraint::new(s, body_a, body_b),
            ),
        }
    }
}

impl From<crate::constraint::PointConstraintSettings> for ConstraintSettings {
    fn from(s: crate::constraint::PointConstraintSettings) -> Self {
        ConstraintSettings::Point(s)
    }
}

impl From<crate::constraint::DistanceConstraintSettings> for ConstraintSettings {
    fn from(s: crate::constraint::DistanceConstraintSettings) -> Self {
        ConstraintSettings::Distance(s)
    }
}

impl From<crate::constraint::HingeConstraintSettings> for ConstraintSettings {
    fn from(s: crate::constraint::HingeConstraintSettings) -> Self {
        ConstraintSettings::Hinge(s)
    }
}

impl From<crate::constraint::SliderConstraintSettings> for ConstraintSettings {
    fn from(s: crate::constraint::SliderConstraintSettings) -> Self {
        ConstraintSettings::Slider(s)
    }
}

impl From<crate::constraint::FixedConstraintSettings> for ConstraintSettings {
    fn from(s: crate::constraint::FixedConstraintSettings) -> Self {
        ConstraintSettings::Fixed(s)
    }
}

impl From<crate::constraint::SwingTwistConstraintSettings> for ConstraintSettings {
    fn from(s: crate::constraint::SwingTwistConstraintSettings) -> Self {
        ConstraintSettings::SwingTwist(s)
    }
}

