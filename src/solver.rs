//! Iterative constraint solver: contact constraints, islands, and the
//! warm-started Gauss-Seidel velocity/position passes.

use std::collections::HashMap;

use glam::Vec3;

use crate::body::BodyId;
use crate::constraint::part::{two_bodies, AxisConstraintPart, SolverBody};
use crate::constraint::Constraint;
use crate::contact::{ContactManifold, ContactSettings};
use crate::math;

/// Solver tuning taken from the world settings each sub-step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SolveConfig {
    pub num_velocity_steps: u32,
    pub num_position_steps: u32,
    pub warm_start_ratio: f32,
    pub baumgarte: f32,
    pub penetration_slop: f32,
    pub min_bounce_velocity: f32,
}

/// Dense snapshot of the bodies participating in a sub-step.
pub(crate) struct SolverContext {
    pub bodies: Vec<SolverBody>,
    pub index_of: HashMap<BodyId, usize>,
}

impl SolverContext {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            index_of: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
        self.index_of.clear();
    }

    pub fn push(&mut self, body: SolverBody) -> usize {
        let index = self.bodies.len();
        self.index_of.insert(body.id, index);
        self.bodies.push(body);
        index
    }

    #[inline]
    pub fn index(&self, id: BodyId) -> Option<usize> {
        self.index_of.get(&id).copied()
    }
}

/// One contact point inside a [`ContactConstraint`].
pub(crate) struct ContactPointConstraint {
    /// Contact points in body-local (COM-relative) space, re-evaluated by
    /// the position solve as the bodies move.
    local_a: Vec3,
    local_b: Vec3,
    normal_part: AxisConstraintPart,
    friction_parts: [AxisConstraintPart; 2],
}

/// Solver-side contact: one normal row plus two friction rows per point.
pub(crate) struct ContactConstraint {
    pub manifold_index: usize,
    pub idx_a: usize,
    pub idx_b: usize,
    normal: Vec3,
    tangents: [Vec3; 2],
    friction: f32,
    points: Vec<ContactPointConstraint>,
}

impl ContactConstraint {
    /// Build the rows for a manifold. `settings` carries the combined
    /// friction/restitution (possibly adjusted by the listener).
    pub fn prepare(
        manifold: &ContactManifold,
        manifold_index: usize,
        settings: &ContactSettings,
        ctx: &mut SolverContext,
        idx_a: usize,
        idx_b: usize,
        config: &SolveConfig,
        dt: f32,
    ) -> ContactConstraint {
        let (b1, b2) = two_bodies(&mut ctx.bodies, idx_a, idx_b);
        // Listener-requested mass scaling.
        let inv_mass_a = b1.inv_mass * settings.inv_mass_scale_a;
        let inv_mass_b = b2.inv_mass * settings.inv_mass_scale_b;
        let inv_inertia_a = b1.inv_inertia * settings.inv_inertia_scale_a;
        let inv_inertia_b = b2.inv_inertia * settings.inv_inertia_scale_b;
        let (saved_a, saved_b) = (
            (b1.inv_mass, b1.inv_inertia),
            (b2.inv_mass, b2.inv_inertia),
        );
        b1.inv_mass = inv_mass_a;
        b1.inv_inertia = inv_inertia_a;
        b2.inv_mass = inv_mass_b;
        b2.inv_inertia = inv_inertia_b;

        let normal = manifold.normal;
        let (t1, t2) = math::tangent_basis(normal);

        let mut points = Vec::with_capacity(manifold.points.len());
        for point in &manifold.points {
            let r_a = point.position_a - b1.com;
            let r_b = point.position_b - b2.com;

            let mut normal_part = AxisConstraintPart::default();
            normal_part.calculate(b1, b2, r_a, r_b, normal);
            normal_part.set_total_lambda(point.normal_impulse);

            if point.penetration < 0.0 {
                // Speculative contact: allow exactly enough approach to
                // close the gap this sub-step.
                normal_part.set_bias(-point.penetration / dt);
            } else {
                let approach = normal.dot(b2.point_velocity(r_b) - b1.point_velocity(r_a));
                if settings.restitution > 0.0 && approach < -config.min_bounce_velocity {
                    normal_part.set_bias(settings.restitution * approach);
                }
            }

            let mut friction_parts = [AxisConstraintPart::default(); 2];
            for (i, tangent) in [t1, t2].iter().enumerate() {
                friction_parts[i].calculate(b1, b2, r_a, r_b, *tangent);
                friction_parts[i].set_total_lambda(point.friction_impulse[i]);
                let slide = settings.surface_velocity.dot(*tangent);
                if slide != 0.0 {
                    friction_parts[i].set_bias(-slide);
                }
            }

            points.push(ContactPointConstraint {
                local_a: b1.rotation.conjugate() * r_a,
                local_b: b2.rotation.conjugate() * r_b,
                normal_part,
                friction_parts,
            });
        }

        b1.inv_mass = saved_a.0;
        b1.inv_inertia = saved_a.1;
        b2.inv_mass = saved_b.0;
        b2.inv_inertia = saved_b.1;

        ContactConstraint {
            manifold_index,
            idx_a,
            idx_b,
            normal,
            tangents: [t1, t2],
            friction: settings.friction,
            points,
        }
    }

    pub fn warm_start(&mut self, ctx: &mut SolverContext, ratio: f32) {
        let (b1, b2) = two_bodies(&mut ctx.bodies, self.idx_a, self.idx_b);
        for point in &mut self.points {
            point.normal_part.warm_start(b1, b2, self.normal, ratio);
            for i in 0..2 {
                point.friction_parts[i].warm_start(b1, b2, self.tangents[i], ratio);
            }
        }
    }

    pub fn solve_velocity(&mut self, ctx: &mut SolverContext) -> bool {
        let (b1, b2) = two_bodies(&mut ctx.bodies, self.idx_a, self.idx_b);
        let mut applied = false;
        for point in &mut self.points {
            // Non-penetration, then friction clamped by the fresh normal
            // impulse (cone-consistent every iteration).
            applied |= point
                .normal_part
                .solve_velocity(b1, b2, self.normal, 0.0, f32::MAX);
            let max_friction = self.friction * point.normal_part.total_lambda();
            if max_friction > 0.0 {
                for i in 0..2 {
                    applied |= point.friction_parts[i].solve_velocity(
                        b1,
                        b2,
                        self.tangents[i],
                        -max_friction,
                        max_friction,
                    );
                }
            }
        }
        applied
    }

    pub fn solve_position(&mut self, ctx: &mut SolverContext, config: &SolveConfig) -> bool {
        let (b1, b2) = two_bodies(&mut ctx.bodies, self.idx_a, self.idx_b);
        let mut applied = false;
        for point in &mut self.points {
            let p_a = b1.com + b1.rotation * point.local_a;
            let p_b = b2.com + b2.rotation * point.local_b;
            let separation = self.normal.dot(p_b - p_a);
            if separation < -config.penetration_slop {
                applied |= point.normal_part.solve_position(
                    b1,
                    b2,
                    self.normal,
                    separation + config.penetration_slop,
                    config.baumgarte,
                );
            }
        }
        applied
    }

    /// Write the accumulated impulses back into the manifold for caching.
    pub fn store_impulses(&self, manifold: &mut ContactManifold) {
        for (point, row) in manifold.points.iter_mut().zip(&self.points) {
            point.normal_impulse = row.normal_part.total_lambda();
            point.friction_impulse = [
                row.friction_parts[0].total_lambda(),
                row.friction_parts[1].total_lambda(),
            ];
        }
    }
}

/// Union-find islands over the solver bodies.
pub(crate) struct Islands {
    parent: Vec<usize>,
}

impl Islands {
    pub fn new(num_bodies: usize) -> Self {
        Self {
            parent: (0..num_bodies).collect(),
        }
    }

    pub fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression.
        let mut walk = i;
        while self.parent[walk] != root {
            let next = self.parent[walk];
            self.parent[walk] = root;
            walk = next;
        }
        root
    }

    /// Link two bodies when both are dynamic; static and kinematic bodies
    /// never merge islands.
    pub fn link(&mut self, bodies: &[SolverBody], a: usize, b: usize) {
        if bodies[a].is_dynamic() && bodies[b].is_dynamic() {
            let ra = self.find(a);
            let rb = self.find(b);
            if ra != rb {
                self.parent[ra.max(rb)] = ra.min(rb);
            }
        }
    }
}

/// One island's share of the solver work.
pub(crate) struct IslandGroup {
    /// Lowest body id, for deterministic island ordering.
    pub min_body: BodyId,
    pub contacts: Vec<usize>,
    pub constraints: Vec<usize>,
    pub velocity_steps: u32,
    pub position_steps: u32,
    /// Solver body indices of the island's dynamic members.
    pub members: Vec<usize>,
}

/// Group constraints by island, ordered by ascending lowest body id.
pub(crate) fn build_island_groups(
    islands: &mut Islands,
    ctx: &SolverContext,
    contacts: &[ContactConstraint],
    user: &[(usize, usize, usize)],
    velocity_overrides: impl Fn(usize) -> u32,
    position_overrides: impl Fn(usize) -> u32,
    default_velocity_steps: u32,
    default_position_steps: u32,
) -> Vec<IslandGroup> {
    let mut groups: HashMap<usize, IslandGroup> = HashMap::new();

    // Every dynamic body belongs to an island, constraints or not.
    for (i, body) in ctx.bodies.iter().enumerate() {
        if body.is_dynamic() {
            let root = islands.find(i);
            let group = groups.entry(root).or_insert_with(|| IslandGroup {
                min_body: ctx.bodies[root].id,
                contacts: Vec::new(),
                constraints: Vec::new(),
                velocity_steps: default_velocity_steps,
                position_steps: default_position_steps,
                members: Vec::new(),
            });
            group.members.push(i);
            if body.id < group.min_body {
                group.min_body = body.id;
            }
            group.velocity_steps = group.velocity_steps.max(velocity_overrides(i));
            group.position_steps = group.position_steps.max(position_overrides(i));
        }
    }

    let dynamic_root = |islands: &mut Islands, ctx: &SolverContext, a: usize, b: usize| {
        if ctx.bodies[a].is_dynamic() {
            islands.find(a)
        } else {
            islands.find(b)
        }
    };

    for (i, contact) in contacts.iter().enumerate() {
        let root = dynamic_root(islands, ctx, contact.idx_a, contact.idx_b);
        if let Some(group) = groups.get_mut(&root) {
            group.contacts.push(i);
        }
    }
    for (slot, (_, idx_a, idx_b)) in user.iter().enumerate() {
        let root = dynamic_root(islands, ctx, *idx_a, *idx_b);
        if let Some(group) = groups.get_mut(&root) {
            group.constraints.push(slot);
        }
    }

    let mut result: Vec<IslandGroup> = groups.into_values().collect();
    result.sort_by_key(|g| g.min_body);
    result
}

/// Warm start and run the velocity iterations for every island.
pub(crate) fn solve_velocity(
    ctx: &mut SolverContext,
    contacts: &mut [ContactConstraint],
    constraints: &mut [Option<Constraint>],
    user: &[(usize, usize, usize)],
    groups: &[IslandGroup],
    config: &SolveConfig,
    dt: f32,
) {
    for group in groups {
        for &ci in &group.constraints {
            let slot = user[ci].0;
            if let Some(c) = constraints[slot].as_mut() {
                c.warm_start(&mut ctx.bodies, config.warm_start_ratio);
            }
        }
        for &ci in &group.contacts {
            contacts[ci].warm_start(ctx, config.warm_start_ratio);
        }

        for _ in 0..group.velocity_steps {
            let mut applied = false;
            for &ci in &group.constraints {
                let slot = user[ci].0;
                if let Some(c) = constraints[slot].as_mut() {
                    applied |= c.solve_velocity(&mut ctx.bodies, dt);
                }
            }
            for &ci in &group.contacts {
                applied |= contacts[ci].solve_velocity(ctx);
            }
            if !applied {
                break;
            }
        }
    }
}

/// Run the Baumgarte position iterations for every island.
pub(crate) fn solve_position(
    ctx: &mut SolverContext,
    contacts: &mut [ContactConstraint],
    constraints: &mut [Option<Constraint>],
    user: &[(usize, usize, usize)],
    groups: &[IslandGroup],
    config: &SolveConfig,
) {
    for group in groups {
        for _ in 0..group.position_steps {
            let mut applied = false;
            for &ci in &group.constraints {
                let slot = user[ci].0;
                if let Some(c) = constraints[slot].as_mut() {
                    applied |= c.solve_position(&mut ctx.bodies, config.baumgarte);
                }
            }
            for &ci in &group.contacts {
                applied |= contacts[ci].solve_position(ctx, config);
            }
            if !applied {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::MotionType;
    use crate::shape::EMPTY_SUB_SHAPE_ID;
    use glam::{Mat3, Quat};

    fn solver_body(id: BodyId, motion_type: MotionType, com: Vec3) -> SolverBody {
        let dynamic = motion_type == MotionType::Dynamic;
        SolverBody {
            id,
            motion_type,
            com,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass: if dynamic { 1.0 } else { 0.0 },
            inv_inertia: if dynamic {
                Mat3::from_diagonal(Vec3::splat(2.5))
            } else {
                Mat3::ZERO
            },
            translation_mask: Vec3::ONE,
            rotation_mask: Vec3::ONE,
        }
    }

    fn default_config() -> SolveConfig {
        SolveConfig {
            num_velocity_steps: 10,
            num_position_steps: 2,
            warm_start_ratio: 0.8,
            baumgarte: 0.2,
            penetration_slop: 0.005,
            min_bounce_velocity: 1.0,
        }
    }

    #[test]
    fn test_contact_stops_falling_body() {
        let mut world = hecs::World::new();
        let ground_id = world.spawn((0u8,));
        let box_id = world.spawn((0u8,));

        let mut ctx = SolverContext::new();
        let ground = ctx.push(solver_body(ground_id, MotionType::Static, Vec3::ZERO));
        let falling = ctx.push(solver_body(box_id, MotionType::Dynamic, Vec3::new(0.0, 1.0, 0.0)));
        ctx.bodies[falling].linear_velocity = Vec3::new(0.0, -5.0, 0.0);

        let manifold = ContactManifold {
            body_a: ground_id,
            body_b: box_id,
            sub_shape_a: EMPTY_SUB_SHAPE_ID,
            sub_shape_b: EMPTY_SUB_SHAPE_ID,
            normal: Vec3::Y,
            points: vec![crate::contact::ContactPoint::new(
                Vec3::new(0.0, 0.5, 0.0),
                Vec3::new(0.0, 0.49, 0.0),
                0.01,
            )],
        };
        let settings = ContactSettings {
            friction: 0.5,
            ..Default::default()
        };
        let config = default_config();
        let mut contact = ContactConstraint::prepare(
            &manifold, 0, &settings, &mut ctx, ground, falling, &config, 1.0 / 60.0,
        );

        for _ in 0..config.num_velocity_steps {
            contact.solve_velocity(&mut ctx);
        }
        assert!(
            ctx.bodies[falling].linear_velocity.y.abs() < 1e-3,
            "residual velocity {:?}",
            ctx.bodies[falling].linear_velocity
        );
        assert_eq!(ctx.bodies[ground].linear_velocity, Vec3::ZERO);
    }

    #[test]
    fn test_friction_cone_clamps() {
        let mut world = hecs::World::new();
        let ground_id = world.spawn((0u8,));
        let box_id = world.spawn((0u8,));

        let mut ctx = SolverContext::new();
        let ground = ctx.push(solver_body(ground_id, MotionType::Static, Vec3::ZERO));
        let sliding = ctx.push(solver_body(box_id, MotionType::Dynamic, Vec3::new(0.0, 0.5, 0.0)));
        // Sliding sideways while resting.
        ctx.bodies[sliding].linear_velocity = Vec3::new(4.0, -1.0, 0.0);

        let manifold = ContactManifold {
            body_a: ground_id,
            body_b: box_id,
            sub_shape_a: EMPTY_SUB_SHAPE_ID,
            sub_shape_b: EMPTY_SUB_SHAPE_ID,
            normal: Vec3::Y,
            points: vec![crate::contact::ContactPoint::new(
                Vec3::ZERO,
                Vec3::ZERO,
                0.0,
            )],
        };
        let settings = ContactSettings {
            friction: 0.2,
            ..Default::default()
        };
        let config = default_config();
        let mut contact = ContactConstraint::prepare(
            &manifold, 0, &settings, &mut ctx, ground, sliding, &config, 1.0 / 60.0,
        );
        for _ in 0..config.num_velocity_steps {
            contact.solve_velocity(&mut ctx);
        }
        // Normal velocity killed, tangential only slowed (mu is small).
        assert!(ctx.bodies[sliding].linear_velocity.y.abs() < 1e-3);
        assert!(ctx.bodies[sliding].linear_velocity.x > 3.0);

        // Friction magnitude respects the cone.
        let normal_impulse = contact.points[0].normal_part.total_lambda();
        let f0 = contact.points[0].friction_parts[0].total_lambda().abs();
        let f1 = contact.points[0].friction_parts[1].total_lambda().abs();
        assert!((f0 * f0 + f1 * f1).sqrt() <= 2.0 * 0.2 * normal_impulse + 1e-4);
    }

    #[test]
    fn test_islands_partition() {
        let mut world = hecs::World::new();
        let ids: Vec<BodyId> = (0..5).map(|_| world.spawn((0u8,))).collect();
        let mut ctx = SolverContext::new();
        for (i, &id) in ids.iter().enumerate() {
            let motion = if i == 4 {
                MotionType::Static
            } else {
                MotionType::Dynamic
            };
            ctx.push(solver_body(id, motion, Vec3::ZERO));
        }

        let mut islands = Islands::new(ctx.bodies.len());
        // 0-1 linked, 2-3 linked, 4 static links nobody.
        islands.link(&ctx.bodies, 0, 1);
        islands.link(&ctx.bodies, 2, 3);
        islands.link(&ctx.bodies, 3, 4);

        assert_eq!(islands.find(0), islands.find(1));
        assert_eq!(islands.find(2), islands.find(3));
        assert_ne!(islands.find(0), islands.find(2));

        let groups = build_island_groups(
            &mut islands,
            &ctx,
            &[],
            &[],
            |_| 0,
            |_| 0,
            10,
            2,
        );
        assert_eq!(groups.len(), 2);
        // Ascending by lowest body id.
        assert!(groups[0].min_body < groups[1].min_body);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn test_restitution_bias() {
        let mut world = hecs::World::new();
        let ground_id = world.spawn((0u8,));
        let ball_id = world.spawn((0u8,));

        let mut ctx = SolverContext::new();
        let ground = ctx.push(solver_body(ground_id, MotionType::Static, Vec3::ZERO));
        let ball = ctx.push(solver_body(ball_id, MotionType::Dynamic, Vec3::new(0.0, 0.5, 0.0)));
        ctx.bodies[ball].linear_velocity = Vec3::new(0.0, -4.0, 0.0);

        let manifold = ContactManifold {
            body_a: ground_id,
            body_b: ball_id,
            sub_shape_a: EMPTY_SUB_SHAPE_ID,
            sub_shape_b: EMPTY_SUB_SHAPE_ID,
            normal: Vec3::Y,
            points: vec![crate::contact::ContactPoint::new(
                Vec3::ZERO,
                Vec3::ZERO,
                0.001,
            )],
        };
        let settings = ContactSettings {
            friction: 0.0,
            restitution: 0.5,
            ..Default::default()
        };
        let config = default_config();
        let mut contact = ContactConstraint::prepare(
            &manifold, 0, &settings, &mut ctx, ground, ball, &config, 1.0 / 60.0,
        );
        for _ in 0..config.num_velocity_steps {
            contact.solve_velocity(&mut ctx);
        }
        // Half the approach speed comes back.
        assert!(
            (ctx.bodies[ball].linear_velocity.y - 2.0).abs() < 0.05,
            "bounce velocity {:?}",
            ctx.bodies[ball].linear_velocity
        );
    }
}
