//! End-to-end simulation scenarios.

use std::sync::Arc;

use glam::{Quat, Vec3};
use tumble::{
    BodyId, BodySettings, Dof, MassProperties, MotionType, Shape, World, WorldSettings,
};

const DT: f32 = 1.0 / 60.0;

fn default_world() -> World {
    World::new(WorldSettings::default())
}

fn ground_box(world: &mut World) -> BodyId {
    let layer = tumble::ObjectLayer(0);
    world.create_body(
        &BodySettings::new(
            Arc::new(Shape::cuboid(Vec3::new(10.0, 1.0, 10.0))),
            MotionType::Static,
            layer,
        )
        .at(Vec3::new(0.0, -1.0, 0.0)),
    )
}

fn dynamic_box(world: &mut World, half: Vec3, position: Vec3) -> BodyId {
    let layer = tumble::ObjectLayer(0);
    let mut settings = BodySettings::new(
        Arc::new(Shape::cuboid(half)),
        MotionType::Dynamic,
        layer,
    )
    .at(position);
    settings.mass = Some(1.0);
    world.create_body(&settings)
}

#[test]
fn test_box_stack_comes_to_rest() {
    let mut world = default_world();
    ground_box(&mut world);

    let mut boxes = Vec::new();
    for i in 0..5 {
        boxes.push(dynamic_box(
            &mut world,
            Vec3::ONE,
            Vec3::new(0.0, 2.0 + 2.0 * i as f32, 0.0),
        ));
    }

    // Five seconds of simulation.
    for _ in 0..300 {
        world.update(DT);
    }

    // The stack rests at centres 1, 3, 5, 7, 9 (ground top is y = 0).
    let top = world.body(boxes[4]).position;
    assert!(
        top.y > 8.7 && top.y < 9.3,
        "top box should rest near y = 9, got {}",
        top.y
    );
    for &id in &boxes {
        let speed = world.motion(id).unwrap().linear_velocity.length();
        assert!(speed < 0.05, "box still moving at {speed} m/s");
        let horizontal = world.body(id).position;
        assert!(
            horizontal.x.abs() < 0.5 && horizontal.z.abs() < 0.5,
            "box drifted sideways: {horizontal:?}"
        );
    }
}

#[test]
fn test_velocity_caps_and_unit_quaternions() {
    let mut world = default_world();
    let id = dynamic_box(&mut world, Vec3::ONE, Vec3::new(0.0, 100.0, 0.0));

    // A violent kick; caps must hold afterwards.
    world.set_linear_velocity(id, Vec3::new(1.0e6, 0.0, 0.0));
    world.set_angular_velocity(id, Vec3::new(0.0, 1.0e6, 0.0));

    for _ in 0..30 {
        world.update(DT);
        let motion = world.motion(id).unwrap();
        assert!(motion.linear_velocity.length() <= motion.max_linear_velocity + 1.0e-3);
        assert!(motion.angular_velocity.length() <= motion.max_angular_velocity + 1.0e-3);
        drop(motion);
        let q = world.body(id).rotation;
        assert!((q.length() - 1.0).abs() < 1.0e-4, "drifting quaternion {q:?}");
    }
}

#[test]
fn test_locked_dofs_never_move() {
    let mut world = default_world();
    let layer = tumble::ObjectLayer(0);
    let mut settings = BodySettings::new(
        Arc::new(Shape::cuboid(Vec3::ONE)),
        MotionType::Dynamic,
        layer,
    )
    .at(Vec3::new(1.0, 5.0, -2.0));
    settings.mass = Some(2.0);
    // Plane motion: Y translation locked, only Z rotation free.
    settings.allowed_dofs = Dof::TRANSLATION_X | Dof::TRANSLATION_Z | Dof::ROTATION_Z;
    let id = world.create_body(&settings);
    let start = world.body(id).position;

    world.set_linear_velocity(id, Vec3::new(1.0, 5.0, 1.0));
    world.set_angular_velocity(id, Vec3::new(3.0, 3.0, 1.0));

    for _ in 0..120 {
        world.update(DT);
        let motion = world.motion(id).unwrap();
        assert_eq!(motion.linear_velocity.y, 0.0);
        assert_eq!(motion.angular_velocity.x, 0.0);
        assert_eq!(motion.angular_velocity.y, 0.0);
    }
    // No drift along the locked axis (gravity pulled along Y).
    let end = world.body(id).position;
    assert!((end.y - start.y).abs() < 1.0e-4, "locked axis moved: {end:?}");
    assert!((end.x - start.x).abs() > 0.5, "free axis should have moved");
}

#[test]
fn test_impulse_roundtrip() {
    let mut world = World::new(WorldSettings {
        gravity: Vec3::ZERO,
        ..Default::default()
    });
    let id = dynamic_box(&mut world, Vec3::ONE, Vec3::ZERO);

    let impulse = Vec3::new(3.0, -1.0, 2.0);
    world.add_impulse(id, impulse);
    {
        let motion = world.motion(id).unwrap();
        // v = impulse / m with m = 1.
        assert!((motion.linear_velocity - impulse).length() < 1.0e-5);
    }
    world.add_impulse(id, -impulse);
    {
        let motion = world.motion(id).unwrap();
        assert!(motion.linear_velocity.length() < 1.0e-5);
    }
}

#[test]
fn test_dzhanibekov_flip() {
    let mut world = World::new(WorldSettings {
        gravity: Vec3::ZERO,
        ..Default::default()
    });
    let layer = tumble::ObjectLayer(0);
    let mut settings = BodySettings::new(
        Arc::new(Shape::sphere(0.5)),
        MotionType::Dynamic,
        layer,
    );
    // Distinct principal moments with the intermediate one on Y.
    settings.mass_properties_override = Some(MassProperties {
        mass: 1.0,
        inertia: glam::Mat3::from_diagonal(Vec3::new(1.0, 0.5, 1.0 / 3.0)),
    });
    settings.allow_sleeping = false;
    settings.angular_damping = 0.0;
    settings.linear_damping = 0.0;
    let id = world.create_body(&settings);

    // Spin about the intermediate axis with a bit of noise.
    world.set_angular_velocity(id, Vec3::new(0.05, 3.0, 0.02));

    let momentum = |world: &World| -> f32 {
        let body = world.body(id);
        let motion = world.motion(id).unwrap();
        let to_principal = body.rotation * motion.inertia_rotation;
        let w_local = to_principal.conjugate() * motion.angular_velocity;
        (w_local / motion.inv_inertia_diagonal).length()
    };
    let initial_momentum = momentum(&world);

    let mut sign_flips = 0;
    let mut last_sign = 1.0f32;
    for _ in 0..600 {
        world.update(DT);
        let w = world.motion(id).unwrap().angular_velocity;
        let body = world.body(id);
        let to_principal = body.rotation * world.motion(id).unwrap().inertia_rotation;
        let w_local = to_principal.conjugate() * w;
        if w_local.y.signum() != last_sign && w_local.y.abs() > 0.5 {
            sign_flips += 1;
            last_sign = w_local.y.signum();
        }
    }
    assert!(
        sign_flips >= 1,
        "intermediate-axis rotation should have flipped"
    );

    let drift = (momentum(&world) - initial_momentum).abs() / initial_momentum;
    assert!(drift < 0.01, "angular momentum drifted {:.3}%", drift * 100.0);
}

#[test]
fn test_sleep_and_wake() {
    let mut world = default_world();
    ground_box(&mut world);
    let id = dynamic_box(&mut world, Vec3::splat(0.5), Vec3::new(0.0, 0.6, 0.0));

    // Two seconds: the box lands and falls asleep.
    for _ in 0..120 {
        world.update(DT);
    }
    assert!(!world.is_active(id), "resting box should be asleep");
    {
        let motion = world.motion(id).unwrap();
        assert_eq!(motion.linear_velocity, Vec3::ZERO);
    }

    // An impulse re-activates it immediately.
    world.add_impulse(id, Vec3::new(0.0, 5.0, 0.0));
    assert!(world.is_active(id), "impulse must wake the body");
}

#[test]
fn test_layer_isolation() {
    // Collision only between `moving` and `not_moving`; two dynamic bodies
    // on `moving` must pass through each other without contact events.
    let mut layers = tumble::LayerConfig::new();
    let bp_static = layers.add_broadphase_layer();
    let bp_moving = layers.add_broadphase_layer();
    let not_moving = layers.add_object_layer(bp_static);
    let moving = layers.add_object_layer(bp_moving);
    layers.enable_collision(moving, not_moving);

    let mut world = World::new(WorldSettings {
        gravity: Vec3::ZERO,
        layers,
        ..Default::default()
    });

    let mut make_body = |world: &mut World, position: Vec3| {
        let mut settings = BodySettings::new(
            Arc::new(Shape::sphere(1.0)),
            MotionType::Dynamic,
            moving,
        )
        .at(position);
        settings.mass = Some(1.0);
        settings.allow_sleeping = false;
        world.create_body(&settings)
    };
    let a = make_body(&mut world, Vec3::new(-1.5, 0.0, 0.0));
    let b = make_body(&mut world, Vec3::new(1.5, 0.0, 0.0));

    #[derive(Default)]
    struct CountingListener {
        added: usize,
    }
    impl tumble::ContactListener for CountingListener {
        fn on_contact_added(
            &mut self,
            _a: BodyId,
            _b: BodyId,
            _manifold: &tumble::ContactManifold,
            _settings: &mut tumble::ContactSettings,
        ) {
            self.added += 1;
        }
    }

    world.set_linear_velocity(a, Vec3::new(2.0, 0.0, 0.0));
    world.set_linear_velocity(b, Vec3::new(-2.0, 0.0, 0.0));

    let mut listener = CountingListener::default();
    for _ in 0..120 {
        world.update_with_listener(DT, &mut listener);
    }
    assert_eq!(listener.added, 0, "same-layer pair must not collide");
    // They kept their velocities (passed through).
    assert!(world.motion(a).unwrap().linear_velocity.x > 1.9);
}

#[test]
fn test_kinematic_tracking() {
    let mut world = World::new(WorldSettings {
        gravity: Vec3::ZERO,
        ..Default::default()
    });
    let layer = tumble::ObjectLayer(0);
    let id = world.create_body(&BodySettings::new(
        Arc::new(Shape::cuboid(Vec3::ONE)),
        MotionType::Kinematic,
        layer,
    ));

    let target_position = Vec3::new(3.0, 1.0, -2.0);
    let target_rotation = Quat::from_rotation_y(0.8);
    world.move_kinematic(id, target_position, target_rotation, DT);
    world.update(DT);

    let body = world.body(id);
    assert!(
        (body.position - target_position).length() < 1.0e-3,
        "kinematic body missed its target: {:?}",
        body.position
    );
    assert!(body.rotation.dot(target_rotation).abs() > 0.9999);
}

#[test]
fn test_restitution_bounce() {
    let mut world = default_world();
    ground_box(&mut world);
    let layer = tumble::ObjectLayer(0);
    let mut settings = BodySettings::new(
        Arc::new(Shape::sphere(0.5)),
        MotionType::Dynamic,
        layer,
    )
    .at(Vec3::new(0.0, 5.0, 0.0));
    settings.mass = Some(1.0);
    settings.restitution = 0.8;
    let id = world.create_body(&settings);

    let mut peak_after_bounce = 0.0f32;
    let mut bounced = false;
    for _ in 0..240 {
        world.update(DT);
        let motion_v = world.motion(id).unwrap().linear_velocity.y;
        if motion_v > 0.5 {
            bounced = true;
        }
        if bounced {
            peak_after_bounce = peak_after_bounce.max(world.body(id).position.y);
        }
    }
    assert!(bounced, "a lively sphere must bounce");
    assert!(
        peak_after_bounce > 1.5,
        "bounce peak too low: {peak_after_bounce}"
    );
}

#[test]
fn test_contact_events_lifecycle() {
    #[derive(Default)]
    struct EventListener {
        added: usize,
        persisted: usize,
        removed: usize,
    }
    impl tumble::ContactListener for EventListener {
        fn on_contact_added(
            &mut self,
            _a: BodyId,
            _b: BodyId,
            _manifold: &tumble::ContactManifold,
            _settings: &mut tumble::ContactSettings,
        ) {
            self.added += 1;
        }
        fn on_contact_persisted(
            &mut self,
            _a: BodyId,
            _b: BodyId,
            _manifold: &tumble::ContactManifold,
            _settings: &mut tumble::ContactSettings,
        ) {
            self.persisted += 1;
        }
        fn on_contact_removed(&mut self, _key: &tumble::ContactKey) {
            self.removed += 1;
        }
    }

    let mut world = default_world();
    ground_box(&mut world);
    let id = dynamic_box(&mut world, Vec3::splat(0.5), Vec3::new(0.0, 0.55, 0.0));

    let mut listener = EventListener::default();
    for _ in 0..60 {
        world.update_with_listener(DT, &mut listener);
    }
    assert!(listener.added >= 1, "landing must add a contact");
    assert!(listener.persisted > 10, "resting must persist the contact");

    // Yank the box away: the contact disappears.
    world.set_position(id, Vec3::new(0.0, 10.0, 0.0), Quat::IDENTITY);
    for _ in 0..2 {
        world.update_with_listener(DT, &mut listener);
    }
    assert!(listener.removed >= 1, "separation must remove the contact");
}

#[test]
fn test_gravity_factor() {
    let mut world = default_world();
    let layer = tumble::ObjectLayer(0);
    let mut floaty = BodySettings::new(
        Arc::new(Shape::sphere(0.5)),
        MotionType::Dynamic,
        layer,
    )
    .at(Vec3::new(0.0, 10.0, 0.0));
    floaty.mass = Some(1.0);
    floaty.gravity_factor = 0.0;
    let floating = world.create_body(&floaty);
    let falling = dynamic_box(&mut world, Vec3::splat(0.5), Vec3::new(5.0, 10.0, 0.0));

    for _ in 0..60 {
        world.update(DT);
    }
    assert!((world.body(floating).position.y - 10.0).abs() < 1.0e-3);
    assert!(world.body(falling).position.y < 6.0);
}

/// Bodies created with `Body` fields visible through the public borrow.
#[test]
fn test_body_accessors() {
    let mut world = default_world();
    let id = dynamic_box(&mut world, Vec3::ONE, Vec3::new(1.0, 2.0, 3.0));
    {
        let body = world.body(id);
        assert_eq!(body.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(body.motion_type, MotionType::Dynamic);
    }
    assert!(world.contains_body(id));

    world.remove_body(id);
    assert!(!world.contains_body(id));
    assert!(world.try_body(id).is_none());
}
