//! Joint behaviour scenarios.

use std::sync::Arc;

use glam::{Quat, Vec3};
use tumble::{
    BodySettings, HingeConstraintSettings, MotionType, MotorSettings, MotorState, ObjectLayer,
    PointConstraintSettings, Shape, SliderConstraintSettings, SpringSettings,
    SwingTwistConstraintSettings, World, WorldSettings,
};

const DT: f32 = 1.0 / 60.0;

fn world(gravity: Vec3) -> World {
    World::new(WorldSettings {
        gravity,
        ..Default::default()
    })
}

fn static_anchor(world: &mut World, position: Vec3) -> tumble::BodyId {
    world.create_body(
        &BodySettings::new(
            Arc::new(Shape::cuboid(Vec3::splat(0.25))),
            MotionType::Static,
            ObjectLayer(0),
        )
        .at(position),
    )
}

fn dynamic_box(world: &mut World, position: Vec3, awake_forever: bool) -> tumble::BodyId {
    let mut settings = BodySettings::new(
        Arc::new(Shape::cuboid(Vec3::splat(0.25))),
        MotionType::Dynamic,
        ObjectLayer(0),
    )
    .at(position);
    settings.mass = Some(1.0);
    settings.allow_sleeping = !awake_forever;
    // Keep joint tests free of incidental contacts.
    settings.collision_mask = 0;
    settings.collision_group = 0;
    world.create_body(&settings)
}

/// Hinge angle around the axis, measured like the constraint does.
fn hinge_angle(world: &World, a: tumble::BodyId, b: tumble::BodyId, axis: Vec3, normal: Vec3) -> f32 {
    let qa = world.body(a).rotation;
    let qb = world.body(b).rotation;
    let world_axis = qa * axis;
    let na = qa * normal;
    let nb = qb * normal;
    na.cross(nb).dot(world_axis).atan2(na.dot(nb))
}

#[test]
fn test_point_constraint_pendulum() {
    let mut w = world(Vec3::new(0.0, -9.81, 0.0));
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let bob = dynamic_box(&mut w, Vec3::new(2.0, 0.0, 0.0), true);
    w.add_constraint(PointConstraintSettings::new(anchor, bob, Vec3::ZERO));

    for _ in 0..300 {
        w.update(DT);
        // The bob stays on a sphere of radius 2 around the pivot.
        let distance = w.body(bob).position.length();
        assert!(
            (distance - 2.0).abs() < 0.15,
            "pendulum arm stretched to {distance}"
        );
    }
    // It swung down.
    assert!(w.body(bob).position.y < -1.0);
}

#[test]
fn test_distance_constraint_range() {
    let mut w = world(Vec3::ZERO);
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let satellite = dynamic_box(&mut w, Vec3::new(3.0, 0.0, 0.0), true);
    let mut settings = tumble::DistanceConstraintSettings::new(
        anchor,
        satellite,
        Vec3::ZERO,
        Vec3::new(3.0, 0.0, 0.0),
    );
    settings.min_distance = Some(2.0);
    settings.max_distance = Some(4.0);
    w.add_constraint(settings);

    // Fling it outwards: the tether stops it near 4.
    w.set_linear_velocity(satellite, Vec3::new(10.0, 0.0, 0.0));
    for _ in 0..120 {
        w.update(DT);
    }
    let d = w.body(satellite).position.length();
    assert!(d < 4.2, "outer limit violated: {d}");

    // Push it inwards: held near 2.
    w.set_linear_velocity(satellite, Vec3::new(-10.0, 0.0, 0.0));
    for _ in 0..120 {
        w.update(DT);
    }
    let d = w.body(satellite).position.length();
    assert!(d > 1.8, "inner limit violated: {d}");
}

#[test]
fn test_hinge_limits_with_position_motor() {
    // Drive the hinge towards pi/2 with a stiff motor; the [-pi/4, pi/4]
    // limit wins.
    let mut w = world(Vec3::ZERO);
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let arm = dynamic_box(&mut w, Vec3::new(1.0, 0.0, 0.0), true);

    let mut settings = HingeConstraintSettings::new(
        anchor,
        arm,
        Vec3::new(0.5, 0.0, 0.0),
        Vec3::Z,
    );
    settings.limits = Some((-std::f32::consts::FRAC_PI_4, std::f32::consts::FRAC_PI_4));
    settings.motor = MotorSettings {
        max_force: 1000.0,
        spring: SpringSettings::new(10.0, 1.0),
    };
    let id = w.add_constraint(settings);

    {
        let hinge = w.constraint_mut(id).as_hinge_mut().unwrap();
        hinge.set_motor_state(MotorState::Position);
        hinge.set_target_angle(std::f32::consts::FRAC_PI_2);
    }

    for _ in 0..300 {
        w.update(DT);
    }
    let angle = hinge_angle(&w, anchor, arm, Vec3::Z, Vec3::X);
    assert!(
        (angle - std::f32::consts::FRAC_PI_4).abs() < 0.05,
        "steady state angle {angle} should sit at the upper limit"
    );
}

#[test]
fn test_hinge_velocity_motor_spins() {
    let mut w = world(Vec3::ZERO);
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let wheel = dynamic_box(&mut w, Vec3::new(0.0, 0.0, 1.0), true);

    let settings = HingeConstraintSettings::new(anchor, wheel, Vec3::ZERO, Vec3::Y);
    let id = w.add_constraint(settings);
    {
        let hinge = w.constraint_mut(id).as_hinge_mut().unwrap();
        hinge.set_motor_state(MotorState::Velocity);
        hinge.set_target_angular_velocity(2.0);
    }

    for _ in 0..120 {
        w.update(DT);
    }
    let spin = w.motion(wheel).unwrap().angular_velocity.y;
    assert!((spin - 2.0).abs() < 0.1, "motor speed {spin}");
}

#[test]
fn test_fixed_constraint_welds() {
    let mut w = world(Vec3::new(0.0, -9.81, 0.0));
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let welded = dynamic_box(&mut w, Vec3::new(1.0, 0.0, 0.0), true);
    w.add_constraint(tumble::FixedConstraintSettings::new(anchor, welded));

    for _ in 0..300 {
        w.update(DT);
    }
    let body = w.body(welded);
    assert!(
        (body.position - Vec3::new(1.0, 0.0, 0.0)).length() < 0.05,
        "welded body drifted to {:?}",
        body.position
    );
    assert!(body.rotation.dot(Quat::IDENTITY).abs() > 0.999);
}

#[test]
fn test_slider_motor_and_limits() {
    let mut w = world(Vec3::ZERO);
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let carriage = dynamic_box(&mut w, Vec3::new(0.0, 0.0, 0.0), true);

    let mut settings = SliderConstraintSettings::new(anchor, carriage, Vec3::ZERO, Vec3::X);
    settings.limits = Some((-1.0, 1.0));
    let id = w.add_constraint(settings);
    {
        let slider = w.constraint_mut(id).as_slider_mut().unwrap();
        slider.set_motor_state(MotorState::Velocity);
        slider.set_target_velocity(3.0);
    }

    for _ in 0..300 {
        w.update(DT);
    }
    let position = w.body(carriage).position;
    // Driven into the +X stop, without leaving the axis or rotating.
    assert!(
        (position.x - 1.0).abs() < 0.1,
        "carriage should park at the limit, got {position:?}"
    );
    assert!(position.y.abs() < 0.02 && position.z.abs() < 0.02);
    assert!(w.body(carriage).rotation.dot(Quat::IDENTITY).abs() > 0.999);
}

#[test]
fn test_swing_twist_cone() {
    let mut w = world(Vec3::new(0.0, -9.81, 0.0));
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    // Arm hanging sideways from a shoulder at the origin, twist axis X.
    let arm = dynamic_box(&mut w, Vec3::new(1.0, 0.0, 0.0), true);

    let mut settings =
        SwingTwistConstraintSettings::new(anchor, arm, Vec3::ZERO, Vec3::X);
    settings.cone_half_angle = std::f32::consts::FRAC_PI_4;
    w.add_constraint(settings);

    // Gravity tries to swing the arm straight down (a 90 degree swing);
    // the cone holds it at 45.
    for _ in 0..300 {
        w.update(DT);
    }
    let direction = (w.body(arm).position - Vec3::ZERO).normalize();
    let swing = direction.dot(Vec3::X).clamp(-1.0, 1.0).acos();
    assert!(
        swing < std::f32::consts::FRAC_PI_4 + 0.1,
        "swing angle {swing} exceeded the cone"
    );
    // But it did swing down towards the cone edge.
    assert!(w.body(arm).position.y < -0.2);
}

#[test]
fn test_constraint_enable_disable() {
    let mut w = world(Vec3::new(0.0, -9.81, 0.0));
    let anchor = static_anchor(&mut w, Vec3::ZERO);
    let bob = dynamic_box(&mut w, Vec3::new(2.0, 0.0, 0.0), true);
    let id = w.add_constraint(PointConstraintSettings::new(anchor, bob, Vec3::ZERO));

    w.constraint_mut(id).set_enabled(false);
    for _ in 0..60 {
        w.update(DT);
    }
    // Free fall: the arm length is not maintained.
    assert!(w.body(bob).position.y < -2.0);

    // Removing is permitted at any point outside the step.
    w.remove_constraint(id);
}
