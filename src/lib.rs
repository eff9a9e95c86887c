//! tumble — a real-time 3D rigid-body physics engine.
//!
//! # Architecture
//!
//! The simulation advances through a fixed pipeline each step:
//!
//! 1. Apply forces (gravity, accumulated forces, gyroscopic torque)
//! 2. Refresh the broadphase trees
//! 3. Discover body pairs and run the narrow phase (GJK/EPA)
//! 4. Build solver islands from contacts and user constraints
//! 5. Warm-started Gauss-Seidel velocity solve
//! 6. Integrate positions (semi-implicit Euler)
//! 7. Baumgarte position solve
//! 8. Update sleeping
//! 9. Fire contact bookkeeping events
//!
//! The library is organized in leaves-first layers:
//!
//! - **aabb / math** - bounding boxes and the small math helpers glam lacks
//! - **layers** - broadphase/object layer configuration
//! - **shape** - the closed shape sum type with support functions
//! - **collide** - GJK, EPA, and per-shape-pair dispatch
//! - **body** - rigid bodies and motion state
//! - **broadphase** - one dynamic AABB tree per broadphase layer
//! - **contact** - manifolds, the impulse cache, contact events
//! - **constraint** - constraint parts and the joint families
//! - **world** - the `World` and its step
//! - **query** - collectors, filters, and world queries

pub mod aabb;
pub mod body;
pub mod broadphase;
pub mod collide;
pub mod constraint;
pub mod contact;
pub mod layers;
pub mod math;
pub mod query;
pub mod shape;
mod solver;
pub mod world;

pub use aabb::Aabb;
pub use body::{Body, BodyId, BodySettings, Dof, Motion, MotionQuality, MotionType};
pub use collide::ray::{cast_ray_vs_shape, collide_point_vs_shape, RayCastSettings, RayHit};
pub use collide::{
    cast_shape_vs_shape, collide_shape_vs_shape, CastSettings, CastStatus, CollideSettings,
    CollideShapeResult, Collector, ShapeCastResult,
};
pub use constraint::{
    Constraint, ConstraintId, ConstraintSpace, DistanceConstraintSettings,
    FixedConstraintSettings, HingeConstraintSettings, MotorSettings, MotorState,
    PointConstraintSettings, SliderConstraintSettings, SpringSettings,
    SwingTwistConstraintSettings,
};
pub use contact::{
    ContactKey, ContactListener, ContactManifold, ContactPoint, ContactSettings,
    ContactValidateResult,
};
pub use layers::{BroadPhaseLayer, LayerConfig, ObjectLayer};
pub use query::{
    AllCollector, AnyCollector, ClosestCollector, QueryFilter, WorldPointHit, WorldRayHit,
    WorldShapeCastHit, WorldShapeHit,
};
pub use shape::{
    BoxShape, CapsuleShape, CompoundChild, CompoundShape, ConvexHullShape, CylinderShape,
    MassProperties, OffsetComShape, PlaneShape, Pose, ScaledShape, Shape, ShapeError, ShapeType,
    SphereShape, SubShapeId, TriangleFlags, TriangleMesh, EMPTY_SUB_SHAPE_ID,
};
pub use world::{ConstraintSettings, NoopListener, World, WorldSettings};
