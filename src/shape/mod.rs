//! Collision shapes.
//!
//! [`Shape`] is a closed sum over the supported shape kinds. Convex shapes
//! (sphere, box, capsule, cylinder, convex hull) expose a support function
//! and drive the GJK/EPA narrow phase; planes and triangle meshes are
//! static-world geometry; compound/scaled/offset-COM wrappers compose other
//! shapes and are resolved through the leaf walker.
//!
//! Shapes are immutable after construction and shared between bodies via
//! `Arc<Shape>`. All shape data is JSON-serialisable; internal references
//! (hull faces, mesh triangles) index into the shape's own vertex tables.

pub mod convex;
pub mod hull;
pub mod mesh;
pub mod sub_shape;

use std::sync::Arc;

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aabb::Aabb;

pub use hull::ConvexHullShape;
pub use mesh::{TriangleFlags, TriangleMesh};
pub use sub_shape::{SubShapeId, EMPTY_SUB_SHAPE_ID};

/// Default convex radius used by shapes that carry one.
pub const DEFAULT_CONVEX_RADIUS: f32 = 0.05;

/// Shape construction errors.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("convex hull needs at least 4 points spanning a volume")]
    DegenerateHull,
    #[error("triangle index {index} out of bounds ({count} vertices)")]
    IndexOutOfBounds { index: u32, count: u32 },
    #[error("triangle mesh needs at least one triangle")]
    EmptyMesh,
    #[error("invalid shape parameter: {0}")]
    InvalidParameter(&'static str),
}

/// Position + orientation + per-axis scale of a shape in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    #[inline]
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    #[inline]
    pub fn with_scale(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Local point to world space.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.position + self.rotation * (self.scale * p)
    }

    /// World point to local space.
    #[inline]
    pub fn inverse_transform_point(&self, p: Vec3) -> Vec3 {
        (self.rotation.conjugate() * (p - self.position)) / self.scale
    }

    /// World direction to local space (rotation only).
    #[inline]
    pub fn inverse_transform_direction(&self, d: Vec3) -> Vec3 {
        self.rotation.conjugate() * d
    }

    /// Pose of a child attached at a local offset.
    #[inline]
    pub fn compose(&self, child_position: Vec3, child_rotation: Quat) -> Pose {
        Pose {
            position: self.transform_point(child_position),
            rotation: self.rotation * child_rotation,
            scale: self.scale,
        }
    }

    #[inline]
    pub fn is_uniform_scale(&self) -> bool {
        (self.scale.x - self.scale.y).abs() < 1.0e-6 && (self.scale.x - self.scale.z).abs() < 1.0e-6
    }
}

/// Mass and inertia of a shape at density 1, about its center of mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f32,
    /// Inertia tensor about the center of mass, in shape-local axes.
    pub inertia: Mat3,
}

impl MassProperties {
    pub const ZERO: MassProperties = MassProperties {
        mass: 0.0,
        inertia: Mat3::ZERO,
    };

    /// Rescale so the total mass becomes `mass` (inertia scales with it).
    pub fn scaled_to_mass(&self, mass: f32) -> MassProperties {
        if self.mass <= 0.0 {
            // No volume to distribute; fall back to a unit sphere.
            return MassProperties {
                mass,
                inertia: Mat3::from_diagonal(Vec3::splat(0.4 * mass)),
            };
        }
        let f = mass / self.mass;
        MassProperties {
            mass,
            inertia: self.inertia * f,
        }
    }

    /// Parallel-axis shift: inertia about a point at `-offset` from the COM
    /// (i.e. the COM moves by `offset`).
    pub fn translated(&self, offset: Vec3) -> MassProperties {
        let d = offset;
        let d2 = d.length_squared();
        let shift = Mat3::from_cols(
            Vec3::new(d2 - d.x * d.x, -d.x * d.y, -d.x * d.z),
            Vec3::new(-d.y * d.x, d2 - d.y * d.y, -d.y * d.z),
            Vec3::new(-d.z * d.x, -d.z * d.y, d2 - d.z * d.z),
        );
        MassProperties {
            mass: self.mass,
            inertia: self.inertia + shift * self.mass,
        }
    }

    /// Inertia expressed in axes rotated by `r`.
    pub fn rotated(&self, r: Mat3) -> MassProperties {
        MassProperties {
            mass: self.mass,
            inertia: r * self.inertia * r.transpose(),
        }
    }

    /// Mass properties of the same shape under a per-axis scale,
    /// derived through the second-moment matrix.
    pub fn scaled(&self, scale: Vec3) -> MassProperties {
        let det = scale.x * scale.y * scale.z;
        // J = integral of x x^T dm; I = tr(J) Id - J.
        let j = Mat3::from_diagonal(Vec3::splat(0.5 * trace(self.inertia))) - self.inertia;
        let s = Mat3::from_diagonal(scale);
        let j_scaled = (s * j * s) * det;
        MassProperties {
            mass: self.mass * det,
            inertia: Mat3::from_diagonal(Vec3::splat(trace(j_scaled))) - j_scaled,
        }
    }
}

#[inline]
fn trace(m: Mat3) -> f32 {
    m.x_axis.x + m.y_axis.y + m.z_axis.z
}

/// Discriminant of a [`Shape`], used to index the narrow-phase dispatch
/// matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeType {
    Sphere,
    Box,
    Capsule,
    Cylinder,
    Plane,
    ConvexHull,
    Mesh,
    Compound,
    Scaled,
    OffsetCom,
}

impl ShapeType {
    pub const COUNT: usize = 10;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            ShapeType::Sphere => 0,
            ShapeType::Box => 1,
            ShapeType::Capsule => 2,
            ShapeType::Cylinder => 3,
            ShapeType::Plane => 4,
            ShapeType::ConvexHull => 5,
            ShapeType::Mesh => 6,
            ShapeType::Compound => 7,
            ShapeType::Scaled => 8,
            ShapeType::OffsetCom => 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphereShape {
    pub radius: f32,
}

impl SphereShape {
    pub fn new(radius: f32) -> Self {
        assert!(radius > 0.0, "sphere radius must be positive");
        Self { radius }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    pub half_extents: Vec3,
    pub convex_radius: f32,
}

impl BoxShape {
    pub fn new(half_extents: Vec3) -> Self {
        let convex_radius = DEFAULT_CONVEX_RADIUS.min(0.5 * half_extents.min_element());
        Self::with_convex_radius(half_extents, convex_radius)
    }

    pub fn with_convex_radius(half_extents: Vec3, convex_radius: f32) -> Self {
        assert!(
            half_extents.min_element() > 0.0,
            "box half extents must be positive"
        );
        assert!(
            convex_radius >= 0.0 && convex_radius <= half_extents.min_element(),
            "convex radius must fit inside the box"
        );
        Self {
            half_extents,
            convex_radius,
        }
    }
}

/// Capsule along the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapsuleShape {
    pub half_height: f32,
    pub radius: f32,
}

impl CapsuleShape {
    pub fn new(half_height: f32, radius: f32) -> Self {
        assert!(
            half_height > 0.0 && radius > 0.0,
            "capsule dimensions must be positive"
        );
        Self {
            half_height,
            radius,
        }
    }
}

/// Cylinder along the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CylinderShape {
    pub half_height: f32,
    pub radius: f32,
    pub convex_radius: f32,
}

impl CylinderShape {
    pub fn new(half_height: f32, radius: f32) -> Self {
        let convex_radius = DEFAULT_CONVEX_RADIUS.min(0.5 * half_height.min(radius));
        Self::with_convex_radius(half_height, radius, convex_radius)
    }

    pub fn with_convex_radius(half_height: f32, radius: f32, convex_radius: f32) -> Self {
        assert!(
            half_height > 0.0 && radius > 0.0,
            "cylinder dimensions must be positive"
        );
        assert!(
            convex_radius >= 0.0 && convex_radius <= half_height.min(radius),
            "convex radius must fit inside the cylinder"
        );
        Self {
            half_height,
            radius,
            convex_radius,
        }
    }
}

/// Half-space `dot(normal, x) <= constant`, with the normal pointing out of
/// the solid region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneShape {
    pub normal: Vec3,
    pub constant: f32,
}

/// Extent used when bounding the (infinite) plane.
pub const PLANE_HALF_EXTENT: f32 = 1.0e6;

impl PlaneShape {
    pub fn new(normal: Vec3, constant: f32) -> Self {
        assert!(
            (normal.length_squared() - 1.0).abs() < 1.0e-4,
            "plane normal must be unit length"
        );
        Self { normal, constant }
    }

    /// Signed distance of a point above the surface.
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.constant
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundChild {
    pub position: Vec3,
    pub rotation: Quat,
    pub shape: Arc<Shape>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundShape {
    pub children: Vec<CompoundChild>,
}

impl CompoundShape {
    pub fn new(children: Vec<CompoundChild>) -> Self {
        assert!(!children.is_empty(), "compound needs at least one child");
        Self { children }
    }

    /// Bits one level of sub-shape path consumes for this compound.
    #[inline]
    pub fn sub_shape_bits(&self) -> u8 {
        SubShapeId::bits_for(self.children.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaledShape {
    pub inner: Arc<Shape>,
    pub scale: Vec3,
}

impl ScaledShape {
    pub fn new(inner: Arc<Shape>, scale: Vec3) -> Self {
        assert!(scale.min_element() > 0.0, "scale must be positive");
        Self { inner, scale }
    }
}

/// Wrapper that shifts the center of mass without moving geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetComShape {
    pub inner: Arc<Shape>,
    pub offset: Vec3,
}

impl OffsetComShape {
    pub fn new(inner: Arc<Shape>, offset: Vec3) -> Self {
        Self { inner, offset }
    }
}

/// A collision shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Shape {
    Sphere(SphereShape),
    Box(BoxShape),
    Capsule(CapsuleShape),
    Cylinder(CylinderShape),
    Plane(PlaneShape),
    ConvexHull(ConvexHullShape),
    Mesh(TriangleMesh),
    Compound(CompoundShape),
    Scaled(ScaledShape),
    OffsetCom(OffsetComShape),
}

impl Shape {
    pub fn sphere(radius: f32) -> Shape {
        Shape::Sphere(SphereShape::new(radius))
    }

    pub fn cuboid(half_extents: Vec3) -> Shape {
        Shape::Box(BoxShape::new(half_extents))
    }

    pub fn capsule(half_height: f32, radius: f32) -> Shape {
        Shape::Capsule(CapsuleShape::new(half_height, radius))
    }

    pub fn cylinder(half_height: f32, radius: f32) -> Shape {
        Shape::Cylinder(CylinderShape::new(half_height, radius))
    }

    pub fn plane(normal: Vec3, constant: f32) -> Shape {
        Shape::Plane(PlaneShape::new(normal, constant))
    }

    #[inline]
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Sphere(_) => ShapeType::Sphere,
            Shape::Box(_) => ShapeType::Box,
            Shape::Capsule(_) => ShapeType::Capsule,
            Shape::Cylinder(_) => ShapeType::Cylinder,
            Shape::Plane(_) => ShapeType::Plane,
            Shape::ConvexHull(_) => ShapeType::ConvexHull,
            Shape::Mesh(_) => ShapeType::Mesh,
            Shape::Compound(_) => ShapeType::Compound,
            Shape::Scaled(_) => ShapeType::Scaled,
            Shape::OffsetCom(_) => ShapeType::OffsetCom,
        }
    }

    /// Whether the shape has a support function (GJK-compatible).
    pub fn is_convex(&self) -> bool {
        match self {
            Shape::Sphere(_)
            | Shape::Box(_)
            | Shape::Capsule(_)
            | Shape::Cylinder(_)
            | Shape::ConvexHull(_) => true,
            Shape::Plane(_) | Shape::Mesh(_) | Shape::Compound(_) => false,
            Shape::Scaled(s) => s.inner.is_convex(),
            Shape::OffsetCom(s) => s.inner.is_convex(),
        }
    }

    /// Whether any leaf of the shape is a triangle mesh.
    pub fn contains_mesh(&self) -> bool {
        match self {
            Shape::Mesh(_) => true,
            Shape::Compound(c) => c.children.iter().any(|ch| ch.shape.contains_mesh()),
            Shape::Scaled(s) => s.inner.contains_mesh(),
            Shape::OffsetCom(s) => s.inner.contains_mesh(),
            _ => false,
        }
    }

    /// Convex radius folded into the support function, 0 for shapes
    /// without one.
    pub fn convex_radius(&self) -> f32 {
        match self {
            Shape::Sphere(s) => s.radius,
            Shape::Box(s) => s.convex_radius,
            Shape::Capsule(s) => s.radius,
            Shape::Cylinder(s) => s.convex_radius,
            Shape::ConvexHull(s) => s.convex_radius,
            _ => 0.0,
        }
    }

    /// Bounding box in the shape's local space (unit scale).
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Shape::Sphere(s) => {
                Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(s.radius))
            }
            Shape::Box(s) => Aabb::from_center_extents(Vec3::ZERO, s.half_extents),
            Shape::Capsule(s) => Aabb::from_center_extents(
                Vec3::ZERO,
                Vec3::new(s.radius, s.half_height + s.radius, s.radius),
            ),
            Shape::Cylinder(s) => Aabb::from_center_extents(
                Vec3::ZERO,
                Vec3::new(s.radius, s.half_height, s.radius),
            ),
            Shape::Plane(s) => {
                // Slab behind the surface, thick enough to act as a half space.
                let he = Vec3::splat(PLANE_HALF_EXTENT);
                let center = s.normal * (s.constant - PLANE_HALF_EXTENT);
                Aabb::from_center_extents(center, he)
            }
            Shape::ConvexHull(s) => s.local_bounds(),
            Shape::Mesh(s) => s.local_bounds(),
            Shape::Compound(c) => {
                let mut aabb = Aabb::INVALID;
                for child in &c.children {
                    let child_aabb = child
                        .shape
                        .local_aabb()
                        .transformed(child.rotation, child.position);
                    aabb = aabb.merged(&child_aabb);
                }
                aabb
            }
            Shape::Scaled(s) => {
                let inner = s.inner.local_aabb();
                Aabb {
                    min: inner.min * s.scale,
                    max: inner.max * s.scale,
                }
            }
            Shape::OffsetCom(s) => s.inner.local_aabb(),
        }
    }

    /// Bounding box under a world transform with per-axis scale.
    pub fn world_aabb(&self, pose: &Pose) -> Aabb {
        let local = self.local_aabb();
        let scaled = Aabb {
            min: local.min * pose.scale,
            max: local.max * pose.scale,
        };
        scaled.transformed(pose.rotation, pose.position)
    }

    pub fn volume(&self) -> f32 {
        match self {
            Shape::Sphere(s) => 4.0 / 3.0 * std::f32::consts::PI * s.radius.powi(3),
            Shape::Box(s) => {
                8.0 * s.half_extents.x * s.half_extents.y * s.half_extents.z
            }
            Shape::Capsule(s) => {
                let cylinder = std::f32::consts::PI * s.radius * s.radius * 2.0 * s.half_height;
                let sphere = 4.0 / 3.0 * std::f32::consts::PI * s.radius.powi(3);
                cylinder + sphere
            }
            Shape::Cylinder(s) => std::f32::consts::PI * s.radius * s.radius * 2.0 * s.half_height,
            Shape::Plane(_) | Shape::Mesh(_) => 0.0,
            Shape::ConvexHull(s) => s.volume(),
            Shape::Compound(c) => c.children.iter().map(|ch| ch.shape.volume()).sum(),
            Shape::Scaled(s) => s.inner.volume() * s.scale.x * s.scale.y * s.scale.z,
            Shape::OffsetCom(s) => s.inner.volume(),
        }
    }

    /// Center of mass in shape-local space.
    pub fn center_of_mass(&self) -> Vec3 {
        match self {
            Shape::Sphere(_)
            | Shape::Box(_)
            | Shape::Capsule(_)
            | Shape::Cylinder(_)
            | Shape::Plane(_) => Vec3::ZERO,
            Shape::ConvexHull(s) => s.center_of_mass(),
            Shape::Mesh(s) => s.local_bounds().center(),
            Shape::Compound(c) => {
                let mut total_mass = 0.0;
                let mut com = Vec3::ZERO;
                for child in &c.children {
                    let m = child.shape.volume();
                    com += m * (child.position + child.rotation * child.shape.center_of_mass());
                    total_mass += m;
                }
                if total_mass > 0.0 {
                    com / total_mass
                } else {
                    Vec3::ZERO
                }
            }
            Shape::Scaled(s) => s.inner.center_of_mass() * s.scale,
            Shape::OffsetCom(s) => s.inner.center_of_mass() + s.offset,
        }
    }

    /// Density-1 mass properties about the shape's center of mass.
    pub fn mass_properties(&self) -> MassProperties {
        match self {
            Shape::Sphere(s) => {
                let mass = self.volume();
                let i = 0.4 * mass * s.radius * s.radius;
                MassProperties {
                    mass,
                    inertia: Mat3::from_diagonal(Vec3::splat(i)),
                }
            }
            Shape::Box(s) => {
                let mass = self.volume();
                let d = s.half_extents * s.half_extents;
                MassProperties {
                    mass,
                    inertia: Mat3::from_diagonal(
                        Vec3::new(d.y + d.z, d.x + d.z, d.x + d.y) * (mass / 3.0),
                    ),
                }
            }
            Shape::Capsule(s) => capsule_mass_properties(s),
            Shape::Cylinder(s) => {
                let mass = self.volume();
                let r2 = s.radius * s.radius;
                let h2 = 4.0 * s.half_height * s.half_height;
                let ixx = mass * (3.0 * r2 + h2) / 12.0;
                MassProperties {
                    mass,
                    inertia: Mat3::from_diagonal(Vec3::new(ixx, 0.5 * mass * r2, ixx)),
                }
            }
            Shape::Plane(_) | Shape::Mesh(_) => MassProperties::ZERO,
            Shape::ConvexHull(s) => s.mass_properties(),
            Shape::Compound(c) => {
                let com = self.center_of_mass();
                let mut total = MassProperties::ZERO;
                for child in &c.children {
                    let rot = Mat3::from_quat(child.rotation);
                    let child_com_world =
                        child.position + child.rotation * child.shape.center_of_mass();
                    let mp = child
                        .shape
                        .mass_properties()
                        .rotated(rot)
                        .translated(child_com_world - com);
                    total.mass += mp.mass;
                    total.inertia += mp.inertia;
                }
                total
            }
            Shape::Scaled(s) => s.inner.mass_properties().scaled(s.scale),
            Shape::OffsetCom(s) => s.inner.mass_properties(),
        }
    }

    /// Visit every leaf shape with its composed pose and sub-shape path.
    ///
    /// Leaves are the convex shapes plus planes and triangle meshes; the
    /// wrappers (compound, scaled, offset-COM) recurse. The callback returns
    /// `false` to stop the walk early.
    pub fn for_each_leaf(
        &self,
        pose: &Pose,
        prefix: SubShapeId,
        f: &mut dyn FnMut(&Shape, &Pose, SubShapeId) -> bool,
    ) -> bool {
        match self {
            Shape::Compound(c) => {
                let bits = c.sub_shape_bits();
                for (i, child) in c.children.iter().enumerate() {
                    debug_assert!(
                        pose.is_uniform_scale() || child.rotation == Quat::IDENTITY,
                        "non-uniform scale on a rotated compound child"
                    );
                    let child_pose = pose.compose(child.position, child.rotation);
                    if !child
                        .shape
                        .for_each_leaf(&child_pose, prefix.pushed(i as u32, bits), f)
                    {
                        return false;
                    }
                }
                true
            }
            Shape::Scaled(s) => {
                let scaled_pose = Pose {
                    scale: pose.scale * s.scale,
                    ..*pose
                };
                s.inner.for_each_leaf(&scaled_pose, prefix, f)
            }
            Shape::OffsetCom(s) => s.inner.for_each_leaf(pose, prefix, f),
            _ => f(self, pose, prefix),
        }
    }

    /// Resolve a sub-shape path produced by [`Shape::for_each_leaf`] or the
    /// narrow phase back to the leaf it names.
    ///
    /// For triangle meshes the remaining bits are the triangle index; the
    /// mesh itself is returned. Returns `None` for stale paths.
    pub fn leaf_shape(&self, id: SubShapeId) -> Option<(&Shape, SubShapeId)> {
        match self {
            Shape::Compound(c) => {
                let (index, rest) = id.popped(c.sub_shape_bits());
                let child = c.children.get(index as usize)?;
                child.shape.leaf_shape(rest)
            }
            Shape::Scaled(s) => s.inner.leaf_shape(id),
            Shape::OffsetCom(s) => s.inner.leaf_shape(id),
            _ => Some((self, id)),
        }
    }
}

fn capsule_mass_properties(s: &CapsuleShape) -> MassProperties {
    let r = s.radius;
    let h = 2.0 * s.half_height;
    let cylinder_mass = std::f32::consts::PI * r * r * h;
    let sphere_mass = 4.0 / 3.0 * std::f32::consts::PI * r.powi(3);

    // Cylinder about its COM.
    let cyl_ixx = cylinder_mass * (3.0 * r * r + h * h) / 12.0;
    let cyl_iyy = 0.5 * cylinder_mass * r * r;

    // Two hemispheres = one sphere, with the parallel-axis shift of each
    // hemisphere's COM (3r/8 above the cap plane).
    let sph_i = 0.4 * sphere_mass * r * r;
    let hemi_offset = s.half_height + 3.0 * r / 8.0;
    let sph_ixx = sph_i + sphere_mass * (hemi_offset * hemi_offset - (3.0 * r / 8.0).powi(2));

    MassProperties {
        mass: cylinder_mass + sphere_mass,
        inertia: Mat3::from_diagonal(Vec3::new(
            cyl_ixx + sph_ixx,
            cyl_iyy + sph_i,
            cyl_ixx + sph_ixx,
        )),
    }
}
