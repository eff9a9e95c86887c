//! Narrow-phase collision: GJK/EPA and per-shape-pair dispatch.
//!
//! Shape pairs are resolved through two function matrices indexed by
//! [`ShapeType`]: one producing contact manifolds, one producing swept hits.
//! Convex pairs share a single GJK/EPA entry; composite shapes (compound,
//! scaled, offset-COM) and triangle meshes register re-dispatching entries
//! that walk their leaves and call back into the matrix; missing pairs
//! (mesh vs mesh) are skipped.

pub mod convex;
pub mod epa;
pub mod gjk;
pub mod mesh;
pub mod ray;

use std::sync::OnceLock;

use glam::Vec3;

use crate::shape::{Pose, Shape, ShapeType, SubShapeId};

/// Settings for discrete shape-vs-shape collision.
#[derive(Debug, Clone)]
pub struct CollideSettings {
    /// Report pairs separated by up to this distance (speculative margin).
    pub max_separation: f32,
    /// Collect the supporting faces so callers can build multi-point
    /// manifolds.
    pub collect_faces: bool,
    /// GJK/EPA convergence tolerance.
    pub tolerance: f32,
    /// Collide against the back side of one-sided triangles.
    pub collide_with_backfaces: bool,
}

impl Default for CollideSettings {
    fn default() -> Self {
        Self {
            max_separation: 0.0,
            collect_faces: true,
            tolerance: 1.0e-4,
            collide_with_backfaces: false,
        }
    }
}

/// Settings for swept (cast) shape queries.
#[derive(Debug, Clone)]
pub struct CastSettings {
    /// Cull triangles whose normal points along the sweep.
    pub backface_culling: bool,
    /// When the shapes already overlap at the start, run EPA and report the
    /// deepest point at fraction 0 instead of skipping the hit.
    pub return_deepest_point: bool,
    /// GJK convergence tolerance.
    pub tolerance: f32,
}

impl Default for CastSettings {
    fn default() -> Self {
        Self {
            backface_culling: true,
            return_deepest_point: false,
            tolerance: 1.0e-4,
        }
    }
}

/// Status of a cast query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastStatus {
    Colliding,
    NotColliding,
    BackfaceCulled,
}

/// One discrete contact between two shapes, in world space.
#[derive(Debug, Clone)]
pub struct CollideShapeResult {
    /// Deepest point on the surface of shape A.
    pub point_a: Vec3,
    /// Deepest point on the surface of shape B.
    pub point_b: Vec3,
    /// Penetration axis pointing from A towards B.
    pub axis: Vec3,
    /// Unit contact normal, from A towards B.
    pub normal: Vec3,
    /// Penetration depth (negative when separated within the margin).
    pub depth: f32,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
    /// Supporting face on A, when face collection is enabled.
    pub face_a: Vec<Vec3>,
    /// Supporting face on B.
    pub face_b: Vec<Vec3>,
}

impl CollideShapeResult {
    /// Flip A and B in place.
    pub fn swapped(mut self) -> Self {
        std::mem::swap(&mut self.point_a, &mut self.point_b);
        std::mem::swap(&mut self.face_a, &mut self.face_b);
        std::mem::swap(&mut self.sub_shape_a, &mut self.sub_shape_b);
        self.axis = -self.axis;
        self.normal = -self.normal;
        self
    }
}

/// Result of sweeping shape A along a displacement against shape B.
#[derive(Debug, Clone)]
pub struct ShapeCastResult {
    pub status: CastStatus,
    /// Fraction along the displacement at first touch.
    pub fraction: f32,
    /// Contact point on A at the time of impact.
    pub point_a: Vec3,
    /// Contact point on B.
    pub point_b: Vec3,
    /// Unit contact normal, from A towards B.
    pub normal: Vec3,
    /// Penetration depth at the reported configuration (0 for grazing
    /// hits, positive when `return_deepest_point` reported an initial
    /// overlap).
    pub depth: f32,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
}

impl ShapeCastResult {
    pub fn swapped(mut self, displacement: Vec3) -> Self {
        std::mem::swap(&mut self.point_a, &mut self.point_b);
        std::mem::swap(&mut self.sub_shape_a, &mut self.sub_shape_b);
        self.normal = -self.normal;
        // The swapped cast moved B by -displacement; its contact points are
        // reported in the un-swapped frame by advancing along the sweep.
        self.point_a += displacement * self.fraction;
        self.point_b += displacement * self.fraction;
        self
    }
}

/// Receives narrow-phase hits; implementations decide which to keep and can
/// stop the search early.
pub trait Collector<H> {
    fn add_hit(&mut self, hit: H);

    /// Hits ranking worse than this are skipped; the narrow phase also uses
    /// it to bound tree traversals. Casts rank by fraction, collides by
    /// negated penetration depth.
    fn early_out_fraction(&self) -> f32 {
        f32::MAX
    }

    /// Stop the whole query (the "any hit" strategy).
    fn should_exit(&self) -> bool {
        false
    }
}

/// Ranking value a collector sorts on; see
/// [`Collector::early_out_fraction`].
pub trait EarlyOutHit {
    fn early_out_value(&self) -> f32;
}

impl EarlyOutHit for CollideShapeResult {
    fn early_out_value(&self) -> f32 {
        -self.depth
    }
}

impl EarlyOutHit for ShapeCastResult {
    fn early_out_value(&self) -> f32 {
        self.fraction
    }
}

/// Arguments to a collide dispatch entry.
pub struct CollideArgs<'a> {
    pub shape_a: &'a Shape,
    pub pose_a: Pose,
    pub shape_b: &'a Shape,
    pub pose_b: Pose,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
    pub settings: &'a CollideSettings,
}

impl<'a> CollideArgs<'a> {
    fn swapped(&self) -> CollideArgs<'a> {
        CollideArgs {
            shape_a: self.shape_b,
            pose_a: self.pose_b,
            shape_b: self.shape_a,
            pose_b: self.pose_a,
            sub_shape_a: self.sub_shape_b,
            sub_shape_b: self.sub_shape_a,
            settings: self.settings,
        }
    }
}

/// Arguments to a cast dispatch entry: shape A sweeps along `displacement`.
pub struct CastArgs<'a> {
    pub shape_a: &'a Shape,
    pub pose_a: Pose,
    pub displacement: Vec3,
    pub shape_b: &'a Shape,
    pub pose_b: Pose,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
    pub settings: &'a CastSettings,
}

impl<'a> CastArgs<'a> {
    fn swapped(&self) -> CastArgs<'a> {
        CastArgs {
            shape_a: self.shape_b,
            pose_a: self.pose_b,
            displacement: -self.displacement,
            shape_b: self.shape_a,
            pose_b: self.pose_a,
            sub_shape_a: self.sub_shape_b,
            sub_shape_b: self.sub_shape_a,
            settings: self.settings,
        }
    }
}

pub type CollideFn = fn(&CollideArgs, &mut dyn Collector<CollideShapeResult>);
pub type CastFn = fn(&CastArgs, &mut dyn Collector<ShapeCastResult>);

const N: usize = ShapeType::COUNT;

/// The `(shape type, shape type)` dispatch matrices.
pub struct DispatchTables {
    collide: [[Option<CollideFn>; N]; N],
    cast: [[Option<CastFn>; N]; N],
}

static TABLES: OnceLock<DispatchTables> = OnceLock::new();

/// The registered dispatch matrices (built on first use).
pub fn tables() -> &'static DispatchTables {
    TABLES.get_or_init(DispatchTables::with_default_shapes)
}

impl DispatchTables {
    /// Register the built-in shapes.
    pub fn with_default_shapes() -> Self {
        use ShapeType::*;
        let mut t = DispatchTables {
            collide: [[None; N]; N],
            cast: [[None; N]; N],
        };

        let convex = [Sphere, Box, Capsule, Cylinder, ConvexHull];
        let composite = [Compound, Scaled, OffsetCom];
        let all = [
            Sphere, Box, Capsule, Cylinder, Plane, ConvexHull, Mesh, Compound, Scaled, OffsetCom,
        ];

        // Convex vs convex, with a closed form for sphere pairs.
        for &a in &convex {
            for &b in &convex {
                t.set_collide(a, b, convex::collide_convex_vs_convex);
                t.set_cast(a, b, convex::cast_convex_vs_convex);
            }
        }
        t.set_collide(Sphere, Sphere, convex::collide_sphere_vs_sphere);

        // Half spaces: the direct entry has the plane on the B side.
        for &a in &convex {
            t.set_collide(a, Plane, convex::collide_convex_vs_plane);
            t.set_collide(Plane, a, swapped_collide);
            t.set_cast(a, Plane, convex::cast_convex_vs_plane);
            t.set_cast(Plane, a, swapped_cast);
        }

        // Triangle meshes: the direct entry has the mesh on the B side.
        for &a in &convex {
            t.set_collide(a, Mesh, mesh::collide_convex_vs_mesh);
            t.set_collide(Mesh, a, swapped_collide);
            t.set_cast(a, Mesh, mesh::cast_convex_vs_mesh);
            t.set_cast(Mesh, a, swapped_cast);
        }

        // Composites walk their children and re-enter the matrix, so they
        // pair with everything (including each other).
        for &c in &composite {
            for &other in &all {
                t.set_collide(c, other, composite_collide_a);
                t.set_cast(c, other, composite_cast_a);
                if !matches!(other, Compound | Scaled | OffsetCom) {
                    t.set_collide(other, c, swapped_collide);
                    t.set_cast(other, c, swapped_cast);
                }
            }
        }

        t
    }

    fn set_collide(&mut self, a: ShapeType, b: ShapeType, f: CollideFn) {
        self.collide[a.index()][b.index()] = Some(f);
    }

    fn set_cast(&mut self, a: ShapeType, b: ShapeType, f: CastFn) {
        self.cast[a.index()][b.index()] = Some(f);
    }
}

/// Collide two shapes through the dispatch matrix.
///
/// Unregistered pairs (mesh vs mesh, plane vs plane) produce no hits.
pub fn collide_shape_vs_shape(args: &CollideArgs, collector: &mut dyn Collector<CollideShapeResult>) {
    let a = args.shape_a.shape_type().index();
    let b = args.shape_b.shape_type().index();
    match tables().collide[a][b] {
        Some(f) => f(args, collector),
        None => {
            tracing::trace!(
                "no collide entry for {:?} vs {:?}",
                args.shape_a.shape_type(),
                args.shape_b.shape_type()
            );
        }
    }
}

/// Sweep shape A along `args.displacement` against shape B through the
/// dispatch matrix.
pub fn cast_shape_vs_shape(args: &CastArgs, collector: &mut dyn Collector<ShapeCastResult>) {
    let a = args.shape_a.shape_type().index();
    let b = args.shape_b.shape_type().index();
    match tables().cast[a][b] {
        Some(f) => f(args, collector),
        None => {
            tracing::trace!(
                "no cast entry for {:?} vs {:?}",
                args.shape_a.shape_type(),
                args.shape_b.shape_type()
            );
        }
    }
}

/// Wrapper flipping collide hits from a swapped dispatch.
struct FlipCollide<'a> {
    inner: &'a mut dyn Collector<CollideShapeResult>,
}

impl Collector<CollideShapeResult> for FlipCollide<'_> {
    fn add_hit(&mut self, hit: CollideShapeResult) {
        self.inner.add_hit(hit.swapped());
    }

    fn early_out_fraction(&self) -> f32 {
        self.inner.early_out_fraction()
    }

    fn should_exit(&self) -> bool {
        self.inner.should_exit()
    }
}

fn swapped_collide(args: &CollideArgs, collector: &mut dyn Collector<CollideShapeResult>) {
    let swapped = args.swapped();
    collide_shape_vs_shape(&swapped, &mut FlipCollide { inner: collector });
}

/// Wrapper flipping cast hits from a swapped dispatch.
struct FlipCast<'a> {
    inner: &'a mut dyn Collector<ShapeCastResult>,
    displacement: Vec3,
}

impl Collector<ShapeCastResult> for FlipCast<'_> {
    fn add_hit(&mut self, hit: ShapeCastResult) {
        self.inner.add_hit(hit.swapped(self.displacement));
    }

    fn early_out_fraction(&self) -> f32 {
        self.inner.early_out_fraction()
    }

    fn should_exit(&self) -> bool {
        self.inner.should_exit()
    }
}

fn swapped_cast(args: &CastArgs, collector: &mut dyn Collector<ShapeCastResult>) {
    let swapped = args.swapped();
    let displacement = args.displacement;
    cast_shape_vs_shape(
        &swapped,
        &mut FlipCast {
            inner: collector,
            displacement,
        },
    );
}

/// Composite on the A side: walk leaves, cull by bounds, re-dispatch.
fn composite_collide_a(args: &CollideArgs, collector: &mut dyn Collector<CollideShapeResult>) {
    let bounds_b = args
        .shape_b
        .world_aabb(&args.pose_b)
        .expanded(args.settings.max_separation);
    args.shape_a
        .for_each_leaf(&args.pose_a, args.sub_shape_a, &mut |leaf, pose, id| {
            if collector.should_exit() {
                return false;
            }
            if leaf.world_aabb(pose).overlaps(&bounds_b) {
                let leaf_args = CollideArgs {
                    shape_a: leaf,
                    pose_a: *pose,
                    sub_shape_a: id,
                    ..*args
                };
                collide_shape_vs_shape(&leaf_args, collector);
            }
            true
        });
}

/// Composite on the A side of a cast.
fn composite_cast_a(args: &CastArgs, collector: &mut dyn Collector<ShapeCastResult>) {
    let bounds_b = args.shape_b.world_aabb(&args.pose_b);
    args.shape_a
        .for_each_leaf(&args.pose_a, args.sub_shape_a, &mut |leaf, pose, id| {
            if collector.should_exit() {
                return false;
            }
            let swept = leaf.world_aabb(pose).swept(args.displacement);
            if swept.overlaps(&bounds_b) {
                let leaf_args = CastArgs {
                    shape_a: leaf,
                    pose_a: *pose,
                    sub_shape_a: id,
                    ..*args
                };
                cast_shape_vs_shape(&leaf_args, collector);
            }
            true
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::AllCollector;
    use glam::Quat;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_sphere_pair() {
        let a = Shape::sphere(1.0);
        let b = Shape::sphere(1.0);
        let args = CollideArgs {
            shape_a: &a,
            pose_a: Pose::new(Vec3::ZERO, Quat::IDENTITY),
            shape_b: &b,
            pose_b: Pose::new(Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY),
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CollideSettings::default(),
        };
        let mut collector = AllCollector::default();
        collide_shape_vs_shape(&args, &mut collector);
        assert_eq!(collector.hits.len(), 1);
        let hit = &collector.hits[0];
        assert!((hit.normal - Vec3::X).length() < 1e-4);
        assert!((hit.depth - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_mesh_vs_mesh_skipped() {
        let mesh = Shape::Mesh(
            crate::shape::TriangleMesh::new(
                vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                vec![[0, 1, 2]],
            )
            .unwrap(),
        );
        let args = CollideArgs {
            shape_a: &mesh,
            pose_a: Pose::IDENTITY,
            shape_b: &mesh,
            pose_b: Pose::IDENTITY,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CollideSettings::default(),
        };
        let mut collector = AllCollector::default();
        collide_shape_vs_shape(&args, &mut collector);
        assert!(collector.hits.is_empty());
    }

    #[test]
    fn test_swapped_plane_entry() {
        // Plane as shape A must produce a flipped result relative to the
        // direct convex-vs-plane entry.
        let plane = Shape::plane(Vec3::Y, 0.0);
        let sphere = Shape::sphere(1.0);
        let pose_sphere = Pose::new(Vec3::new(0.0, 0.5, 0.0), Quat::IDENTITY);

        let args = CollideArgs {
            shape_a: &plane,
            pose_a: Pose::IDENTITY,
            shape_b: &sphere,
            pose_b: pose_sphere,
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CollideSettings::default(),
        };
        let mut collector = AllCollector::default();
        collide_shape_vs_shape(&args, &mut collector);
        assert_eq!(collector.hits.len(), 1);
        let hit = &collector.hits[0];
        // Normal from plane (A) towards the sphere (B): +Y.
        assert!((hit.normal - Vec3::Y).length() < 1e-4);
        assert!((hit.depth - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_compound_redispatch() {
        let compound = Shape::Compound(crate::shape::CompoundShape::new(vec![
            crate::shape::CompoundChild {
                position: Vec3::new(3.0, 0.0, 0.0),
                rotation: Quat::IDENTITY,
                shape: Arc::new(Shape::sphere(1.0)),
            },
            crate::shape::CompoundChild {
                position: Vec3::new(-3.0, 0.0, 0.0),
                rotation: Quat::IDENTITY,
                shape: Arc::new(Shape::sphere(1.0)),
            },
        ]));
        let sphere = Shape::sphere(1.0);
        let args = CollideArgs {
            shape_a: &compound,
            pose_a: Pose::IDENTITY,
            shape_b: &sphere,
            pose_b: Pose::new(Vec3::new(4.0, 0.0, 0.0), Quat::IDENTITY),
            sub_shape_a: SubShapeId::empty(),
            sub_shape_b: SubShapeId::empty(),
            settings: &CollideSettings::default(),
        };
        let mut collector = AllCollector::default();
        collide_shape_vs_shape(&args, &mut collector);
        assert_eq!(collector.hits.len(), 1);
        // The hit names the first child.
        let (index, rest) = collector.hits[0].sub_shape_a.popped(1);
        assert_eq!(index, 0);
        assert!(rest.is_empty());
    }
}
