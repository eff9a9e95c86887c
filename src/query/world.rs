//! World-level queries: ray casts, shape casts, point and shape overlaps,
//! and raw broadphase visitors.

use std::sync::Arc;

use glam::Vec3;

use crate::aabb::Aabb;
use crate::body::{Body, BodyId};
use crate::collide::ray::{
    cast_ray_vs_shape, collide_point_vs_shape, PointHit, RayCastSettings, RayHit,
};
use crate::collide::{
    cast_shape_vs_shape, collide_shape_vs_shape, CastArgs, CastSettings, CollideArgs,
    CollideSettings, CollideShapeResult, Collector, EarlyOutHit, ShapeCastResult,
};
use crate::layers::BroadPhaseLayer;
use crate::query::QueryFilter;
use crate::shape::{Pose, Shape, SubShapeId, EMPTY_SUB_SHAPE_ID};
use crate::world::World;

/// A ray hit on a body.
#[derive(Debug, Clone, Copy)]
pub struct WorldRayHit {
    pub body: BodyId,
    pub sub_shape: SubShapeId,
    pub fraction: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

impl EarlyOutHit for WorldRayHit {
    fn early_out_value(&self) -> f32 {
        self.fraction
    }
}

/// A swept-shape hit on a body.
#[derive(Debug, Clone)]
pub struct WorldShapeCastHit {
    pub body: BodyId,
    pub cast: ShapeCastResult,
}

impl EarlyOutHit for WorldShapeCastHit {
    fn early_out_value(&self) -> f32 {
        self.cast.fraction
    }
}

/// A point-overlap hit on a body.
#[derive(Debug, Clone, Copy)]
pub struct WorldPointHit {
    pub body: BodyId,
    pub sub_shape: SubShapeId,
}

impl EarlyOutHit for WorldPointHit {
    fn early_out_value(&self) -> f32 {
        0.0
    }
}

/// A shape-overlap hit on a body.
#[derive(Debug, Clone)]
pub struct WorldShapeHit {
    pub body: BodyId,
    pub result: CollideShapeResult,
}

impl EarlyOutHit for WorldShapeHit {
    fn early_out_value(&self) -> f32 {
        -self.result.depth
    }
}

/// Adapter attaching a body id to shape-level hits on their way into the
/// caller's collector.
struct MapCollector<'a, A, B> {
    inner: &'a mut dyn Collector<B>,
    map: &'a dyn Fn(A) -> B,
}

impl<A, B> Collector<A> for MapCollector<'_, A, B> {
    fn add_hit(&mut self, hit: A) {
        self.inner.add_hit((self.map)(hit));
    }

    fn early_out_fraction(&self) -> f32 {
        self.inner.early_out_fraction()
    }

    fn should_exit(&self) -> bool {
        self.inner.should_exit()
    }
}

impl World {
    /// Cast a ray `origin + fraction * direction` against the world.
    pub fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        settings: &RayCastSettings,
        filter: &QueryFilter,
        collector: &mut dyn Collector<WorldRayHit>,
    ) {
        for layer_index in 0..self.broadphase().num_layers() {
            let layer = BroadPhaseLayer(layer_index as u8);
            if !filter.accepts_broadphase_layer(layer) {
                continue;
            }
            self.broadphase()
                .tree(layer)
                .for_each_along_ray(origin, direction, &mut |body_id| {
                    if collector.should_exit() {
                        return None;
                    }
                    let Ok(body) = self.bodies().get::<&Body>(body_id) else {
                        return None;
                    };
                    if !filter.accepts_body(body_id, &body) {
                        return None;
                    }
                    let shape = Arc::clone(&body.shape);
                    let pose = body.pose();
                    drop(body);

                    let map = |hit: RayHit| WorldRayHit {
                        body: body_id,
                        sub_shape: hit.sub_shape,
                        fraction: hit.fraction,
                        point: hit.point,
                        normal: hit.normal,
                    };
                    let mut mapped = MapCollector {
                        inner: &mut *collector,
                        map: &map,
                    };
                    cast_ray_vs_shape(
                        origin,
                        direction,
                        &shape,
                        &pose,
                        EMPTY_SUB_SHAPE_ID,
                        settings,
                        &mut mapped,
                    );
                    Some(collector.early_out_fraction())
                });
        }
    }

    /// Sweep a shape along `displacement` against the world.
    pub fn cast_shape(
        &self,
        shape: &Shape,
        pose: &Pose,
        displacement: Vec3,
        settings: &CastSettings,
        filter: &QueryFilter,
        collector: &mut dyn Collector<WorldShapeCastHit>,
    ) {
        self.cast_shape_filtered(shape, pose, displacement, settings, filter, collector, None);
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn cast_shape_filtered(
        &self,
        shape: &Shape,
        pose: &Pose,
        displacement: Vec3,
        settings: &CastSettings,
        filter: &QueryFilter,
        collector: &mut dyn Collector<WorldShapeCastHit>,
        exclude: Option<BodyId>,
    ) {
        let swept = shape.world_aabb(pose).swept(displacement);
        for layer_index in 0..self.broadphase().num_layers() {
            let layer = BroadPhaseLayer(layer_index as u8);
            if !filter.accepts_broadphase_layer(layer) {
                continue;
            }
            self.broadphase()
                .tree(layer)
                .for_each_in_aabb(&swept, &mut |body_id| {
                    if collector.should_exit() {
                        return false;
                    }
                    if exclude == Some(body_id) {
                        return true;
                    }
                    let Ok(body) = self.bodies().get::<&Body>(body_id) else {
                        return true;
                    };
                    if !filter.accepts_body(body_id, &body) {
                        return true;
                    }
                    let body_shape = Arc::clone(&body.shape);
                    let body_pose = body.pose();
                    drop(body);

                    let map = |cast: ShapeCastResult| WorldShapeCastHit {
                        body: body_id,
                        cast,
                    };
                    let mut mapped = MapCollector {
                        inner: &mut *collector,
                        map: &map,
                    };
                    cast_shape_vs_shape(
                        &CastArgs {
                            shape_a: shape,
                            pose_a: *pose,
                            displacement,
                            shape_b: &body_shape,
                            pose_b: body_pose,
                            sub_shape_a: EMPTY_SUB_SHAPE_ID,
                            sub_shape_b: EMPTY_SUB_SHAPE_ID,
                            settings,
                        },
                        &mut mapped,
                    );
                    true
                });
        }
    }

    /// Find bodies containing a world-space point.
    pub fn collide_point(
        &self,
        point: Vec3,
        filter: &QueryFilter,
        collector: &mut dyn Collector<WorldPointHit>,
    ) {
        for layer_index in 0..self.broadphase().num_layers() {
            let layer = BroadPhaseLayer(layer_index as u8);
            if !filter.accepts_broadphase_layer(layer) {
                continue;
            }
            self.broadphase()
                .tree(layer)
                .for_each_at_point(point, &mut |body_id| {
                    if collector.should_exit() {
                        return false;
                    }
                    let Ok(body) = self.bodies().get::<&Body>(body_id) else {
                        return true;
                    };
                    if !filter.accepts_body(body_id, &body) {
                        return true;
                    }
                    let shape = Arc::clone(&body.shape);
                    let pose = body.pose();
                    drop(body);

                    let map = |hit: PointHit| WorldPointHit {
                        body: body_id,
                        sub_shape: hit.sub_shape,
                    };
                    let mut mapped = MapCollector {
                        inner: &mut *collector,
                        map: &map,
                    };
                    collide_point_vs_shape(point, &shape, &pose, EMPTY_SUB_SHAPE_ID, &mut mapped);
                    true
                });
        }
    }

    /// Collide a shape at a pose against the world.
    pub fn collide_shape(
        &self,
        shape: &Shape,
        pose: &Pose,
        settings: &CollideSettings,
        filter: &QueryFilter,
        collector: &mut dyn Collector<WorldShapeHit>,
    ) {
        let bounds = shape.world_aabb(pose).expanded(settings.max_separation);
        for layer_index in 0..self.broadphase().num_layers() {
            let layer = BroadPhaseLayer(layer_index as u8);
            if !filter.accepts_broadphase_layer(layer) {
                continue;
            }
            self.broadphase()
                .tree(layer)
                .for_each_in_aabb(&bounds, &mut |body_id| {
                    if collector.should_exit() {
                        return false;
                    }
                    let Ok(body) = self.bodies().get::<&Body>(body_id) else {
                        return true;
                    };
                    if !filter.accepts_body(body_id, &body) {
                        return true;
                    }
                    let body_shape = Arc::clone(&body.shape);
                    let body_pose = body.pose();
                    drop(body);

                    let map = |result: CollideShapeResult| WorldShapeHit {
                        body: body_id,
                        result,
                    };
                    let mut mapped = MapCollector {
                        inner: &mut *collector,
                        map: &map,
                    };
                    collide_shape_vs_shape(
                        &CollideArgs {
                            shape_a: shape,
                            pose_a: *pose,
                            shape_b: &body_shape,
                            pose_b: body_pose,
                            sub_shape_a: EMPTY_SUB_SHAPE_ID,
                            sub_shape_b: EMPTY_SUB_SHAPE_ID,
                            settings,
                        },
                        &mut mapped,
                    );
                    true
                });
        }
    }

    /// Visit bodies whose fat AABB overlaps a region. The visitor returns
    /// `false` to stop.
    pub fn intersect_aabb(
        &self,
        aabb: &Aabb,
        filter: &QueryFilter,
        visitor: &mut dyn FnMut(BodyId) -> bool,
    ) {
        for layer_index in 0..self.broadphase().num_layers() {
            let layer = BroadPhaseLayer(layer_index as u8);
            if !filter.accepts_broadphase_layer(layer) {
                continue;
            }
            let completed = self
                .broadphase()
                .tree(layer)
                .for_each_in_aabb(aabb, &mut |body_id| {
                    let Ok(body) = self.bodies().get::<&Body>(body_id) else {
                        return true;
                    };
                    if !filter.accepts_body(body_id, &body) {
                        return true;
                    }
                    drop(body);
                    visitor(body_id)
                });
            if !completed {
                return;
            }
        }
    }

    /// Visit bodies whose fat AABB contains a point.
    pub fn intersect_point(
        &self,
        point: Vec3,
        filter: &QueryFilter,
        visitor: &mut dyn FnMut(BodyId) -> bool,
    ) {
        self.intersect_aabb(&Aabb::new(point, point), filter, visitor);
    }
}
