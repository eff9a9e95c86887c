//! Query collectors and filters.
//!
//! Collectors implement the narrow phase's [`Collector`] contract with
//! three strategies: keep the closest hit, stop at any hit, or keep them
//! all. Filters narrow world queries by layer, collision group, and an
//! optional per-body callback.

mod world;

pub use world::*;

use crate::body::{Body, BodyId};
use crate::collide::{Collector, EarlyOutHit};
use crate::layers::{BroadPhaseLayer, LayerConfig, ObjectLayer};

/// Keeps the best-ranking hit (lowest fraction / deepest contact).
#[derive(Debug)]
pub struct ClosestCollector<H> {
    pub hit: Option<H>,
}

impl<H> Default for ClosestCollector<H> {
    fn default() -> Self {
        Self { hit: None }
    }
}

impl<H> ClosestCollector<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.hit = None;
    }

    pub fn has_hit(&self) -> bool {
        self.hit.is_some()
    }
}

impl<H: EarlyOutHit> Collector<H> for ClosestCollector<H> {
    fn add_hit(&mut self, hit: H) {
        if self
            .hit
            .as_ref()
            .map_or(true, |best| hit.early_out_value() < best.early_out_value())
        {
            self.hit = Some(hit);
        }
    }

    fn early_out_fraction(&self) -> f32 {
        self.hit
            .as_ref()
            .map_or(f32::MAX, |best| best.early_out_value())
    }
}

/// Stops the query at the first accepted hit.
#[derive(Debug)]
pub struct AnyCollector<H> {
    pub hit: Option<H>,
}

impl<H> Default for AnyCollector<H> {
    fn default() -> Self {
        Self { hit: None }
    }
}

impl<H> AnyCollector<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.hit = None;
    }

    pub fn has_hit(&self) -> bool {
        self.hit.is_some()
    }
}

impl<H: EarlyOutHit> Collector<H> for AnyCollector<H> {
    fn add_hit(&mut self, hit: H) {
        if self.hit.is_none() {
            self.hit = Some(hit);
        }
    }

    fn early_out_fraction(&self) -> f32 {
        if self.hit.is_some() {
            f32::MIN
        } else {
            f32::MAX
        }
    }

    fn should_exit(&self) -> bool {
        self.hit.is_some()
    }
}

/// Keeps every hit.
#[derive(Debug)]
pub struct AllCollector<H> {
    pub hits: Vec<H>,
}

impl<H> Default for AllCollector<H> {
    fn default() -> Self {
        Self { hits: Vec::new() }
    }
}

impl<H> AllCollector<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.hits.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

impl<H: EarlyOutHit> AllCollector<H> {
    /// Sort hits by rank (fraction / depth).
    pub fn sort(&mut self) {
        self.hits.sort_by(|a, b| {
            a.early_out_value()
                .partial_cmp(&b.early_out_value())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

impl<H: EarlyOutHit> Collector<H> for AllCollector<H> {
    fn add_hit(&mut self, hit: H) {
        self.hits.push(hit);
    }
}

/// Filter for world queries.
///
/// `collision_group` is the bitset of groups the query belongs to; a body
/// is accepted when `(query.mask & body.group) != 0` and
/// `(query.group & body.mask) != 0`, its object layer bit is set in
/// `object_layer_mask`, and the `body_filter` callback (when present)
/// returns true. Whole broadphase trees are skipped when their layer bit is
/// clear in `broadphase_mask`.
pub struct QueryFilter<'a> {
    pub broadphase_mask: u64,
    pub object_layer_mask: u64,
    pub collision_group: u32,
    pub collision_mask: u32,
    pub body_filter: Option<&'a dyn Fn(BodyId, &Body) -> bool>,
}

impl Default for QueryFilter<'_> {
    fn default() -> Self {
        Self {
            broadphase_mask: u64::MAX,
            object_layer_mask: u64::MAX,
            collision_group: u32::MAX,
            collision_mask: u32::MAX,
            body_filter: None,
        }
    }
}

impl<'a> QueryFilter<'a> {
    /// Configure the filter to collide the way `body` does: same layer
    /// rows and the body's own group/mask.
    pub fn from_body(layers: &LayerConfig, body: &Body) -> Self {
        let bp = layers.broadphase_layer_of(body.object_layer);
        Self {
            broadphase_mask: layers.broadphase_row(bp),
            object_layer_mask: layers.object_row(body.object_layer),
            collision_group: body.collision_group,
            collision_mask: body.collision_mask,
            body_filter: None,
        }
    }

    #[inline]
    pub(crate) fn accepts_broadphase_layer(&self, layer: BroadPhaseLayer) -> bool {
        self.broadphase_mask & (1 << layer.0) != 0
    }

    #[inline]
    pub(crate) fn accepts_object_layer(&self, layer: ObjectLayer) -> bool {
        self.object_layer_mask & (1 << layer.0) != 0
    }

    #[inline]
    pub(crate) fn accepts_body(&self, id: BodyId, body: &Body) -> bool {
        if !self.accepts_object_layer(body.object_layer) {
            return false;
        }
        if (self.collision_mask & body.collision_group) == 0
            || (self.collision_group & body.collision_mask) == 0
        {
            return false;
        }
        match self.body_filter {
            Some(f) => f(id, body),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct TestHit(f32);

    impl EarlyOutHit for TestHit {
        fn early_out_value(&self) -> f32 {
            self.0
        }
    }

    #[test]
    fn test_closest_collector() {
        let mut c = ClosestCollector::default();
        c.add_hit(TestHit(0.8));
        c.add_hit(TestHit(0.3));
        c.add_hit(TestHit(0.5));
        assert_eq!(c.hit, Some(TestHit(0.3)));
        assert_eq!(c.early_out_fraction(), 0.3);
        c.reset();
        assert!(!c.has_hit());
    }

    #[test]
    fn test_any_collector_exits() {
        let mut c = AnyCollector::default();
        assert!(!c.should_exit());
        c.add_hit(TestHit(0.9));
        c.add_hit(TestHit(0.1));
        assert_eq!(c.hit, Some(TestHit(0.9)));
        assert!(c.should_exit());
        assert_eq!(c.early_out_fraction(), f32::MIN);
    }

    #[test]
    fn test_all_collector_sort() {
        let mut c = AllCollector::default();
        c.add_hit(TestHit(0.8));
        c.add_hit(TestHit(0.3));
        c.add_hit(TestHit(0.5));
        c.sort();
        assert_eq!(c.hits, vec![TestHit(0.3), TestHit(0.5), TestHit(0.8)]);
    }
}
