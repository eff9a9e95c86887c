//! Contact manifolds, the warm-start cache, and the contact listener.

use std::collections::HashMap;

use glam::Vec3;

use crate::body::{Body, BodyId};
use crate::shape::SubShapeId;

/// Identity of one contact: an ordered body pair plus the sub-shapes in
/// contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactKey {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
}

/// One contact point of a manifold.
#[derive(Debug, Clone, Copy)]
pub struct ContactPoint {
    /// Contact position on the surface of A, world space.
    pub position_a: Vec3,
    /// Contact position on the surface of B.
    pub position_b: Vec3,
    /// Penetration depth (negative for speculative contacts).
    pub penetration: f32,
    /// Accumulated impulse along the normal, kept for warm starting.
    pub(crate) normal_impulse: f32,
    /// Accumulated impulses along the two tangents.
    pub(crate) friction_impulse: [f32; 2],
}

impl ContactPoint {
    pub fn new(position_a: Vec3, position_b: Vec3, penetration: f32) -> Self {
        Self {
            position_a,
            position_b,
            penetration,
            normal_impulse: 0.0,
            friction_impulse: [0.0; 2],
        }
    }
}

/// Contact patch between two sub-shapes.
#[derive(Debug, Clone)]
pub struct ContactManifold {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub sub_shape_a: SubShapeId,
    pub sub_shape_b: SubShapeId,
    /// Unit contact normal from A towards B.
    pub normal: Vec3,
    pub points: Vec<ContactPoint>,
}

impl ContactManifold {
    #[inline]
    pub fn key(&self) -> ContactKey {
        ContactKey {
            body_a: self.body_a,
            body_b: self.body_b,
            sub_shape_a: self.sub_shape_a,
            sub_shape_b: self.sub_shape_b,
        }
    }
}

/// Outcome of [`ContactListener::on_contact_validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactValidateResult {
    /// Accept this and all further contacts of the pair this step.
    AcceptAll,
    /// Accept this contact only.
    AcceptContact,
    /// Reject this contact only.
    RejectContact,
    /// Accept everything and stop colliding the pair while it persists.
    AcceptAllAndDisablePair,
}

/// Mutable per-contact response parameters handed to the listener.
#[derive(Debug, Clone)]
pub struct ContactSettings {
    /// Combined friction (`sqrt(fa * fb)` by default).
    pub friction: f32,
    /// Combined restitution (`max(ra, rb)` by default).
    pub restitution: f32,
    /// Relative surface velocity of B with respect to A (conveyor belts).
    pub surface_velocity: Vec3,
    pub inv_mass_scale_a: f32,
    pub inv_mass_scale_b: f32,
    pub inv_inertia_scale_a: f32,
    pub inv_inertia_scale_b: f32,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            friction: 0.0,
            restitution: 0.0,
            surface_velocity: Vec3::ZERO,
            inv_mass_scale_a: 1.0,
            inv_mass_scale_b: 1.0,
            inv_inertia_scale_a: 1.0,
            inv_inertia_scale_b: 1.0,
        }
    }
}

/// Per-step contact event hooks.
///
/// Callbacks run re-entrantly inside `World::update`; they must not mutate
/// the world (adding/removing bodies or constraints is deferred to after
/// the step).
pub trait ContactListener {
    /// Before narrow phase; returning false skips the pair entirely.
    fn on_body_pair_validate(&mut self, _body_a: BodyId, _body_b: BodyId) -> bool {
        true
    }

    /// After narrow phase, before response.
    fn on_contact_validate(
        &mut self,
        _body_a: &Body,
        _body_b: &Body,
        _manifold: &ContactManifold,
    ) -> ContactValidateResult {
        ContactValidateResult::AcceptAll
    }

    /// A contact that did not exist last step.
    fn on_contact_added(
        &mut self,
        _body_a: BodyId,
        _body_b: BodyId,
        _manifold: &ContactManifold,
        _settings: &mut ContactSettings,
    ) {
    }

    /// A contact that also existed last step.
    fn on_contact_persisted(
        &mut self,
        _body_a: BodyId,
        _body_b: BodyId,
        _manifold: &ContactManifold,
        _settings: &mut ContactSettings,
    ) {
    }

    /// A cached contact that was not refreshed this step.
    fn on_contact_removed(&mut self, _key: &ContactKey) {}
}

/// Contact points are matched frame to frame within this distance.
const CONTACT_MATCH_THRESHOLD_SQ: f32 = 0.02 * 0.02;

#[derive(Debug, Clone, Copy)]
struct CachedPoint {
    position_a: Vec3,
    normal_impulse: f32,
    friction_impulse: [f32; 2],
}

#[derive(Debug, Clone)]
struct CachedManifold {
    points: Vec<CachedPoint>,
    last_step: u64,
}

/// Impulse cache keyed by contact identity, driving warm starts and
/// removal events.
#[derive(Debug, Default)]
pub(crate) struct ContactCache {
    manifolds: HashMap<ContactKey, CachedManifold>,
    /// Pairs disabled by `AcceptAllAndDisablePair`, with the last step the
    /// pair was seen overlapping.
    disabled_pairs: HashMap<(BodyId, BodyId), u64>,
}

impl ContactCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(a: BodyId, b: BodyId) -> (BodyId, BodyId) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Copy last-step impulses into matching points of a fresh manifold.
    /// Returns true when the contact existed last step (persisted).
    pub fn warm_start(&mut self, manifold: &mut ContactManifold, step: u64) -> bool {
        let Some(cached) = self.manifolds.get_mut(&manifold.key()) else {
            return false;
        };
        let existed = cached.last_step + 1 >= step;
        for point in &mut manifold.points {
            let mut best: Option<(f32, &CachedPoint)> = None;
            for cp in &cached.points {
                let d = (cp.position_a - point.position_a).length_squared();
                if d < CONTACT_MATCH_THRESHOLD_SQ
                    && best.map_or(true, |(bd, _)| d < bd)
                {
                    best = Some((d, cp));
                }
            }
            if let Some((_, cp)) = best {
                point.normal_impulse = cp.normal_impulse;
                point.friction_impulse = cp.friction_impulse;
            }
        }
        existed
    }

    /// Record the solved impulses of a manifold for the next step.
    pub fn store(&mut self, manifold: &ContactManifold, step: u64) {
        let points = manifold
            .points
            .iter()
            .map(|p| CachedPoint {
                position_a: p.position_a,
                normal_impulse: p.normal_impulse,
                friction_impulse: p.friction_impulse,
            })
            .collect();
        self.manifolds.insert(
            manifold.key(),
            CachedManifold {
                points,
                last_step: step,
            },
        );
    }

    /// Evict contacts that were not refreshed this step, reporting each.
    pub fn evict_stale(&mut self, step: u64, mut on_removed: impl FnMut(&ContactKey)) {
        let stale: Vec<ContactKey> = self
            .manifolds
            .iter()
            .filter(|(_, m)| m.last_step < step)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.manifolds.remove(&key);
            on_removed(&key);
        }
        self.disabled_pairs.retain(|_, last| *last >= step);
    }

    /// Drop every cached contact touching a removed body (no events).
    pub fn forget_body(&mut self, body: BodyId) {
        self.manifolds
            .retain(|k, _| k.body_a != body && k.body_b != body);
        self.disabled_pairs
            .retain(|(a, b), _| *a != body && *b != body);
    }

    pub fn disable_pair(&mut self, a: BodyId, b: BodyId, step: u64) {
        self.disabled_pairs.insert(Self::pair_key(a, b), step);
    }

    /// Check (and refresh, when disabled) the pair-disable state.
    pub fn pair_disabled(&mut self, a: BodyId, b: BodyId, step: u64) -> bool {
        match self.disabled_pairs.get_mut(&Self::pair_key(a, b)) {
            Some(last) => {
                *last = step;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::EMPTY_SUB_SHAPE_ID;

    fn test_ids() -> (BodyId, BodyId) {
        let mut world = hecs::World::new();
        let a = world.spawn((0u32,));
        let b = world.spawn((1u32,));
        (a, b)
    }

    fn manifold(a: BodyId, b: BodyId, at: Vec3) -> ContactManifold {
        ContactManifold {
            body_a: a,
            body_b: b,
            sub_shape_a: EMPTY_SUB_SHAPE_ID,
            sub_shape_b: EMPTY_SUB_SHAPE_ID,
            normal: Vec3::Y,
            points: vec![ContactPoint::new(at, at, 0.01)],
        }
    }

    #[test]
    fn test_warm_start_roundtrip() {
        let (a, b) = test_ids();
        let mut cache = ContactCache::new();

        let mut m = manifold(a, b, Vec3::ZERO);
        m.points[0].normal_impulse = 3.0;
        m.points[0].friction_impulse = [0.5, -0.25];
        cache.store(&m, 1);

        // Next step, nearly the same point: impulses come back.
        let mut m2 = manifold(a, b, Vec3::new(0.005, 0.0, 0.0));
        let persisted = cache.warm_start(&mut m2, 2);
        assert!(persisted);
        assert_eq!(m2.points[0].normal_impulse, 3.0);
        assert_eq!(m2.points[0].friction_impulse, [0.5, -0.25]);

        // A far-away point does not match.
        let mut m3 = manifold(a, b, Vec3::new(1.0, 0.0, 0.0));
        cache.warm_start(&mut m3, 2);
        assert_eq!(m3.points[0].normal_impulse, 0.0);
    }

    #[test]
    fn test_eviction_fires_removed() {
        let (a, b) = test_ids();
        let mut cache = ContactCache::new();
        cache.store(&manifold(a, b, Vec3::ZERO), 1);

        let mut removed = Vec::new();
        cache.evict_stale(2, |k| removed.push(*k));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].body_a, a);

        // Gone for good.
        let mut m = manifold(a, b, Vec3::ZERO);
        assert!(!cache.warm_start(&mut m, 3));
    }

    #[test]
    fn test_disabled_pairs() {
        let (a, b) = test_ids();
        let mut cache = ContactCache::new();
        cache.disable_pair(a, b, 1);
        // Order independent, refreshes while queried.
        assert!(cache.pair_disabled(b, a, 2));
        assert!(cache.pair_disabled(a, b, 3));
        // Not refreshed during step 4: evicted afterwards.
        cache.evict_stale(5, |_| {});
        assert!(!cache.pair_disabled(a, b, 5));
    }
}
