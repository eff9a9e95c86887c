//! Broadphase: one dynamic bounding-volume tree per broadphase layer.
//!
//! Leaves store fat AABBs (tight bounds inflated by a margin) so bodies
//! jittering in place do not force re-insertion. Insertion descends by
//! surface-area cost; the tree is rebalanced with AVL-style rotations while
//! refitting ancestors.

use std::collections::HashMap;

use glam::Vec3;

use crate::aabb::Aabb;
use crate::body::BodyId;
use crate::layers::BroadPhaseLayer;

const NULL: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct Node {
    aabb: Aabb,
    parent: i32,
    child1: i32,
    child2: i32,
    /// 0 for leaves; NULL marks a free node.
    height: i32,
    body: Option<BodyId>,
}

impl Node {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.child1 == NULL
    }
}

/// Dynamic AABB tree over bodies.
pub struct AabbTree {
    nodes: Vec<Node>,
    root: i32,
    free_list: i32,
    leaf_of: HashMap<BodyId, i32>,
    margin: f32,
}

impl AabbTree {
    pub fn new(margin: f32) -> Self {
        Self {
            nodes: Vec::new(),
            root: NULL,
            free_list: NULL,
            leaf_of: HashMap::new(),
            margin,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.leaf_of.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.leaf_of.is_empty()
    }

    fn allocate(&mut self) -> i32 {
        if self.free_list != NULL {
            let index = self.free_list;
            self.free_list = self.nodes[index as usize].child1;
            self.nodes[index as usize] = Node {
                aabb: Aabb::INVALID,
                parent: NULL,
                child1: NULL,
                child2: NULL,
                height: 0,
                body: None,
            };
            return index;
        }
        self.nodes.push(Node {
            aabb: Aabb::INVALID,
            parent: NULL,
            child1: NULL,
            child2: NULL,
            height: 0,
            body: None,
        });
        self.nodes.len() as i32 - 1
    }

    fn free(&mut self, index: i32) {
        self.nodes[index as usize].child1 = self.free_list;
        self.nodes[index as usize].height = NULL;
        self.free_list = index;
    }

    /// Insert a body with its tight bounds.
    pub fn insert(&mut self, body: BodyId, tight: Aabb) {
        debug_assert!(!self.leaf_of.contains_key(&body), "body already in tree");
        let leaf = self.allocate();
        self.nodes[leaf as usize].aabb = tight.expanded(self.margin);
        self.nodes[leaf as usize].body = Some(body);
        self.insert_leaf(leaf);
        self.leaf_of.insert(body, leaf);
    }

    /// Remove a body; no-op if it is not present.
    pub fn remove(&mut self, body: BodyId) {
        if let Some(leaf) = self.leaf_of.remove(&body) {
            self.remove_leaf(leaf);
            self.free(leaf);
        }
    }

    /// Refresh a body's bounds. Returns true when the leaf had to move
    /// (the tight bounds escaped the fat ones).
    pub fn update(&mut self, body: BodyId, tight: Aabb) -> bool {
        let Some(&leaf) = self.leaf_of.get(&body) else {
            self.insert(body, tight);
            return true;
        };
        if self.nodes[leaf as usize].aabb.contains(&tight) {
            return false;
        }
        self.remove_leaf(leaf);
        self.nodes[leaf as usize].aabb = tight.expanded(self.margin);
        self.insert_leaf(leaf);
        true
    }

    /// Fat bounds currently stored for a body.
    pub fn fat_aabb(&self, body: BodyId) -> Option<Aabb> {
        self.leaf_of
            .get(&body)
            .map(|&leaf| self.nodes[leaf as usize].aabb)
    }

    fn insert_leaf(&mut self, leaf: i32) {
        if self.root == NULL {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL;
            return;
        }

        // Descend towards the cheapest sibling by surface-area cost.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = self.nodes[index as usize];
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.merged(&leaf_aabb).surface_area();
            let cost = 2.0 * combined_area;
            let inheritance = 2.0 * (combined_area - area);

            let child_cost = |tree: &Self, child: i32| -> f32 {
                let child_node = &tree.nodes[child as usize];
                let merged = leaf_aabb.merged(&child_node.aabb).surface_area();
                if child_node.is_leaf() {
                    merged + inheritance
                } else {
                    (merged - child_node.aabb.surface_area()) + inheritance
                }
            };
            let cost1 = child_cost(self, node.child1);
            let cost2 = child_cost(self, node.child2);

            if cost < cost1 && cost < cost2 {
                break;
            }
            index = if cost1 < cost2 { node.child1 } else { node.child2 };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate();
        {
            let sibling_aabb = self.nodes[sibling as usize].aabb;
            let sibling_height = self.nodes[sibling as usize].height;
            let p = &mut self.nodes[new_parent as usize];
            p.parent = old_parent;
            p.aabb = leaf_aabb.merged(&sibling_aabb);
            p.height = sibling_height + 1;
            p.child1 = sibling;
            p.child2 = leaf;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;
        if old_parent == NULL {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].child1 == sibling {
            self.nodes[old_parent as usize].child1 = new_parent;
        } else {
            self.nodes[old_parent as usize].child2 = new_parent;
        }

        self.refit_upwards(self.nodes[leaf as usize].parent);
    }

    fn remove_leaf(&mut self, leaf: i32) {
        if leaf == self.root {
            self.root = NULL;
            return;
        }
        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].child1 == leaf {
            self.nodes[parent as usize].child2
        } else {
            self.nodes[parent as usize].child1
        };

        if grandparent == NULL {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL;
        } else {
            if self.nodes[grandparent as usize].child1 == parent {
                self.nodes[grandparent as usize].child1 = sibling;
            } else {
                self.nodes[grandparent as usize].child2 = sibling;
            }
            self.nodes[sibling as usize].parent = grandparent;
            self.refit_upwards(grandparent);
        }
        self.free(parent);
    }

    /// Walk to the root, rebalancing and refitting each ancestor.
    fn refit_upwards(&mut self, mut index: i32) {
        while index != NULL {
            index = self.balance(index);
            let child1 = self.nodes[index as usize].child1;
            let child2 = self.nodes[index as usize].child2;
            let aabb = self.nodes[child1 as usize]
                .aabb
                .merged(&self.nodes[child2 as usize].aabb);
            let height = 1 + self.nodes[child1 as usize]
                .height
                .max(self.nodes[child2 as usize].height);
            let node = &mut self.nodes[index as usize];
            node.aabb = aabb;
            node.height = height;
            index = node.parent;
        }
    }

    /// One AVL rotation at `a` when its children are out of balance.
    /// Returns the node that took `a`'s place.
    fn balance(&mut self, a: i32) -> i32 {
        if self.nodes[a as usize].is_leaf() || self.nodes[a as usize].height < 2 {
            return a;
        }
        let b = self.nodes[a as usize].child1;
        let c = self.nodes[a as usize].child2;
        let balance = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if balance > 1 {
            self.rotate_up(a, c)
        } else if balance < -1 {
            self.rotate_up(a, b)
        } else {
            a
        }
    }

    /// Promote `up` (a child of `a`) above `a`.
    fn rotate_up(&mut self, a: i32, up: i32) -> i32 {
        let f = self.nodes[up as usize].child1;
        let g = self.nodes[up as usize].child2;

        // `up` takes a's position.
        self.nodes[up as usize].child1 = a;
        self.nodes[up as usize].parent = self.nodes[a as usize].parent;
        self.nodes[a as usize].parent = up;
        let up_parent = self.nodes[up as usize].parent;
        if up_parent != NULL {
            if self.nodes[up_parent as usize].child1 == a {
                self.nodes[up_parent as usize].child1 = up;
            } else {
                self.nodes[up_parent as usize].child2 = up;
            }
        } else {
            self.root = up;
        }

        // The taller grandchild stays with `up`, the shorter one joins `a`.
        let (stay, move_down) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };
        self.nodes[up as usize].child2 = stay;
        // Replace `up` in a's children with the moved-down grandchild.
        if self.nodes[a as usize].child1 == up {
            self.nodes[a as usize].child1 = move_down;
        } else {
            self.nodes[a as usize].child2 = move_down;
        }
        self.nodes[move_down as usize].parent = a;

        // Refit both.
        let a_c1 = self.nodes[a as usize].child1;
        let a_c2 = self.nodes[a as usize].child2;
        self.nodes[a as usize].aabb = self.nodes[a_c1 as usize]
            .aabb
            .merged(&self.nodes[a_c2 as usize].aabb);
        self.nodes[a as usize].height = 1 + self.nodes[a_c1 as usize]
            .height
            .max(self.nodes[a_c2 as usize].height);

        let u_c1 = self.nodes[up as usize].child1;
        let u_c2 = self.nodes[up as usize].child2;
        self.nodes[up as usize].aabb = self.nodes[u_c1 as usize]
            .aabb
            .merged(&self.nodes[u_c2 as usize].aabb);
        self.nodes[up as usize].height = 1 + self.nodes[u_c1 as usize]
            .height
            .max(self.nodes[u_c2 as usize].height);

        up
    }

    /// Visit bodies whose fat AABB overlaps `aabb`. The callback returns
    /// `false` to end the traversal; the walk reports whether it completed.
    pub fn for_each_in_aabb(&self, aabb: &Aabb, f: &mut impl FnMut(BodyId) -> bool) -> bool {
        if self.root == NULL {
            return true;
        }
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }
            if node.is_leaf() {
                if let Some(body) = node.body {
                    if !f(body) {
                        return false;
                    }
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
        true
    }

    /// Visit bodies whose fat AABB contains `point`.
    pub fn for_each_at_point(&self, point: Vec3, f: &mut impl FnMut(BodyId) -> bool) -> bool {
        self.for_each_in_aabb(&Aabb::new(point, point), f)
    }

    /// Visit bodies along a ray; the callback may return a tightened
    /// maximum fraction (or `None` to leave it unchanged).
    pub fn for_each_along_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        f: &mut impl FnMut(BodyId) -> Option<f32>,
    ) {
        if self.root == NULL {
            return;
        }
        let inv_dir = direction.recip();
        let mut max_t = 1.0f32;
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node.aabb.ray_hit(origin, inv_dir, max_t).is_none() {
                continue;
            }
            if node.is_leaf() {
                if let Some(body) = node.body {
                    if let Some(t) = f(body) {
                        max_t = max_t.min(t);
                    }
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }
}

/// The world's broadphase: a tree per broadphase layer.
pub struct BroadPhase {
    trees: Vec<AabbTree>,
}

impl BroadPhase {
    pub fn new(num_layers: usize, margin: f32) -> Self {
        Self {
            trees: (0..num_layers.max(1)).map(|_| AabbTree::new(margin)).collect(),
        }
    }

    #[inline]
    pub fn tree(&self, layer: BroadPhaseLayer) -> &AabbTree {
        &self.trees[layer.0 as usize]
    }

    #[inline]
    pub fn tree_mut(&mut self, layer: BroadPhaseLayer) -> &mut AabbTree {
        &mut self.trees[layer.0 as usize]
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.trees.len()
    }

    pub fn add_body(&mut self, layer: BroadPhaseLayer, body: BodyId, tight: Aabb) {
        self.tree_mut(layer).insert(body, tight);
    }

    pub fn remove_body(&mut self, layer: BroadPhaseLayer, body: BodyId) {
        self.tree_mut(layer).remove(body);
    }

    /// Returns true when the body's leaf moved in the tree.
    pub fn update_body(&mut self, layer: BroadPhaseLayer, body: BodyId, tight: Aabb) -> bool {
        self.tree_mut(layer).update(body, tight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_ids(n: usize) -> (hecs::World, Vec<BodyId>) {
        let mut world = hecs::World::new();
        let ids = (0..n).map(|i| world.spawn((i as u32,))).collect();
        (world, ids)
    }

    fn aabb_at(center: Vec3) -> Aabb {
        Aabb::from_center_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn test_insert_query_remove() {
        let (_world, ids) = spawn_ids(3);
        let mut tree = AabbTree::new(0.1);
        tree.insert(ids[0], aabb_at(Vec3::ZERO));
        tree.insert(ids[1], aabb_at(Vec3::new(5.0, 0.0, 0.0)));
        tree.insert(ids[2], aabb_at(Vec3::new(0.2, 0.0, 0.0)));

        let mut found = Vec::new();
        tree.for_each_in_aabb(&aabb_at(Vec3::ZERO), &mut |b| {
            found.push(b);
            true
        });
        assert!(found.contains(&ids[0]));
        assert!(found.contains(&ids[2]));
        assert!(!found.contains(&ids[1]));

        tree.remove(ids[0]);
        let mut found = Vec::new();
        tree.for_each_in_aabb(&aabb_at(Vec3::ZERO), &mut |b| {
            found.push(b);
            true
        });
        assert!(!found.contains(&ids[0]));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_update_within_margin_keeps_leaf() {
        let (_world, ids) = spawn_ids(1);
        let mut tree = AabbTree::new(0.5);
        tree.insert(ids[0], aabb_at(Vec3::ZERO));
        // Jitter within the fat margin: no re-insert.
        assert!(!tree.update(ids[0], aabb_at(Vec3::new(0.2, 0.0, 0.0))));
        // A real move forces one.
        assert!(tree.update(ids[0], aabb_at(Vec3::new(5.0, 0.0, 0.0))));
        let fat = tree.fat_aabb(ids[0]).unwrap();
        assert!(fat.contains(&aabb_at(Vec3::new(5.0, 0.0, 0.0))));
    }

    #[test]
    fn test_many_bodies_all_found() {
        let (_world, ids) = spawn_ids(64);
        let mut tree = AabbTree::new(0.1);
        for (i, &id) in ids.iter().enumerate() {
            let p = Vec3::new((i % 8) as f32 * 2.0, (i / 8) as f32 * 2.0, 0.0);
            tree.insert(id, aabb_at(p));
        }
        let mut count = 0;
        tree.for_each_in_aabb(
            &Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)),
            &mut |_| {
                count += 1;
                true
            },
        );
        assert_eq!(count, 64);

        // A small query region touches a bounded number of leaves.
        let mut local = Vec::new();
        tree.for_each_in_aabb(&aabb_at(Vec3::new(4.0, 4.0, 0.0)), &mut |b| {
            local.push(b);
            true
        });
        assert!(!local.is_empty());
        assert!(local.len() < 10);
    }

    #[test]
    fn test_ray_traversal() {
        let (_world, ids) = spawn_ids(3);
        let mut tree = AabbTree::new(0.05);
        tree.insert(ids[0], aabb_at(Vec3::new(0.0, 3.0, 0.0)));
        tree.insert(ids[1], aabb_at(Vec3::new(0.0, 6.0, 0.0)));
        tree.insert(ids[2], aabb_at(Vec3::new(3.0, 3.0, 0.0)));

        let mut hit = Vec::new();
        tree.for_each_along_ray(Vec3::ZERO, Vec3::new(0.0, 10.0, 0.0), &mut |b| {
            hit.push(b);
            None
        });
        assert!(hit.contains(&ids[0]));
        assert!(hit.contains(&ids[1]));
        assert!(!hit.contains(&ids[2]));
    }

    #[test]
    fn test_early_exit() {
        let (_world, ids) = spawn_ids(10);
        let mut tree = AabbTree::new(0.1);
        for (i, &id) in ids.iter().enumerate() {
            tree.insert(id, aabb_at(Vec3::new(i as f32 * 0.1, 0.0, 0.0)));
        }
        let mut count = 0;
        let completed = tree.for_each_in_aabb(
            &Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0)),
            &mut |_| {
                count += 1;
                count < 3
            },
        );
        assert!(!completed);
        assert_eq!(count, 3);
    }
}
