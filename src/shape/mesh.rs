//! Static triangle-mesh shape with a bounding-volume tree over triangles.

use std::collections::HashMap;

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::shape::{ShapeError, SubShapeId};

bitflags! {
    /// Per-triangle flags.
    ///
    /// An edge is *active* when it is a boundary edge or the dihedral with
    /// the neighbouring triangle is convex enough that the edge can produce
    /// a valid contact normal. Inactive (internal, smooth, or concave)
    /// edges have their contact normals snapped to the face normal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TriangleFlags: u8 {
        /// Edge from vertex 0 to vertex 1.
        const ACTIVE_EDGE0 = 1;
        /// Edge from vertex 1 to vertex 2.
        const ACTIVE_EDGE1 = 2;
        /// Edge from vertex 2 to vertex 0.
        const ACTIVE_EDGE2 = 4;
    }
}

/// Dihedral angles below this count as smooth (cosine of ~5 degrees).
const SMOOTH_EDGE_COS: f32 = 0.99619;

/// Triangles per tree leaf.
const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BvhNode {
    aabb: Aabb,
    left: u32,
    right: u32,
    /// Range into the triangle order table; `count == 0` for interior nodes.
    first: u32,
    count: u32,
}

/// An immutable triangle mesh.
///
/// Meshes only collide as static geometry; the world rejects dynamic bodies
/// with mesh shapes unless mass properties are supplied explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    positions: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
    /// Per-triangle material ids; empty means "all zero".
    materials: Vec<u16>,
    flags: Vec<TriangleFlags>,
    nodes: Vec<BvhNode>,
    tri_order: Vec<u32>,
    local_bounds: Aabb,
}

impl TriangleMesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Result<Self, ShapeError> {
        Self::with_materials(positions, indices, Vec::new())
    }

    pub fn with_materials(
        positions: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
        materials: Vec<u16>,
    ) -> Result<Self, ShapeError> {
        if indices.is_empty() {
            return Err(ShapeError::EmptyMesh);
        }
        if !materials.is_empty() && materials.len() != indices.len() {
            return Err(ShapeError::InvalidParameter(
                "materials must be empty or match the triangle count",
            ));
        }
        for tri in &indices {
            for &i in tri {
                if i as usize >= positions.len() {
                    return Err(ShapeError::IndexOutOfBounds {
                        index: i,
                        count: positions.len() as u32,
                    });
                }
            }
        }

        let mut local_bounds = Aabb::INVALID;
        for p in &positions {
            local_bounds.include(*p);
        }

        let flags = compute_active_edges(&positions, &indices);
        let (nodes, tri_order) = build_bvh(&positions, &indices);

        Ok(Self {
            positions,
            indices,
            materials,
            flags,
            nodes,
            tri_order,
            local_bounds,
        })
    }

    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    #[inline]
    pub fn triangle(&self, i: u32) -> [Vec3; 3] {
        let idx = self.indices[i as usize];
        [
            self.positions[idx[0] as usize],
            self.positions[idx[1] as usize],
            self.positions[idx[2] as usize],
        ]
    }

    #[inline]
    pub fn triangle_normal(&self, i: u32) -> Vec3 {
        let [a, b, c] = self.triangle(i);
        (b - a).cross(c - a).normalize_or_zero()
    }

    #[inline]
    pub fn triangle_flags(&self, i: u32) -> TriangleFlags {
        self.flags[i as usize]
    }

    #[inline]
    pub fn material(&self, i: u32) -> u16 {
        self.materials.get(i as usize).copied().unwrap_or(0)
    }

    #[inline]
    pub fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }

    /// Bits a triangle index consumes in a sub-shape path.
    #[inline]
    pub fn sub_shape_bits(&self) -> u8 {
        SubShapeId::bits_for(self.indices.len())
    }

    /// Visit triangles whose AABB overlaps `aabb` (both in mesh-local
    /// space). The callback returns `false` to stop; the walk reports
    /// whether it ran to completion.
    pub fn for_each_in_aabb(&self, aabb: &Aabb, f: &mut impl FnMut(u32) -> bool) -> bool {
        let mut stack = vec![0u32];
        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }
            if node.count > 0 {
                for &tri in &self.tri_order[node.first as usize..(node.first + node.count) as usize]
                {
                    if !f(tri) {
                        return false;
                    }
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
        true
    }

    /// Visit triangles along a ray (mesh-local space). The callback may
    /// return a new maximum `t` to tighten the traversal.
    pub fn for_each_along_ray(
        &self,
        origin: Vec3,
        inv_dir: Vec3,
        mut max_t: f32,
        f: &mut impl FnMut(u32) -> Option<f32>,
    ) {
        let mut stack = vec![0u32];
        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni as usize];
            if node.aabb.ray_hit(origin, inv_dir, max_t).is_none() {
                continue;
            }
            if node.count > 0 {
                for &tri in &self.tri_order[node.first as usize..(node.first + node.count) as usize]
                {
                    if let Some(t) = f(tri) {
                        max_t = max_t.min(t);
                    }
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }
}

fn triangle_aabb(positions: &[Vec3], tri: &[u32; 3]) -> Aabb {
    let mut aabb = Aabb::INVALID;
    for &i in tri {
        aabb.include(positions[i as usize]);
    }
    aabb
}

fn compute_active_edges(positions: &[Vec3], indices: &[[u32; 3]]) -> Vec<TriangleFlags> {
    let normals: Vec<Vec3> = indices
        .iter()
        .map(|t| {
            (positions[t[1] as usize] - positions[t[0] as usize])
                .cross(positions[t[2] as usize] - positions[t[0] as usize])
                .normalize_or_zero()
        })
        .collect();

    // edge key -> (triangle, edge index, opposite vertex)
    let mut edge_map: HashMap<(u32, u32), Vec<(u32, u8, u32)>> = HashMap::new();
    for (ti, tri) in indices.iter().enumerate() {
        for e in 0..3u8 {
            let a = tri[e as usize];
            let b = tri[(e as usize + 1) % 3];
            let opposite = tri[(e as usize + 2) % 3];
            edge_map
                .entry((a.min(b), a.max(b)))
                .or_default()
                .push((ti as u32, e, opposite));
        }
    }

    let edge_flag = |e: u8| match e {
        0 => TriangleFlags::ACTIVE_EDGE0,
        1 => TriangleFlags::ACTIVE_EDGE1,
        _ => TriangleFlags::ACTIVE_EDGE2,
    };

    let mut flags = vec![TriangleFlags::empty(); indices.len()];
    for users in edge_map.values() {
        if users.len() != 2 {
            // Boundary or non-manifold: keep the edge active.
            for &(ti, e, _) in users {
                flags[ti as usize] |= edge_flag(e);
            }
            continue;
        }
        let (t0, e0, _) = users[0];
        let (t1, e1, opp1) = users[1];
        let n0 = normals[t0 as usize];
        let n1 = normals[t1 as usize];

        let smooth = n0.dot(n1) > SMOOTH_EDGE_COS;
        // Convex dihedral: the neighbour's far vertex lies below this
        // triangle's plane.
        let base = positions[indices[t0 as usize][0] as usize];
        let convex = n0.dot(positions[opp1 as usize] - base) < 0.0;

        if !smooth && convex {
            flags[t0 as usize] |= edge_flag(e0);
            flags[t1 as usize] |= edge_flag(e1);
        }
    }
    flags
}

fn build_bvh(positions: &[Vec3], indices: &[[u32; 3]]) -> (Vec<BvhNode>, Vec<u32>) {
    let mut order: Vec<u32> = (0..indices.len() as u32).collect();
    let centroids: Vec<Vec3> = indices
        .iter()
        .map(|t| {
            (positions[t[0] as usize] + positions[t[1] as usize] + positions[t[2] as usize]) / 3.0
        })
        .collect();

    let mut nodes = Vec::new();
    build_node(positions, indices, &centroids, &mut order, 0, &mut nodes);
    (nodes, order)
}

fn build_node(
    positions: &[Vec3],
    indices: &[[u32; 3]],
    centroids: &[Vec3],
    order: &mut [u32],
    first: u32,
    nodes: &mut Vec<BvhNode>,
) -> u32 {
    let mut aabb = Aabb::INVALID;
    for &tri in order.iter() {
        aabb = aabb.merged(&triangle_aabb(positions, &indices[tri as usize]));
    }

    let node_index = nodes.len() as u32;
    nodes.push(BvhNode {
        aabb,
        left: 0,
        right: 0,
        first,
        count: 0,
    });

    if order.len() <= LEAF_SIZE {
        nodes[node_index as usize].count = order.len() as u32;
        return node_index;
    }

    // Median split over the widest centroid axis.
    let mut centroid_bounds = Aabb::INVALID;
    for &tri in order.iter() {
        centroid_bounds.include(centroids[tri as usize]);
    }
    let size = centroid_bounds.size();
    let axis = if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    };
    order.sort_unstable_by(|&a, &b| {
        centroids[a as usize][axis]
            .partial_cmp(&centroids[b as usize][axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mid = order.len() / 2;
    let (left_slice, right_slice) = order.split_at_mut(mid);
    let left = build_node(positions, indices, centroids, left_slice, first, nodes);
    let right = build_node(
        positions,
        indices,
        centroids,
        right_slice,
        first + mid as u32,
        nodes,
    );
    nodes[node_index as usize].left = left;
    nodes[node_index as usize].right = right;
    node_index
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles forming a flat unit quad in the XZ plane, +Y up.
    fn quad_mesh() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 3, 2]],
        )
        .unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(TriangleMesh::new(vec![Vec3::ZERO], vec![]).is_err());
        assert!(TriangleMesh::new(vec![Vec3::ZERO, Vec3::X], vec![[0, 1, 2]]).is_err());
    }

    #[test]
    fn test_normals_and_bounds() {
        let mesh = quad_mesh();
        assert_eq!(mesh.num_triangles(), 2);
        assert!((mesh.triangle_normal(0) - Vec3::Y).length() < 1e-5);
        assert!((mesh.triangle_normal(1) - Vec3::Y).length() < 1e-5);
        assert_eq!(mesh.local_bounds().min, Vec3::ZERO);
        assert_eq!(mesh.local_bounds().max, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_shared_flat_edge_inactive() {
        let mesh = quad_mesh();
        // The diagonal 0-2 is shared and coplanar: inactive on both sides.
        // Triangle 0 edges: (0,2) e0, (2,1) e1, (1,0) e2.
        let f0 = mesh.triangle_flags(0);
        assert!(!f0.contains(TriangleFlags::ACTIVE_EDGE0));
        assert!(f0.contains(TriangleFlags::ACTIVE_EDGE1));
        assert!(f0.contains(TriangleFlags::ACTIVE_EDGE2));
        // Triangle 1 edges: (0,3) e0, (3,2) e1, (2,0) e2.
        let f1 = mesh.triangle_flags(1);
        assert!(!f1.contains(TriangleFlags::ACTIVE_EDGE2));
    }

    #[test]
    fn test_convex_ridge_edge_active() {
        // Roof: two triangles meeting at a ridge along Z with a sharp
        // convex dihedral.
        let mesh = TriangleMesh::new(
            vec![
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
            ],
            // Left slope and right slope, both facing up/outwards.
            vec![[0, 2, 1], [1, 2, 4], [4, 2, 5], [0, 3, 2]],
        )
        .unwrap();
        // Ridge edge (1,2) shared between triangles 0 and 1 is convex.
        assert!(mesh.triangle_flags(0).contains(TriangleFlags::ACTIVE_EDGE1)
            || mesh.triangle_flags(1).contains(TriangleFlags::ACTIVE_EDGE0));
    }

    #[test]
    fn test_aabb_query() {
        let mesh = quad_mesh();
        let mut visited = Vec::new();
        mesh.for_each_in_aabb(
            &Aabb::new(Vec3::new(0.8, -0.1, 0.1), Vec3::new(0.9, 0.1, 0.2)),
            &mut |tri| {
                visited.push(tri);
                true
            },
        );
        assert!(visited.contains(&0));

        visited.clear();
        mesh.for_each_in_aabb(
            &Aabb::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(6.0, 6.0, 6.0)),
            &mut |tri| {
                visited.push(tri);
                true
            },
        );
        assert!(visited.is_empty());
    }

    #[test]
    fn test_bvh_covers_all_triangles() {
        // A small grid mesh to force several BVH levels.
        let n = 8usize;
        let mut positions = Vec::new();
        for z in 0..=n {
            for x in 0..=n {
                positions.push(Vec3::new(x as f32, 0.0, z as f32));
            }
        }
        let stride = n + 1;
        let mut indices = Vec::new();
        for z in 0..n {
            for x in 0..n {
                let a = (z * stride + x) as u32;
                let b = a + 1;
                let c = a + stride as u32;
                let d = c + 1;
                indices.push([a, d, b]);
                indices.push([a, c, d]);
            }
        }
        let count = indices.len();
        let mesh = TriangleMesh::new(positions, indices).unwrap();

        let mut visited = vec![false; count];
        mesh.for_each_in_aabb(
            &Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::splat(n as f32 + 1.0)),
            &mut |tri| {
                visited[tri as usize] = true;
                true
            },
        );
        assert!(visited.iter().all(|&v| v));
    }
}
