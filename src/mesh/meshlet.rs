//! Meshlet construction.
//!
//! Index buffers are partitioned greedily, in submission order, into
//! meshlets of at most [`MAX_MESHLET_TRIANGLES`] triangles referencing at
//! most [`MAX_MESHLET_VERTICES`] unique vertices. Each meshlet carries the
//! bounds used for GPU culling: an AABB, and a cone (axis + minimum dot
//! cutoff) derived from its face normals.
//!
//! Offsets produced here are local to the built mesh; the consolidated mesh
//! buffer rebases them when appending to the global arrays.

use super::Vertex;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Triangle cap per meshlet.
pub const MAX_MESHLET_TRIANGLES: usize = 64;
/// Unique-vertex cap per meshlet.
pub const MAX_MESHLET_VERTICES: usize = 128;

/// GPU-facing meshlet record. 64 bytes, matching the shader-side struct
/// layout row for row.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuMeshlet {
    pub aabb_min: [f32; 3],
    /// First entry in the meshlet vertex index array.
    pub vertex_offset: u32,
    pub aabb_max: [f32; 3],
    /// First entry in the meshlet triangle index array (byte index; three
    /// entries per triangle).
    pub triangle_offset: u32,
    pub cone_axis: [f32; 3],
    /// Minimum dot product between `cone_axis` and any face normal. A
    /// meshlet with no valid face normals stores a zero axis and cutoff 1.0,
    /// which disables cone culling for it.
    pub cone_cutoff: f32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub _pad: [u32; 2],
}

/// Output of [`build_meshlets`]; all offsets mesh-local.
#[derive(Default, Debug)]
pub struct MeshletData {
    pub meshlets: Vec<GpuMeshlet>,
    /// Mesh-local vertex indices, grouped per meshlet.
    pub vertex_indices: Vec<u32>,
    /// Meshlet-local triangle corner indices, three per triangle. Each entry
    /// indexes into the meshlet's slice of `vertex_indices`.
    pub triangle_indices: Vec<u8>,
}

struct MeshletInProgress {
    /// Mesh-local vertex indices used by this meshlet, in first-use order.
    vertices: Vec<u32>,
    /// Local corner indices, three per triangle.
    triangles: Vec<u8>,
    normal_sum: Vec3,
    face_normals: Vec<Vec3>,
}

impl MeshletInProgress {
    fn new() -> Self {
        Self {
            vertices: Vec::with_capacity(MAX_MESHLET_VERTICES),
            triangles: Vec::with_capacity(MAX_MESHLET_TRIANGLES * 3),
            normal_sum: Vec3::ZERO,
            face_normals: Vec::with_capacity(MAX_MESHLET_TRIANGLES),
        }
    }

    fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    fn local_index(&self, global: u32) -> Option<u8> {
        self.vertices
            .iter()
            .position(|&v| v == global)
            .map(|i| i as u8)
    }

    /// Number of vertices the triangle would add.
    fn new_vertex_count(&self, tri: [u32; 3]) -> usize {
        // The triangle's own corners may repeat; count distinct new ones.
        let mut new = 0;
        for (i, &corner) in tri.iter().enumerate() {
            if self.local_index(corner).is_none() && !tri[..i].contains(&corner) {
                new += 1;
            }
        }
        new
    }

    fn push_triangle(&mut self, tri: [u32; 3], positions: [Vec3; 3]) {
        for corner in tri {
            let local = match self.local_index(corner) {
                Some(local) => local,
                None => {
                    let local = self.vertices.len() as u8;
                    self.vertices.push(corner);
                    local
                }
            };
            self.triangles.push(local);
        }
        // Degenerate triangles have a zero cross product and contribute
        // nothing to the cone.
        let cross = (positions[1] - positions[0]).cross(positions[2] - positions[0]);
        if let Some(normal) = cross.try_normalize() {
            self.normal_sum += normal;
            self.face_normals.push(normal);
        }
    }

    fn finish(self, vertices: &[Vertex], output: &mut MeshletData) {
        debug_assert!(!self.is_empty());

        let mut aabb_min = Vec3::splat(f32::INFINITY);
        let mut aabb_max = Vec3::splat(f32::NEG_INFINITY);
        for &index in &self.vertices {
            let position = Vec3::from_array(vertices[index as usize].position);
            aabb_min = aabb_min.min(position);
            aabb_max = aabb_max.max(position);
        }

        let (cone_axis, cone_cutoff) = match self.normal_sum.try_normalize() {
            Some(axis) => {
                let cutoff = self
                    .face_normals
                    .iter()
                    .map(|normal| normal.dot(axis))
                    .fold(1.0f32, f32::min);
                (axis, cutoff)
            }
            None => (Vec3::ZERO, 1.0),
        };

        output.meshlets.push(GpuMeshlet {
            aabb_min: aabb_min.to_array(),
            vertex_offset: output.vertex_indices.len() as u32,
            aabb_max: aabb_max.to_array(),
            triangle_offset: output.triangle_indices.len() as u32,
            cone_axis: cone_axis.to_array(),
            cone_cutoff,
            vertex_count: self.vertices.len() as u32,
            triangle_count: (self.triangles.len() / 3) as u32,
            _pad: [0; 2],
        });
        output.vertex_indices.extend_from_slice(&self.vertices);
        output.triangle_indices.extend_from_slice(&self.triangles);
    }
}

/// Partitions an indexed triangle list into meshlets.
///
/// # Panics
///
/// Panics if `indices` is not a whole number of triangles or references a
/// vertex out of range.
pub fn build_meshlets(vertices: &[Vertex], indices: &[u32]) -> MeshletData {
    assert_eq!(indices.len() % 3, 0, "index count must be a multiple of 3");
    assert!(
        indices.iter().all(|&i| (i as usize) < vertices.len()),
        "index out of range"
    );

    let mut output = MeshletData::default();
    let mut current = MeshletInProgress::new();

    for tri in indices.chunks_exact(3) {
        let tri = [tri[0], tri[1], tri[2]];
        let triangle_full = current.triangles.len() / 3 >= MAX_MESHLET_TRIANGLES;
        let vertex_full =
            current.vertices.len() + current.new_vertex_count(tri) > MAX_MESHLET_VERTICES;
        if triangle_full || vertex_full {
            let finished = std::mem::replace(&mut current, MeshletInProgress::new());
            finished.finish(vertices, &mut output);
        }
        let positions = tri.map(|i| Vec3::from_array(vertices[i as usize].position));
        current.push_triangle(tri, positions);
    }
    if !current.is_empty() {
        current.finish(vertices, &mut output);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert(x: f32, y: f32, z: f32) -> Vertex {
        Vertex {
            position: [x, y, z],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 0.0],
        }
    }

    /// `count` disjoint triangles in the z=0 plane, wound counter-clockwise.
    fn triangle_soup(count: usize) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for i in 0..count {
            let x = i as f32 * 2.0;
            let base = vertices.len() as u32;
            vertices.push(vert(x, 0.0, 0.0));
            vertices.push(vert(x + 1.0, 0.0, 0.0));
            vertices.push(vert(x, 1.0, 0.0));
            indices.extend_from_slice(&[base, base + 1, base + 2]);
        }
        (vertices, indices)
    }

    #[test]
    fn single_triangle_single_meshlet() {
        let (vertices, indices) = triangle_soup(1);
        let data = build_meshlets(&vertices, &indices);
        assert_eq!(data.meshlets.len(), 1);
        let m = &data.meshlets[0];
        assert_eq!(m.triangle_count, 1);
        assert_eq!(m.vertex_count, 3);
        assert_eq!(m.vertex_offset, 0);
        assert_eq!(m.triangle_offset, 0);
        assert_eq!(data.vertex_indices, vec![0, 1, 2]);
        assert_eq!(data.triangle_indices, vec![0, 1, 2]);
    }

    #[test]
    fn triangle_cap_splits() {
        // Disjoint triangles hit the vertex cap first (128 / 3 = 42), so
        // share vertices: a triangle fan stays under the vertex cap.
        let center = vert(0.0, 0.0, 0.0);
        let mut vertices = vec![center];
        let mut indices = Vec::new();
        let spokes = 80;
        for i in 0..=spokes {
            let angle = i as f32 * 0.05;
            vertices.push(vert(angle.cos(), angle.sin(), 0.0));
        }
        for i in 0..spokes as u32 {
            indices.extend_from_slice(&[0, i + 1, i + 2]);
        }
        let data = build_meshlets(&vertices, &indices);
        assert_eq!(data.meshlets.len(), 2);
        assert_eq!(data.meshlets[0].triangle_count as usize, MAX_MESHLET_TRIANGLES);
        assert_eq!(data.meshlets[1].triangle_count, 16);
    }

    #[test]
    fn vertex_cap_splits() {
        // 43 disjoint triangles need 129 unique vertices; the 43rd must
        // start a new meshlet.
        let (vertices, indices) = triangle_soup(43);
        let data = build_meshlets(&vertices, &indices);
        assert_eq!(data.meshlets.len(), 2);
        assert_eq!(data.meshlets[0].triangle_count, 42);
        assert_eq!(data.meshlets[0].vertex_count, 126);
        assert_eq!(data.meshlets[1].triangle_count, 1);
    }

    #[test]
    fn local_indices_resolve_to_original_triangles() {
        let (vertices, indices) = triangle_soup(45);
        let data = build_meshlets(&vertices, &indices);
        let mut resolved = Vec::new();
        for meshlet in &data.meshlets {
            for t in 0..meshlet.triangle_count as usize {
                for corner in 0..3 {
                    let local =
                        data.triangle_indices[meshlet.triangle_offset as usize + t * 3 + corner];
                    let global = data.vertex_indices
                        [meshlet.vertex_offset as usize + local as usize];
                    resolved.push(global);
                }
            }
        }
        assert_eq!(resolved, indices);
    }

    #[test]
    fn aabb_covers_meshlet_vertices() {
        let vertices = vec![
            vert(-2.0, 0.5, 1.0),
            vert(3.0, -1.0, 0.0),
            vert(0.0, 4.0, -5.0),
        ];
        let data = build_meshlets(&vertices, &[0, 1, 2]);
        let m = &data.meshlets[0];
        assert_eq!(m.aabb_min, [-2.0, -1.0, -5.0]);
        assert_eq!(m.aabb_max, [3.0, 4.0, 1.0]);
    }

    #[test]
    fn flat_mesh_cone_is_tight() {
        let (vertices, indices) = triangle_soup(4);
        let data = build_meshlets(&vertices, &indices);
        let m = &data.meshlets[0];
        // Every face normal is +Z, so the axis is +Z and the cutoff is 1.
        assert!((m.cone_axis[2] - 1.0).abs() < 1e-6);
        assert!((m.cone_cutoff - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_triangles_disable_cone_culling() {
        // All three corners collinear: no face normal at all.
        let vertices = vec![
            vert(0.0, 0.0, 0.0),
            vert(1.0, 0.0, 0.0),
            vert(2.0, 0.0, 0.0),
        ];
        let data = build_meshlets(&vertices, &[0, 1, 2]);
        let m = &data.meshlets[0];
        assert_eq!(m.cone_axis, [0.0, 0.0, 0.0]);
        assert_eq!(m.cone_cutoff, 1.0);
    }

    #[test]
    fn degenerate_does_not_poison_valid_normals() {
        let vertices = vec![
            vert(0.0, 0.0, 0.0),
            vert(1.0, 0.0, 0.0),
            vert(0.0, 1.0, 0.0),
            // Collinear triangle.
            vert(5.0, 0.0, 0.0),
            vert(6.0, 0.0, 0.0),
            vert(7.0, 0.0, 0.0),
        ];
        let data = build_meshlets(&vertices, &[0, 1, 2, 3, 4, 5]);
        let m = &data.meshlets[0];
        assert!((m.cone_axis[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "multiple of 3")]
    fn partial_triangle_panics() {
        let (vertices, _) = triangle_soup(1);
        build_meshlets(&vertices, &[0, 1]);
    }
}
