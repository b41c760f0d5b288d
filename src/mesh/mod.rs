//! Consolidated mesh storage.
//!
//! All static geometry lives in five global buffers: one vertex buffer, one
//! index buffer, and the three meshlet arrays (records, vertex indices,
//! triangle indices). Individual meshes are slices into those buffers,
//! described by a [`MeshEntry`]; draws are classic indexed draws using the
//! entry's base offsets, and GPU culling walks the meshlet arrays through
//! the bindless heap.
//!
//! The buffer is built in two phases. During **registration** meshes are
//! appended to CPU-side arrays and meshlets are built. **Finalize** sizes and
//! allocates the device buffers exactly once; afterwards registration is
//! closed and the data flows up through staged copies.

mod meshlet;

pub use meshlet::{
    GpuMeshlet, MAX_MESHLET_TRIANGLES, MAX_MESHLET_VERTICES, MeshletData, build_meshlets,
};

use crate::{
    Device, HasDevice, RenderResult,
    resources::{BufferDesc, BufferHandle, BufferManager, MemoryLocation},
    upload::FrameUploadRing,
};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::collections::HashMap;

/// Interleaved vertex layout shared by every mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn input_bindings() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub const fn input_attributes() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
        ]
    }
}

/// Application-chosen mesh identity; registration is idempotent per id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

/// A mesh's slices into the consolidated arrays. All offsets are element
/// counts, not bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshEntry {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub meshlet_offset: u32,
    pub meshlet_count: u32,
    pub meshlet_vertex_offset: u32,
    pub meshlet_vertex_count: u32,
    pub meshlet_triangle_offset: u32,
    pub meshlet_triangle_count: u32,
    /// Radius of the mesh-space bounding sphere around the origin, for
    /// per-object coarse culling.
    pub bounds_radius: f32,
}

/// GPU-side buffer handles created by [`MeshBuffer::finalize`].
#[derive(Clone, Copy, Debug)]
pub struct MeshGpuBuffers {
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub meshlets: BufferHandle,
    pub meshlet_vertices: BufferHandle,
    pub meshlet_triangles: BufferHandle,
}

#[derive(Default)]
pub struct MeshBuffer {
    entries: HashMap<MeshId, MeshEntry>,

    // CPU-side consolidated arrays, complete at finalize time.
    vertices: Vec<Vertex>,
    /// Mesh-local indices; draws rebase with the entry's vertex offset.
    indices: Vec<u32>,
    /// Meshlet records with offsets rebased into the global arrays.
    meshlets: Vec<GpuMeshlet>,
    /// Global vertex indices into the consolidated vertex buffer.
    meshlet_vertices: Vec<u32>,
    meshlet_triangles: Vec<u8>,

    /// Registration closes when this flips; tracked apart from the buffer
    /// handles so the lifecycle is checkable without a device.
    finalized: bool,
    gpu: Option<MeshGpuBuffers>,
    /// The meshlet arrays are immutable after finalize; they are staged in
    /// full by the first upload and never again.
    meshlets_uploaded: bool,
}

impl MeshBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mesh to the consolidated arrays and builds its meshlets.
    /// Registering the same id again returns the existing entry untouched.
    ///
    /// # Panics
    ///
    /// Panics after [`finalize`](Self::finalize), or on malformed geometry
    /// (empty, partial triangles, out-of-range indices).
    pub fn add_mesh(&mut self, id: MeshId, vertices: &[Vertex], indices: &[u32]) -> MeshEntry {
        assert!(
            !self.finalized,
            "mesh registration is closed after finalize"
        );
        if let Some(entry) = self.entries.get(&id) {
            return *entry;
        }
        assert!(!vertices.is_empty() && !indices.is_empty());

        let vertex_offset = self.vertices.len() as u32;
        let index_offset = self.indices.len() as u32;
        let meshlet_offset = self.meshlets.len() as u32;
        let meshlet_vertex_offset = self.meshlet_vertices.len() as u32;
        let meshlet_triangle_offset = self.meshlet_triangles.len() as u32;

        let data = build_meshlets(vertices, indices);
        let bounds_radius = vertices
            .iter()
            .map(|v| Vec3::from(v.position).length_squared())
            .fold(0.0f32, f32::max)
            .sqrt();

        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        self.meshlets.extend(data.meshlets.iter().map(|m| GpuMeshlet {
            vertex_offset: m.vertex_offset + meshlet_vertex_offset,
            triangle_offset: m.triangle_offset + meshlet_triangle_offset,
            ..*m
        }));
        // Rebase into the consolidated vertex buffer so culling shaders can
        // fetch positions without knowing which mesh a meshlet came from.
        self.meshlet_vertices
            .extend(data.vertex_indices.iter().map(|&v| v + vertex_offset));
        self.meshlet_triangles
            .extend_from_slice(&data.triangle_indices);

        let entry = MeshEntry {
            vertex_offset,
            vertex_count: vertices.len() as u32,
            index_offset,
            index_count: indices.len() as u32,
            meshlet_offset,
            meshlet_count: data.meshlets.len() as u32,
            meshlet_vertex_offset,
            meshlet_vertex_count: data.vertex_indices.len() as u32,
            meshlet_triangle_offset,
            meshlet_triangle_count: data.triangle_indices.len() as u32,
            bounds_radius,
        };
        self.entries.insert(id, entry);
        entry
    }

    pub fn contains(&self, id: MeshId) -> bool {
        self.entries.contains_key(&id)
    }

    /// # Panics
    ///
    /// Panics if the mesh was never registered.
    pub fn entry(&self, id: MeshId) -> MeshEntry {
        self.entries[&id]
    }

    pub fn meshlet_count(&self) -> u32 {
        self.meshlets.len() as u32
    }

    /// Allocates the device buffers sized to the registered geometry and
    /// closes registration. One-shot.
    ///
    /// # Panics
    ///
    /// Panics if called twice or with no registered meshes.
    pub fn finalize(&mut self, buffers: &mut BufferManager) -> RenderResult<MeshGpuBuffers> {
        assert!(!self.finalized, "finalize is one-shot");
        assert!(!self.entries.is_empty(), "no meshes registered");
        self.finalized = true;

        let storage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        let gpu = MeshGpuBuffers {
            vertices: buffers.allocate_buffer(BufferDesc {
                size: std::mem::size_of_val(self.vertices.as_slice()) as vk::DeviceSize,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                location: MemoryLocation::DeviceLocal,
                label: Some(c"mesh vertices"),
            })?,
            indices: buffers.allocate_buffer(BufferDesc {
                size: std::mem::size_of_val(self.indices.as_slice()) as vk::DeviceSize,
                usage: vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                location: MemoryLocation::DeviceLocal,
                label: Some(c"mesh indices"),
            })?,
            meshlets: buffers.allocate_buffer(BufferDesc {
                size: std::mem::size_of_val(self.meshlets.as_slice()) as vk::DeviceSize,
                usage: storage,
                location: MemoryLocation::DeviceLocal,
                label: Some(c"meshlets"),
            })?,
            meshlet_vertices: buffers.allocate_buffer(BufferDesc {
                size: std::mem::size_of_val(self.meshlet_vertices.as_slice()) as vk::DeviceSize,
                usage: storage,
                location: MemoryLocation::DeviceLocal,
                label: Some(c"meshlet vertex indices"),
            })?,
            meshlet_triangles: buffers.allocate_buffer(BufferDesc {
                size: self.meshlet_triangles.len() as vk::DeviceSize,
                usage: storage,
                location: MemoryLocation::DeviceLocal,
                label: Some(c"meshlet triangle indices"),
            })?,
        };

        tracing::info!(
            meshes = self.entries.len(),
            vertices = self.vertices.len(),
            meshlets = self.meshlets.len(),
            "finalized mesh buffer"
        );
        self.gpu = Some(gpu);
        Ok(gpu)
    }

    pub fn gpu_buffers(&self) -> Option<MeshGpuBuffers> {
        self.gpu
    }

    /// Records staged copies bringing one mesh's geometry into the device
    /// buffers. The whole meshlet region rides along with the first upload.
    ///
    /// # Panics
    ///
    /// Panics before [`finalize`](Self::finalize).
    pub fn upload_mesh(
        &mut self,
        cmd: vk::CommandBuffer,
        ring: &mut FrameUploadRing,
        buffers: &BufferManager,
        id: MeshId,
    ) -> RenderResult<()> {
        let gpu = match self.gpu {
            Some(gpu) => gpu,
            None => panic!("upload requires finalize"),
        };
        let entry = self.entries[&id];

        let vertex_range =
            entry.vertex_offset as usize..(entry.vertex_offset + entry.vertex_count) as usize;
        copy_region(
            cmd,
            ring,
            buffers,
            gpu.vertices,
            bytemuck::cast_slice(&self.vertices[vertex_range]),
            entry.vertex_offset as u64 * std::mem::size_of::<Vertex>() as u64,
        )?;

        let index_range =
            entry.index_offset as usize..(entry.index_offset + entry.index_count) as usize;
        copy_region(
            cmd,
            ring,
            buffers,
            gpu.indices,
            bytemuck::cast_slice(&self.indices[index_range]),
            entry.index_offset as u64 * std::mem::size_of::<u32>() as u64,
        )?;

        if !self.meshlets_uploaded {
            copy_region(
                cmd,
                ring,
                buffers,
                gpu.meshlets,
                bytemuck::cast_slice(&self.meshlets),
                0,
            )?;
            copy_region(
                cmd,
                ring,
                buffers,
                gpu.meshlet_vertices,
                bytemuck::cast_slice(&self.meshlet_vertices),
                0,
            )?;
            copy_region(
                cmd,
                ring,
                buffers,
                gpu.meshlet_triangles,
                &self.meshlet_triangles,
                0,
            )?;
            self.meshlets_uploaded = true;
        }
        Ok(())
    }

    /// Binds the consolidated vertex and index buffers.
    ///
    /// # Panics
    ///
    /// Panics before [`finalize`](Self::finalize).
    pub fn bind_buffers(&self, cmd: vk::CommandBuffer, buffers: &BufferManager) {
        let gpu = match self.gpu {
            Some(gpu) => gpu,
            None => panic!("bind_buffers requires finalize"),
        };
        let device = buffers.device();
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[buffers.buffer(gpu.vertices)], &[0]);
            device.cmd_bind_index_buffer(
                cmd,
                buffers.buffer(gpu.indices),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    /// Issues the indexed draw for one mesh. `first_instance` feeds
    /// `gl_InstanceIndex`, which shaders use to index the scene object array.
    ///
    /// # Panics
    ///
    /// Panics before [`finalize`](Self::finalize).
    pub fn draw_mesh(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        id: MeshId,
        first_instance: u32,
    ) {
        assert!(self.gpu.is_some(), "draw requires finalize");
        let entry = self.entries[&id];
        unsafe {
            device.cmd_draw_indexed(
                cmd,
                entry.index_count,
                1,
                entry.index_offset,
                entry.vertex_offset as i32,
                first_instance,
            );
        }
    }
}

fn copy_region(
    cmd: vk::CommandBuffer,
    ring: &mut FrameUploadRing,
    buffers: &BufferManager,
    dst: BufferHandle,
    data: &[u8],
    dst_offset: vk::DeviceSize,
) -> RenderResult<()> {
    let staged = ring.write_bytes(data)?;
    unsafe {
        buffers.device().cmd_copy_buffer(
            cmd,
            staged.buffer,
            buffers.buffer(dst),
            &[vk::BufferCopy {
                src_offset: staged.offset,
                dst_offset,
                size: staged.size,
            }],
        );
    }
    Ok(())
}

/// Tracks which meshes still need their geometry staged to the GPU.
#[derive(Default)]
pub struct MeshManager {
    mesh_buffer: MeshBuffer,
    pending_uploads: Vec<MeshId>,
}

impl MeshManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh_buffer(&self) -> &MeshBuffer {
        &self.mesh_buffer
    }

    /// Registers a mesh and queues it for upload. Duplicate ids neither
    /// re-register nor re-upload.
    pub fn add_mesh(&mut self, id: MeshId, vertices: &[Vertex], indices: &[u32]) -> MeshEntry {
        if self.mesh_buffer.contains(id) {
            return self.mesh_buffer.entry(id);
        }
        let entry = self.mesh_buffer.add_mesh(id, vertices, indices);
        self.pending_uploads.push(id);
        entry
    }

    pub fn finalize(&mut self, buffers: &mut BufferManager) -> RenderResult<MeshGpuBuffers> {
        self.mesh_buffer.finalize(buffers)
    }

    /// Records staged copies for every pending mesh into `cmd`.
    pub fn record_uploads(
        &mut self,
        cmd: vk::CommandBuffer,
        ring: &mut FrameUploadRing,
        buffers: &BufferManager,
    ) -> RenderResult<()> {
        for id in std::mem::take(&mut self.pending_uploads) {
            self.mesh_buffer.upload_mesh(cmd, ring, buffers, id)?;
        }
        Ok(())
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.pending_uploads.is_empty()
    }

    pub fn bind_buffers(&self, cmd: vk::CommandBuffer, buffers: &BufferManager) {
        self.mesh_buffer.bind_buffers(cmd, buffers);
    }

    pub fn draw_mesh(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        id: MeshId,
        first_instance: u32,
    ) {
        self.mesh_buffer.draw_mesh(device, cmd, id, first_instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(offset: f32) -> (Vec<Vertex>, Vec<u32>) {
        let v = |x: f32, y: f32| Vertex {
            position: [x + offset, y, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [x, y],
        };
        (
            vec![v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn vertex_layout_is_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(Vertex::input_bindings()[0].stride, 32);
    }

    #[test]
    fn entries_are_contiguous() {
        let mut mesh_buffer = MeshBuffer::new();
        let (v1, i1) = quad(0.0);
        let (v2, i2) = quad(10.0);
        let a = mesh_buffer.add_mesh(MeshId(1), &v1, &i1);
        let b = mesh_buffer.add_mesh(MeshId(2), &v2, &i2);

        assert_eq!(a.vertex_offset, 0);
        assert_eq!(b.vertex_offset, a.vertex_count);
        assert_eq!(b.index_offset, a.index_count);
        assert_eq!(b.meshlet_offset, a.meshlet_count);
        assert_eq!(b.meshlet_vertex_offset, a.meshlet_vertex_count);
        assert_eq!(b.meshlet_triangle_offset, a.meshlet_triangle_count);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut mesh_buffer = MeshBuffer::new();
        let (v, i) = quad(0.0);
        let first = mesh_buffer.add_mesh(MeshId(7), &v, &i);
        let second = mesh_buffer.add_mesh(MeshId(7), &v, &i);
        assert_eq!(first, second);
        assert_eq!(mesh_buffer.vertices.len(), 4);
        assert_eq!(mesh_buffer.indices.len(), 6);
    }

    #[test]
    fn meshlet_vertex_indices_are_rebased() {
        let mut mesh_buffer = MeshBuffer::new();
        let (v1, i1) = quad(0.0);
        let (v2, i2) = quad(10.0);
        mesh_buffer.add_mesh(MeshId(1), &v1, &i1);
        let b = mesh_buffer.add_mesh(MeshId(2), &v2, &i2);

        // The second mesh's meshlet vertex indices point past the first
        // mesh's vertices in the consolidated buffer.
        let slice = &mesh_buffer.meshlet_vertices[b.meshlet_vertex_offset as usize
            ..(b.meshlet_vertex_offset + b.meshlet_vertex_count) as usize];
        assert!(slice.iter().all(|&v| v >= b.vertex_offset));
        assert!(slice.iter().all(|&v| v < b.vertex_offset + b.vertex_count));

        // Meshlet record offsets are rebased too.
        let meshlet = &mesh_buffer.meshlets[b.meshlet_offset as usize];
        assert_eq!(meshlet.vertex_offset, b.meshlet_vertex_offset);
        assert_eq!(meshlet.triangle_offset, b.meshlet_triangle_offset);
    }

    #[test]
    fn bounds_radius_covers_the_farthest_vertex() {
        let mut mesh_buffer = MeshBuffer::new();
        let (v, i) = quad(3.0);
        let entry = mesh_buffer.add_mesh(MeshId(1), &v, &i);

        let expected = v
            .iter()
            .map(|v| Vec3::from(v.position).length())
            .fold(0.0f32, f32::max);
        assert!((entry.bounds_radius - expected).abs() < 1e-5);
        for vertex in &v {
            assert!(Vec3::from(vertex.position).length() <= entry.bounds_radius + 1e-5);
        }
    }

    #[test]
    #[should_panic(expected = "closed after finalize")]
    fn registration_closes_at_finalize() {
        let mut mesh_buffer = MeshBuffer::new();
        let (v, i) = quad(0.0);
        mesh_buffer.add_mesh(MeshId(1), &v, &i);
        mesh_buffer.finalized = true;
        mesh_buffer.add_mesh(MeshId(2), &v, &i);
    }

    #[test]
    #[should_panic(expected = "multiple of 3")]
    fn malformed_indices_panic() {
        let mut mesh_buffer = MeshBuffer::new();
        let (v, _) = quad(0.0);
        mesh_buffer.add_mesh(MeshId(1), &v, &[0, 1]);
    }

    #[test]
    fn manager_queues_each_mesh_once() {
        let mut manager = MeshManager::new();
        let (v, i) = quad(0.0);
        manager.add_mesh(MeshId(1), &v, &i);
        manager.add_mesh(MeshId(1), &v, &i);
        assert!(manager.has_pending_uploads());
        assert_eq!(manager.pending_uploads.len(), 1);
    }
}
