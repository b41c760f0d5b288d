//! Per-frame scene data.
//!
//! The scene is rebuilt from scratch every frame: the application pushes
//! object instances into a [`SceneDataBuilder`], the renderer stages the
//! resulting [`GpuSceneObject`] array through the upload ring and hands its
//! bindless slot to the shaders in [`GpuFrameParams`]. Shaders index the
//! array with `gl_InstanceIndex`, which the draw loop feeds as
//! `first_instance`.

use crate::{
    RenderResult,
    mesh::{MeshEntry, MeshId},
    upload::{FrameUploadRing, UploadAllocation},
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// One object instance as the shaders see it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuSceneObject {
    pub model: Mat4,
    pub meshlet_offset: u32,
    pub meshlet_count: u32,
    /// Bindless texture slot for the base color, or 0 for untextured.
    pub base_color_texture: u32,
    /// Mesh-space bounding-sphere radius, for coarse culling in shaders.
    pub bounds_radius: f32,
}

/// Push-constant block shared by the culling and forward pipelines.
///
/// The `*_slot` fields are bindless storage-buffer slots; everything the
/// shaders touch is reached through these plus `gl_InstanceIndex`. Must stay
/// within the 128-byte push-constant floor.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuFrameParams {
    pub view_proj: Mat4,
    pub scene_object_slot: u32,
    pub light_slot: u32,
    pub tile_header_slot: u32,
    pub tile_index_slot: u32,
    pub screen_size: [u32; 2],
    pub tile_count: [u32; 2],
    pub light_count: u32,
    pub _pad: [u32; 3],
}

/// Pinhole camera; produces Vulkan-convention matrices ([0, 1] clip depth,
/// Y flipped in the projection).
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: std::f32::consts::FRAC_PI_3,
            z_near: 0.1,
            z_far: 1000.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y_radians, aspect, self.z_near, self.z_far);
        // glam builds GL-style clip space; Vulkan's framebuffer Y points down.
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }
}

/// Collects this frame's visible objects. Cleared and refilled each frame.
#[derive(Default)]
pub struct SceneDataBuilder {
    pub camera: Camera,
    objects: Vec<(MeshId, GpuSceneObject)>,
}

impl SceneDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Adds an instance of a registered mesh. The entry supplies the meshlet
    /// slice and bounds so culling shaders need no mesh table.
    pub fn push_object(
        &mut self,
        id: MeshId,
        entry: MeshEntry,
        model: Mat4,
        base_color_texture: u32,
    ) {
        self.objects.push((
            id,
            GpuSceneObject {
                model,
                meshlet_offset: entry.meshlet_offset,
                meshlet_count: entry.meshlet_count,
                base_color_texture,
                bounds_radius: entry.bounds_radius,
            },
        ));
    }

    /// Draw order; index in this slice is the instance index shaders see.
    pub fn objects(&self) -> &[(MeshId, GpuSceneObject)] {
        &self.objects
    }

    pub fn len(&self) -> u32 {
        self.objects.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stages the object array into the upload ring. With no objects a single
    /// zeroed record is staged so the bindless slot stays valid.
    pub fn stage(&self, ring: &mut FrameUploadRing) -> RenderResult<UploadAllocation> {
        if self.objects.is_empty() {
            ring.write_slice(&[GpuSceneObject::zeroed()])
        } else {
            let records: Vec<GpuSceneObject> =
                self.objects.iter().map(|(_, object)| *object).collect();
            ring.write_slice(&records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layouts() {
        assert_eq!(std::mem::size_of::<GpuSceneObject>(), 80);
        assert_eq!(std::mem::size_of::<GpuFrameParams>(), 112);
        // Must fit the Vulkan minimum push-constant budget.
        assert!(std::mem::size_of::<GpuFrameParams>() <= 128);
    }

    #[test]
    fn projection_is_vulkan_convention() {
        let camera = Camera::default();
        let proj = camera.projection(16.0 / 9.0);
        // Y flipped relative to GL clip space.
        assert!(proj.y_axis.y < 0.0);

        // A point in front of the camera lands inside [0, 1] clip depth.
        let clip = camera.view_proj(16.0 / 9.0) * Vec3::new(0.0, 0.0, 0.0).extend(1.0);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0, "depth {depth}");
    }

    #[test]
    fn instance_order_matches_push_order() {
        let entry = MeshEntry {
            vertex_offset: 0,
            vertex_count: 3,
            index_offset: 0,
            index_count: 3,
            meshlet_offset: 4,
            meshlet_count: 2,
            meshlet_vertex_offset: 0,
            meshlet_vertex_count: 3,
            meshlet_triangle_offset: 0,
            meshlet_triangle_count: 3,
            bounds_radius: 2.5,
        };
        let mut scene = SceneDataBuilder::new();
        scene.push_object(MeshId(1), entry, Mat4::IDENTITY, 0);
        scene.push_object(MeshId(2), entry, Mat4::from_translation(Vec3::X), 7);

        assert_eq!(scene.len(), 2);
        assert_eq!(scene.objects()[0].0, MeshId(1));
        assert_eq!(scene.objects()[1].0, MeshId(2));
        assert_eq!(scene.objects()[1].1.base_color_texture, 7);
        assert_eq!(scene.objects()[0].1.meshlet_offset, 4);
        assert_eq!(scene.objects()[0].1.bounds_radius, 2.5);
    }
}
