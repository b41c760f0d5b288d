//! Dynamic light set and the tiled-culling buffer layout.
//!
//! Lights are rebuilt every frame on the CPU and staged through the upload
//! ring; nothing here is persistent GPU state. The culling pass divides the
//! screen into [`TILE_SIZE`]² pixel tiles and fills, per tile, a header
//! (offset and visible count) and a fixed-capacity index list into the light
//! array.

use crate::{RenderResult, upload::FrameUploadRing, utils::div_round_up};
use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Screen-space tile edge in pixels. Matches the culling shader's workgroup.
pub const TILE_SIZE: u32 = 16;
/// Per-tile capacity of the visible-light index list. Lights beyond this are
/// dropped by the culling shader, brightest-first ordering is the
/// application's responsibility.
pub const MAX_LIGHTS_PER_TILE: u32 = 256;

/// Light record as the shaders see it.
///
/// `position_radius` packs world position and influence radius;
/// `color_intensity` packs linear RGB and a scalar multiplier. Directional
/// lights store their direction in the position slot and ignore the radius.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position_radius: [f32; 4],
    pub color_intensity: [f32; 4],
    pub light_type: u32,
    pub _pad: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LightKind {
    Point = 0,
    Directional = 1,
}

/// Per-tile record written by the culling shader: where the tile's visible
/// light indices start in the flat index buffer, and how many there are.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuTileHeader {
    pub offset: u32,
    pub count: u32,
}

/// CPU-side light list, cleared and refilled each frame.
#[derive(Default)]
pub struct LightManager {
    lights: Vec<GpuLight>,
}

impl LightManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lights.clear();
    }

    pub fn add_point(&mut self, position: [f32; 3], radius: f32, color: [f32; 3], intensity: f32) {
        self.lights.push(GpuLight {
            position_radius: [position[0], position[1], position[2], radius],
            color_intensity: [color[0], color[1], color[2], intensity],
            light_type: LightKind::Point as u32,
            _pad: [0; 3],
        });
    }

    pub fn add_directional(&mut self, direction: [f32; 3], color: [f32; 3], intensity: f32) {
        self.lights.push(GpuLight {
            position_radius: [direction[0], direction[1], direction[2], 0.0],
            color_intensity: [color[0], color[1], color[2], intensity],
            light_type: LightKind::Directional as u32,
            _pad: [0; 3],
        });
    }

    pub fn len(&self) -> u32 {
        self.lights.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn lights(&self) -> &[GpuLight] {
        &self.lights
    }

    /// Stages this frame's light array into the upload ring and returns the
    /// allocation. With no lights a single zeroed record is staged so the
    /// bindless slot always points at a valid buffer range.
    pub fn stage(&self, ring: &mut FrameUploadRing) -> RenderResult<crate::upload::UploadAllocation> {
        if self.lights.is_empty() {
            ring.write_slice(&[GpuLight::zeroed()])
        } else {
            ring.write_slice(&self.lights)
        }
    }
}

/// Tile grid dimensions covering `extent`, rounding partial tiles up.
pub fn tile_counts(extent: vk::Extent2D) -> (u32, u32) {
    (
        div_round_up(extent.width, TILE_SIZE),
        div_round_up(extent.height, TILE_SIZE),
    )
}

/// Size of the per-tile header buffer (one [`GpuTileHeader`] per tile).
pub fn tile_header_buffer_size(extent: vk::Extent2D) -> vk::DeviceSize {
    let (x, y) = tile_counts(extent);
    u64::from(x) * u64::from(y) * std::mem::size_of::<GpuTileHeader>() as u64
}

/// Size of the per-tile light index list buffer.
pub fn tile_index_buffer_size(extent: vk::Extent2D) -> vk::DeviceSize {
    let (x, y) = tile_counts(extent);
    u64::from(x) * u64::from(y) * u64::from(MAX_LIGHTS_PER_TILE) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_light_layout() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
        assert_eq!(std::mem::offset_of!(GpuLight, color_intensity), 16);
        assert_eq!(std::mem::offset_of!(GpuLight, light_type), 32);
    }

    #[test]
    fn point_light_packing() {
        let mut lights = LightManager::new();
        lights.add_point([1.0, 2.0, 3.0], 4.0, [0.5, 0.6, 0.7], 8.0);
        let light = lights.lights()[0];
        assert_eq!(light.position_radius, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(light.color_intensity, [0.5, 0.6, 0.7, 8.0]);
        assert_eq!(light.light_type, LightKind::Point as u32);
    }

    #[test]
    fn tile_grid_rounds_up() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert_eq!(tile_counts(extent), (120, 68));

        let odd = vk::Extent2D {
            width: 1921,
            height: 1,
        };
        assert_eq!(tile_counts(odd), (121, 1));
    }

    #[test]
    fn tile_buffer_sizes() {
        let extent = vk::Extent2D {
            width: 32,
            height: 16,
        };
        assert_eq!(tile_header_buffer_size(extent), 2 * 8);
        assert_eq!(
            tile_index_buffer_size(extent),
            2 * u64::from(MAX_LIGHTS_PER_TILE) * 4
        );
    }
}
