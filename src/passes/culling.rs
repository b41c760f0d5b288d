//! Tiled light culling.

use crate::{
    HasDevice, RenderResult,
    graph::{RenderGraphContext, RenderGraphPass},
    lights::tile_counts,
    pipeline::{Pipeline, PipelineLayout, create_compute_pipeline},
    shader::ShaderStage,
    utils::AsVkHandle,
};
use ash::vk;
use std::sync::Arc;

/// Compute pass that bins this frame's lights into screen tiles.
///
/// One workgroup per tile; the shader tests every light against the tile's
/// frustum and appends survivors to the tile's slice of the index buffer,
/// writing the `{offset, count}` header last. The forward pass reads both
/// buffers from fragment shaders, so the pass ends with a compute-to-fragment
/// barrier on them.
pub struct TiledLightCullingPass {
    layout: Arc<PipelineLayout>,
    pipeline: Pipeline,
}

impl TiledLightCullingPass {
    pub fn new(
        layout: Arc<PipelineLayout>,
        shader: &ShaderStage,
    ) -> RenderResult<Self> {
        let pipeline = create_compute_pipeline(layout.device(), &layout, shader)?;
        Ok(Self { layout, pipeline })
    }
}

impl RenderGraphPass for TiledLightCullingPass {
    fn name(&self) -> &'static str {
        "tiled_light_culling"
    }

    fn execute(&self, ctx: &RenderGraphContext) -> RenderResult<()> {
        let device = ctx.device;
        let (tiles_x, tiles_y) = tile_counts(ctx.extent);
        let tile_headers = ctx.buffers.buffer(ctx.tile_headers);
        let tile_indices = ctx.buffers.buffer(ctx.tile_indices);
        unsafe {
            // The tile buffers are shared by every in-flight frame; the
            // previous frame's fragment reads must finish before this
            // dispatch overwrites them.
            let acquire = [
                fragment_to_compute_barrier(tile_headers),
                fragment_to_compute_barrier(tile_indices),
            ];
            device.cmd_pipeline_barrier2(
                ctx.cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(&acquire),
            );

            device.cmd_bind_pipeline(
                ctx.cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline.vk_handle(),
            );
            device.cmd_bind_descriptor_sets(
                ctx.cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.layout.vk_handle(),
                0,
                &ctx.bindless.descriptor_sets(),
                &[],
            );
            device.cmd_push_constants(
                ctx.cmd,
                self.layout.vk_handle(),
                vk::ShaderStageFlags::ALL,
                0,
                bytemuck::bytes_of(&ctx.frame_params),
            );
            device.cmd_dispatch(ctx.cmd, tiles_x, tiles_y, 1);

            let publish = [
                compute_to_fragment_barrier(tile_headers),
                compute_to_fragment_barrier(tile_indices),
            ];
            device.cmd_pipeline_barrier2(
                ctx.cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(&publish),
            );
        }
        Ok(())
    }
}

/// Guards the dispatch's writes against the previous frame's fragment reads.
/// Write-after-read needs only an execution dependency, so no source access.
fn fragment_to_compute_barrier(buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2 {
        src_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
        src_access_mask: vk::AccessFlags2::empty(),
        dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
        dst_access_mask: vk::AccessFlags2::SHADER_WRITE,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        buffer,
        offset: 0,
        size: vk::WHOLE_SIZE,
        ..Default::default()
    }
}

/// Makes the dispatch's writes visible to this frame's fragment reads.
fn compute_to_fragment_barrier(buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2 {
        src_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
        src_access_mask: vk::AccessFlags2::SHADER_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
        dst_access_mask: vk::AccessFlags2::SHADER_READ,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        buffer,
        offset: 0,
        size: vk::WHOLE_SIZE,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_barriers_bracket_the_dispatch() {
        let acquire = fragment_to_compute_barrier(vk::Buffer::null());
        assert_eq!(acquire.src_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(acquire.dst_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(acquire.src_access_mask, vk::AccessFlags2::empty());
        assert_eq!(acquire.dst_access_mask, vk::AccessFlags2::SHADER_WRITE);

        let publish = compute_to_fragment_barrier(vk::Buffer::null());
        assert_eq!(publish.src_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(publish.src_access_mask, vk::AccessFlags2::SHADER_WRITE);
        assert_eq!(publish.dst_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(publish.dst_access_mask, vk::AccessFlags2::SHADER_READ);
        assert_eq!(publish.size, vk::WHOLE_SIZE);
    }
}
