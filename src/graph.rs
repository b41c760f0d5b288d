//! Linear render graph.
//!
//! Passes are executed in insertion order against a shared context; there is
//! no dependency solver. Inter-pass hazards are handled by the passes
//! themselves with explicit `synchronization2` barriers.

use crate::{
    Device, RenderResult,
    bindless::BindlessHeap,
    mesh::MeshBuffer,
    resources::{BufferHandle, BufferManager},
    scene::{GpuFrameParams, SceneDataBuilder},
};
use ash::vk;

/// Everything a pass may touch while recording. Borrowed for the duration of
/// one frame's graphics recording.
pub struct RenderGraphContext<'a> {
    pub device: &'a Device,
    pub cmd: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    /// This frame's swapchain image view, in COLOR_ATTACHMENT_OPTIMAL.
    pub color_view: vk::ImageView,
    pub depth_view: vk::ImageView,
    pub buffers: &'a BufferManager,
    pub bindless: &'a BindlessHeap,
    pub mesh_buffer: &'a MeshBuffer,
    pub scene: &'a SceneDataBuilder,
    pub frame_params: GpuFrameParams,
    /// Tile culling outputs; shaders reach them through the bindless slots in
    /// `frame_params`, passes need the raw handles only for barriers.
    pub tile_headers: BufferHandle,
    pub tile_indices: BufferHandle,
}

/// One recorded stage of the frame.
pub trait RenderGraphPass {
    fn name(&self) -> &'static str;

    /// Records this pass's commands into `ctx.cmd`.
    fn execute(&self, ctx: &RenderGraphContext) -> RenderResult<()>;
}

/// Ordered pass list.
#[derive(Default)]
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderGraphPass>>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: Box<dyn RenderGraphPass>) {
        tracing::info!(pass = pass.name(), "registered render pass");
        self.passes.push(pass);
    }

    pub fn passes(&self) -> impl Iterator<Item = &dyn RenderGraphPass> {
        self.passes.iter().map(Box::as_ref)
    }

    /// Records every pass, in order, into the context's command buffer.
    pub fn execute(&self, ctx: &RenderGraphContext) -> RenderResult<()> {
        for pass in &self.passes {
            pass.execute(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);
    impl RenderGraphPass for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn execute(&self, _ctx: &RenderGraphContext) -> RenderResult<()> {
            Ok(())
        }
    }

    #[test]
    fn passes_keep_insertion_order() {
        let mut graph = RenderGraph::new();
        graph.add_pass(Box::new(Named("culling")));
        graph.add_pass(Box::new(Named("forward")));
        let names: Vec<_> = graph.passes().map(|p| p.name()).collect();
        assert_eq!(names, ["culling", "forward"]);
    }
}
