//! Forward opaque pass.

use crate::{
    HasDevice, RenderResult,
    graph::{RenderGraphContext, RenderGraphPass},
    mesh::Vertex,
    pipeline::{GraphicsPipelineDesc, Pipeline, PipelineLayout, create_graphics_pipeline},
    shader::ShaderStage,
    utils::AsVkHandle,
};
use ash::vk;
use std::sync::Arc;

/// Rasterizes every scene object into the swapchain image with depth
/// testing, shading against the tile light lists the culling pass produced.
///
/// Uses dynamic rendering; the renderer is responsible for having the color
/// image in COLOR_ATTACHMENT_OPTIMAL before the graph runs.
pub struct ForwardPass {
    layout: Arc<PipelineLayout>,
    pipeline: Pipeline,
    clear_color: [f32; 4],
}

impl ForwardPass {
    pub fn new(
        layout: Arc<PipelineLayout>,
        vertex_shader: &ShaderStage,
        fragment_shader: &ShaderStage,
        color_format: vk::Format,
        depth_format: vk::Format,
        clear_color: [f32; 4],
    ) -> RenderResult<Self> {
        let bindings = Vertex::input_bindings();
        let attributes = Vertex::input_attributes();
        let pipeline = create_graphics_pipeline(
            layout.device(),
            &layout,
            &GraphicsPipelineDesc {
                stages: &[*vertex_shader, *fragment_shader],
                vertex_bindings: &bindings,
                vertex_attributes: &attributes,
                color_format,
                depth_format: Some(depth_format),
                cull_mode: vk::CullModeFlags::BACK,
            },
        )?;
        Ok(Self {
            layout,
            pipeline,
            clear_color,
        })
    }
}

impl RenderGraphPass for ForwardPass {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn execute(&self, ctx: &RenderGraphContext) -> RenderResult<()> {
        let device = ctx.device;
        let color_attachment = vk::RenderingAttachmentInfo {
            image_view: ctx.color_view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            ..Default::default()
        };
        let depth_attachment = vk::RenderingAttachmentInfo {
            image_view: ctx.depth_view,
            image_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            ..Default::default()
        };
        let rendering = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: ctx.extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        unsafe {
            device.cmd_begin_rendering(ctx.cmd, &rendering);
            device.cmd_set_viewport(
                ctx.cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: ctx.extent.width as f32,
                    height: ctx.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                ctx.cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: ctx.extent,
                }],
            );
            device.cmd_bind_pipeline(
                ctx.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.vk_handle(),
            );
            device.cmd_bind_descriptor_sets(
                ctx.cmd,
                vk::PipelineBindPoint::GRAPHICS,
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
        }

        // Nothing to draw until geometry is finalized; the clear still runs.
        if ctx.mesh_buffer.gpu_buffers().is_some() && !ctx.scene.is_empty() {
            ctx.mesh_buffer.bind_buffers(ctx.cmd, ctx.buffers);
            for (instance, (id, _)) in ctx.scene.objects().iter().enumerate() {
                ctx.mesh_buffer
                    .draw_mesh(device, ctx.cmd, *id, instance as u32);
            }
        }

        unsafe {
            device.cmd_end_rendering(ctx.cmd);
        }
        Ok(())
    }
}
