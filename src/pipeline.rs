//! Pipeline layouts and pipeline state objects.
//!
//! Both pipelines the renderer builds share one layout shape: the two
//! bindless set layouts plus a single push-constant range carrying the frame
//! parameter block. Graphics pipelines target dynamic rendering, so the
//! attachment formats are part of pipeline creation instead of a render pass
//! object.

use crate::{
    Device, HasDevice, RenderResult,
    descriptor::DescriptorSetLayout,
    shader::{ShaderModule, ShaderStage},
    utils::AsVkHandle,
};
use ash::vk;
use smallvec::SmallVec;

/// A `VkPipelineLayout` plus the push-constant size it was built with.
pub struct PipelineLayout {
    device: Device,
    handle: vk::PipelineLayout,
    push_constant_size: u32,
}

impl PipelineLayout {
    /// Creates a layout over the given set layouts with one push-constant
    /// range visible to all stages. `push_constant_size` of zero omits the
    /// range.
    pub fn new(
        device: Device,
        set_layouts: &[&DescriptorSetLayout],
        push_constant_size: u32,
    ) -> RenderResult<Self> {
        let raw_layouts: SmallVec<[vk::DescriptorSetLayout; 4]> =
            set_layouts.iter().map(|layout| layout.vk_handle()).collect();
        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL,
            offset: 0,
            size: push_constant_size,
        };
        let info = vk::PipelineLayoutCreateInfo {
            set_layout_count: raw_layouts.len() as u32,
            p_set_layouts: raw_layouts.as_ptr(),
            push_constant_range_count: u32::from(push_constant_size > 0),
            p_push_constant_ranges: &push_constant_range,
            ..Default::default()
        };
        let handle = unsafe { device.create_pipeline_layout(&info, None)? };
        Ok(Self {
            device,
            handle,
            push_constant_size,
        })
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

impl HasDevice for PipelineLayout {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for PipelineLayout {
    type Handle = vk::PipelineLayout;
    fn vk_handle(&self) -> Self::Handle {
        self.handle
    }
}
impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.handle, None);
        }
    }
}

/// A compiled pipeline state object.
pub struct Pipeline {
    device: Device,
    handle: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}
impl HasDevice for Pipeline {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Pipeline {
    type Handle = vk::Pipeline;
    fn vk_handle(&self) -> Self::Handle {
        self.handle
    }
}
impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
        }
    }
}

/// Fixed-function state for [`create_graphics_pipeline`].
pub struct GraphicsPipelineDesc<'a> {
    pub stages: &'a [ShaderStage<'a>],
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub cull_mode: vk::CullModeFlags,
}

/// Builds a graphics pipeline targeting dynamic rendering.
///
/// Viewport and scissor are dynamic state; everything else is baked.
pub fn create_graphics_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    desc: &GraphicsPipelineDesc,
) -> RenderResult<Pipeline> {
    let mut modules: SmallVec<[ShaderModule; 2]> = SmallVec::new();
    for stage in desc.stages {
        modules.push(ShaderModule::new(device.clone(), stage.spirv)?);
    }
    let stage_infos: SmallVec<[vk::PipelineShaderStageCreateInfo; 2]> = desc
        .stages
        .iter()
        .zip(&modules)
        .map(|(stage, module)| vk::PipelineShaderStageCreateInfo {
            stage: stage.stage,
            module: module.vk_handle(),
            p_name: stage.entry_point.as_ptr(),
            ..Default::default()
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(desc.vertex_bindings)
        .vertex_attribute_descriptions(desc.vertex_attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Counts only; the actual rects are dynamic.
    let viewport = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: desc.cull_mode,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let blend_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        attachment_count: 1,
        p_attachments: &blend_attachment,
        ..Default::default()
    };
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats = [desc.color_format];
    let mut rendering = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stage_infos)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(layout.vk_handle())
        .push_next(&mut rendering);

    let handle = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
            .map_err(|(_, err)| err)?[0]
    };
    Ok(Pipeline {
        device: device.clone(),
        handle,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
    })
}

/// Builds a compute pipeline from a single stage.
pub fn create_compute_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    stage: &ShaderStage,
) -> RenderResult<Pipeline> {
    assert_eq!(stage.stage, vk::ShaderStageFlags::COMPUTE);
    let module = ShaderModule::new(device.clone(), stage.spirv)?;
    let info = vk::ComputePipelineCreateInfo {
        stage: vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::COMPUTE,
            module: module.vk_handle(),
            p_name: stage.entry_point.as_ptr(),
            ..Default::default()
        },
        layout: layout.vk_handle(),
        ..Default::default()
    };
    let handle = unsafe {
        device
            .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
            .map_err(|(_, err)| err)?[0]
    };
    Ok(Pipeline {
        device: device.clone(),
        handle,
        bind_point: vk::PipelineBindPoint::COMPUTE,
    })
}
