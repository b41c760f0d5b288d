//! Frame orchestration.
//!
//! [`Renderer`] owns the whole Vulkan object graph and drives one frame per
//! [`draw`](Renderer::draw) call: wait for the frame slot, acquire a
//! swapchain image, stage per-frame data through the upload ring, submit
//! pending geometry copies on the transfer queue, record the render graph on
//! the graphics queue, and present. Swapchain loss at any point abandons the
//! frame and rebuilds the surface-sized objects.

use crate::{
    Allocator, Device, HasDevice, Instance, InstanceConfig, RenderResult, Surface,
    bindless::{BindlessHeap, PerFrameSlots},
    graph::{RenderGraph, RenderGraphContext},
    lights::{LightManager, tile_counts, tile_header_buffer_size, tile_index_buffer_size},
    mesh::{MeshEntry, MeshGpuBuffers, MeshId, MeshManager, Vertex},
    passes::{ForwardPass, TiledLightCullingPass},
    pipeline::PipelineLayout,
    resources::{BufferDesc, BufferHandle, BufferManager, MemoryLocation, TextureDesc,
        TextureHandle, TextureManager},
    sampler::Sampler,
    scene::{GpuFrameParams, SceneDataBuilder},
    shader::ShaderStage,
    swapchain::{SurfaceStatus, SwapchainManager},
    sync::{FrameSync, MAX_FRAMES_IN_FLIGHT},
    upload::{FrameUploadRing, UploadRingConfig},
    utils::AsVkHandle,
};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Renderer-wide knobs. Defaults are sensible for a desktop application.
pub struct RendererConfig {
    pub instance: InstanceConfig,
    pub upload_ring: UploadRingConfig,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            upload_ring: UploadRingConfig::default(),
            clear_color: [0.01, 0.01, 0.012, 1.0],
        }
    }
}

/// SPIR-V for the built-in passes, supplied by the application.
pub struct RendererShaders<'a> {
    pub light_culling: ShaderStage<'a>,
    pub forward_vertex: ShaderStage<'a>,
    pub forward_fragment: ShaderStage<'a>,
}

struct FrameCommands {
    graphics_pool: vk::CommandPool,
    graphics_cmd: vk::CommandBuffer,
    transfer_pool: vk::CommandPool,
    transfer_cmd: vk::CommandBuffer,
}

/// The top-level renderer. Field order doubles as drop order; the device
/// outlives everything that borrows it because each wrapper holds its own
/// `Device` clone.
pub struct Renderer {
    frame_index: usize,
    needs_recreate: bool,

    pub scene: SceneDataBuilder,
    pub lights: LightManager,

    frames: Vec<FrameCommands>,
    graph: RenderGraph,
    sync: FrameSync,
    upload_ring: FrameUploadRing,

    // Bindless slots the frame parameter block points shaders at. Scene and
    // light data is restaged every frame, so those get one slot per in-flight
    // frame; the tile buffers are only re-pointed under device_wait_idle.
    scene_object_slots: PerFrameSlots,
    light_slots: PerFrameSlots,
    tile_header_slot: u32,
    tile_index_slot: u32,

    // Surface-sized resources, rebuilt with the swapchain.
    tile_headers: BufferHandle,
    tile_indices: BufferHandle,
    depth_texture: TextureHandle,

    default_sampler: Sampler,
    bindless: BindlessHeap,
    mesh_manager: MeshManager,
    textures: TextureManager,
    buffers: BufferManager,
    swapchain: SwapchainManager,
    device: Device,
    _surface: Surface,
    _instance: Instance,
}

impl HasDevice for Renderer {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl Renderer {
    /// Builds the full object graph against a window.
    ///
    /// # Safety
    ///
    /// The display and window handles must stay valid for the renderer's
    /// lifetime.
    pub unsafe fn new(
        config: RendererConfig,
        shaders: &RendererShaders,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        window_extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        assert!(
            config.upload_ring.depth >= MAX_FRAMES_IN_FLIGHT,
            "upload ring depth must cover every frame in flight"
        );

        let instance = Instance::new(config.instance, display_handle)?;
        let surface = unsafe { Surface::create(instance.clone(), display_handle, window_handle)? };
        let device = instance.create_device(&surface)?;
        let allocator = Allocator::new(device.clone())?;

        let swapchain = SwapchainManager::new(device.clone(), surface.clone(), window_extent)?;
        let mut buffers = BufferManager::new(device.clone(), allocator.clone());
        let mut textures = TextureManager::new(device.clone(), allocator.clone());
        let mut bindless = BindlessHeap::new(device.clone())?;
        let default_sampler = Sampler::new_linear_repeat(device.clone())?;
        let upload_ring =
            FrameUploadRing::new(device.clone(), allocator.clone(), config.upload_ring)?;
        let sync = FrameSync::new(device.clone())?;

        // Per-frame data lands in fresh ring regions every frame; each
        // in-flight frame rewrites its own slot so the previous frame's
        // shaders never read through a descriptor mid-rewrite.
        let scene_object_slots = bindless.allocate_per_frame_buffer_slots()?;
        let light_slots = bindless.allocate_per_frame_buffer_slots()?;
        let tile_header_slot = bindless.allocate_buffer_slot()?;
        let tile_index_slot = bindless.allocate_buffer_slot()?;

        let extent = swapchain.extent();
        let (tile_headers, tile_indices) = create_tile_buffers(&mut buffers, extent)?;
        bindless.update_buffer(
            tile_header_slot,
            buffers.buffer(tile_headers),
            0,
            vk::WHOLE_SIZE,
        );
        bindless.update_buffer(
            tile_index_slot,
            buffers.buffer(tile_indices),
            0,
            vk::WHOLE_SIZE,
        );
        let depth_texture = create_depth_texture(&mut textures, extent)?;

        let pipeline_layout = Arc::new(PipelineLayout::new(
            device.clone(),
            &[bindless.buffer_set_layout(), bindless.texture_set_layout()],
            std::mem::size_of::<GpuFrameParams>() as u32,
        )?);
        let mut graph = RenderGraph::new();
        graph.add_pass(Box::new(TiledLightCullingPass::new(
            pipeline_layout.clone(),
            &shaders.light_culling,
        )?));
        graph.add_pass(Box::new(ForwardPass::new(
            pipeline_layout.clone(),
            &shaders.forward_vertex,
            &shaders.forward_fragment,
            swapchain.format(),
            DEPTH_FORMAT,
            config.clear_color,
        )?));

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frames.push(create_frame_commands(&device)?);
        }

        tracing::info!("renderer ready");
        Ok(Self {
            frame_index: 0,
            needs_recreate: false,
            scene: SceneDataBuilder::new(),
            lights: LightManager::new(),
            frames,
            graph,
            sync,
            upload_ring,
            scene_object_slots,
            light_slots,
            tile_header_slot,
            tile_index_slot,
            tile_headers,
            tile_indices,
            depth_texture,
            default_sampler,
            bindless,
            mesh_manager: MeshManager::new(),
            textures,
            buffers,
            swapchain,
            device,
            _surface: surface,
            _instance: instance,
        })
    }

    /// Registers a mesh for rendering. Must happen before
    /// [`finalize_meshes`](Self::finalize_meshes).
    pub fn add_mesh(&mut self, id: MeshId, vertices: &[Vertex], indices: &[u32]) -> MeshEntry {
        self.mesh_manager.add_mesh(id, vertices, indices)
    }

    pub fn mesh_entry(&self, id: MeshId) -> MeshEntry {
        self.mesh_manager.mesh_buffer().entry(id)
    }

    /// Sizes and allocates the consolidated geometry buffers. One-shot;
    /// geometry is staged to the GPU over the following frames.
    pub fn finalize_meshes(&mut self) -> RenderResult<MeshGpuBuffers> {
        self.mesh_manager.finalize(&mut self.buffers)
    }

    /// Registers an external texture view in the bindless heap using the
    /// default sampler, returning its slot for use in scene objects.
    pub fn register_texture(&mut self, view: vk::ImageView) -> RenderResult<u32> {
        let slot = self.bindless.allocate_texture_slot()?;
        self.bindless
            .update_texture(slot, view, self.default_sampler.vk_handle());
        Ok(slot)
    }

    pub fn textures(&mut self) -> &mut TextureManager {
        &mut self.textures
    }

    pub fn buffers(&mut self) -> &mut BufferManager {
        &mut self.buffers
    }

    /// Renders and presents one frame from the current `scene` and `lights`,
    /// then clears both for the next frame. `window_extent` is the current
    /// window size, consulted only when the swapchain must be rebuilt.
    pub fn draw(&mut self, window_extent: vk::Extent2D) -> RenderResult<()> {
        let frame = self.frame_index % MAX_FRAMES_IN_FLIGHT;
        self.sync.wait(frame)?;

        if self.needs_recreate {
            self.recreate_surface_sized(window_extent)?;
            if self.needs_recreate {
                // Still zero-sized; stay dormant.
                self.end_frame();
                return Ok(());
            }
        }

        let Some(acquired) = self.swapchain.acquire(self.sync.image_available(frame))? else {
            self.needs_recreate = true;
            self.end_frame();
            return Ok(());
        };
        if acquired.status == SurfaceStatus::Suboptimal {
            // The acquire semaphore is already signaled, so render this frame
            // and rebuild afterwards.
            self.needs_recreate = true;
        }
        let image_index = acquired.index;

        // Stage per-frame data and point this frame's bindless slots at it.
        // Only the current frame slot's descriptors are rewritten; the other
        // slot may still be read by the previous frame's submissions.
        let scene_object_slot = self.scene_object_slots.slot(frame);
        let light_slot = self.light_slots.slot(frame);
        let scene_alloc = self.scene.stage(&mut self.upload_ring)?;
        let light_alloc = self.lights.stage(&mut self.upload_ring)?;
        self.bindless.update_buffer(
            scene_object_slot,
            scene_alloc.buffer,
            scene_alloc.offset,
            scene_alloc.size,
        );
        self.bindless.update_buffer(
            light_slot,
            light_alloc.buffer,
            light_alloc.offset,
            light_alloc.size,
        );

        let extent = self.swapchain.extent();
        let (tiles_x, tiles_y) = tile_counts(extent);
        let frame_params = GpuFrameParams {
            view_proj: self
                .scene
                .camera
                .view_proj(extent.width as f32 / extent.height as f32),
            scene_object_slot,
            light_slot,
            tile_header_slot: self.tile_header_slot,
            tile_index_slot: self.tile_index_slot,
            screen_size: [extent.width, extent.height],
            tile_count: [tiles_x, tiles_y],
            light_count: self.lights.len(),
            _pad: [0; 3],
        };

        self.record_and_submit_transfer(frame)?;
        self.record_graphics(frame, image_index, frame_params)?;
        self.submit_graphics(frame, image_index)?;

        let queue = self.device.graphics_queue();
        if self.swapchain.present(queue.vk_handle(), image_index)? != SurfaceStatus::Optimal {
            self.needs_recreate = true;
        }

        self.end_frame();
        Ok(())
    }

    fn end_frame(&mut self) {
        self.upload_ring.next_frame();
        self.scene.clear();
        self.lights.clear();
        self.frame_index += 1;
    }

    /// Stages pending geometry copies and submits them on the transfer
    /// queue. Submitted even when empty so the graphics submit's semaphore
    /// wait is always matched.
    fn record_and_submit_transfer(&mut self, frame: usize) -> RenderResult<()> {
        let commands = &self.frames[frame];
        let cmd = commands.transfer_cmd;
        unsafe {
            self.device
                .reset_command_pool(commands.transfer_pool, vk::CommandPoolResetFlags::empty())?;
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo {
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                },
            )?;
        }
        if self.mesh_manager.mesh_buffer().gpu_buffers().is_some() {
            self.mesh_manager
                .record_uploads(cmd, &mut self.upload_ring, &self.buffers)?;
        }
        unsafe {
            self.device.end_command_buffer(cmd)?;

            let command_buffer_infos = [vk::CommandBufferSubmitInfo {
                command_buffer: cmd,
                ..Default::default()
            }];
            let signal_infos = [vk::SemaphoreSubmitInfo {
                semaphore: self.sync.transfer_finished(frame),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                ..Default::default()
            }];
            let submit = vk::SubmitInfo2::default()
                .command_buffer_infos(&command_buffer_infos)
                .signal_semaphore_infos(&signal_infos);
            self.device.queue_submit2(
                self.device.transfer_queue().vk_handle(),
                &[submit],
                vk::Fence::null(),
            )?;
        }
        Ok(())
    }

    fn record_graphics(
        &mut self,
        frame: usize,
        image_index: u32,
        frame_params: GpuFrameParams,
    ) -> RenderResult<()> {
        let commands = &self.frames[frame];
        let cmd = commands.graphics_cmd;
        unsafe {
            self.device
                .reset_command_pool(commands.graphics_pool, vk::CommandPoolResetFlags::empty())?;
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo {
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                },
            )?;

            // Swapchain and depth images into attachment layouts. Contents
            // are cleared by the forward pass, so UNDEFINED is fine.
            let to_attachments = [
                vk::ImageMemoryBarrier2 {
                    src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
                    dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    image: self.swapchain.image(image_index),
                    subresource_range: color_range(),
                    ..Default::default()
                },
                vk::ImageMemoryBarrier2 {
                    src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
                    dst_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                    dst_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                    image: self.textures.image(self.depth_texture),
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::DEPTH,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                },
            ];
            self.device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&to_attachments),
            );
        }

        let ctx = RenderGraphContext {
            device: &self.device,
            cmd,
            extent: self.swapchain.extent(),
            color_view: self.swapchain.view(image_index),
            depth_view: self.textures.view(self.depth_texture),
            buffers: &self.buffers,
            bindless: &self.bindless,
            mesh_buffer: self.mesh_manager.mesh_buffer(),
            scene: &self.scene,
            frame_params,
            tile_headers: self.tile_headers,
            tile_indices: self.tile_indices,
        };
        self.graph.execute(&ctx)?;

        unsafe {
            let to_present = [vk::ImageMemoryBarrier2 {
                src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                image: self.swapchain.image(image_index),
                subresource_range: color_range(),
                ..Default::default()
            }];
            self.device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&to_present),
            );
            self.device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit_graphics(&mut self, frame: usize, image_index: u32) -> RenderResult<()> {
        // Reset right before the submit that re-signals it.
        self.sync.reset(frame)?;

        let wait_infos = [
            vk::SemaphoreSubmitInfo {
                semaphore: self.sync.image_available(frame),
                stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                ..Default::default()
            },
            vk::SemaphoreSubmitInfo {
                semaphore: self.sync.transfer_finished(frame),
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                ..Default::default()
            },
        ];
        let command_buffer_infos = [vk::CommandBufferSubmitInfo {
            command_buffer: self.frames[frame].graphics_cmd,
            ..Default::default()
        }];
        let signal_infos = [vk::SemaphoreSubmitInfo {
            semaphore: self.swapchain.render_finished(image_index),
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            ..Default::default()
        }];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device.queue_submit2(
                self.device.graphics_queue().vk_handle(),
                &[submit],
                self.sync.fence(frame),
            )?;
        }
        Ok(())
    }

    /// Rebuilds the swapchain and everything sized to it. Clears
    /// `needs_recreate` on success; leaves it set while the surface has zero
    /// area.
    fn recreate_surface_sized(&mut self, window_extent: vk::Extent2D) -> RenderResult<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        if !self.swapchain.recreate(window_extent)? {
            return Ok(());
        }
        let extent = self.swapchain.extent();

        self.textures.destroy_texture(self.depth_texture);
        self.depth_texture = create_depth_texture(&mut self.textures, extent)?;

        self.buffers.destroy_buffer(self.tile_headers);
        self.buffers.destroy_buffer(self.tile_indices);
        let (tile_headers, tile_indices) = create_tile_buffers(&mut self.buffers, extent)?;
        self.tile_headers = tile_headers;
        self.tile_indices = tile_indices;
        self.bindless.update_buffer(
            self.tile_header_slot,
            self.buffers.buffer(tile_headers),
            0,
            vk::WHOLE_SIZE,
        );
        self.bindless.update_buffer(
            self.tile_index_slot,
            self.buffers.buffer(tile_indices),
            0,
            vk::WHOLE_SIZE,
        );

        self.needs_recreate = false;
        tracing::info!(
            width = extent.width,
            height = extent.height,
            "recreated surface-sized resources"
        );
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Let in-flight frames retire before tearing anything down.
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                tracing::error!(?err, "device_wait_idle failed during teardown");
            }
            for commands in self.frames.drain(..) {
                self.device.destroy_command_pool(commands.graphics_pool, None);
                self.device.destroy_command_pool(commands.transfer_pool, None);
            }
        }
        self.textures.destroy_texture(self.depth_texture);
        self.buffers.destroy_buffer(self.tile_headers);
        self.buffers.destroy_buffer(self.tile_indices);
        if let Some(gpu) = self.mesh_manager.mesh_buffer().gpu_buffers() {
            self.buffers.destroy_buffer(gpu.vertices);
            self.buffers.destroy_buffer(gpu.indices);
            self.buffers.destroy_buffer(gpu.meshlets);
            self.buffers.destroy_buffer(gpu.meshlet_vertices);
            self.buffers.destroy_buffer(gpu.meshlet_triangles);
        }
        tracing::info!("renderer shut down");
    }
}

fn create_frame_commands(device: &Device) -> RenderResult<FrameCommands> {
    let make_pool = |family: u32| -> RenderResult<vk::CommandPool> {
        let pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo {
                    flags: vk::CommandPoolCreateFlags::TRANSIENT,
                    queue_family_index: family,
                    ..Default::default()
                },
                None,
            )?
        };
        Ok(pool)
    };
    let allocate = |pool: vk::CommandPool| -> RenderResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo {
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = unsafe { device.allocate_command_buffers(&info)? };
        Ok(buffers[0])
    };

    let graphics_pool = make_pool(device.graphics_queue().family_index())?;
    let graphics_cmd = allocate(graphics_pool)?;
    let transfer_pool = make_pool(device.transfer_queue().family_index())?;
    let transfer_cmd = allocate(transfer_pool)?;
    Ok(FrameCommands {
        graphics_pool,
        graphics_cmd,
        transfer_pool,
        transfer_cmd,
    })
}

fn create_depth_texture(
    textures: &mut TextureManager,
    extent: vk::Extent2D,
) -> RenderResult<TextureHandle> {
    textures.allocate_texture(TextureDesc {
        extent,
        format: DEPTH_FORMAT,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        mip_levels: 1,
        label: Some(c"depth buffer"),
    })
}

fn create_tile_buffers(
    buffers: &mut BufferManager,
    extent: vk::Extent2D,
) -> RenderResult<(BufferHandle, BufferHandle)> {
    let headers = buffers.allocate_buffer(BufferDesc {
        size: tile_header_buffer_size(extent),
        usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        location: MemoryLocation::DeviceLocal,
        label: Some(c"tile light headers"),
    })?;
    let indices = buffers.allocate_buffer(BufferDesc {
        size: tile_index_buffer_size(extent),
        usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        location: MemoryLocation::DeviceLocal,
        label: Some(c"tile light indices"),
    })?;
    Ok((headers, indices))
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
