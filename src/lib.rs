//! # Scoria
//!
//! A Vulkan 1.3 real-time renderer core built around bindless resources,
//! consolidated geometry buffers, and tiled forward lighting.
//!
//! Scoria owns the full frame loop: instance and device setup, swapchain
//! management, a per-frame upload ring for CPU-to-GPU data, a bindless
//! descriptor heap, meshlet-based mesh storage, and a linear render graph
//! that runs compute light culling before a forward raster pass.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scoria::prelude::*;
//! # fn shaders() -> (Vec<u8>, Vec<u8>, Vec<u8>) { unimplemented!() }
//! # fn window() -> (raw_window_handle::RawDisplayHandle, raw_window_handle::RawWindowHandle) { unimplemented!() }
//!
//! let (culling_spv, vertex_spv, fragment_spv) = shaders();
//! let (display, window) = window();
//! let shaders = RendererShaders {
//!     light_culling: ShaderStage {
//!         stage: vk::ShaderStageFlags::COMPUTE,
//!         entry_point: c"main",
//!         spirv: &culling_spv,
//!     },
//!     forward_vertex: ShaderStage {
//!         stage: vk::ShaderStageFlags::VERTEX,
//!         entry_point: c"main",
//!         spirv: &vertex_spv,
//!     },
//!     forward_fragment: ShaderStage {
//!         stage: vk::ShaderStageFlags::FRAGMENT,
//!         entry_point: c"main",
//!         spirv: &fragment_spv,
//!     },
//! };
//! let extent = vk::Extent2D { width: 1280, height: 720 };
//! let mut renderer = unsafe {
//!     Renderer::new(RendererConfig::default(), &shaders, display, window, extent)
//! }?;
//!
//! let entry = renderer.add_mesh(MeshId(0), &[/* vertices */], &[/* indices */]);
//! renderer.finalize_meshes()?;
//!
//! loop {
//!     renderer.scene.push_object(MeshId(0), entry, glam::Mat4::IDENTITY, 0);
//!     renderer.lights.add_point([0.0, 2.0, 0.0], 10.0, [1.0; 3], 5.0);
//!     renderer.draw(extent)?;
//! }
//! # Ok::<(), scoria::RenderError>(())
//! ```
//!
//! ## Requirements
//!
//! Vulkan 1.3 with `dynamicRendering`, `synchronization2`,
//! `bufferDeviceAddress`, and the descriptor-indexing features for
//! update-after-bind bindless arrays.

mod alloc;
pub mod bindless;
mod descriptor;
pub mod device;
mod error;
pub mod graph;
pub mod instance;
pub mod lights;
pub mod mesh;
pub mod passes;
pub mod physical_device;
pub mod pipeline;
mod renderer;
pub mod resources;
mod sampler;
pub mod scene;
pub mod shader;
mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;
pub mod utils;

pub mod handle;

pub use alloc::Allocator;
pub use device::{Device, HasDevice, Queue};
pub use error::{RenderError, RenderResult};
pub use instance::{Instance, InstanceConfig};
pub use physical_device::PhysicalDevice;
pub use renderer::{Renderer, RendererConfig, RendererShaders};
pub use sampler::Sampler;
pub use surface::Surface;

pub use ash;

pub mod prelude {
    pub use crate::{
        Device, HasDevice, RenderError, RenderResult, Renderer, RendererConfig, RendererShaders,
        ash,
        ash::vk,
        bindless::BindlessHeap,
        mesh::{MeshId, Vertex},
        scene::Camera,
        shader::ShaderStage,
        utils::AsVkHandle,
    };
}
