//! Shader modules and the compiler seam.
//!
//! The renderer consumes SPIR-V as opaque byte blobs; how they are produced
//! (offline build step, shaderc, slang) is the application's business,
//! expressed through the [`ShaderCompiler`] trait. Nothing in this crate
//! links a shader compiler.

use crate::{Device, HasDevice, RenderError, RenderResult, utils::AsVkHandle};
use ash::vk;
use std::ffi::CStr;

/// One stage of a pipeline, referencing caller-owned SPIR-V.
#[derive(Clone, Copy)]
pub struct ShaderStage<'a> {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'a CStr,
    pub spirv: &'a [u8],
}

/// Collaborator that turns shader source into SPIR-V.
///
/// Implementations live in the application. Failures are surfaced verbatim as
/// [`RenderError::ShaderCompilation`].
pub trait ShaderCompiler {
    fn compile(
        &self,
        source: &str,
        stage: vk::ShaderStageFlags,
        debug_name: &str,
    ) -> Result<Vec<u8>, String>;
}

/// An owned `VkShaderModule`.
///
/// Pipelines keep the compiled code, so modules are usually created, passed
/// to a pipeline builder, and dropped right after.
pub struct ShaderModule {
    device: Device,
    handle: vk::ShaderModule,
}

impl ShaderModule {
    /// Creates a module from a SPIR-V blob.
    ///
    /// The blob must be non-empty and a multiple of 4 bytes; anything else is
    /// [`RenderError::InvalidSpirv`]. The bytes are re-packed to words here,
    /// so callers need not guarantee 4-byte alignment of the slice itself.
    pub fn new(device: Device, spirv: &[u8]) -> RenderResult<Self> {
        if spirv.is_empty() || spirv.len() % 4 != 0 {
            return Err(RenderError::InvalidSpirv);
        }
        let words: Vec<u32> = spirv
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        let handle = unsafe { device.create_shader_module(&info, None)? };
        Ok(Self { device, handle })
    }
}

impl HasDevice for ShaderModule {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for ShaderModule {
    type Handle = vk::ShaderModule;
    fn vk_handle(&self) -> Self::Handle {
        self.handle
    }
}
impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}
