//! Sampler wrapper.

use crate::{Device, HasDevice, RenderResult, utils::AsVkHandle};
use ash::vk;
use std::fmt::Debug;

/// A Vulkan sampler. Immutable after creation.
///
/// The renderer keeps one default linear-repeat sampler and uses it for every
/// bindless texture update; material systems layering on top can create more.
pub struct Sampler {
    device: Device,
    handle: vk::Sampler,
}
impl Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}
impl HasDevice for Sampler {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl Sampler {
    /// Creates a new sampler.
    pub fn new(device: Device, info: &vk::SamplerCreateInfo) -> RenderResult<Self> {
        let inner = unsafe { device.create_sampler(info, None) }?;
        Ok(Self {
            device,
            handle: inner,
        })
    }

    /// Trilinear filtering, repeat addressing, full mip range.
    pub fn new_linear_repeat(device: Device) -> RenderResult<Self> {
        Self::new(
            device,
            &vk::SamplerCreateInfo {
                mag_filter: vk::Filter::LINEAR,
                min_filter: vk::Filter::LINEAR,
                mipmap_mode: vk::SamplerMipmapMode::LINEAR,
                address_mode_u: vk::SamplerAddressMode::REPEAT,
                address_mode_v: vk::SamplerAddressMode::REPEAT,
                address_mode_w: vk::SamplerAddressMode::REPEAT,
                max_lod: vk::LOD_CLAMP_NONE,
                ..Default::default()
            },
        )
    }
}

impl AsVkHandle for Sampler {
    type Handle = vk::Sampler;

    fn vk_handle(&self) -> Self::Handle {
        self.handle
    }
}
impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.handle, None) }
    }
}
