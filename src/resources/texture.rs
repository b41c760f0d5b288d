//! Image allocation and view management.

use crate::{
    Allocator, Device, HasDevice, RenderResult,
    handle::{Handle, HandlePool},
};
use ash::vk;
use std::ffi::CStr;
use vk_mem::Alloc;

/// Parameters for [`TextureManager::allocate_texture`].
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc<'a> {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub label: Option<&'a CStr>,
}

pub(crate) struct GpuTexture {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
}

pub type TextureHandle = Handle<GpuTexture>;

/// Owns every image the renderer creates, excluding swapchain images.
pub struct TextureManager {
    device: Device,
    allocator: Allocator,
    pool: HandlePool<GpuTexture>,
}

impl HasDevice for TextureManager {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl TextureManager {
    pub fn new(device: Device, allocator: Allocator) -> Self {
        Self {
            device,
            allocator,
            pool: HandlePool::new(),
        }
    }

    /// Creates a 2D image in device-local memory together with a full-range
    /// view of the aspect derived from its format.
    pub fn allocate_texture(&mut self, desc: TextureDesc) -> RenderResult<TextureHandle> {
        assert!(desc.extent.width > 0 && desc.extent.height > 0);
        assert!(desc.mip_levels > 0);

        let image_info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = unsafe {
            self.allocator.create_image(&image_info, &allocation_info)?
        };

        let aspect = aspect_mask_for_format(desc.format);
        let view_info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                let mut allocation = allocation;
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(err.into());
            }
        };

        if let Some(label) = desc.label {
            self.device.set_debug_name(image, label);
        }

        Ok(self.pool.insert(GpuTexture {
            image,
            allocation,
            view,
            format: desc.format,
            extent: desc.extent,
            aspect,
        }))
    }

    pub fn image(&self, handle: TextureHandle) -> vk::Image {
        self.pool.get(handle).image
    }

    pub fn view(&self, handle: TextureHandle) -> vk::ImageView {
        self.pool.get(handle).view
    }

    pub fn format(&self, handle: TextureHandle) -> vk::Format {
        self.pool.get(handle).format
    }

    pub fn extent(&self, handle: TextureHandle) -> vk::Extent2D {
        self.pool.get(handle).extent
    }

    pub fn aspect(&self, handle: TextureHandle) -> vk::ImageAspectFlags {
        self.pool.get(handle).aspect
    }

    /// Destroys the image and its view, invalidating the handle.
    pub fn destroy_texture(&mut self, handle: TextureHandle) {
        let mut texture = self.pool.remove(handle);
        unsafe {
            self.device.destroy_image_view(texture.view, None);
            self.allocator
                .destroy_image(texture.image, &mut texture.allocation);
        }
    }
}

impl Drop for TextureManager {
    fn drop(&mut self) {
        let leaked = self.pool.len();
        if leaked > 0 {
            tracing::warn!(count = leaked, "destroying textures still alive at manager teardown");
        }
        for mut texture in self.pool.drain() {
            unsafe {
                self.device.destroy_image_view(texture.view, None);
                self.allocator
                    .destroy_image(texture.image, &mut texture.allocation);
            }
        }
    }
}

/// Derives the image aspect from a format.
///
/// Vulkan requires views and barriers to name the exact aspect set of the
/// format, so this match is exhaustive over the depth/stencil formats rather
/// than guessing from usage flags.
pub fn aspect_mask_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_for_color_formats() {
        assert_eq!(
            aspect_mask_for_format(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn aspect_for_depth_formats() {
        assert_eq!(
            aspect_mask_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::D16_UNORM),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn aspect_for_combined_and_stencil_formats() {
        assert_eq!(
            aspect_mask_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::S8_UINT),
            vk::ImageAspectFlags::STENCIL
        );
    }
}
