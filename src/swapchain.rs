//! Swapchain lifecycle.
//!
//! Owns the `VkSwapchainKHR`, its image views, and one `render_finished`
//! semaphore per swapchain image. Present waits are keyed by image index
//! rather than frame slot because presentation engines may hold images
//! across frame boundaries.
//!
//! Once acquire or present reports `VK_ERROR_OUT_OF_DATE_KHR` the swapchain
//! is marked invalid and every Vulkan call on it is skipped until
//! [`SwapchainManager::recreate`] succeeds.

use crate::{Device, HasDevice, RenderResult, Surface, utils::AsVkHandle};
use ash::vk;

/// Outcome of an acquire or present against the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    /// Usable this frame, but the swapchain no longer matches the surface
    /// exactly; recreate at the next opportunity.
    Suboptimal,
    /// Unusable; the frame must be abandoned and the swapchain recreated.
    OutOfDate,
}

pub struct AcquiredImage {
    pub index: u32,
    pub status: SurfaceStatus,
}

pub struct SwapchainManager {
    device: Device,
    surface: Surface,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_finished: Vec<vk::Semaphore>,
    is_valid: bool,
}

impl HasDevice for SwapchainManager {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl SwapchainManager {
    /// Creates the swapchain sized to the surface. `window_extent` is only
    /// consulted when the surface leaves the extent up to the application
    /// (some window systems report `u32::MAX`).
    pub fn new(
        device: Device,
        surface: Surface,
        window_extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let mut manager = Self {
            device,
            surface,
            handle: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            render_finished: Vec::new(),
            is_valid: false,
        };
        let created = manager.recreate(window_extent)?;
        assert!(created, "cannot create a swapchain for a zero-sized surface");
        Ok(manager)
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.views.len()
    }

    pub fn image(&self, image_index: u32) -> vk::Image {
        self.images[image_index as usize]
    }

    pub fn view(&self, image_index: u32) -> vk::ImageView {
        self.views[image_index as usize]
    }

    /// Semaphore the graphics submit signals and present waits on for this
    /// image.
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished[image_index as usize]
    }

    /// Acquires the next image, signaling `signal` when it is ready.
    /// Returns `None` when the swapchain is out of date (including when it
    /// was already invalidated); the caller must recreate before retrying.
    pub fn acquire(&mut self, signal: vk::Semaphore) -> RenderResult<Option<AcquiredImage>> {
        if !self.is_valid {
            return Ok(None);
        }
        let result = unsafe {
            self.device
                .swapchain_fn()
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((index, false)) => Ok(Some(AcquiredImage {
                index,
                status: SurfaceStatus::Optimal,
            })),
            Ok((index, true)) => Ok(Some(AcquiredImage {
                index,
                status: SurfaceStatus::Suboptimal,
            })),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.is_valid = false;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Queues the image for presentation, waiting on its `render_finished`
    /// semaphore.
    pub fn present(&mut self, queue: vk::Queue, image_index: u32) -> RenderResult<SurfaceStatus> {
        if !self.is_valid {
            return Ok(SurfaceStatus::OutOfDate);
        }
        let wait_semaphores = [self.render_finished[image_index as usize]];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe {
            self.device
                .swapchain_fn()
                .queue_present(queue, &present_info)
        };
        match result {
            Ok(false) => Ok(SurfaceStatus::Optimal),
            Ok(true) => Ok(SurfaceStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.is_valid = false;
                Ok(SurfaceStatus::OutOfDate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Rebuilds the swapchain against the current surface state, reusing the
    /// old swapchain for image handover. Returns `false` without touching
    /// anything when the surface currently has zero area (minimized window);
    /// the caller should try again on the next frame.
    ///
    /// The caller must ensure no submitted work still references the old
    /// image views (the renderer calls `device_wait_idle` first).
    pub fn recreate(&mut self, window_extent: vk::Extent2D) -> RenderResult<bool> {
        let physical_device = self.device.physical_device().clone();
        let capabilities = physical_device.get_surface_capabilities(&self.surface)?;

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: window_extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: window_extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        // Minimized windows report zero area; a zero-extent swapchain is
        // invalid, so stay dormant until the surface comes back.
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        let format = choose_format(&physical_device.get_surface_formats(&self.surface)?);
        let present_mode =
            choose_present_mode(&physical_device.get_surface_present_modes(&self.surface)?);
        let mut min_image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            min_image_count = min_image_count.min(capabilities.max_image_count);
        }

        let old_swapchain = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR {
            surface: self.surface.vk_handle(),
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };
        let handle = unsafe {
            self.device
                .swapchain_fn()
                .create_swapchain(&create_info, None)?
        };
        self.destroy_image_objects();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.device.swapchain_fn().destroy_swapchain(old_swapchain, None);
            }
        }
        self.handle = handle;
        self.format = format;
        self.extent = extent;

        let images = unsafe { self.device.swapchain_fn().get_swapchain_images(handle)? };
        for image in &images {
            let view_info = vk::ImageViewCreateInfo {
                image: *image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { self.device.create_image_view(&view_info, None)? };
            self.views.push(view);
            let semaphore = unsafe {
                self.device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            self.device.set_debug_name(semaphore, c"render finished");
            self.render_finished.push(semaphore);
        }
        self.images = images;
        self.is_valid = true;

        tracing::info!(
            width = extent.width,
            height = extent.height,
            format = ?format.format,
            present_mode = ?present_mode,
            images = self.images.len(),
            "created swapchain"
        );
        Ok(true)
    }

    fn destroy_image_objects(&mut self) {
        // Raw images are owned by the swapchain itself.
        self.images.clear();
        unsafe {
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            for semaphore in self.render_finished.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
        }
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        self.destroy_image_objects();
        if self.handle != vk::SwapchainKHR::null() {
            unsafe {
                self.device.swapchain_fn().destroy_swapchain(self.handle, None);
            }
        }
        tracing::info!("destroyed swapchain");
    }
}

/// Prefers non-linear sRGB BGRA8; falls back to whatever the surface lists
/// first.
fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

/// MAILBOX when the driver offers it, otherwise FIFO (always available).
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_bgra8_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_format(&formats[..1]).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }
}
