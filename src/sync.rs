//! Per-frame CPU/GPU synchronization.
//!
//! The renderer pipelines [`MAX_FRAMES_IN_FLIGHT`] frames. Each in-flight
//! slot owns a fence (has the GPU finished that slot's previous frame) and
//! the binary semaphores that chain its submissions: image acquisition into
//! the graphics submit, and the transfer-queue submit into the graphics
//! submit. The present-side `render_finished` semaphores are per swapchain
//! *image*, not per slot, and live with the swapchain.

use crate::{Device, HasDevice, RenderResult};
use ash::vk;

/// How many frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

struct FrameSlot {
    /// Signaled by the graphics submit; created signaled so frame 0 does not
    /// deadlock on its first wait.
    fence: vk::Fence,
    image_available: vk::Semaphore,
    transfer_finished: vk::Semaphore,
}

/// Fences and semaphores for every in-flight frame slot.
pub struct FrameSync {
    device: Device,
    slots: Vec<FrameSlot>,
}

impl HasDevice for FrameSync {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl FrameSync {
    pub fn new(device: Device) -> RenderResult<Self> {
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let fence = unsafe {
                device.create_fence(
                    &vk::FenceCreateInfo {
                        flags: vk::FenceCreateFlags::SIGNALED,
                        ..Default::default()
                    },
                    None,
                )?
            };
            let semaphore_info = vk::SemaphoreCreateInfo::default();
            let image_available = unsafe { device.create_semaphore(&semaphore_info, None)? };
            let transfer_finished = unsafe { device.create_semaphore(&semaphore_info, None)? };
            device.set_debug_name(fence, c"frame fence");
            device.set_debug_name(image_available, c"image available");
            device.set_debug_name(transfer_finished, c"transfer finished");
            slots.push(FrameSlot {
                fence,
                image_available,
                transfer_finished,
            });
        }
        tracing::info!(frames_in_flight = MAX_FRAMES_IN_FLIGHT, "created frame sync");
        Ok(Self { device, slots })
    }

    pub fn fence(&self, frame: usize) -> vk::Fence {
        self.slots[frame % MAX_FRAMES_IN_FLIGHT].fence
    }

    pub fn image_available(&self, frame: usize) -> vk::Semaphore {
        self.slots[frame % MAX_FRAMES_IN_FLIGHT].image_available
    }

    pub fn transfer_finished(&self, frame: usize) -> vk::Semaphore {
        self.slots[frame % MAX_FRAMES_IN_FLIGHT].transfer_finished
    }

    /// Blocks until the slot's previous frame has fully retired. The fence is
    /// left signaled; [`reset`](Self::reset) happens just before the submit
    /// that will signal it again, so an abandoned frame never strands the
    /// fence unsignaled.
    pub fn wait(&self, frame: usize) -> RenderResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence(frame)], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self, frame: usize) -> RenderResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence(frame)])?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Caller guarantees device idle; Renderer::drop waits before fields drop.
        unsafe {
            for slot in self.slots.drain(..) {
                self.device.destroy_fence(slot.fence, None);
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.transfer_finished, None);
            }
        }
        tracing::info!("destroyed frame sync");
    }
}
