//! Window surface wrapper.

use crate::{Instance, RenderResult, utils::AsVkHandle};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

/// A `VkSurfaceKHR` tied to a window owned by the caller.
///
/// The renderer never creates windows; it is handed raw display and window
/// handles and builds the surface from them. The surface retains the
/// [`Instance`], so destruction order falls out of reference counting.
#[derive(Clone)]
pub struct Surface(Arc<SurfaceInner>);

struct SurfaceInner {
    instance: Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    /// Creates a surface for the given window.
    ///
    /// # Safety
    ///
    /// The window and display referenced by the handles must outlive the
    /// returned surface.
    pub unsafe fn create(
        instance: Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RenderResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                &instance,
                display_handle,
                window_handle,
                None,
            )?
        };
        tracing::info!(surface = ?handle, "created window surface");
        Ok(Self(Arc::new(SurfaceInner { instance, handle })))
    }

    pub fn instance(&self) -> &Instance {
        &self.0.instance
    }
}

impl AsVkHandle for Surface {
    type Handle = vk::SurfaceKHR;
    fn vk_handle(&self) -> Self::Handle {
        self.0.handle
    }
}

impl Drop for SurfaceInner {
    fn drop(&mut self) {
        tracing::info!(surface = ?self.handle, "drop surface");
        unsafe {
            self.instance
                .surface_fn()
                .destroy_surface(self.handle, None);
        }
    }
}
