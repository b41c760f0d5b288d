//! GPU memory allocation.
//!
//! A reference-counted wrapper around the Vulkan Memory Allocator (VMA).
//! Created once per device; every resource manager holds a clone, so the VMA
//! instance outlives all of its allocations.

use std::{ops::Deref, sync::Arc};

use crate::{Device, HasDevice, RenderResult, utils::AsVkHandle};

/// A GPU memory allocator backed by VMA.
///
/// Thread-safe and cheap to clone. Buffer device address support is always
/// enabled; the device requests the feature unconditionally.
#[derive(Clone)]
pub struct Allocator(Arc<AllocatorInner>);
struct AllocatorInner {
    device: Device,
    inner: vk_mem::Allocator,
}

impl HasDevice for Allocator {
    fn device(&self) -> &Device {
        &self.0.device
    }
}

impl Allocator {
    /// Creates a new allocator for the given device.
    pub fn new(device: Device) -> RenderResult<Self> {
        let mut info = vk_mem::AllocatorCreateInfo::new(
            device.instance(),
            &device,
            device.physical_device().vk_handle(),
        );
        info.vulkan_api_version = ash::vk::API_VERSION_1_3;
        info.flags |= vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;

        let alloc = unsafe { vk_mem::Allocator::new(info)? };
        Ok(Self(Arc::new(AllocatorInner {
            device,
            inner: alloc,
        })))
    }
}

impl Deref for Allocator {
    type Target = vk_mem::Allocator;

    fn deref(&self) -> &Self::Target {
        &self.0.inner
    }
}
