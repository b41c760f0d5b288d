//! Logical device creation.
//!
//! [`Device`] is the hub type of the crate. Every GPU object wrapper retains a
//! clone, so the raw `VkDevice` is destroyed strictly after everything created
//! from it. [`HasDevice`] is the seam through which those wrappers reach back
//! to the device for destruction and queries.
//!
//! The renderer's device configuration is fixed (Vulkan 1.3 core features plus
//! descriptor indexing, one graphics queue, one transfer queue), so there is
//! no builder here; [`Device::create`] takes a selected [`PhysicalDevice`] and
//! enables exactly what the frame loop uses.

use crate::{Instance, PhysicalDevice, RenderResult, utils::{AsVkHandle, SharingMode}};
use ash::vk;
use smallvec::SmallVec;
use std::{ffi::CStr, fmt::Debug, ops::Deref, sync::Arc};

/// A trait for types created from a Vulkan device.
pub trait HasDevice {
    /// Returns a reference to the Vulkan device.
    fn device(&self) -> &Device;

    /// Returns a reference to the Vulkan [`PhysicalDevice`].
    fn physical_device(&self) -> &PhysicalDevice {
        self.device().physical_device()
    }

    /// Returns a reference to the Vulkan [`Instance`].
    fn instance(&self) -> &Instance {
        self.device().physical_device().instance()
    }
}

/// A Vulkan logical device wrapper.
///
/// Reference-counted using [`Arc`] for cheap shared access; dereferences to
/// [`ash::Device`] for raw Vulkan calls.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Device {}
impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device")
            .field(&self.0.device.handle())
            .finish()
    }
}

struct DeviceInner {
    physical_device: PhysicalDevice,
    device: ash::Device,
    swapchain_fn: ash::khr::swapchain::Device,
    debug_utils_fn: Option<ash::ext::debug_utils::Device>,
    graphics_queue: Queue,
    transfer_queue: Queue,
    /// Deduplicated queue family indices; two entries when a dedicated
    /// transfer family exists, one otherwise.
    queue_family_indices: SmallVec<[u32; 2]>,
}

/// A queue retrieved at device creation.
///
/// Queues are owned by the device; this is a plain handle plus its family
/// index, fine to copy around.
#[derive(Clone, Copy, Debug)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub fn family_index(&self) -> u32 {
        self.family_index
    }
}
impl AsVkHandle for Queue {
    type Handle = vk::Queue;
    fn vk_handle(&self) -> Self::Handle {
        self.handle
    }
}

impl Device {
    /// Creates the logical device with the renderer's fixed feature set and
    /// retrieves the graphics and transfer queues.
    ///
    /// [`PhysicalDevice::select`] already verified feature support, so a
    /// failure here is a driver error, not a capability gap.
    pub fn create(physical_device: PhysicalDevice) -> RenderResult<Self> {
        let instance = physical_device.instance().clone();

        let queue_priority = [1.0f32];
        let mut queue_family_indices: SmallVec<[u32; 2]> =
            smallvec::smallvec![physical_device.graphics_family()];
        if physical_device.transfer_family() != physical_device.graphics_family() {
            queue_family_indices.push(physical_device.transfer_family());
        }
        let queue_create_infos: SmallVec<[vk::DeviceQueueCreateInfo; 2]> = queue_family_indices
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: queue_priority.as_ptr(),
                ..Default::default()
            })
            .collect();

        let mut features12 = vk::PhysicalDeviceVulkan12Features {
            buffer_device_address: vk::TRUE,
            runtime_descriptor_array: vk::TRUE,
            descriptor_binding_partially_bound: vk::TRUE,
            descriptor_binding_variable_descriptor_count: vk::TRUE,
            descriptor_binding_sampled_image_update_after_bind: vk::TRUE,
            descriptor_binding_storage_buffer_update_after_bind: vk::TRUE,
            descriptor_binding_update_unused_while_pending: vk::TRUE,
            shader_sampled_image_array_non_uniform_indexing: vk::TRUE,
            shader_storage_buffer_array_non_uniform_indexing: vk::TRUE,
            ..Default::default()
        };
        let mut features13 = vk::PhysicalDeviceVulkan13Features {
            dynamic_rendering: vk::TRUE,
            synchronization2: vk::TRUE,
            ..Default::default()
        };

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device = unsafe {
            ash::Instance::create_device(&instance, physical_device.vk_handle(), &create_info, None)?
        };

        let swapchain_fn = ash::khr::swapchain::Device::new(&instance, &device);
        let debug_utils_fn = instance
            .debug_utils_fn()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

        let graphics_queue = Queue {
            handle: unsafe { device.get_device_queue(physical_device.graphics_family(), 0) },
            family_index: physical_device.graphics_family(),
        };
        let transfer_queue = Queue {
            handle: unsafe { device.get_device_queue(physical_device.transfer_family(), 0) },
            family_index: physical_device.transfer_family(),
        };

        tracing::info!(device = ?device.handle(), "created logical device");
        Ok(Self(Arc::new(DeviceInner {
            physical_device,
            device,
            swapchain_fn,
            debug_utils_fn,
            graphics_queue,
            transfer_queue,
            queue_family_indices,
        })))
    }

    pub fn instance(&self) -> &Instance {
        self.0.physical_device.instance()
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.0.physical_device
    }

    /// Swapchain function table (`VK_KHR_swapchain`).
    pub fn swapchain_fn(&self) -> &ash::khr::swapchain::Device {
        &self.0.swapchain_fn
    }

    pub fn graphics_queue(&self) -> Queue {
        self.0.graphics_queue
    }

    pub fn transfer_queue(&self) -> Queue {
        self.0.transfer_queue
    }

    /// Whether staging submissions run on their own queue family.
    pub fn has_dedicated_transfer_queue(&self) -> bool {
        self.0.graphics_queue.family_index != self.0.transfer_queue.family_index
    }

    /// Sharing mode for resources touched by both the transfer and graphics
    /// queues. `EXCLUSIVE` when both map to the same family.
    pub fn transfer_sharing_mode(&self) -> SharingMode<&[u32]> {
        if self.0.queue_family_indices.len() > 1 {
            SharingMode::Concurrent {
                queue_family_indices: &self.0.queue_family_indices,
            }
        } else {
            SharingMode::Exclusive
        }
    }

    /// Attaches a debug name to a Vulkan object. No-op without validation.
    pub fn set_debug_name<T: vk::Handle>(&self, object: T, name: &CStr) {
        let Some(debug_utils) = &self.0.debug_utils_fn else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);
        // Best effort only; a failed name never fails the frame.
        if let Err(err) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            tracing::debug!(?err, "failed to set debug name");
        }
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}
impl AsVkHandle for Device {
    type Handle = vk::Device;

    fn vk_handle(&self) -> Self::Handle {
        self.0.device.handle()
    }
}
impl HasDevice for Device {
    fn device(&self) -> &Device {
        self
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        // Safety: we have &mut self and therefore exclusive control of the
        // device. Every wrapper retains a Device clone, so none of them can
        // still exist when this runs.
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
