//! Physical device selection.
//!
//! The renderer has a fixed requirement set: Vulkan 1.3, a graphics+compute
//! queue family that can present to the target surface, and the descriptor
//! indexing features backing the bindless heap. [`PhysicalDevice::select`]
//! walks the adapters, filters by those requirements and prefers discrete
//! GPUs. Missing support on every adapter is a fatal construction error.

use crate::{Instance, RenderError, RenderResult, surface::Surface, utils::AsVkHandle};
use ash::vk;
use std::{ops::Deref, sync::Arc};

/// A selected physical GPU, with the queue family indices and cached
/// properties the rest of the crate needs.
///
/// Reference-counted and cheap to clone.
#[derive(Clone)]
pub struct PhysicalDevice(Arc<PhysicalDeviceInner>);
impl PartialEq for PhysicalDevice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for PhysicalDevice {}

struct PhysicalDeviceInner {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    graphics_family: u32,
    transfer_family: u32,
}

impl PhysicalDevice {
    /// Picks the best adapter that can render and present to `surface`.
    ///
    /// Requirements:
    /// - Vulkan 1.3
    /// - a GRAPHICS | COMPUTE queue family with present support
    /// - dynamic rendering, synchronization2, buffer device address and the
    ///   update-after-bind descriptor indexing set
    ///
    /// A dedicated transfer family is used for staging submissions when one
    /// exists; otherwise transfer work shares the graphics family.
    pub fn select(instance: Instance, surface: &Surface) -> RenderResult<Self> {
        let physical_devices = unsafe { instance.enumerate_physical_devices()? };

        let mut best: Option<(u32, PhysicalDeviceInner)> = None;
        for physical_device in physical_devices {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            if properties.api_version < vk::API_VERSION_1_3 {
                tracing::debug!(
                    device = ?properties.device_name_as_c_str(),
                    "skipping adapter: no Vulkan 1.3"
                );
                continue;
            }
            if !supports_required_features(&instance, physical_device) {
                tracing::debug!(
                    device = ?properties.device_name_as_c_str(),
                    "skipping adapter: missing required features"
                );
                continue;
            }

            let queue_families = unsafe {
                instance.get_physical_device_queue_family_properties(physical_device)
            };
            let Some(graphics_family) =
                find_graphics_family(&instance, physical_device, surface, &queue_families)?
            else {
                continue;
            };
            let transfer_family =
                find_transfer_family(&queue_families).unwrap_or(graphics_family);

            let score = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                _ => 0,
            };
            if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                let memory_properties = unsafe {
                    instance.get_physical_device_memory_properties(physical_device)
                };
                best = Some((
                    score,
                    PhysicalDeviceInner {
                        instance: instance.clone(),
                        physical_device,
                        properties,
                        memory_properties,
                        graphics_family,
                        transfer_family,
                    },
                ));
            }
        }

        let (_, inner) = best.ok_or(RenderError::NoSuitableAdapter)?;
        tracing::info!(
            device = ?inner.properties.device_name_as_c_str(),
            graphics_family = inner.graphics_family,
            transfer_family = inner.transfer_family,
            "selected physical device"
        );
        Ok(Self(Arc::new(inner)))
    }

    pub fn instance(&self) -> &Instance {
        &self.0.instance
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.0.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.0.memory_properties
    }

    /// Property flags of the given memory type index. Used to decide whether a
    /// mapped allocation needs explicit flush/invalidate.
    pub fn memory_type_flags(&self, memory_type_index: u32) -> vk::MemoryPropertyFlags {
        self.0.memory_properties.memory_types[memory_type_index as usize].property_flags
    }

    pub fn graphics_family(&self) -> u32 {
        self.0.graphics_family
    }

    pub fn transfer_family(&self) -> u32 {
        self.0.transfer_family
    }

    pub fn get_surface_capabilities(
        &self,
        surface: &Surface,
    ) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        let capabilities = unsafe {
            self.0
                .instance
                .surface_fn()
                .get_physical_device_surface_capabilities(
                    self.0.physical_device,
                    surface.vk_handle(),
                )?
        };
        Ok(capabilities)
    }

    pub fn get_surface_formats(
        &self,
        surface: &Surface,
    ) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe {
            self.0.instance.surface_fn().get_physical_device_surface_formats(
                self.0.physical_device,
                surface.vk_handle(),
            )?
        };
        Ok(formats)
    }

    pub fn get_surface_present_modes(
        &self,
        surface: &Surface,
    ) -> RenderResult<Vec<vk::PresentModeKHR>> {
        let modes = unsafe {
            self.0
                .instance
                .surface_fn()
                .get_physical_device_surface_present_modes(
                    self.0.physical_device,
                    surface.vk_handle(),
                )?
        };
        Ok(modes)
    }
}

impl Deref for PhysicalDevice {
    type Target = vk::PhysicalDevice;
    fn deref(&self) -> &Self::Target {
        &self.0.physical_device
    }
}
impl AsVkHandle for PhysicalDevice {
    type Handle = vk::PhysicalDevice;
    fn vk_handle(&self) -> Self::Handle {
        self.0.physical_device
    }
}

fn find_graphics_family(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    surface: &Surface,
    queue_families: &[vk::QueueFamilyProperties],
) -> RenderResult<Option<u32>> {
    for (index, family) in queue_families.iter().enumerate() {
        if !family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        {
            continue;
        }
        let present_supported = unsafe {
            instance.surface_fn().get_physical_device_surface_support(
                physical_device,
                index as u32,
                surface.vk_handle(),
            )?
        };
        if present_supported {
            return Ok(Some(index as u32));
        }
    }
    Ok(None)
}

/// A family with TRANSFER but neither GRAPHICS nor COMPUTE. These map to the
/// DMA engines on discrete GPUs, letting staging copies overlap rendering.
fn find_transfer_family(queue_families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    queue_families.iter().enumerate().find_map(|(index, family)| {
        let flags = family.queue_flags;
        (flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
        .then_some(index as u32)
    })
}

fn supports_required_features(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> bool {
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features12)
        .push_next(&mut features13);
    unsafe {
        instance.get_physical_device_features2(physical_device, &mut features2);
    }

    features13.dynamic_rendering == vk::TRUE
        && features13.synchronization2 == vk::TRUE
        && features12.buffer_device_address == vk::TRUE
        && features12.runtime_descriptor_array == vk::TRUE
        && features12.descriptor_binding_partially_bound == vk::TRUE
        && features12.descriptor_binding_variable_descriptor_count == vk::TRUE
        && features12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
        && features12.descriptor_binding_storage_buffer_update_after_bind == vk::TRUE
        && features12.descriptor_binding_update_unused_while_pending == vk::TRUE
        && features12.shader_sampled_image_array_non_uniform_indexing == vk::TRUE
        && features12.shader_storage_buffer_array_non_uniform_indexing == vk::TRUE
}
