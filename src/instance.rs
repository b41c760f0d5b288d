//! Instance creation.
//!
//! [`Instance`] is the first object the renderer creates. It owns the loader
//! entry point and the instance-level function tables used by the rest of the
//! crate (surface queries, optional debug utils).
//!
//! The instance is reference-counted; every [`Device`](crate::Device) and
//! [`Surface`](crate::surface::Surface) retains a clone, so the raw
//! `vkInstance` is destroyed only after everything created from it is gone.

use crate::{RenderResult, utils::Version};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::{
    borrow::Cow,
    ffi::{CStr, c_char},
    ops::Deref,
    sync::Arc,
};

/// Configuration for instance creation.
pub struct InstanceConfig {
    /// The application name (shown in debugging tools).
    pub application_name: Cow<'static, CStr>,
    /// The application version.
    pub application_version: Version,
    /// Enable `VK_LAYER_KHRONOS_validation` and debug utils when available.
    /// Missing validation support downgrades to a warning, not an error.
    pub enable_validation: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            application_name: Cow::Borrowed(c"scoria renderer"),
            application_version: Version::default(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

/// A Vulkan 1.3 instance wrapper.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Instance {}

struct InstanceInner {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: ash::khr::surface::Instance,
    debug_utils_fn: Option<ash::ext::debug_utils::Instance>,
}

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

impl Instance {
    /// Creates an instance with the extensions required to present to the
    /// given display, plus debug utils when validation is requested.
    pub fn new(config: InstanceConfig, display_handle: RawDisplayHandle) -> RenderResult<Self> {
        // Safety: the loader library outlives the instance because InstanceInner
        // owns the entry.
        let entry = unsafe { ash::Entry::load()? };

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();

        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let validation_available = available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        let mut layers: Vec<*const c_char> = Vec::new();
        let mut debug_utils_enabled = false;
        if config.enable_validation {
            if validation_available {
                layers.push(VALIDATION_LAYER.as_ptr());
                extensions.push(ash::ext::debug_utils::NAME.as_ptr());
                debug_utils_enabled = true;
            } else {
                tracing::warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
        }

        let application_info = vk::ApplicationInfo {
            p_application_name: config.application_name.as_ptr(),
            application_version: config.application_version.as_raw(),
            p_engine_name: c"scoria".as_ptr(),
            engine_version: Version::default().as_raw(),
            api_version: Version::V1_3.as_raw(),
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            p_application_info: &application_info,
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            ..Default::default()
        };
        // Safety: No host synchronization rules for vkCreateInstance.
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let surface_fn = ash::khr::surface::Instance::new(&entry, &instance);
        let debug_utils_fn =
            debug_utils_enabled.then(|| ash::ext::debug_utils::Instance::new(&entry, &instance));

        tracing::info!(
            validation = debug_utils_enabled,
            "created Vulkan 1.3 instance"
        );
        Ok(Self(Arc::new(InstanceInner {
            entry,
            instance,
            surface_fn,
            debug_utils_fn,
        })))
    }

    /// Returns the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.0.entry
    }

    /// Surface query function table (`VK_KHR_surface`).
    pub fn surface_fn(&self) -> &ash::khr::surface::Instance {
        &self.0.surface_fn
    }

    /// Debug utils function table, present only when validation was enabled.
    pub fn debug_utils_fn(&self) -> Option<&ash::ext::debug_utils::Instance> {
        self.0.debug_utils_fn.as_ref()
    }

    /// Picks a physical device and creates the logical device in one step.
    pub fn create_device(
        &self,
        surface: &crate::surface::Surface,
    ) -> RenderResult<crate::Device> {
        let physical_device = crate::PhysicalDevice::select(self.clone(), surface)?;
        crate::Device::create(physical_device)
    }
}

impl Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.0.instance
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        tracing::info!(instance = ?self.instance.handle(), "drop instance");
        // Safety: we have &mut self and therefore exclusive control of the
        // instance. Devices and surfaces retain the Instance, so none of them
        // can still exist when this runs.
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}
