//! Descriptor set layout and pool wrappers.
//!
//! Only what the bindless heap and the pipeline layouts need: layouts with
//! optional per-binding flags, and a pool that can allocate variably sized
//! sets for `VARIABLE_DESCRIPTOR_COUNT` bindings.

use crate::{Device, HasDevice, RenderResult, utils::AsVkHandle};
use ash::vk;

/// A descriptor set layout.
pub struct DescriptorSetLayout {
    device: Device,
    handle: vk::DescriptorSetLayout,
}
impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}
impl DescriptorSetLayout {
    /// Creates a descriptor set layout with N bindings.
    ///
    /// `binding_flags` is either empty or a slice of length N annotating the
    /// bindings.
    pub fn new(
        device: Device,
        binding_infos: &[vk::DescriptorSetLayoutBinding],
        binding_flags: &[vk::DescriptorBindingFlags],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> RenderResult<Self> {
        assert!(binding_flags.is_empty() || binding_flags.len() == binding_infos.len());
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(binding_flags);
        let mut info = vk::DescriptorSetLayoutCreateInfo {
            flags,
            ..Default::default()
        }
        .bindings(binding_infos);
        if !binding_flags.is_empty() {
            info = info.push_next(&mut flags_info);
        }
        let raw = unsafe { device.create_descriptor_set_layout(&info, None) }?;

        Ok(Self {
            device,
            handle: raw,
        })
    }
}
impl AsVkHandle for DescriptorSetLayout {
    type Handle = vk::DescriptorSetLayout;

    fn vk_handle(&self) -> Self::Handle {
        self.handle
    }
}
impl HasDevice for DescriptorSetLayout {
    fn device(&self) -> &Device {
        &self.device
    }
}

/// A pool for allocating descriptor sets.
///
/// Sets allocated from a pool remain valid until the pool is destroyed; the
/// bindless heap never frees individual sets.
pub struct DescriptorPool {
    device: Device,
    raw: vk::DescriptorPool,
}
impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.raw, None);
        }
    }
}
impl AsVkHandle for DescriptorPool {
    type Handle = vk::DescriptorPool;
    fn vk_handle(&self) -> Self::Handle {
        self.raw
    }
}
impl HasDevice for DescriptorPool {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl DescriptorPool {
    pub fn new(
        device: Device,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> RenderResult<Self> {
        unsafe {
            let raw = device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo {
                    flags,
                    max_sets,
                    ..Default::default()
                }
                .pool_sizes(pool_sizes),
                None,
            )?;
            Ok(Self { device, raw })
        }
    }

    /// Allocates a descriptor set whose variable-count binding is sized to
    /// `size` descriptors.
    pub fn allocate_one_variably_sized(
        &mut self,
        layout: &DescriptorSetLayout,
        size: u32,
    ) -> RenderResult<vk::DescriptorSet> {
        let size = [size];
        let mut sizes = vk::DescriptorSetVariableDescriptorCountAllocateInfo::default()
            .descriptor_counts(&size);
        let layouts = [layout.vk_handle()];
        let info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: self.raw,
            ..Default::default()
        }
        .set_layouts(&layouts)
        .push_next(&mut sizes);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info)? };
        Ok(sets[0])
    }
}
