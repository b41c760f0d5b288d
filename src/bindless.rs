//! Bindless descriptor arrays.
//!
//! Resources are stored in two large descriptor arrays and addressed from
//! shaders by slot index, passed through push constants; no per-draw
//! descriptor binding.
//!
//! # Heap structure
//!
//! - **Set 0, binding 0**: storage buffers
//! - **Set 1, binding 0**: combined image samplers
//!
//! Both arrays are created `UPDATE_AFTER_BIND | PARTIALLY_BOUND` with a
//! variable descriptor count, so slots can be rewritten while other slots are
//! referenced by in-flight command buffers, and unwritten slots are legal as
//! long as no shader reads them.
//!
//! The arrays have a fixed capacity. Exhaustion is reported as
//! [`RenderError::OutOfDescriptorSlots`] rather than growing the heap, since
//! growing would invalidate the set handle baked into recorded state.

use crate::{
    Device, HasDevice, RenderError, RenderResult,
    descriptor::{DescriptorPool, DescriptorSetLayout},
    sync::MAX_FRAMES_IN_FLIGHT,
};
use ash::vk;
use std::collections::VecDeque;

/// Number of slots in each bindless array.
pub const BINDLESS_CAPACITY: u32 = 65536;

/// Free-list slot allocator with a hard capacity.
///
/// Slots are handed out lowest-first and recycled in FIFO order, which keeps
/// recently freed slots out of circulation for as long as possible while
/// their old descriptors may still be referenced by in-flight frames.
pub struct DescriptorSlotAllocator {
    capacity: u32,
    next: u32,
    free: VecDeque<u32>,
}

impl DescriptorSlotAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            free: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots currently handed out.
    pub fn live(&self) -> u32 {
        self.next - self.free.len() as u32
    }

    pub fn try_allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free.pop_front() {
            return Some(slot);
        }
        if self.next < self.capacity {
            let slot = self.next;
            self.next += 1;
            Some(slot)
        } else {
            None
        }
    }

    /// Returns a slot to the allocator.
    ///
    /// The caller must not free a slot twice; the allocator does not track
    /// individual slot states.
    pub fn free(&mut self, slot: u32) {
        debug_assert!(slot < self.next, "freed slot {slot} was never allocated");
        self.free.push_back(slot);
    }
}

/// Bindless buffer slots for data rewritten every frame.
///
/// A descriptor must not be rewritten while a submitted command buffer can
/// still read it; update-after-bind lifts the bound-set restriction, not
/// that one. Per-frame data therefore gets one slot per in-flight frame
/// slot, and each frame rewrites only its own.
#[derive(Clone, Copy, Debug)]
pub struct PerFrameSlots {
    slots: [u32; MAX_FRAMES_IN_FLIGHT],
}

impl PerFrameSlots {
    pub fn new(slots: [u32; MAX_FRAMES_IN_FLIGHT]) -> Self {
        Self { slots }
    }

    /// The slot owned by `frame`'s in-flight slot.
    pub fn slot(&self, frame: usize) -> u32 {
        self.slots[frame % MAX_FRAMES_IN_FLIGHT]
    }
}

/// The two bindless descriptor arrays and their slot allocators.
pub struct BindlessHeap {
    device: Device,
    // Pool dropped after the sets become unused; field order keeps the
    // layouts alive as long as the heap.
    _pool: DescriptorPool,
    buffer_layout: DescriptorSetLayout,
    texture_layout: DescriptorSetLayout,
    buffer_set: vk::DescriptorSet,
    texture_set: vk::DescriptorSet,
    buffer_slots: DescriptorSlotAllocator,
    texture_slots: DescriptorSlotAllocator,
}

impl HasDevice for BindlessHeap {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl BindlessHeap {
    pub fn new(device: Device) -> RenderResult<Self> {
        let binding_flags = [vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING];

        let buffer_layout = DescriptorSetLayout::new(
            device.clone(),
            &[vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: BINDLESS_CAPACITY,
                stage_flags: vk::ShaderStageFlags::ALL,
                ..Default::default()
            }],
            &binding_flags,
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
        )?;
        let texture_layout = DescriptorSetLayout::new(
            device.clone(),
            &[vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: BINDLESS_CAPACITY,
                stage_flags: vk::ShaderStageFlags::ALL,
                ..Default::default()
            }],
            &binding_flags,
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
        )?;

        let mut pool = DescriptorPool::new(
            device.clone(),
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    descriptor_count: BINDLESS_CAPACITY,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: BINDLESS_CAPACITY,
                },
            ],
            2,
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
        )?;
        let buffer_set = pool.allocate_one_variably_sized(&buffer_layout, BINDLESS_CAPACITY)?;
        let texture_set = pool.allocate_one_variably_sized(&texture_layout, BINDLESS_CAPACITY)?;
        device.set_debug_name(buffer_set, c"bindless storage buffers");
        device.set_debug_name(texture_set, c"bindless textures");

        tracing::info!(capacity = BINDLESS_CAPACITY, "created bindless heap");
        Ok(Self {
            device,
            _pool: pool,
            buffer_layout,
            texture_layout,
            buffer_set,
            texture_set,
            buffer_slots: DescriptorSlotAllocator::new(BINDLESS_CAPACITY),
            texture_slots: DescriptorSlotAllocator::new(BINDLESS_CAPACITY),
        })
    }

    pub fn buffer_set_layout(&self) -> &DescriptorSetLayout {
        &self.buffer_layout
    }
    pub fn texture_set_layout(&self) -> &DescriptorSetLayout {
        &self.texture_layout
    }

    /// The two sets, in bind order: `[storage buffers, textures]`.
    pub fn descriptor_sets(&self) -> [vk::DescriptorSet; 2] {
        [self.buffer_set, self.texture_set]
    }

    pub fn allocate_buffer_slot(&mut self) -> RenderResult<u32> {
        self.buffer_slots
            .try_allocate()
            .ok_or(RenderError::OutOfDescriptorSlots {
                capacity: BINDLESS_CAPACITY,
            })
    }

    /// Allocates one storage-buffer slot per in-flight frame slot.
    pub fn allocate_per_frame_buffer_slots(&mut self) -> RenderResult<PerFrameSlots> {
        let mut slots = [0u32; MAX_FRAMES_IN_FLIGHT];
        for slot in &mut slots {
            *slot = self.allocate_buffer_slot()?;
        }
        Ok(PerFrameSlots::new(slots))
    }

    pub fn allocate_texture_slot(&mut self) -> RenderResult<u32> {
        self.texture_slots
            .try_allocate()
            .ok_or(RenderError::OutOfDescriptorSlots {
                capacity: BINDLESS_CAPACITY,
            })
    }

    /// Points `slot` of the storage buffer array at a buffer range. Takes
    /// effect for the next submission; in-flight frames are unaffected
    /// because the binding is update-after-bind.
    pub fn update_buffer(
        &mut self,
        slot: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        assert!(slot < BINDLESS_CAPACITY);
        let buffer_info = vk::DescriptorBufferInfo {
            buffer,
            offset,
            range,
        };
        unsafe {
            self.device.update_descriptor_sets(
                &[vk::WriteDescriptorSet {
                    dst_set: self.buffer_set,
                    dst_binding: 0,
                    dst_array_element: slot,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                }],
                &[],
            );
        }
    }

    /// Points `slot` of the texture array at a sampled image view. The view
    /// must be in `SHADER_READ_ONLY_OPTIMAL` when shaders read it.
    pub fn update_texture(&mut self, slot: u32, view: vk::ImageView, sampler: vk::Sampler) {
        assert!(slot < BINDLESS_CAPACITY);
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        unsafe {
            self.device.update_descriptor_sets(
                &[vk::WriteDescriptorSet {
                    dst_set: self.texture_set,
                    dst_binding: 0,
                    dst_array_element: slot,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                }],
                &[],
            );
        }
    }

    /// Recycles a buffer slot. The stale descriptor stays in the array
    /// (partially-bound makes that legal) until the slot is reallocated.
    pub fn free_buffer_slot(&mut self, slot: u32) {
        self.buffer_slots.free(slot);
    }

    pub fn free_texture_slot(&mut self, slot: u32) {
        self.texture_slots.free(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_sequential_from_zero() {
        let mut alloc = DescriptorSlotAllocator::new(4);
        assert_eq!(alloc.try_allocate(), Some(0));
        assert_eq!(alloc.try_allocate(), Some(1));
        assert_eq!(alloc.try_allocate(), Some(2));
        assert_eq!(alloc.live(), 3);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut alloc = DescriptorSlotAllocator::new(2);
        assert!(alloc.try_allocate().is_some());
        assert!(alloc.try_allocate().is_some());
        assert_eq!(alloc.try_allocate(), None);
    }

    #[test]
    fn freed_slots_recycle_fifo() {
        let mut alloc = DescriptorSlotAllocator::new(8);
        let a = alloc.try_allocate().unwrap();
        let b = alloc.try_allocate().unwrap();
        alloc.free(a);
        alloc.free(b);
        assert_eq!(alloc.try_allocate(), Some(a));
        assert_eq!(alloc.try_allocate(), Some(b));
    }

    #[test]
    fn per_frame_slots_are_distinct_and_cycle() {
        let mut slots = [0u32; MAX_FRAMES_IN_FLIGHT];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = 10 + i as u32;
        }
        let per_frame = PerFrameSlots::new(slots);
        // Consecutive frames rewrite different descriptors; the cycle only
        // returns to a slot once its frame's fence has been waited on.
        for frame in 0..3 * MAX_FRAMES_IN_FLIGHT {
            assert_eq!(per_frame.slot(frame), 10 + (frame % MAX_FRAMES_IN_FLIGHT) as u32);
            if frame > 0 {
                assert_ne!(per_frame.slot(frame), per_frame.slot(frame - 1));
            }
        }
    }

    #[test]
    fn free_then_full_capacity_reachable_again() {
        let mut alloc = DescriptorSlotAllocator::new(2);
        let a = alloc.try_allocate().unwrap();
        let _b = alloc.try_allocate().unwrap();
        assert_eq!(alloc.try_allocate(), None);
        alloc.free(a);
        assert_eq!(alloc.try_allocate(), Some(a));
        assert_eq!(alloc.try_allocate(), None);
    }
}
