//! Per-frame staging memory.
//!
//! [`FrameUploadRing`] owns a fixed number of persistently mapped host
//! buffers, one per in-flight frame slot. All dynamic data for a frame (scene
//! objects, lights, camera, mesh staging) is bump-allocated out of the current
//! slot and copied to device-local buffers by that frame's transfer
//! submission. Because the frame's fence is waited on before its slot index
//! comes around again, a slot is never rewritten while the GPU still reads it.
//!
//! A frame that overflows its slot fails with
//! [`RenderError::UploadOverflow`]; the ring never grows at runtime.

use crate::{Allocator, Device, HasDevice, RenderError, RenderResult, utils::align_up};
use ash::vk;
use vk_mem::Alloc;

/// Alignment applied to every suballocation. Covers the copy alignment rules
/// for all buffer usages the renderer stages into.
pub const UPLOAD_ALIGNMENT: vk::DeviceSize = 16;

/// Sizing for the upload ring.
#[derive(Clone, Copy, Debug)]
pub struct UploadRingConfig {
    /// Bytes per frame slot.
    pub slot_size: vk::DeviceSize,
    /// Number of slots. Must be at least the number of frames in flight.
    pub depth: usize,
}

impl Default for UploadRingConfig {
    fn default() -> Self {
        Self {
            slot_size: 256 << 20,
            depth: 3,
        }
    }
}

/// A region handed out by [`FrameUploadRing::write_bytes`], already filled
/// with the caller's data. Valid as a copy source until the frame that
/// produced it finishes on the GPU.
#[derive(Clone, Copy, Debug)]
pub struct UploadAllocation {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

struct RingSlot {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    mapped: *mut u8,
}
// Safety: mapped points into the slot's own allocation.
unsafe impl Send for RingSlot {}
unsafe impl Sync for RingSlot {}

pub struct FrameUploadRing {
    device: Device,
    allocator: Allocator,
    slots: Vec<RingSlot>,
    slot_size: vk::DeviceSize,
    coherent: bool,
    frame_index: usize,
    cursor: vk::DeviceSize,
}

impl HasDevice for FrameUploadRing {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl FrameUploadRing {
    /// Allocates all slots up front.
    ///
    /// # Panics
    ///
    /// Panics if `config.depth` is zero or `config.slot_size` is zero.
    pub fn new(
        device: Device,
        allocator: Allocator,
        config: UploadRingConfig,
    ) -> RenderResult<Self> {
        assert!(config.depth > 0, "upload ring needs at least one slot");
        assert!(config.slot_size > 0, "upload ring slots cannot be empty");

        let buffer_info = vk::BufferCreateInfo {
            size: config.slot_size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::MAPPED
                | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        let mut slots = Vec::with_capacity(config.depth);
        let mut coherent = true;
        for i in 0..config.depth {
            let (buffer, allocation) =
                unsafe { allocator.create_buffer(&buffer_info, &allocation_info)? };
            let info = allocator.get_allocation_info(&allocation);
            coherent &= device
                .physical_device()
                .memory_type_flags(info.memory_type)
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
            let name = std::ffi::CString::new(format!("upload ring slot {i}")).unwrap();
            device.set_debug_name(buffer, &name);
            slots.push(RingSlot {
                buffer,
                allocation,
                mapped: info.mapped_data.cast(),
            });
        }

        tracing::info!(
            depth = config.depth,
            slot_size = config.slot_size,
            coherent,
            "created frame upload ring"
        );
        Ok(Self {
            device,
            allocator,
            slots,
            slot_size: config.slot_size,
            coherent,
            frame_index: 0,
            cursor: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot currently receiving writes.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Buffer backing the current slot; the copy source for this frame's
    /// transfer commands.
    pub fn current_buffer(&self) -> vk::Buffer {
        self.slots[self.frame_index].buffer
    }

    /// Copies `data` into the current slot and returns where it landed.
    pub fn write_bytes(&mut self, data: &[u8]) -> RenderResult<UploadAllocation> {
        let size = data.len() as vk::DeviceSize;
        let offset = align_up(self.cursor, UPLOAD_ALIGNMENT);
        if offset + size > self.slot_size {
            return Err(RenderError::UploadOverflow {
                requested: size,
                remaining: self.slot_size.saturating_sub(offset),
            });
        }
        let slot = &self.slots[self.frame_index];
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                slot.mapped.add(offset as usize),
                data.len(),
            );
        }
        if !self.coherent {
            self.allocator
                .flush_allocation(&slot.allocation, offset, size)?;
        }
        self.cursor = offset + size;
        Ok(UploadAllocation {
            buffer: slot.buffer,
            offset,
            size,
        })
    }

    /// Typed variant of [`write_bytes`](Self::write_bytes).
    pub fn write_slice<T: bytemuck::NoUninit>(
        &mut self,
        data: &[T],
    ) -> RenderResult<UploadAllocation> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Advances to the next slot and resets the write cursor. Called exactly
    /// once per frame, after the frame's work is submitted.
    pub fn next_frame(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.slots.len();
        self.cursor = 0;
    }

    /// Bytes left in the current slot, ignoring alignment padding of future
    /// writes.
    pub fn remaining(&self) -> vk::DeviceSize {
        self.slot_size - self.cursor
    }
}

impl Drop for FrameUploadRing {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            unsafe {
                self.allocator
                    .destroy_buffer(slot.buffer, &mut slot.allocation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cursor arithmetic mirrored here so it stays testable without a device.
    fn bump(cursor: &mut u64, slot_size: u64, size: u64) -> Option<u64> {
        let offset = align_up(*cursor, UPLOAD_ALIGNMENT);
        if offset + size > slot_size {
            return None;
        }
        *cursor = offset + size;
        Some(offset)
    }

    #[test]
    fn writes_are_aligned() {
        let mut cursor = 0;
        assert_eq!(bump(&mut cursor, 1024, 3), Some(0));
        assert_eq!(bump(&mut cursor, 1024, 8), Some(16));
        assert_eq!(bump(&mut cursor, 1024, 1), Some(32));
    }

    #[test]
    fn overflow_is_reported() {
        let mut cursor = 0;
        assert_eq!(bump(&mut cursor, 64, 48), Some(0));
        assert_eq!(bump(&mut cursor, 64, 16), Some(48));
        assert_eq!(bump(&mut cursor, 64, 1), None);
    }

    #[test]
    fn exact_fit_succeeds() {
        let mut cursor = 0;
        assert_eq!(bump(&mut cursor, 64, 64), Some(0));
        assert_eq!(bump(&mut cursor, 64, 1), None);
    }

    #[test]
    fn frame_index_wraps() {
        let depth = 3usize;
        let mut index = 0usize;
        let seen: Vec<usize> = (0..7)
            .map(|_| {
                let current = index;
                index = (index + 1) % depth;
                current
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }
}
