//! Buffer allocation and host access.

use crate::{
    Allocator, Device, HasDevice, RenderResult,
    handle::{Handle, HandlePool},
};
use ash::vk;
use std::ffi::CStr;
use vk_mem::Alloc;

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local memory, not host accessible. Filled via staging copies.
    DeviceLocal,
    /// Host-visible, persistently mapped, sequential-write memory.
    HostVisible,
}

/// Parameters for [`BufferManager::allocate_buffer`].
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// Debug name, applied when validation is enabled.
    pub label: Option<&'a CStr>,
}

pub(crate) struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    /// Persistent mapping; null for device-local buffers.
    mapped: *mut u8,
    /// HOST_COHERENT memory skips explicit flush/invalidate.
    coherent: bool,
    device_address: vk::DeviceAddress,
}
// Safety: the mapped pointer targets memory owned by the allocation, which
// lives exactly as long as this struct. Access goes through &mut methods.
unsafe impl Send for GpuBuffer {}
unsafe impl Sync for GpuBuffer {}

pub type BufferHandle = Handle<GpuBuffer>;

/// Owns every buffer the renderer creates.
pub struct BufferManager {
    device: Device,
    allocator: Allocator,
    pool: HandlePool<GpuBuffer>,
}

impl HasDevice for BufferManager {
    fn device(&self) -> &Device {
        &self.device
    }
}

impl BufferManager {
    pub fn new(device: Device, allocator: Allocator) -> Self {
        Self {
            device,
            allocator,
            pool: HandlePool::new(),
        }
    }

    /// Creates a buffer and returns a handle to it.
    ///
    /// Host-visible buffers are created persistently mapped. Buffers with
    /// `SHADER_DEVICE_ADDRESS` usage get their device address resolved here.
    ///
    /// # Panics
    ///
    /// Panics if `desc.size` is zero.
    pub fn allocate_buffer(&mut self, desc: BufferDesc) -> RenderResult<BufferHandle> {
        assert!(desc.size > 0, "cannot allocate a zero-sized buffer");

        let sharing = self.device.transfer_sharing_mode();
        let buffer_info = vk::BufferCreateInfo {
            size: desc.size,
            usage: desc.usage,
            sharing_mode: sharing.as_raw(),
            queue_family_index_count: sharing.queue_family_indices().len() as u32,
            p_queue_family_indices: sharing.queue_family_indices().as_ptr(),
            ..Default::default()
        };
        let allocation_info = match desc.location {
            MemoryLocation::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::MAPPED
                    | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
        };
        let (buffer, allocation) = unsafe {
            self.allocator.create_buffer(&buffer_info, &allocation_info)?
        };
        let info = self.allocator.get_allocation_info(&allocation);
        let coherent = self
            .device
            .physical_device()
            .memory_type_flags(info.memory_type)
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);

        let device_address = if desc.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            unsafe {
                self.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo {
                    buffer,
                    ..Default::default()
                })
            }
        } else {
            0
        };

        if let Some(label) = desc.label {
            self.device.set_debug_name(buffer, label);
        }

        Ok(self.pool.insert(GpuBuffer {
            buffer,
            allocation,
            size: desc.size,
            mapped: info.mapped_data.cast(),
            coherent,
            device_address,
        }))
    }

    /// Raw `vk::Buffer` for command recording and descriptor writes.
    pub fn buffer(&self, handle: BufferHandle) -> vk::Buffer {
        self.pool.get(handle).buffer
    }

    pub fn size(&self, handle: BufferHandle) -> vk::DeviceSize {
        self.pool.get(handle).size
    }

    /// # Panics
    ///
    /// Panics if the buffer was created without `SHADER_DEVICE_ADDRESS` usage.
    pub fn device_address(&self, handle: BufferHandle) -> vk::DeviceAddress {
        let buffer = self.pool.get(handle);
        assert_ne!(
            buffer.device_address, 0,
            "buffer was not created with SHADER_DEVICE_ADDRESS usage"
        );
        buffer.device_address
    }

    /// Copies `data` into a mapped buffer at `offset`, flushing when the
    /// memory is not host coherent.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is device-local or the write runs past its end.
    pub fn write_data(
        &mut self,
        handle: BufferHandle,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RenderResult<()> {
        let buffer = self.pool.get_mut(handle);
        assert!(!buffer.mapped.is_null(), "buffer is not host visible");
        assert!(
            offset + data.len() as vk::DeviceSize <= buffer.size,
            "write of {} bytes at offset {} exceeds buffer size {}",
            data.len(),
            offset,
            buffer.size
        );
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                buffer.mapped.add(offset as usize),
                data.len(),
            );
        }
        if !buffer.coherent {
            self.allocator
                .flush_allocation(&buffer.allocation, offset, data.len() as vk::DeviceSize)?;
        }
        Ok(())
    }

    /// Makes CPU reads of a mapped buffer see GPU writes. No-op on coherent
    /// memory.
    pub fn invalidate(
        &mut self,
        handle: BufferHandle,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RenderResult<()> {
        let buffer = self.pool.get_mut(handle);
        assert!(!buffer.mapped.is_null(), "buffer is not host visible");
        if !buffer.coherent {
            self.allocator
                .invalidate_allocation(&buffer.allocation, offset, size)?;
        }
        Ok(())
    }

    /// Destroys the buffer and invalidates the handle.
    ///
    /// The caller is responsible for making sure no submitted GPU work still
    /// reads the buffer; the renderer only destroys buffers after waiting for
    /// the frames that referenced them.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let mut buffer = self.pool.remove(handle);
        unsafe {
            self.allocator
                .destroy_buffer(buffer.buffer, &mut buffer.allocation);
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let leaked = self.pool.len();
        if leaked > 0 {
            tracing::warn!(count = leaked, "destroying buffers still alive at manager teardown");
        }
        for mut buffer in self.pool.drain() {
            unsafe {
                self.allocator
                    .destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }
        }
    }
}
