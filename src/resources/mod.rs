//! GPU resource managers.
//!
//! Buffers and textures are created through managers that own the underlying
//! VMA allocations and hand out generational handles. The managers are the
//! only place raw `vk::Buffer`/`vk::Image` handles and their allocations live
//! together, which keeps creation and destruction symmetric.

mod buffer;
mod texture;

pub use buffer::{BufferDesc, BufferHandle, BufferManager, MemoryLocation};
pub use texture::{TextureDesc, TextureHandle, TextureManager, aspect_mask_for_format};
