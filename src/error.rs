//! Error taxonomy for the renderer.
//!
//! Three classes of failure, handled differently:
//!
//! - **Fatal**: device loss, allocation failure, missing features. Propagated as
//!   [`RenderError`] all the way out of [`Renderer::draw`](crate::Renderer::draw).
//! - **Recoverable surface states**: `ERROR_OUT_OF_DATE_KHR` / `SUBOPTIMAL_KHR`
//!   are not errors at all; they surface as
//!   [`SurfaceStatus`](crate::swapchain::SurfaceStatus) and trigger swapchain
//!   recreation.
//! - **Caller contract violations** (stale handles, writes past a buffer's end,
//!   drawing from an unfinalized mesh buffer) panic, like any other misuse of a
//!   Rust API.

use ash::vk;
use thiserror::Error;

/// Errors produced by renderer construction and per-frame work.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A raw Vulkan error from the driver. `ERROR_OUT_OF_DATE_KHR` never takes
    /// this path; acquire/present report it through
    /// [`SurfaceStatus`](crate::swapchain::SurfaceStatus).
    #[error("vulkan error: {0:?}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No physical device satisfies the renderer's requirements
    /// (graphics + present queue, Vulkan 1.3 feature set).
    #[error("no suitable physical device found")]
    NoSuitableAdapter,

    /// A required device feature is unsupported on the selected adapter.
    #[error("required device feature unsupported: {0}")]
    MissingFeature(&'static str),

    /// A single frame tried to stage more bytes than one upload ring slot
    /// holds. This is a hard configuration limit; raise
    /// [`UploadRingConfig::slot_size`](crate::upload::UploadRingConfig).
    #[error("frame upload of {requested} bytes exceeds ring slot capacity ({remaining} bytes remaining)")]
    UploadOverflow {
        requested: vk::DeviceSize,
        remaining: vk::DeviceSize,
    },

    /// The bindless descriptor array is full. The capacity is fixed at heap
    /// creation; slots must be freed before new resources can be registered.
    #[error("bindless descriptor array exhausted (capacity {capacity})")]
    OutOfDescriptorSlots { capacity: u32 },

    /// The shader compiler collaborator failed to produce SPIR-V.
    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// A SPIR-V blob was empty or not 4-byte aligned.
    #[error("invalid SPIR-V blob for shader module creation")]
    InvalidSpirv,
}

/// Convenience alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;
