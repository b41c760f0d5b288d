//! Built-in render passes.

mod culling;
mod forward;

pub use culling::TiledLightCullingPass;
pub use forward::ForwardPass;
