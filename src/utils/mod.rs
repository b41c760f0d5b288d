use ash::vk;
use std::{fmt::Debug, ops::Deref};

/// Queue family sharing for buffers and images.
///
/// Consolidated geometry buffers are written on the transfer queue and read on
/// the graphics queue; when those live in different families the resources are
/// created `CONCURRENT` over both.
#[derive(Debug, Clone)]
pub enum SharingMode<T>
where
    T: Deref<Target = [u32]>,
{
    Exclusive,
    Concurrent { queue_family_indices: T },
}

impl<T: Deref<Target = [u32]>> SharingMode<T> {
    pub fn as_raw(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent { .. } => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent {
                queue_family_indices,
            } => queue_family_indices.deref(),
        }
    }
}

pub trait AsVkHandle {
    type Handle: ash::vk::Handle + Copy;
    fn vk_handle(&self) -> Self::Handle;
}
impl<T> AsVkHandle for &'_ T
where
    T: AsVkHandle,
{
    type Handle = T::Handle;

    fn vk_handle(&self) -> Self::Handle {
        T::vk_handle(self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32);
impl Version {
    pub const V1_2: Self = Self::new(0, 1, 2, 0);
    pub const V1_3: Self = Self::new(0, 1, 3, 0);

    pub const fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        let num = vk::make_api_version(variant, major, minor, patch);
        Self(num)
    }
    pub const fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub const fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub const fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }
    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}
impl Default for Version {
    fn default() -> Self {
        Self::new(0, 0, 1, 0)
    }
}
impl Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Version({}.{}.{})",
            self.major(),
            self.minor(),
            self.patch()
        ))
    }
}
impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}.{}",
            self.major(),
            self.minor(),
            self.patch()
        ))
    }
}

/// Divides `value` by `divisor`, rounding up. Tile grid math for the light
/// culling dispatch.
pub const fn div_round_up(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Rounds `value` up to the next multiple of `alignment`.
/// `alignment` must be a power of two.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_powers_of_two() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn div_round_up_tile_grids() {
        assert_eq!(div_round_up(1920, 16), 120);
        assert_eq!(div_round_up(1921, 16), 121);
        assert_eq!(div_round_up(1, 16), 1);
        assert_eq!(div_round_up(16, 16), 1);
    }
}
