//! Generational resource handles.
//!
//! GPU resources are referred to by small copyable [`Handle`]s instead of
//! references, so scene code can hold them across frames without borrowing
//! the managers. A handle pairs a slot index with a generation counter; the
//! pool bumps the slot's generation when the resource is destroyed, so a
//! handle kept past destruction is detected instead of silently aliasing
//! whatever resource reused the slot.
//!
//! Using a stale handle is a caller bug and panics, consistent with indexing
//! a `Vec` out of bounds.

use std::{fmt, marker::PhantomData};

/// A typed, copyable reference into a [`HandlePool`].
///
/// `generation` is never 0 for a live handle, so a zeroed handle is always
/// invalid and usable as a "null" sentinel in POD structs.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// Manual impls: a Handle is Copy regardless of T.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}
impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slot-reusing registry with generation validation.
pub struct HandlePool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for HandlePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlePool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `value` and returns a handle to it, reusing a freed slot when
    /// one is available.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            Handle {
                index,
                generation: slot.generation,
                _marker: PhantomData,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 1,
                value: Some(value),
            });
            Handle {
                index,
                generation: 1,
                _marker: PhantomData,
            }
        }
    }

    /// Returns true if the handle refers to a live resource.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    /// # Panics
    ///
    /// Panics if the handle is stale or was never issued by this pool.
    #[track_caller]
    pub fn get(&self, handle: Handle<T>) -> &T {
        let slot = self
            .slots
            .get(handle.index as usize)
            .unwrap_or_else(|| panic!("handle index {} out of bounds", handle.index));
        assert_eq!(
            slot.generation, handle.generation,
            "stale handle: slot {} was freed and reused",
            handle.index
        );
        slot.value
            .as_ref()
            .unwrap_or_else(|| panic!("handle refers to freed slot {}", handle.index))
    }

    /// # Panics
    ///
    /// Panics if the handle is stale or was never issued by this pool.
    #[track_caller]
    pub fn get_mut(&mut self, handle: Handle<T>) -> &mut T {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .unwrap_or_else(|| panic!("handle index {} out of bounds", handle.index));
        assert_eq!(
            slot.generation, handle.generation,
            "stale handle: slot {} was freed and reused",
            handle.index
        );
        slot.value
            .as_mut()
            .unwrap_or_else(|| panic!("handle refers to freed slot {}", handle.index))
    }

    /// Removes the resource, invalidating the handle and every copy of it.
    ///
    /// # Panics
    ///
    /// Panics if the handle is already stale.
    #[track_caller]
    pub fn remove(&mut self, handle: Handle<T>) -> T {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .unwrap_or_else(|| panic!("handle index {} out of bounds", handle.index));
        assert_eq!(
            slot.generation, handle.generation,
            "stale handle: slot {} was freed and reused",
            handle.index
        );
        let value = slot
            .value
            .take()
            .unwrap_or_else(|| panic!("double free of handle slot {}", handle.index));
        // Generation 0 is reserved for the null sentinel; skip it on wrap.
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        self.free.push(handle.index);
        value
    }

    /// Iterates over live entries.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    /// Drains all live entries, leaving the pool empty.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.slots.drain(..).filter_map(|slot| slot.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut pool = HandlePool::new();
        let a = pool.insert("a");
        let b = pool.insert("b");
        assert_eq!(*pool.get(a), "a");
        assert_eq!(*pool.get(b), "b");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn slot_reuse_bumps_generation() {
        let mut pool = HandlePool::new();
        let a = pool.insert(1u32);
        assert_eq!(a.generation(), 1);
        pool.remove(a);
        let b = pool.insert(2u32);
        assert_eq!(b.index(), a.index());
        assert_eq!(b.generation(), 2);
        assert!(!pool.contains(a));
        assert!(pool.contains(b));
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn stale_access_panics() {
        let mut pool = HandlePool::new();
        let a = pool.insert(1u32);
        pool.remove(a);
        pool.insert(2u32);
        pool.get(a);
    }

    #[test]
    #[should_panic]
    fn foreign_handle_panics() {
        let mut pool_a = HandlePool::new();
        let pool_b: HandlePool<u32> = HandlePool::new();
        let a = pool_a.insert(1u32);
        pool_b.get(a);
    }

    #[test]
    fn generation_never_zero() {
        let mut pool = HandlePool::new();
        let h = pool.insert(0u8);
        assert_ne!(h.generation(), 0);
        for _ in 0..3 {
            let h = pool.insert(0u8);
            pool.remove(h);
        }
        let h = pool.insert(0u8);
        assert_ne!(h.generation(), 0);
    }
}
