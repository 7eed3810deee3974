//! Per-category handle → native object tables
//!
//! Each backend keeps one registry per resource category (buffers, textures,
//! programs). Registries of the same renderer share a [`HandleAllocator`], so
//! a handle identifies at most one live object across all categories.
//! Removing an entry hands the native object back to the caller, which then
//! releases it the way its API requires.

use rustc_hash::FxHashMap;

use super::handle::{Handle, HandleAllocator};

pub struct ResourceRegistry<T> {
    entries: FxHashMap<Handle, T>,
}

impl<T> ResourceRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    /// Store `resource` under a freshly issued handle
    ///
    /// Returns `Handle::NULL` (and drops `resource`) if the allocator is exhausted.
    pub fn insert(&mut self, handles: &mut HandleAllocator, resource: T) -> Handle {
        match handles.allocate() {
            Some(handle) => {
                self.entries.insert(handle, resource);
                handle
            }
            None => Handle::NULL,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        if handle.is_null() {
            return None;
        }
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        if handle.is_null() {
            return None;
        }
        self.entries.get_mut(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Detach the entry; the handle is dead from now on
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if handle.is_null() {
            return None;
        }
        self.entries.remove(&handle)
    }

    /// Detach every entry (shutdown path)
    pub fn drain(&mut self) -> Vec<(Handle, T)> {
        let mut drained: Vec<(Handle, T)> = self.entries.drain().collect();
        drained.sort_by_key(|(handle, _)| *handle);
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().map(|(handle, resource)| (*handle, resource))
    }
}

impl<T> Default for ResourceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
