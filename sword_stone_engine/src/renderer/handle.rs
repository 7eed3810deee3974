//! Opaque resource handles
//!
//! A handle is a non-zero `u32`. Zero is reserved as the "no resource" /
//! failed-creation sentinel. Handles are issued by a [`HandleAllocator`] that
//! only ever counts up, so a deleted handle is never handed out again by the
//! same renderer.

use std::fmt;

/// Opaque identifier for a buffer, texture or shader program
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(u32);

impl Handle {
    /// The "no resource" handle returned by failed creation calls
    pub const NULL: Handle = Handle(0);

    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> u32 {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic handle source, shared by every resource category of one renderer
#[derive(Debug)]
pub struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Issue the next handle, or `None` once the 32-bit space is exhausted
    pub fn allocate(&mut self) -> Option<Handle> {
        if self.next == 0 {
            return None;
        }
        let handle = Handle(self.next);
        self.next = self.next.wrapping_add(1);
        Some(handle)
    }

    /// Number of handles issued so far
    pub fn issued(&self) -> u32 {
        match self.next {
            0 => u32::MAX,
            next => next - 1,
        }
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
