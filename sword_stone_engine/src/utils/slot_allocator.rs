/// Hands out descriptor slots from a fixed-capacity heap.
///
/// Slots are `u32` indices in `0..capacity`. Freed slots are recycled
/// (most recently freed first); once every slot is in use `alloc` fails
/// instead of growing, because a descriptor heap cannot be resized in place.
///
/// # Example
///
/// ```ignore
/// let mut slots = SlotAllocator::with_capacity(2);
/// let a = slots.alloc();  // Some(0)
/// let b = slots.alloc();  // Some(1)
/// slots.alloc();          // None, heap full
/// slots.free(0);
/// slots.alloc();          // Some(0)
/// ```
pub struct SlotAllocator {
    free_list: Vec<u32>,
    in_use: Vec<bool>,
    next_id: u32,
    capacity: u32,
    len: u32,
}

impl SlotAllocator {
    /// Create an empty allocator over `capacity` slots
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            free_list: Vec::new(),
            in_use: vec![false; capacity as usize],
            next_id: 0,
            capacity,
            len: 0,
        }
    }

    /// Take a free slot, `None` when the heap is full
    pub fn alloc(&mut self) -> Option<u32> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None if self.next_id < self.capacity => {
                self.next_id += 1;
                self.next_id - 1
            }
            None => return None,
        };
        self.in_use[id as usize] = true;
        self.len += 1;
        Some(id)
    }

    /// Return a slot; freeing a slot that is not in use is ignored
    ///
    /// # Returns
    ///
    /// `true` if the slot was in use
    pub fn free(&mut self, id: u32) -> bool {
        match self.in_use.get_mut(id as usize) {
            Some(used) if *used => {
                *used = false;
                self.len -= 1;
                self.free_list.push(id);
                true
            }
            _ => false,
        }
    }

    /// Highest slot ever handed out + 1
    pub fn high_water_mark(&self) -> u32 {
        self.next_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots currently in use
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
#[path = "slot_allocator_tests.rs"]
mod tests;
