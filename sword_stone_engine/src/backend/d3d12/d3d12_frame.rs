//! Frame ring for the D3D12 backend
//!
//! Each of the [`FRAME_COUNT`] slots owns a command allocator, an upload ring
//! and a fence watermark. The CPU only reuses a slot once the shared frame
//! fence has reached that slot's watermark, which bounds the number of frames
//! in flight to `FRAME_COUNT` and makes rewinding the slot's upload ring safe.

use std::collections::VecDeque;

use super::d3d12_device::{D3d12Device, HResult, HeapType, ResourceDesc, ResourceState};

/// Number of frames the CPU may record ahead of the GPU
pub const FRAME_COUNT: usize = 2;

/// Root CBV placement alignment (`D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT`)
pub const CONSTANT_ALIGNMENT: u64 = 256;

/// Bytes of constants and staged copies one frame can upload
pub const UPLOAD_RING_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Retired by the GPU (or never used); allocator may be reset
    Idle,
    /// Commands are being recorded against the slot's allocator
    Recording,
    /// Submitted; the GPU may still be executing it
    Submitted,
}

/// Linear allocator over an UPLOAD buffer, rewound once per frame
pub struct UploadRing<D: D3d12Device> {
    buffer: D::Resource,
    capacity: u64,
    offset: u64,
}

impl<D: D3d12Device> UploadRing<D> {
    pub fn new(device: &D, capacity: u64) -> Result<Self, HResult> {
        let buffer = device.create_committed_resource(HeapType::Upload, &ResourceDesc::buffer(capacity), ResourceState::GenericRead)?;
        Ok(Self {
            buffer,
            capacity,
            offset: 0,
        })
    }

    /// Copy `data` to the next location aligned to `alignment`
    ///
    /// # Returns
    ///
    /// The offset of the copy, or `None` once the ring is full
    pub fn push(&mut self, device: &D, data: &[u8], alignment: u64) -> Result<Option<u64>, HResult> {
        let Some(start) = self.reserve(data.len() as u64, alignment) else {
            return Ok(None);
        };
        device.write_buffer(&self.buffer, start, data)?;
        Ok(Some(start))
    }

    /// Claim `size` bytes without writing them
    pub fn reserve(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let start = self.offset.div_ceil(alignment) * alignment;
        let end = start.checked_add(size)?;
        if size == 0 || end > self.capacity {
            return None;
        }
        self.offset = end;
        Some(start)
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn buffer(&self) -> &D::Resource {
        &self.buffer
    }

    /// Bytes used this frame, including alignment padding
    pub fn used(&self) -> u64 {
        self.offset
    }
}

pub struct FrameSlot<D: D3d12Device> {
    pub allocator: D::CommandAllocator,
    pub upload: UploadRing<D>,
    /// Fence value that marks this slot's last submission as retired
    pub fence_value: u64,
    pub state: FrameState,
}

/// Objects whose release waits for the GPU
pub struct DeferredRelease<D: D3d12Device> {
    pub resources: Vec<D::Resource>,
    pub pipelines: Vec<D::PipelineState>,
    /// Shader-visible descriptor slot to recycle
    pub srv_slot: Option<u32>,
}

impl<D: D3d12Device> Default for DeferredRelease<D> {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            pipelines: Vec::new(),
            srv_slot: None,
        }
    }
}

pub struct FrameRing<D: D3d12Device> {
    fence: D::Fence,
    slots: Vec<FrameSlot<D>>,
    frame_index: usize,
    deferred: VecDeque<(u64, DeferredRelease<D>)>,
    blocking_waits: u64,
}

impl<D: D3d12Device> FrameRing<D> {
    /// Create every slot; `frame_index` is the swap chain's current back buffer
    ///
    /// The current slot's watermark starts at 1 so the very first advance
    /// already guards slot reuse.
    pub fn new(device: &D, frame_index: usize) -> Result<Self, HResult> {
        let frame_index = frame_index % FRAME_COUNT;
        let slots = (0..FRAME_COUNT)
            .map(|index| {
                Ok(FrameSlot {
                    allocator: device.create_command_allocator()?,
                    upload: UploadRing::new(device, UPLOAD_RING_SIZE)?,
                    fence_value: if index == frame_index { 1 } else { 0 },
                    state: FrameState::Idle,
                })
            })
            .collect::<Result<Vec<_>, HResult>>()?;
        Ok(Self {
            fence: device.create_fence(0)?,
            slots,
            frame_index,
            deferred: VecDeque::new(),
            blocking_waits: 0,
        })
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn current(&self) -> &FrameSlot<D> {
        &self.slots[self.frame_index]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot<D> {
        &mut self.slots[self.frame_index]
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    pub fn fence(&self) -> &D::Fence {
        &self.fence
    }

    /// Watermark the current frame signals when it is submitted
    pub fn current_fence_value(&self) -> u64 {
        self.slots[self.frame_index].fence_value
    }

    /// Times the CPU had to block on the fence
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits
    }

    /// Slots submitted whose watermark the fence has not reached
    pub fn frames_in_flight(&self, device: &D) -> usize {
        let completed = device.completed_value(&self.fence);
        self.slots
            .iter()
            .filter(|slot| slot.state == FrameState::Submitted && completed < slot.fence_value)
            .count()
    }

    fn wait(&mut self, device: &D, value: u64) -> Result<(), HResult> {
        if device.completed_value(&self.fence) < value {
            self.blocking_waits += 1;
            device.wait_for_fence(&self.fence, value)?;
        }
        Ok(())
    }

    /// Frame-advance protocol, run after every present
    ///
    /// Signals the current watermark, switches to `next_index` (the swap
    /// chain's new back buffer) and blocks until that slot's previous
    /// submission is retired.
    pub fn advance(&mut self, device: &D, next_index: usize) -> Result<(), HResult> {
        let current_value = self.slots[self.frame_index].fence_value;
        device.signal(&self.fence, current_value)?;

        self.frame_index = next_index % FRAME_COUNT;
        let previous = self.slots[self.frame_index].fence_value;
        self.wait(device, previous)?;

        let slot = &mut self.slots[self.frame_index];
        slot.fence_value = current_value + 1;
        slot.state = FrameState::Idle;
        slot.upload.reset();
        Ok(())
    }

    /// Drain: signal the current watermark and block until the GPU reaches it
    pub fn wait_for_gpu(&mut self, device: &D) -> Result<(), HResult> {
        let value = self.slots[self.frame_index].fence_value;
        device.signal(&self.fence, value)?;
        self.wait(device, value)?;
        self.slots[self.frame_index].fence_value += 1;
        for slot in &mut self.slots {
            slot.state = FrameState::Idle;
            slot.upload.reset();
        }
        Ok(())
    }

    /// After a drained resize: every slot takes the current watermark
    pub fn reset_fence_values(&mut self, frame_index: usize) {
        let value = self.slots[self.frame_index].fence_value;
        for slot in &mut self.slots {
            slot.fence_value = value;
        }
        self.frame_index = frame_index % FRAME_COUNT;
    }

    /// Keep `release` alive until every frame submitted so far, the current
    /// one included, has retired
    pub fn defer(&mut self, release: DeferredRelease<D>) {
        let value = self.slots[self.frame_index].fence_value;
        self.deferred.push_back((value, release));
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Remove the releases whose frames have retired
    pub fn collect_retired(&mut self, device: &D) -> Vec<DeferredRelease<D>> {
        let completed = device.completed_value(&self.fence);
        let mut retired = Vec::new();
        while self.deferred.front().is_some_and(|(value, _)| *value <= completed) {
            if let Some((_, release)) = self.deferred.pop_front() {
                retired.push(release);
            }
        }
        retired
    }

    /// Every pending release, regardless of the fence (after a drain)
    pub fn drain_deferred(&mut self) -> Vec<DeferredRelease<D>> {
        self.deferred.drain(..).map(|(_, release)| release).collect()
    }
}

#[cfg(test)]
#[path = "d3d12_frame_tests.rs"]
mod tests;
