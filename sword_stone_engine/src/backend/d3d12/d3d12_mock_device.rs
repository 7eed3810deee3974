//! In-memory Direct3D 12 device for unit tests
//!
//! The direct queue has no thread behind it. Every submission gets a
//! completion time (previous work, then the execution delay) and retires
//! lazily, in order, whenever the CPU looks at a fence, resets an allocator
//! or maps memory. Waiting on a fence sleeps until the signal's completion
//! time.
//!
//! Commands and descriptors do not keep resources alive, like the native API.
//! A command that retires after one of its resources was released is
//! reported by the [`DebugLayer`] instead of executing, and so is a CPU write
//! into upload memory that a pending submission still reads.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use super::d3d12_device::*;
use crate::backend::live_objects::{LiveObjects, LiveToken};
use crate::backend::mock_shader_compiler;
use crate::backend::surface::Surface;
use crate::renderer::{
    mip_extent, mip_level_count, DeviceLimits, NativeWindow, Rect2D, RendererConfig, ShaderError, ShaderStage,
    StageReflection, Viewport,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Debug layer
// ============================================================================

#[derive(Default)]
struct DebugLog {
    messages: Vec<String>,
    /// First message not yet returned by `take_new_messages`
    cursor: usize,
}

/// ID3D12InfoQueue: protocol violations, recorded only when enabled
pub struct DebugLayer {
    enabled: bool,
    log: Mutex<DebugLog>,
}

impl DebugLayer {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            log: Mutex::new(DebugLog::default()),
        }
    }

    fn report(&self, message: impl Into<String>) {
        if self.enabled {
            lock(&self.log).messages.push(message.into());
        }
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.log).messages.clone()
    }

    pub fn violation_count(&self) -> usize {
        lock(&self.log).messages.len()
    }

    /// Messages reporting memory the GPU read after it was freed or overwritten
    pub fn corruption_count(&self) -> usize {
        lock(&self.log).messages.iter().filter(|m| m.starts_with("CORRUPTION")).count()
    }

    fn take_new_messages(&self) -> Vec<String> {
        let mut log = lock(&self.log);
        let new = log.messages[log.cursor..].to_vec();
        log.cursor = log.messages.len();
        new
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Committed resource: a buffer or a texture with its own heap
pub struct MockResource {
    desc: ResourceDesc,
    heap: HeapType,
    state: Mutex<ResourceState>,
    subresources: Mutex<Vec<Vec<u8>>>,
    _live: LiveToken,
}

impl MockResource {
    pub fn desc(&self) -> ResourceDesc {
        self.desc
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap
    }

    /// State after every barrier recorded so far
    pub fn state(&self) -> ResourceState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ResourceState) {
        *lock(&self.state) = state;
    }

    pub fn subresource_count(&self) -> u32 {
        lock(&self.subresources).len() as u32
    }

    pub fn subresource_size(&self, index: u32) -> Option<usize> {
        lock(&self.subresources).get(index as usize).map(Vec::len)
    }

    /// Readback of one subresource, rows tightly packed
    pub fn read_subresource(&self, index: u32) -> Vec<u8> {
        lock(&self.subresources).get(index as usize).cloned().unwrap_or_default()
    }
}

fn subresource_sizes(desc: &ResourceDesc) -> Vec<usize> {
    match desc.dimension {
        ResourceDimension::Buffer => vec![desc.width as usize],
        ResourceDimension::Texture2d => {
            let bpp = desc.format.map(|f| f.bytes_per_pixel()).unwrap_or(0) as usize;
            (0..desc.mip_levels)
                .map(|level| {
                    let (w, h) = mip_extent(desc.width as u32, desc.height, level);
                    w as usize * h as usize * bpp
                })
                .collect()
        }
    }
}

pub struct MockDescriptorHeap {
    kind: DescriptorHeapType,
    shader_visible: bool,
    entries: Mutex<Vec<Option<Weak<MockResource>>>>,
    _live: LiveToken,
}

impl MockDescriptorHeap {
    pub fn kind(&self) -> DescriptorHeapType {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        lock(&self.entries).len() as u32
    }

    /// Resource the descriptor at `index` points to, if it still exists
    pub fn resource(&self, index: u32) -> Option<Arc<MockResource>> {
        lock(&self.entries).get(index as usize).and_then(|e| e.as_ref()).and_then(Weak::upgrade)
    }

    fn write(&self, index: u32, resource: &Arc<MockResource>) -> Result<(), HResult> {
        let mut entries = lock(&self.entries);
        let entry = entries.get_mut(index as usize).ok_or(HResult::InvalidArg)?;
        *entry = Some(Arc::downgrade(resource));
        Ok(())
    }
}

pub struct MockRootSignature {
    desc: RootSignatureDesc,
    _live: LiveToken,
}

impl MockRootSignature {
    pub fn desc(&self) -> RootSignatureDesc {
        self.desc
    }
}

/// Bytecode: the stage and the size of its b0 constant buffer
#[derive(Debug, Clone)]
pub struct MockBlob {
    stage: ShaderStage,
    constant_bytes: u64,
}

/// Immutable pipeline state object
pub struct MockPipelineState {
    root_signature: Arc<MockRootSignature>,
    vertex_constants: u64,
    pixel_constants: u64,
    rasterizer: RasterizerDesc,
    depth_stencil: DepthStencilDesc,
    blend: BlendDesc,
    topology_type: TopologyType,
    _live: LiveToken,
}

impl MockPipelineState {
    pub fn rasterizer(&self) -> RasterizerDesc {
        self.rasterizer
    }

    pub fn depth_stencil(&self) -> DepthStencilDesc {
        self.depth_stencil
    }

    pub fn blend(&self) -> BlendDesc {
        self.blend
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    /// Bytes of b0 the stage reads
    fn constant_bytes(&self, stage: ShaderStage) -> u64 {
        match stage {
            ShaderStage::Vertex => self.vertex_constants,
            ShaderStage::Fragment => self.pixel_constants,
        }
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    /// Executed lists from this allocator the GPU has not finished
    in_flight: usize,
    /// A command list is open against this allocator
    recording: bool,
}

/// Backing memory for recorded commands
pub struct MockCommandAllocator {
    state: Arc<Mutex<AllocatorState>>,
    _live: LiveToken,
}

impl MockCommandAllocator {
    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight
    }
}

/// CPU-visible fence value, shared with the queued signals
pub struct MockFence {
    value: Arc<AtomicU64>,
    _live: LiveToken,
}

// ============================================================================
// Command list
// ============================================================================

/// A resource a command reads and the byte range it reads
struct Read {
    resource: Weak<MockResource>,
    range: Range<u64>,
}

impl Read {
    fn whole(resource: &Arc<MockResource>) -> Self {
        Self {
            resource: Arc::downgrade(resource),
            range: 0..u64::MAX,
        }
    }

    fn overlaps(&self, resource: &Arc<MockResource>, range: &Range<u64>) -> bool {
        std::ptr::eq(self.resource.as_ptr(), Arc::as_ptr(resource))
            && self.range.start < range.end
            && range.start < self.range.end
    }
}

enum Command {
    ClearRenderTarget {
        target: Weak<MockResource>,
        color: [f32; 4],
    },
    ClearDepthStencil {
        target: Weak<MockResource>,
        depth: bool,
        stencil: bool,
    },
    CopyBuffer {
        dst: Weak<MockResource>,
        dst_offset: u64,
        src: Read,
    },
    CopyTexture {
        dst: Weak<MockResource>,
        mip: u32,
        footprint: Footprint,
        src: Read,
    },
    Draw {
        pipeline: Weak<MockPipelineState>,
        targets: Vec<Weak<MockResource>>,
        reads: Vec<Read>,
    },
}

impl Command {
    fn reads(&self, resource: &Arc<MockResource>, range: &Range<u64>) -> bool {
        match self {
            Command::CopyBuffer { src, .. } | Command::CopyTexture { src, .. } => src.overlaps(resource, range),
            Command::Draw { reads, .. } => reads.iter().any(|read| read.overlaps(resource, range)),
            Command::ClearRenderTarget { .. } | Command::ClearDepthStencil { .. } => false,
        }
    }
}

type DescriptorRef = (Arc<MockDescriptorHeap>, u32);

#[derive(Default)]
struct Bindings {
    root_signature: Option<Arc<MockRootSignature>>,
    pipeline: Option<Arc<MockPipelineState>>,
    topology: Option<Topology>,
    vertex_buffer: Option<(Arc<MockResource>, u64, u32)>,
    index_buffer: Option<(Arc<MockResource>, u64)>,
    vertex_constants: Option<(Arc<MockResource>, u64)>,
    pixel_constants: Option<(Arc<MockResource>, u64)>,
    descriptor_heap: Option<Arc<MockDescriptorHeap>>,
    srv_tables: Vec<(u32, DescriptorRef)>,
    render_target: Option<DescriptorRef>,
    depth_stencil: Option<DescriptorRef>,
    viewport: Option<Viewport>,
    scissor: Option<Rect2D>,
}

/// Recording counters of one command list, kept across resets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListCounters {
    pub draws: u64,
    pub dropped_draws: u64,
    pub clears: u64,
    pub copies: u64,
    pub barriers: u64,
}

/// ID3D12GraphicsCommandList; commands move to the queue on execution
pub struct MockCommandList {
    allocator: Arc<Mutex<AllocatorState>>,
    open: bool,
    commands: Vec<Command>,
    bindings: Bindings,
    counters: ListCounters,
    debug: Arc<DebugLayer>,
    _live: LiveToken,
}

impl MockCommandList {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn counters(&self) -> ListCounters {
        self.counters
    }

    /// Commands recorded and not yet executed
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.bindings.viewport
    }

    pub fn scissor_rect(&self) -> Option<Rect2D> {
        self.bindings.scissor
    }

    pub fn pipeline_state(&self) -> Option<&Arc<MockPipelineState>> {
        self.bindings.pipeline.as_ref()
    }

    fn recording(&self, call: &str) -> bool {
        if !self.open {
            self.debug.report(format!("{}: the command list is closed", call));
        }
        self.open
    }

    fn resolve_target(&self, heap: &Arc<MockDescriptorHeap>, index: u32, kind: DescriptorHeapType, state: ResourceState, call: &str) -> Option<Arc<MockResource>> {
        if heap.kind != kind {
            self.debug.report(format!("{}: descriptor is not a {:?} descriptor", call, kind));
            return None;
        }
        let Some(target) = heap.resource(index) else {
            self.debug.report(format!("{}: descriptor {} points to no resource", call, index));
            return None;
        };
        if target.state() != state {
            self.debug.report(format!("{}: resource is in state {:?}, expected {:?}", call, target.state(), state));
            return None;
        }
        Some(target)
    }

    fn record_draw(&mut self, call: &str, indexed: bool, count: u32) {
        if !self.recording(call) {
            return;
        }
        match self.validate_draw(indexed, count) {
            Ok(command) => {
                self.commands.push(command);
                self.counters.draws += 1;
            }
            Err(reason) => {
                self.debug.report(format!("{}: {}", call, reason));
                self.counters.dropped_draws += 1;
            }
        }
    }

    /// Check every binding the draw uses and collect what it touches
    fn validate_draw(&self, indexed: bool, count: u32) -> Result<Command, String> {
        let b = &self.bindings;
        let pipeline = b.pipeline.as_ref().ok_or("no pipeline state set")?;
        let root_signature = b.root_signature.as_ref().ok_or("no root signature set")?;
        if !Arc::ptr_eq(root_signature, &pipeline.root_signature) {
            return Err("pipeline state was created for another root signature".into());
        }
        let topology = b.topology.ok_or("no primitive topology set")?;
        if topology.topology_type() != pipeline.topology_type {
            return Err(format!("topology {:?} does not match the pipeline's {:?}", topology, pipeline.topology_type));
        }

        let mut targets = Vec::new();
        let (rtv_heap, rtv) = b.render_target.as_ref().ok_or("no render target bound")?;
        let target = rtv_heap.resource(*rtv).ok_or("render target descriptor points to no resource")?;
        if target.state() != ResourceState::RenderTarget {
            return Err(format!("render target is in state {:?}", target.state()));
        }
        targets.push(Arc::downgrade(&target));

        if pipeline.depth_stencil.depth_enable {
            let (dsv_heap, dsv) = b.depth_stencil.as_ref().ok_or("depth test enabled without a depth buffer")?;
            let depth = dsv_heap.resource(*dsv).ok_or("depth descriptor points to no resource")?;
            if depth.state() != ResourceState::DepthWrite {
                return Err(format!("depth buffer is in state {:?}", depth.state()));
            }
            targets.push(Arc::downgrade(&depth));
        }

        let mut reads = Vec::new();
        let (vertex_buffer, size, stride) = b.vertex_buffer.as_ref().ok_or("no vertex buffer bound")?;
        if !matches!(vertex_buffer.state(), ResourceState::VertexAndConstantBuffer | ResourceState::GenericRead) {
            return Err(format!("vertex buffer is in state {:?}", vertex_buffer.state()));
        }
        reads.push(Read {
            resource: Arc::downgrade(vertex_buffer),
            range: 0..*size,
        });

        if indexed {
            let (index_buffer, size) = b.index_buffer.as_ref().ok_or("no index buffer bound")?;
            if !matches!(index_buffer.state(), ResourceState::IndexBuffer | ResourceState::GenericRead) {
                return Err(format!("index buffer is in state {:?}", index_buffer.state()));
            }
            if count as u64 * 4 > *size {
                return Err(format!("{} indices overrun the index buffer", count));
            }
            reads.push(Read {
                resource: Arc::downgrade(index_buffer),
                range: 0..*size,
            });
        } else if count as u64 * *stride as u64 > *size {
            return Err(format!("{} vertices overrun the vertex buffer", count));
        }

        for (stage, binding) in [(ShaderStage::Vertex, &b.vertex_constants), (ShaderStage::Fragment, &b.pixel_constants)] {
            let bytes = pipeline.constant_bytes(stage);
            if bytes == 0 {
                continue;
            }
            let (buffer, offset) = binding
                .as_ref()
                .ok_or_else(|| format!("{} stage reads b0 but no constant buffer is bound", stage))?;
            if offset + bytes > buffer.desc.width {
                return Err(format!("{} constants overrun their buffer", stage));
            }
            reads.push(Read {
                resource: Arc::downgrade(buffer),
                range: *offset..offset + bytes,
            });
        }

        for (table, (heap, index)) in &b.srv_tables {
            if !b.descriptor_heap.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, heap)) {
                return Err(format!("SRV table {} points outside the bound descriptor heap", table));
            }
            let texture = heap
                .resource(*index)
                .ok_or_else(|| format!("SRV table {} points to no resource", table))?;
            if texture.state() != ResourceState::PixelShaderResource {
                return Err(format!("texture in table {} is in state {:?}", table, texture.state()));
            }
            reads.push(Read::whole(&texture));
        }

        Ok(Command::Draw {
            pipeline: Arc::downgrade(pipeline),
            targets,
            reads,
        })
    }
}

impl D3d12CommandList<MockD3d12> for MockCommandList {
    fn reset(&mut self, allocator: &MockCommandAllocator) -> Result<(), HResult> {
        if self.open {
            self.debug.report("ID3D12GraphicsCommandList::Reset: the list was not closed");
            return Err(HResult::InvalidCall);
        }
        let mut state = lock(&allocator.state);
        if state.recording {
            self.debug.report("ID3D12GraphicsCommandList::Reset: the allocator is recording another list");
            return Err(HResult::InvalidCall);
        }
        state.recording = true;
        drop(state);

        self.allocator = Arc::clone(&allocator.state);
        self.commands.clear();
        self.bindings = Bindings::default();
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HResult> {
        if !self.open {
            self.debug.report("ID3D12GraphicsCommandList::Close: the list is not open");
            return Err(HResult::InvalidCall);
        }
        self.open = false;
        lock(&self.allocator).recording = false;
        self.bindings = Bindings::default();
        Ok(())
    }

    fn resource_barrier(&mut self, resource: &Arc<MockResource>, before: ResourceState, after: ResourceState) {
        if !self.recording("ResourceBarrier") {
            return;
        }
        if resource.heap_type() == HeapType::Upload {
            self.debug.report("ResourceBarrier: UPLOAD heap resources must stay in GENERIC_READ");
            return;
        }
        let current = resource.state();
        if current != before {
            self.debug.report(format!(
                "ResourceBarrier: before state {:?} does not match the resource state {:?}",
                before, current
            ));
        }
        resource.set_state(after);
        self.counters.barriers += 1;
    }

    fn copy_buffer_region(&mut self, dst: &Arc<MockResource>, dst_offset: u64, src: &Arc<MockResource>, src_offset: u64, size: u64) {
        if !self.recording("CopyBufferRegion") {
            return;
        }
        let in_range = |resource: &MockResource, offset: u64| {
            resource.desc.dimension == ResourceDimension::Buffer
                && offset.checked_add(size).is_some_and(|end| end <= resource.desc.width)
        };
        if dst.state() != ResourceState::CopyDest || src.heap_type() != HeapType::Upload {
            self.debug.report("CopyBufferRegion: destination must be in COPY_DEST and source in an UPLOAD heap");
            return;
        }
        if !in_range(dst, dst_offset) || !in_range(src, src_offset) {
            self.debug.report("CopyBufferRegion: region out of bounds");
            return;
        }
        self.commands.push(Command::CopyBuffer {
            dst: Arc::downgrade(dst),
            dst_offset,
            src: Read {
                resource: Arc::downgrade(src),
                range: src_offset..src_offset + size,
            },
        });
        self.counters.copies += 1;
    }

    fn copy_texture_region(&mut self, dst: &Arc<MockResource>, mip: u32, src: &Arc<MockResource>, src_offset: u64) {
        if !self.recording("CopyTextureRegion") {
            return;
        }
        if dst.state() != ResourceState::CopyDest || src.heap_type() != HeapType::Upload {
            self.debug.report("CopyTextureRegion: destination must be in COPY_DEST and source in an UPLOAD heap");
            return;
        }
        let Some(footprint) = texture_footprint(&dst.desc, mip) else {
            self.debug.report(format!("CopyTextureRegion: subresource {} does not exist", mip));
            return;
        };
        if src_offset % TEXTURE_PLACEMENT_ALIGNMENT != 0 {
            self.debug.report(format!("CopyTextureRegion: footprint offset {} is not 512-byte aligned", src_offset));
            return;
        }
        let end = src_offset.saturating_add(footprint.total_bytes());
        if end > src.desc.width {
            self.debug.report("CopyTextureRegion: source footprint out of bounds");
            return;
        }
        self.commands.push(Command::CopyTexture {
            dst: Arc::downgrade(dst),
            mip,
            footprint,
            src: Read {
                resource: Arc::downgrade(src),
                range: src_offset..end,
            },
        });
        self.counters.copies += 1;
    }

    fn clear_render_target_view(&mut self, heap: &Arc<MockDescriptorHeap>, index: u32, color: [f32; 4]) {
        if !self.recording("ClearRenderTargetView") {
            return;
        }
        let Some(target) = self.resolve_target(heap, index, DescriptorHeapType::Rtv, ResourceState::RenderTarget, "ClearRenderTargetView") else {
            return;
        };
        self.commands.push(Command::ClearRenderTarget {
            target: Arc::downgrade(&target),
            color,
        });
        self.counters.clears += 1;
    }

    fn clear_depth_stencil_view(&mut self, heap: &Arc<MockDescriptorHeap>, index: u32, clear_depth: bool, clear_stencil: bool) {
        if !self.recording("ClearDepthStencilView") {
            return;
        }
        let Some(target) = self.resolve_target(heap, index, DescriptorHeapType::Dsv, ResourceState::DepthWrite, "ClearDepthStencilView") else {
            return;
        };
        self.commands.push(Command::ClearDepthStencil {
            target: Arc::downgrade(&target),
            depth: clear_depth,
            stencil: clear_stencil,
        });
        self.counters.clears += 1;
    }

    fn set_descriptor_heap(&mut self, heap: &Arc<MockDescriptorHeap>) {
        if !self.recording("SetDescriptorHeaps") {
            return;
        }
        if heap.kind != DescriptorHeapType::CbvSrv || !heap.shader_visible {
            self.debug.report("SetDescriptorHeaps: only shader-visible CBV/SRV heaps can be bound");
            return;
        }
        self.bindings.descriptor_heap = Some(Arc::clone(heap));
    }

    fn set_graphics_root_signature(&mut self, root_signature: &Arc<MockRootSignature>) {
        if self.recording("SetGraphicsRootSignature") {
            self.bindings.root_signature = Some(Arc::clone(root_signature));
            self.bindings.vertex_constants = None;
            self.bindings.pixel_constants = None;
            self.bindings.srv_tables.clear();
        }
    }

    fn set_pipeline_state(&mut self, pipeline: &Arc<MockPipelineState>) {
        if self.recording("SetPipelineState") {
            self.bindings.pipeline = Some(Arc::clone(pipeline));
        }
    }

    fn set_graphics_root_constant_buffer_view(&mut self, stage: ShaderStage, buffer: &Arc<MockResource>, offset: u64) {
        if !self.recording("SetGraphicsRootConstantBufferView") {
            return;
        }
        if self.bindings.root_signature.is_none() {
            self.debug.report("SetGraphicsRootConstantBufferView: no root signature set");
            return;
        }
        if offset % 256 != 0 || offset >= buffer.desc.width || buffer.desc.dimension != ResourceDimension::Buffer {
            self.debug.report(format!("SetGraphicsRootConstantBufferView: invalid buffer location (offset {})", offset));
            return;
        }
        let binding = Some((Arc::clone(buffer), offset));
        match stage {
            ShaderStage::Vertex => self.bindings.vertex_constants = binding,
            ShaderStage::Fragment => self.bindings.pixel_constants = binding,
        }
    }

    fn set_graphics_root_descriptor_table(&mut self, slot: u32, heap: &Arc<MockDescriptorHeap>, index: u32) {
        if !self.recording("SetGraphicsRootDescriptorTable") {
            return;
        }
        let tables = self.bindings.root_signature.as_ref().map(|r| r.desc.srv_tables).unwrap_or(0);
        if slot >= tables {
            self.debug.report(format!("SetGraphicsRootDescriptorTable: root signature has no table {}", slot));
            return;
        }
        if heap.kind != DescriptorHeapType::CbvSrv || !heap.shader_visible {
            self.debug.report("SetGraphicsRootDescriptorTable: descriptor is not in a shader-visible CBV/SRV heap");
            return;
        }
        self.bindings.srv_tables.retain(|(t, _)| *t != slot);
        self.bindings.srv_tables.push((slot, (Arc::clone(heap), index)));
    }

    fn ia_set_primitive_topology(&mut self, topology: Topology) {
        if self.recording("IASetPrimitiveTopology") {
            self.bindings.topology = Some(topology);
        }
    }

    fn ia_set_vertex_buffer(&mut self, buffer: &Arc<MockResource>, size: u64, stride: u32) {
        if self.recording("IASetVertexBuffers") {
            self.bindings.vertex_buffer = Some((Arc::clone(buffer), size.min(buffer.desc.width), stride));
        }
    }

    fn ia_set_index_buffer(&mut self, buffer: &Arc<MockResource>, size: u64) {
        if self.recording("IASetIndexBuffer") {
            self.bindings.index_buffer = Some((Arc::clone(buffer), size.min(buffer.desc.width)));
        }
    }

    fn om_set_render_targets(&mut self, rtv: (&Arc<MockDescriptorHeap>, u32), dsv: Option<(&Arc<MockDescriptorHeap>, u32)>) {
        if self.recording("OMSetRenderTargets") {
            self.bindings.render_target = Some((Arc::clone(rtv.0), rtv.1));
            self.bindings.depth_stencil = dsv.map(|(heap, index)| (Arc::clone(heap), index));
        }
    }

    fn rs_set_viewport(&mut self, viewport: Viewport) {
        if self.recording("RSSetViewports") {
            self.bindings.viewport = Some(viewport);
        }
    }

    fn rs_set_scissor_rect(&mut self, rect: Rect2D) {
        if self.recording("RSSetScissorRects") {
            self.bindings.scissor = Some(rect);
        }
    }

    fn draw_instanced(&mut self, vertex_count: u32) {
        self.record_draw("DrawInstanced", false, vertex_count);
    }

    fn draw_indexed_instanced(&mut self, index_count: u32) {
        self.record_draw("DrawIndexedInstanced", true, index_count);
    }
}

// ============================================================================
// Queue timeline
// ============================================================================

/// GPU timeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub executed_lists: u64,
    pub executed_draws: u64,
    /// Lists submitted and not finished yet
    pub pending_lists: usize,
    /// Highest `pending_lists` ever observed
    pub max_pending_lists: usize,
}

enum Work {
    Execute {
        commands: Vec<Command>,
        allocator: Arc<Mutex<AllocatorState>>,
    },
    Signal {
        fence: Arc<AtomicU64>,
        value: u64,
    },
}

struct QueueItem {
    ready_at: Instant,
    work: Work,
}

/// Submitted work in order, each item with the time the GPU finishes it
#[derive(Default)]
struct Timeline {
    items: VecDeque<QueueItem>,
    /// Completion time of the last queued item
    tail: Option<Instant>,
    execution_delay: Duration,
    stats: QueueStats,
}

impl Timeline {
    fn push(&mut self, work: Work, duration: Duration) {
        let now = Instant::now();
        let start = self.tail.map_or(now, |tail| tail.max(now));
        let ready_at = start + duration;
        self.tail = Some(ready_at);
        self.items.push_back(QueueItem { ready_at, work });
    }

    /// Finish everything due by `now`, in submission order
    fn retire(&mut self, now: Instant, debug: &DebugLayer) {
        while self.items.front().is_some_and(|item| item.ready_at <= now) {
            let Some(item) = self.items.pop_front() else {
                break;
            };
            match item.work {
                Work::Execute { commands, allocator } => {
                    let draws = execute_commands(commands, debug);
                    let mut state = lock(&allocator);
                    state.in_flight = state.in_flight.saturating_sub(1);
                    self.stats.executed_lists += 1;
                    self.stats.executed_draws += draws;
                    self.stats.pending_lists = self.stats.pending_lists.saturating_sub(1);
                }
                Work::Signal { fence, value } => fence.store(value, Ordering::Release),
            }
        }
    }

    /// Completion time of the first queued signal that brings `fence` to `value`
    fn signal_time(&self, fence: &Arc<AtomicU64>, value: u64) -> Option<Instant> {
        self.items.iter().find_map(|item| match &item.work {
            Work::Signal { fence: target, value: signaled } if Arc::ptr_eq(target, fence) && *signaled >= value => {
                Some(item.ready_at)
            }
            _ => None,
        })
    }

    fn pending_read(&self, resource: &Arc<MockResource>, range: &Range<u64>) -> bool {
        self.items.iter().any(|item| match &item.work {
            Work::Execute { commands, .. } => commands.iter().any(|c| c.reads(resource, range)),
            Work::Signal { .. } => false,
        })
    }
}

/// Run one list's commands; returns the number of draws executed
fn execute_commands(commands: Vec<Command>, debug: &DebugLayer) -> u64 {
    let released = |call: &str| debug.report(format!("CORRUPTION: {} executed on a released object", call));
    let mut draws = 0;
    for command in commands {
        match command {
            Command::ClearRenderTarget { target, color } => match target.upgrade() {
                Some(target) => fill_color(&target, color),
                None => released("ClearRenderTargetView"),
            },
            Command::ClearDepthStencil { target, depth, stencil } => match target.upgrade() {
                Some(target) => fill_depth_stencil(&target, depth, stencil),
                None => released("ClearDepthStencilView"),
            },
            Command::CopyBuffer { dst, dst_offset, src } => match (dst.upgrade(), src.resource.upgrade()) {
                (Some(dst), Some(source)) => {
                    let (start, end) = (src.range.start as usize, src.range.end as usize);
                    let bytes = lock(&source.subresources)[0][start..end].to_vec();
                    let offset = dst_offset as usize;
                    lock(&dst.subresources)[0][offset..offset + bytes.len()].copy_from_slice(&bytes);
                }
                _ => released("CopyBufferRegion"),
            },
            Command::CopyTexture { dst, mip, footprint, src } => match (dst.upgrade(), src.resource.upgrade()) {
                (Some(dst), Some(source)) => {
                    let source = lock(&source.subresources);
                    let mut levels = lock(&dst.subresources);
                    let level = &mut levels[mip as usize];
                    let row_bytes = footprint.row_bytes as usize;
                    for (y, row) in level.chunks_exact_mut(row_bytes).enumerate() {
                        let start = src.range.start as usize + y * footprint.row_pitch as usize;
                        row.copy_from_slice(&source[0][start..start + row_bytes]);
                    }
                }
                _ => released("CopyTextureRegion"),
            },
            Command::Draw { pipeline, targets, reads } => {
                let alive = pipeline.upgrade().is_some()
                    && targets.iter().all(|t| t.upgrade().is_some())
                    && reads.iter().all(|r| r.resource.upgrade().is_some());
                if alive {
                    draws += 1;
                } else {
                    released("Draw");
                }
            }
        }
    }
    draws
}

fn fill_color(target: &MockResource, color: [f32; 4]) {
    if target.desc.format != Some(DxgiFormat::R8G8B8A8Unorm) {
        return;
    }
    let texel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
    for pixel in lock(&target.subresources)[0].chunks_exact_mut(4) {
        pixel.copy_from_slice(&texel);
    }
}

fn fill_depth_stencil(target: &MockResource, depth: bool, stencil: bool) {
    let mut levels = lock(&target.subresources);
    for pixel in levels[0].chunks_exact_mut(4) {
        match target.desc.format {
            Some(DxgiFormat::D32Float) if depth => pixel.copy_from_slice(&1.0f32.to_le_bytes()),
            Some(DxgiFormat::D24UnormS8Uint) => {
                if depth {
                    pixel[..3].fill(u8::MAX);
                }
                if stencil {
                    pixel[3] = 0;
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Device
// ============================================================================

pub struct MockD3d12 {
    live: LiveObjects,
    limits: DeviceLimits,
    debug: Arc<DebugLayer>,
    timeline: Mutex<Timeline>,
    blocking_waits: AtomicU64,
    surface: Surface,
    buffers: Vec<Arc<MockResource>>,
    current: usize,
    size: (u32, u32),
    presents: u64,
    last_sync_interval: u32,
}

impl MockD3d12 {
    pub fn debug_layer(&self) -> &DebugLayer {
        &self.debug
    }

    pub fn live_objects(&self) -> LiveObjects {
        self.live.clone()
    }

    /// Objects created on this device that are still referenced
    pub fn live_object_count(&self) -> usize {
        self.live.count()
    }

    /// Time the GPU spends on every executed list from now on
    pub fn set_execution_delay(&self, delay: Duration) {
        lock(&self.timeline).execution_delay = delay;
    }

    pub fn queue_stats(&self) -> QueueStats {
        let mut timeline = lock(&self.timeline);
        timeline.retire(Instant::now(), &self.debug);
        timeline.stats
    }

    /// Fence waits that had to sleep
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits.load(Ordering::Relaxed)
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn present_count(&self) -> u64 {
        self.presents
    }

    pub fn last_sync_interval(&self) -> u32 {
        self.last_sync_interval
    }

    fn resource(&self, heap: HeapType, desc: &ResourceDesc, initial_state: ResourceState) -> Result<Arc<MockResource>, HResult> {
        match desc.dimension {
            ResourceDimension::Buffer => {
                if desc.width == 0 || desc.allow_render_target || desc.allow_depth_stencil {
                    return Err(HResult::InvalidArg);
                }
                if desc.width > self.limits.max_buffer_size {
                    return Err(HResult::OutOfMemory);
                }
            }
            ResourceDimension::Texture2d => {
                let max = self.limits.max_texture_dimension as u64;
                let Some(format) = desc.format else {
                    return Err(HResult::InvalidArg);
                };
                if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height as u64 > max {
                    return Err(HResult::InvalidArg);
                }
                if desc.mip_levels == 0 || desc.mip_levels > mip_level_count(desc.width as u32, desc.height) {
                    return Err(HResult::InvalidArg);
                }
                if (desc.allow_depth_stencil && !format.is_depth()) || (desc.allow_render_target && format.is_depth()) {
                    return Err(HResult::InvalidArg);
                }
            }
        }
        if heap == HeapType::Upload
            && (desc.dimension != ResourceDimension::Buffer || initial_state != ResourceState::GenericRead)
        {
            return Err(HResult::InvalidArg);
        }

        let subresources = subresource_sizes(desc).into_iter().map(|size| vec![0u8; size]).collect();
        Ok(Arc::new(MockResource {
            desc: *desc,
            heap,
            state: Mutex::new(initial_state),
            subresources: Mutex::new(subresources),
            _live: self.live.token(),
        }))
    }

    fn create_back_buffers(&self, count: usize, width: u32, height: u32) -> Result<Vec<Arc<MockResource>>, HResult> {
        let desc = ResourceDesc::render_target(width, height, DxgiFormat::R8G8B8A8Unorm);
        (0..count)
            .map(|_| self.resource(HeapType::Default, &desc, ResourceState::Present))
            .collect()
    }

    fn view(&self, heap: &MockDescriptorHeap, kind: DescriptorHeapType, allowed: bool, index: u32, resource: &Arc<MockResource>) -> Result<(), HResult> {
        if heap.kind != kind || !allowed {
            return Err(HResult::InvalidArg);
        }
        heap.write(index, resource)
    }
}

impl D3d12Device for MockD3d12 {
    type Resource = Arc<MockResource>;
    type DescriptorHeap = Arc<MockDescriptorHeap>;
    type RootSignature = Arc<MockRootSignature>;
    type PipelineState = Arc<MockPipelineState>;
    type CommandAllocator = MockCommandAllocator;
    type CommandList = MockCommandList;
    type Fence = MockFence;
    type Bytecode = MockBlob;

    fn create(window: &NativeWindow, width: u32, height: u32, buffer_count: u32, config: &RendererConfig) -> Result<Self, HResult> {
        let surface = Surface::from_raw(window.window);
        if !surface.is_hwnd() {
            return Err(HResult::Unsupported);
        }
        if width == 0 || height == 0 || buffer_count < 2 {
            return Err(HResult::InvalidArg);
        }
        let mut device = Self {
            live: LiveObjects::new(),
            limits: config.limits,
            debug: Arc::new(DebugLayer::new(config.enable_validation)),
            timeline: Mutex::new(Timeline::default()),
            blocking_waits: AtomicU64::new(0),
            surface,
            buffers: Vec::new(),
            current: 0,
            size: (width, height),
            presents: 0,
            last_sync_interval: 0,
        };
        device.buffers = device.create_back_buffers(buffer_count as usize, width, height)?;
        Ok(device)
    }

    fn describe(&self) -> String {
        format!("mock device on {}", self.surface)
    }

    fn compile(&self, stage: ShaderStage, source: &str) -> Result<(MockBlob, StageReflection), ShaderError> {
        let reflection = mock_shader_compiler::compile_stage(stage, source)?;
        let blob = MockBlob {
            stage,
            constant_bytes: reflection.constants.size() as u64,
        };
        Ok((blob, reflection))
    }

    fn take_debug_messages(&self) -> Vec<String> {
        self.debug.take_new_messages()
    }

    fn create_command_allocator(&self) -> Result<MockCommandAllocator, HResult> {
        Ok(MockCommandAllocator {
            state: Arc::new(Mutex::new(AllocatorState::default())),
            _live: self.live.token(),
        })
    }

    fn create_command_list(&self, allocator: &MockCommandAllocator) -> Result<MockCommandList, HResult> {
        let mut state = lock(&allocator.state);
        if state.recording {
            return Err(HResult::InvalidCall);
        }
        state.recording = true;
        Ok(MockCommandList {
            allocator: Arc::clone(&allocator.state),
            open: true,
            commands: Vec::new(),
            bindings: Bindings::default(),
            counters: ListCounters::default(),
            debug: Arc::clone(&self.debug),
            _live: self.live.token(),
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<MockFence, HResult> {
        Ok(MockFence {
            value: Arc::new(AtomicU64::new(initial_value)),
            _live: self.live.token(),
        })
    }

    fn create_descriptor_heap(&self, kind: DescriptorHeapType, capacity: u32, shader_visible: bool) -> Result<Arc<MockDescriptorHeap>, HResult> {
        if capacity == 0 || (shader_visible && kind != DescriptorHeapType::CbvSrv) {
            return Err(HResult::InvalidArg);
        }
        Ok(Arc::new(MockDescriptorHeap {
            kind,
            shader_visible,
            entries: Mutex::new(vec![None; capacity as usize]),
            _live: self.live.token(),
        }))
    }

    fn create_committed_resource(&self, heap: HeapType, desc: &ResourceDesc, initial_state: ResourceState) -> Result<Arc<MockResource>, HResult> {
        self.resource(heap, desc, initial_state)
    }

    fn create_render_target_view(&self, resource: &Arc<MockResource>, heap: &Arc<MockDescriptorHeap>, index: u32) -> Result<(), HResult> {
        self.view(heap, DescriptorHeapType::Rtv, resource.desc.allow_render_target, index, resource)
    }

    fn create_depth_stencil_view(&self, resource: &Arc<MockResource>, heap: &Arc<MockDescriptorHeap>, index: u32) -> Result<(), HResult> {
        self.view(heap, DescriptorHeapType::Dsv, resource.desc.allow_depth_stencil, index, resource)
    }

    fn create_shader_resource_view(&self, resource: &Arc<MockResource>, heap: &Arc<MockDescriptorHeap>, index: u32) -> Result<(), HResult> {
        let is_texture = resource.desc.dimension == ResourceDimension::Texture2d;
        self.view(heap, DescriptorHeapType::CbvSrv, is_texture, index, resource)
    }

    fn create_root_signature(&self, desc: RootSignatureDesc) -> Result<Arc<MockRootSignature>, HResult> {
        if desc.cost() > 64 {
            return Err(HResult::InvalidArg);
        }
        Ok(Arc::new(MockRootSignature {
            desc,
            _live: self.live.token(),
        }))
    }

    fn create_graphics_pipeline_state(&self, desc: &GraphicsPipelineDesc<'_, Self>) -> Result<Arc<MockPipelineState>, HResult> {
        if desc.vs.stage != ShaderStage::Vertex || desc.ps.stage != ShaderStage::Fragment {
            return Err(HResult::InvalidArg);
        }
        if desc.input_layout.is_empty() || desc.input_layout.iter().any(|e| e.components == 0 || e.components > 4) {
            return Err(HResult::InvalidArg);
        }
        if desc.rtv_format.is_depth() || !desc.dsv_format.is_depth() {
            return Err(HResult::InvalidArg);
        }
        Ok(Arc::new(MockPipelineState {
            root_signature: Arc::clone(desc.root_signature),
            vertex_constants: desc.vs.constant_bytes,
            pixel_constants: desc.ps.constant_bytes,
            rasterizer: desc.rasterizer,
            depth_stencil: desc.depth_stencil,
            blend: desc.blend,
            topology_type: desc.topology_type,
            _live: self.live.token(),
        }))
    }

    fn write_buffer(&self, resource: &Arc<MockResource>, offset: u64, data: &[u8]) -> Result<(), HResult> {
        if resource.heap != HeapType::Upload || resource.desc.dimension != ResourceDimension::Buffer {
            return Err(HResult::InvalidCall);
        }
        let end = offset.checked_add(data.len() as u64).ok_or(HResult::InvalidArg)?;
        if end > resource.desc.width {
            return Err(HResult::InvalidArg);
        }
        let range = offset..end;
        {
            let mut timeline = lock(&self.timeline);
            timeline.retire(Instant::now(), &self.debug);
            if timeline.pending_read(resource, &range) {
                self.debug.report(format!(
                    "CORRUPTION: CPU write to bytes {}..{} of an upload buffer a pending submission still reads",
                    range.start, range.end
                ));
            }
        }
        lock(&resource.subresources)[0][offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn reset_command_allocator(&self, allocator: &MockCommandAllocator) -> Result<(), HResult> {
        lock(&self.timeline).retire(Instant::now(), &self.debug);
        let state = lock(&allocator.state);
        if state.recording {
            self.debug.report("ID3D12CommandAllocator::Reset: a command list is still recording");
            return Err(HResult::InvalidCall);
        }
        if state.in_flight > 0 {
            self.debug.report(format!(
                "ID3D12CommandAllocator::Reset: {} command list(s) still executing on the GPU",
                state.in_flight
            ));
            return Err(HResult::InvalidCall);
        }
        Ok(())
    }

    fn execute_command_list(&self, list: &mut MockCommandList) -> Result<(), HResult> {
        if list.open {
            self.debug.report("ExecuteCommandLists: a command list is still open");
            return Err(HResult::InvalidCall);
        }
        lock(&list.allocator).in_flight += 1;
        let mut timeline = lock(&self.timeline);
        timeline.stats.pending_lists += 1;
        timeline.stats.max_pending_lists = timeline.stats.max_pending_lists.max(timeline.stats.pending_lists);
        let delay = timeline.execution_delay;
        let work = Work::Execute {
            commands: std::mem::take(&mut list.commands),
            allocator: Arc::clone(&list.allocator),
        };
        timeline.push(work, delay);
        Ok(())
    }

    fn signal(&self, fence: &MockFence, value: u64) -> Result<(), HResult> {
        let work = Work::Signal {
            fence: Arc::clone(&fence.value),
            value,
        };
        lock(&self.timeline).push(work, Duration::ZERO);
        Ok(())
    }

    fn completed_value(&self, fence: &MockFence) -> u64 {
        lock(&self.timeline).retire(Instant::now(), &self.debug);
        fence.value.load(Ordering::Acquire)
    }

    fn wait_for_fence(&self, fence: &MockFence, value: u64) -> Result<(), HResult> {
        let mut timeline = lock(&self.timeline);
        timeline.retire(Instant::now(), &self.debug);
        if fence.value.load(Ordering::Acquire) >= value {
            return Ok(());
        }
        let Some(ready_at) = timeline.signal_time(&fence.value, value) else {
            // The native event would never fire
            self.debug.report(format!("ID3D12Fence::SetEventOnCompletion: value {} is never signaled", value));
            return Err(HResult::InvalidCall);
        };
        self.blocking_waits.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        if ready_at > now {
            thread::sleep(ready_at - now);
        }
        timeline.retire(ready_at.max(Instant::now()), &self.debug);
        Ok(())
    }

    fn back_buffer(&self, index: u32) -> Result<Arc<MockResource>, HResult> {
        self.buffers.get(index as usize).map(Arc::clone).ok_or(HResult::InvalidArg)
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.current as u32
    }

    fn present(&mut self, sync_interval: u32) -> Result<(), HResult> {
        if sync_interval > 4 {
            return Err(HResult::InvalidCall);
        }
        let Some(back_buffer) = self.buffers.get(self.current) else {
            return Err(HResult::InvalidCall);
        };
        let state = back_buffer.state();
        if state != ResourceState::Present {
            self.debug.report(format!(
                "IDXGISwapChain::Present: back buffer {} is in state {:?}, expected PRESENT",
                self.current, state
            ));
        }
        self.presents += 1;
        self.last_sync_interval = sync_interval;
        self.current = (self.current + 1) % self.buffers.len();
        Ok(())
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), HResult> {
        if width == 0 || height == 0 {
            return Err(HResult::InvalidArg);
        }
        {
            let mut timeline = lock(&self.timeline);
            timeline.retire(Instant::now(), &self.debug);
            if !timeline.items.is_empty() {
                self.debug.report("IDXGISwapChain::ResizeBuffers: the GPU is still using the back buffers");
                return Err(HResult::InvalidCall);
            }
        }
        if self.buffers.iter().any(|b| Arc::strong_count(b) > 1) {
            self.debug.report("IDXGISwapChain::ResizeBuffers: back buffers are still referenced");
            return Err(HResult::InvalidCall);
        }
        let count = self.buffers.len();
        self.buffers.clear();
        self.buffers = self.create_back_buffers(count, width, height)?;
        self.size = (width, height);
        self.current = 0;
        Ok(())
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        self.size
    }
}

#[cfg(test)]
#[path = "d3d12_mock_device_tests.rs"]
mod tests;
