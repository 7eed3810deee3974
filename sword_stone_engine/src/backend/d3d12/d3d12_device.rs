//! The slice of Direct3D 12 the renderer uses
//!
//! Explicit model: resources live in DEFAULT or UPLOAD heaps and carry a
//! resource state the caller tracks through barriers, command lists record
//! against an allocator and run on the device's direct queue, and the CPU
//! observes completion only through fence values.
//!
//! A [`D3d12Device`] bundles the device, its direct queue and the flip-model
//! swap chain of one window. Recording goes through [`D3d12CommandList`].

use crate::renderer::{mip_extent, NativeWindow, Rect2D, RendererConfig, ShaderError, ShaderStage, StageReflection, Viewport};

pub use crate::backend::dxgi::{DxgiFormat, HResult, InputElementDesc};

// ============================================================================
// Descriptions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// GPU-local memory, filled through copies
    Default,
    /// CPU-visible memory, always in `GenericRead`
    Upload,
}

/// D3D12_RESOURCE_STATES
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    CopyDest,
    VertexAndConstantBuffer,
    IndexBuffer,
    PixelShaderResource,
    RenderTarget,
    DepthWrite,
    Present,
    GenericRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDimension {
    Buffer,
    Texture2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    /// Byte size of a buffer, texel width of a texture
    pub width: u64,
    pub height: u32,
    pub mip_levels: u32,
    pub format: Option<DxgiFormat>,
    pub allow_render_target: bool,
    pub allow_depth_stencil: bool,
}

impl ResourceDesc {
    pub fn buffer(size: u64) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            mip_levels: 1,
            format: None,
            allow_render_target: false,
            allow_depth_stencil: false,
        }
    }

    pub fn texture_2d(width: u32, height: u32, mip_levels: u32, format: DxgiFormat) -> Self {
        Self {
            dimension: ResourceDimension::Texture2d,
            width: width as u64,
            height,
            mip_levels,
            format: Some(format),
            allow_render_target: false,
            allow_depth_stencil: false,
        }
    }

    pub fn render_target(width: u32, height: u32, format: DxgiFormat) -> Self {
        Self {
            allow_render_target: true,
            ..Self::texture_2d(width, height, 1, format)
        }
    }

    pub fn depth_stencil(width: u32, height: u32, format: DxgiFormat) -> Self {
        Self {
            allow_depth_stencil: true,
            ..Self::texture_2d(width, height, 1, format)
        }
    }
}

/// Row pitch alignment of texture data in a buffer (D3D12_TEXTURE_DATA_PITCH_ALIGNMENT)
pub const TEXTURE_PITCH_ALIGNMENT: u32 = 256;

/// Offset alignment of texture data in a buffer (D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT)
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// Layout of one mip level inside an upload buffer, as `GetCopyableFootprints` reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub width: u32,
    pub height: u32,
    /// Bytes from one row to the next, a multiple of [`TEXTURE_PITCH_ALIGNMENT`]
    pub row_pitch: u32,
    /// Bytes of texel data in one row
    pub row_bytes: u32,
}

impl Footprint {
    /// Bytes the level occupies, without padding after the last row
    pub fn total_bytes(&self) -> u64 {
        self.row_pitch as u64 * (self.height as u64 - 1) + self.row_bytes as u64
    }
}

/// Footprint of `mip` of a 2D texture; `None` for buffers and missing levels
pub fn texture_footprint(desc: &ResourceDesc, mip: u32) -> Option<Footprint> {
    if desc.dimension != ResourceDimension::Texture2d || mip >= desc.mip_levels {
        return None;
    }
    let format = desc.format?;
    let (width, height) = mip_extent(desc.width as u32, desc.height, mip);
    let row_bytes = width * format.bytes_per_pixel();
    let row_pitch = row_bytes.div_ceil(TEXTURE_PITCH_ALIGNMENT) * TEXTURE_PITCH_ALIGNMENT;
    Some(Footprint {
        width,
        height,
        row_pitch,
        row_bytes,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    Rtv,
    Dsv,
    CbvSrv,
}

/// Root parameter of the vertex stage's constant buffer (b0)
pub const ROOT_VERTEX_CONSTANTS: u32 = 0;
/// Root parameter of the pixel stage's constant buffer (b0)
pub const ROOT_PIXEL_CONSTANTS: u32 = 1;
/// Root parameter of SRV table 0; table n binds register t<n>
pub const ROOT_FIRST_SRV_TABLE: u32 = 2;

/// Root signature layout: one root CBV per stage, then one SRV table per
/// texture slot, plus a static linear-wrap sampler at s0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSignatureDesc {
    pub srv_tables: u32,
}

impl RootSignatureDesc {
    /// Root signature size in DWORDs: 2 per root descriptor, 1 per table
    pub fn cost(&self) -> u32 {
        2 * 2 + self.srv_tables
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Back,
}

/// Scissor testing is always on in Direct3D 12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
}

/// Render target 0 blend; enabled means srcColor * srcAlpha + dstColor * (1 - srcAlpha)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub blend_enable: bool,
}

/// Topology class a pipeline state is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Point,
    Line,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

impl Topology {
    pub fn topology_type(self) -> TopologyType {
        match self {
            Topology::PointList => TopologyType::Point,
            Topology::LineList => TopologyType::Line,
            Topology::TriangleList | Topology::TriangleStrip => TopologyType::Triangle,
        }
    }
}

pub struct GraphicsPipelineDesc<'a, D: D3d12Device> {
    pub root_signature: &'a D::RootSignature,
    pub vs: &'a D::Bytecode,
    pub ps: &'a D::Bytecode,
    pub input_layout: &'a [InputElementDesc],
    pub rasterizer: RasterizerDesc,
    pub depth_stencil: DepthStencilDesc,
    pub blend: BlendDesc,
    pub topology_type: TopologyType,
    pub rtv_format: DxgiFormat,
    pub dsv_format: DxgiFormat,
}

// ============================================================================
// Device
// ============================================================================

/// Device, direct command queue and swap chain of one window
///
/// Queue work runs in submission order. Objects handed out by a device are
/// only used with that device and move between threads together with it.
pub trait D3d12Device: Sized {
    type Resource: Clone;
    type DescriptorHeap;
    type RootSignature;
    type PipelineState: Clone;
    type CommandAllocator;
    type CommandList: D3d12CommandList<Self>;
    type Fence;
    /// Compiled shader bytecode
    type Bytecode;

    /// Create the device, its direct queue and a swap chain of
    /// `buffer_count` back buffers for `window`
    fn create(window: &NativeWindow, width: u32, height: u32, buffer_count: u32, config: &RendererConfig) -> Result<Self, HResult>;

    /// Adapter summary for logs
    fn describe(&self) -> String;

    /// Compile one stage with entry point `main`
    fn compile(&self, stage: ShaderStage, source: &str) -> Result<(Self::Bytecode, StageReflection), ShaderError>;

    /// Debug layer messages recorded since the previous call
    fn take_debug_messages(&self) -> Vec<String>;

    // ===== Objects =====

    fn create_command_allocator(&self) -> Result<Self::CommandAllocator, HResult>;
    /// New list, open and recording against `allocator`
    fn create_command_list(&self, allocator: &Self::CommandAllocator) -> Result<Self::CommandList, HResult>;
    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, HResult>;
    /// Only CBV/SRV heaps can be shader visible
    fn create_descriptor_heap(&self, kind: DescriptorHeapType, capacity: u32, shader_visible: bool) -> Result<Self::DescriptorHeap, HResult>;
    fn create_committed_resource(&self, heap: HeapType, desc: &ResourceDesc, initial_state: ResourceState) -> Result<Self::Resource, HResult>;
    fn create_render_target_view(&self, resource: &Self::Resource, heap: &Self::DescriptorHeap, index: u32) -> Result<(), HResult>;
    fn create_depth_stencil_view(&self, resource: &Self::Resource, heap: &Self::DescriptorHeap, index: u32) -> Result<(), HResult>;
    fn create_shader_resource_view(&self, resource: &Self::Resource, heap: &Self::DescriptorHeap, index: u32) -> Result<(), HResult>;
    fn create_root_signature(&self, desc: RootSignatureDesc) -> Result<Self::RootSignature, HResult>;
    fn create_graphics_pipeline_state(&self, desc: &GraphicsPipelineDesc<'_, Self>) -> Result<Self::PipelineState, HResult>;

    /// Map an UPLOAD buffer, copy `data` to `offset`, unmap
    ///
    /// The GPU must not be reading the written range: nothing synchronizes
    /// CPU writes with queued work.
    fn write_buffer(&self, resource: &Self::Resource, offset: u64, data: &[u8]) -> Result<(), HResult>;

    /// Reclaim recorded commands; the GPU must have finished every list
    /// executed from `allocator` and no list may be recording against it
    fn reset_command_allocator(&self, allocator: &Self::CommandAllocator) -> Result<(), HResult>;

    // ===== Direct queue =====

    /// Hand a closed list to the GPU
    fn execute_command_list(&self, list: &mut Self::CommandList) -> Result<(), HResult>;
    /// Set `fence` to `value` once all previously submitted work has finished
    fn signal(&self, fence: &Self::Fence, value: u64) -> Result<(), HResult>;
    fn completed_value(&self, fence: &Self::Fence) -> u64;
    /// Block the calling thread until `fence` reaches `value`
    fn wait_for_fence(&self, fence: &Self::Fence, value: u64) -> Result<(), HResult>;

    // ===== Swap chain =====

    /// A new reference to back buffer `index`
    fn back_buffer(&self, index: u32) -> Result<Self::Resource, HResult>;
    fn current_back_buffer_index(&self) -> u32;
    /// Queue the current back buffer (in `Present` state) for display
    fn present(&mut self, sync_interval: u32) -> Result<(), HResult>;
    /// Fails while any back-buffer reference is held outside the swap chain
    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), HResult>;
    fn back_buffer_size(&self) -> (u32, u32);
}

/// ID3D12GraphicsCommandList
///
/// Barriers name the state the caller knows the resource is in. Descriptors
/// are addressed as an index into a heap.
pub trait D3d12CommandList<D: D3d12Device> {
    /// Start recording again against `allocator`; the list must be closed
    fn reset(&mut self, allocator: &D::CommandAllocator) -> Result<(), HResult>;
    fn close(&mut self) -> Result<(), HResult>;

    fn resource_barrier(&mut self, resource: &D::Resource, before: ResourceState, after: ResourceState);

    /// Copy `size` bytes from an UPLOAD buffer into a buffer in `CopyDest`
    fn copy_buffer_region(&mut self, dst: &D::Resource, dst_offset: u64, src: &D::Resource, src_offset: u64, size: u64);
    /// Copy level `mip`, laid out as [`texture_footprint`] describes at
    /// `src_offset` of an UPLOAD buffer, into a texture in `CopyDest`
    fn copy_texture_region(&mut self, dst: &D::Resource, mip: u32, src: &D::Resource, src_offset: u64);

    fn clear_render_target_view(&mut self, heap: &D::DescriptorHeap, index: u32, color: [f32; 4]);
    fn clear_depth_stencil_view(&mut self, heap: &D::DescriptorHeap, index: u32, clear_depth: bool, clear_stencil: bool);

    /// Shader-visible heap the descriptor tables point into
    fn set_descriptor_heap(&mut self, heap: &D::DescriptorHeap);
    fn set_graphics_root_signature(&mut self, root_signature: &D::RootSignature);
    fn set_pipeline_state(&mut self, pipeline: &D::PipelineState);
    /// Root CBV of `stage` at `offset` bytes into a buffer, 256-byte aligned
    fn set_graphics_root_constant_buffer_view(&mut self, stage: ShaderStage, buffer: &D::Resource, offset: u64);
    /// SRV table `slot` starts at descriptor `index` of the shader-visible heap
    fn set_graphics_root_descriptor_table(&mut self, slot: u32, heap: &D::DescriptorHeap, index: u32);

    fn ia_set_primitive_topology(&mut self, topology: Topology);
    /// First `size` bytes of `buffer` as vertex slot 0
    fn ia_set_vertex_buffer(&mut self, buffer: &D::Resource, size: u64, stride: u32);
    /// 32-bit indices
    fn ia_set_index_buffer(&mut self, buffer: &D::Resource, size: u64);
    fn om_set_render_targets(&mut self, rtv: (&D::DescriptorHeap, u32), dsv: Option<(&D::DescriptorHeap, u32)>);
    fn rs_set_viewport(&mut self, viewport: Viewport);
    fn rs_set_scissor_rect(&mut self, rect: Rect2D);

    fn draw_instanced(&mut self, vertex_count: u32);
    fn draw_indexed_instanced(&mut self, index_count: u32);
}

#[cfg(test)]
#[path = "d3d12_device_tests.rs"]
mod tests;
