//! The slice of Direct3D 11 the renderer uses
//!
//! A [`D3d11Device`] bundles what `D3D11CreateDeviceAndSwapChain` returns:
//! the device, its immediate context and the swap chain. Objects are
//! reference counted handles (COM pointers on the native device) and state
//! objects are immutable once created.

use crate::renderer::{NativeWindow, Rect2D, RendererConfig, ShaderError, ShaderStage, StageReflection, Viewport};

pub use crate::backend::dxgi::{DxgiFormat, HResult, InputElementDesc};

// ============================================================================
// Descriptions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// GPU read/write, CPU updates through `UpdateSubresource`
    Default,
    /// GPU read, CPU write through `Map`
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindFlag {
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub byte_width: usize,
    pub usage: Usage,
    pub bind: BindFlag,
    pub cpu_write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureBind {
    ShaderResource,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture2dDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: DxgiFormat,
    pub bind: TextureBind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub scissor_enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    One,
    Zero,
    SrcAlpha,
    InvSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendDesc {
    pub blend_enable: bool,
    pub src_blend: Blend,
    pub dest_blend: Blend,
}

impl BlendDesc {
    /// srcColor * srcAlpha + dstColor * (1 - srcAlpha)
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_blend: Blend::SrcAlpha,
            dest_blend: Blend::InvSrcAlpha,
        }
    }

    pub fn opaque() -> Self {
        Self {
            blend_enable: false,
            src_blend: Blend::One,
            dest_blend: Blend::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    /// Previous contents are discarded; the whole buffer must be rewritten
    WriteDiscard,
    /// Caller promises not to touch data in use; contents are kept
    WriteNoOverwrite,
}

// ============================================================================
// Device
// ============================================================================

/// Shader resource slots exposed to the pixel stage
pub const PS_RESOURCE_SLOTS: u32 = 16;

/// Device, immediate context and swap chain of one window
///
/// Objects handed out by a device belong to it; they are only used with the
/// device that created them and move between threads together with it.
pub trait D3d11Device: Sized {
    type Buffer: Clone;
    type Texture: Clone;
    type ShaderResourceView: Clone;
    type RenderTargetView: Clone;
    type DepthStencilView: Clone;
    type RasterizerState: Clone;
    type DepthStencilState: Clone;
    type BlendState: Clone;
    type VertexShader: Clone;
    type PixelShader: Clone;
    type InputLayout: Clone;
    /// Compiled shader bytecode
    type Bytecode;

    /// Create device, context and a swap chain for `window`
    fn create(window: &NativeWindow, width: u32, height: u32, config: &RendererConfig) -> Result<Self, HResult>;

    /// Adapter and feature level summary for logs
    fn describe(&self) -> String;

    /// Compile one stage with entry point `main`
    fn compile(&self, stage: ShaderStage, source: &str) -> Result<(Self::Bytecode, StageReflection), ShaderError>;

    // ===== Resources =====

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Self::Buffer, HResult>;
    /// `initial_data` fills level 0
    fn create_texture_2d(&self, desc: &Texture2dDesc, initial_data: Option<&[u8]>) -> Result<Self::Texture, HResult>;
    fn create_shader_resource_view(&self, texture: &Self::Texture) -> Result<Self::ShaderResourceView, HResult>;
    fn create_depth_stencil_view(&self, texture: &Self::Texture) -> Result<Self::DepthStencilView, HResult>;

    // ===== Pipeline objects =====

    fn create_rasterizer_state(&self, desc: RasterizerDesc) -> Result<Self::RasterizerState, HResult>;
    fn create_depth_stencil_state(&self, desc: DepthStencilDesc) -> Result<Self::DepthStencilState, HResult>;
    fn create_blend_state(&self, desc: BlendDesc) -> Result<Self::BlendState, HResult>;
    fn create_vertex_shader(&self, code: &Self::Bytecode) -> Result<Self::VertexShader, HResult>;
    fn create_pixel_shader(&self, code: &Self::Bytecode) -> Result<Self::PixelShader, HResult>;
    /// Input layout validated against the vertex shader's input signature
    fn create_input_layout(&self, elements: &[InputElementDesc], code: &Self::Bytecode) -> Result<Self::InputLayout, HResult>;

    // ===== Immediate context =====

    fn ia_set_vertex_buffer(&mut self, buffer: Option<&Self::Buffer>, stride: u32);
    /// 32-bit indices
    fn ia_set_index_buffer(&mut self, buffer: Option<&Self::Buffer>);
    fn ia_set_input_layout(&mut self, layout: Option<&Self::InputLayout>);
    fn ia_set_primitive_topology(&mut self, topology: Topology);

    fn vs_set_shader(&mut self, shader: Option<&Self::VertexShader>);
    fn ps_set_shader(&mut self, shader: Option<&Self::PixelShader>);
    /// Bind slot b0 of the vertex stage
    fn vs_set_constant_buffer(&mut self, buffer: Option<&Self::Buffer>);
    /// Bind slot b0 of the pixel stage
    fn ps_set_constant_buffer(&mut self, buffer: Option<&Self::Buffer>);
    fn ps_set_shader_resource(&mut self, slot: u32, view: Option<&Self::ShaderResourceView>);

    fn rs_set_state(&mut self, state: &Self::RasterizerState);
    fn rs_set_viewport(&mut self, viewport: Viewport);
    fn rs_set_scissor_rect(&mut self, rect: Rect2D);
    fn om_set_depth_stencil_state(&mut self, state: &Self::DepthStencilState);
    fn om_set_blend_state(&mut self, state: &Self::BlendState);
    fn om_set_render_targets(&mut self, target: Option<&Self::RenderTargetView>, depth: Option<&Self::DepthStencilView>);

    fn clear_render_target_view(&mut self, view: &Self::RenderTargetView, color: [f32; 4]);
    fn clear_depth_stencil_view(&mut self, view: &Self::DepthStencilView, clear_depth: bool, clear_stencil: bool);

    /// Map a DYNAMIC buffer, copy `data` to `offset`, unmap
    fn map_write(&mut self, buffer: &Self::Buffer, map_type: MapType, offset: usize, data: &[u8]) -> Result<(), HResult>;
    /// Replace a whole DEFAULT buffer
    fn update_subresource(&mut self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), HResult>;
    /// Replace one whole mip level; `row_pitch` is the byte size of one row
    fn update_texture_subresource(&mut self, texture: &Self::Texture, mip: u32, row_pitch: u32, data: &[u8]) -> Result<(), HResult>;

    fn draw(&mut self, vertex_count: u32, start_vertex: u32);
    fn draw_indexed(&mut self, index_count: u32, start_index: u32);

    /// Unbind everything (`ClearState`)
    fn clear_state(&mut self);

    // ===== Swap chain =====

    /// Render target view of the current back buffer (GetBuffer(0))
    fn back_buffer_view(&mut self) -> Result<Self::RenderTargetView, HResult>;
    /// Fails while any view of the back buffer is still alive
    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), HResult>;
    fn present(&mut self, sync_interval: u32) -> Result<(), HResult>;
    fn back_buffer_size(&self) -> (u32, u32);
}
