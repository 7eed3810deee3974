//! Plain data types shared by every backend: vertex layout, enums, rectangles
//! and the fixed-function toggle set.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};
use std::mem::offset_of;

// ============================================================================
// Vertex
// ============================================================================

/// Interleaved vertex: position, normal, texcoord, color (12 floats, 48 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
    pub color: [f32; 4],
}

/// One attribute of the vertex layout, at a fixed shader location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    /// HLSL semantic name (`POSITION`, `NORMAL`, `TEXCOORD`, `COLOR`)
    pub semantic: &'static str,
    /// Number of f32 components
    pub components: u32,
    /// Byte offset inside the vertex
    pub offset: u32,
}

impl Vertex {
    /// Byte stride of one vertex
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    /// Attribute layout: location 0..3 = position, normal, texcoord, color
    pub const ATTRIBUTES: [VertexAttribute; 4] = [
        VertexAttribute { location: 0, semantic: "POSITION", components: 3, offset: offset_of!(Vertex, position) as u32 },
        VertexAttribute { location: 1, semantic: "NORMAL", components: 3, offset: offset_of!(Vertex, normal) as u32 },
        VertexAttribute { location: 2, semantic: "TEXCOORD", components: 2, offset: offset_of!(Vertex, tex_coord) as u32 },
        VertexAttribute { location: 3, semantic: "COLOR", components: 4, offset: offset_of!(Vertex, color) as u32 },
    ];

    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tex_coord: tex_coord.to_array(),
            color: color.to_array(),
        }
    }

    /// Vertex with only a position and a color (normal +Z, texcoord 0)
    pub fn colored(position: Vec3, color: Vec4) -> Self {
        Self::new(position, Vec3::Z, Vec2::ZERO, color)
    }

    /// Reinterpret a vertex slice as bytes for `create_vertex_buffer`
    pub fn slice_as_bytes(vertices: &[Vertex]) -> &[u8] {
        bytemuck::cast_slice(vertices)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

impl PrimitiveTopology {
    /// Triangles contributed to the stats by an indexed draw
    ///
    /// Only triangle lists are counted, matching the historic accounting.
    pub fn counted_triangles(self, index_count: u32) -> u64 {
        match self {
            PrimitiveTopology::TriangleList => (index_count / 3) as u64,
            _ => 0,
        }
    }
}

/// Buffer update frequency hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once at creation
    Static,
    /// Updated occasionally by the CPU
    Dynamic,
    /// Rewritten every frame
    Stream,
}

impl BufferUsage {
    /// True if the CPU may write the buffer after creation on backends that enforce usage
    pub fn is_cpu_writable(self) -> bool {
        !matches!(self, BufferUsage::Static)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgb8,
    Rgba16F,
    Rgba32F,
    Depth24Stencil8,
    Depth32F,
}

impl TextureFormat {
    /// Bytes per pixel of the client-side data for this format
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba16F => 8,
            TextureFormat::Rgba32F => 16,
            TextureFormat::Depth24Stencil8 => 4,
            TextureFormat::Depth32F => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth24Stencil8 | TextureFormat::Depth32F)
    }

    /// Byte size of a tightly packed `width x height` image
    pub fn image_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel() as usize
    }
}

/// Number of levels in a full mip chain for a `width x height` texture
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    32 - largest.leading_zeros()
}

/// Extent of mip `level` (never below 1x1)
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let w = width.checked_shr(level).unwrap_or(0).max(1);
    let h = height.checked_shr(level).unwrap_or(0).max(1);
    (w, h)
}

/// Expand tightly packed RGB8 pixels to RGBA8 with opaque alpha
pub fn expand_rgb8_to_rgba8(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for pixel in rgb.chunks_exact(3) {
        rgba.extend_from_slice(pixel);
        rgba.push(u8::MAX);
    }
    rgba
}

bitflags! {
    /// Which attachments `clear` touches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1;
        const DEPTH = 2;
        const STENCIL = 4;
        const ALL = Self::COLOR.bits() | Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

// ============================================================================
// Rectangles
// ============================================================================

/// Viewport rectangle in pixels (origin top-left for D3D, bottom-left for GL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Viewport covering a whole `width x height` back buffer
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// 2D rectangle (scissor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

// ============================================================================
// Fixed-function state
// ============================================================================

/// Depth/blend/cull/fill toggles
///
/// Every backend starts with depth test and back-face culling on, blending
/// off and solid fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedFunctionState {
    pub depth_test: bool,
    pub blending: bool,
    pub culling: bool,
    pub wireframe: bool,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            depth_test: true,
            blending: false,
            culling: true,
            wireframe: false,
        }
    }
}

/// Default clear color of every backend
pub const DEFAULT_CLEAR_COLOR: Vec4 = Vec4::new(0.2, 0.3, 0.4, 1.0);

/// Number of texture slots `bind_texture` accepts
pub const MAX_TEXTURE_SLOTS: u32 = 8;

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
