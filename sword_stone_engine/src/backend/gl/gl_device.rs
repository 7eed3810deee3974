//! The slice of OpenGL the renderer uses
//!
//! Entry points mirror their `gl*` counterparts in snake case and follow GL's
//! error model: a failing call records an error and changes no state, and
//! `get_error` returns and clears the first recorded error. Object names are
//! plain `GLuint`s; 0 is the default object.

use crate::renderer::{ClearFlags, NativeWindow, Rect2D, RendererConfig, ShaderStage, TextureFormat, UniformType, Viewport};

pub type GLuint = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlError {
    NoError,
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    OutOfMemory,
    /// Any code outside the core set (GL_INVALID_FRAMEBUFFER_OPERATION, ...)
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageHint {
    StaticDraw,
    DynamicDraw,
    StreamDraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DepthTest,
    Blend,
    CullFace,
    ScissorTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    Fill,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    One,
    Zero,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

/// One entry of glGetActiveUniform, with its location resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Name without the `[0]` suffix GL reports for arrays
    pub name: String,
    pub ty: UniformType,
    pub array_len: u32,
    pub location: i32,
}

/// An OpenGL 3.3 core context bound to one window
///
/// The context is current on the thread that created it; every call must be
/// made from that thread.
pub trait GlDevice: Sized + Send {
    /// Create a context on `window` and make it current
    fn create(window: &NativeWindow, width: u32, height: u32, config: &RendererConfig) -> Result<Self, String>;

    /// `GL_VERSION` / `GL_RENDERER` summary for logs
    fn describe(&self) -> String;

    fn get_error(&mut self) -> GlError;

    // ===== Buffers =====

    fn gen_buffer(&mut self) -> Result<GLuint, String>;
    fn delete_buffer(&mut self, name: GLuint);
    fn bind_buffer(&mut self, target: BufferTarget, name: GLuint);
    /// (Re)allocate the store of the buffer bound to `target`
    fn buffer_data(&mut self, target: BufferTarget, size: usize, data: Option<&[u8]>, usage: UsageHint);
    fn buffer_sub_data(&mut self, target: BufferTarget, offset: usize, data: &[u8]);

    // ===== Textures =====

    fn gen_texture(&mut self) -> Result<GLuint, String>;
    fn delete_texture(&mut self, name: GLuint);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture_2d(&mut self, name: GLuint);
    /// Allocate immutable storage for `levels` mips on the bound texture
    fn tex_storage_2d(&mut self, levels: u32, format: TextureFormat, width: u32, height: u32);
    /// Replace a whole mip level of the bound texture
    fn tex_sub_image_2d(&mut self, level: u32, width: u32, height: u32, format: TextureFormat, data: &[u8]);

    // ===== Shaders and programs =====

    fn create_shader(&mut self, stage: ShaderStage) -> Result<GLuint, String>;
    fn shader_source(&mut self, shader: GLuint, source: &str);
    fn compile_shader(&mut self, shader: GLuint);
    fn get_shader_compile_status(&self, shader: GLuint) -> bool;
    fn get_shader_info_log(&self, shader: GLuint) -> String;
    fn delete_shader(&mut self, shader: GLuint);

    fn create_program(&mut self) -> Result<GLuint, String>;
    fn attach_shader(&mut self, program: GLuint, shader: GLuint);
    fn link_program(&mut self, program: GLuint);
    fn get_program_link_status(&self, program: GLuint) -> bool;
    fn get_program_info_log(&self, program: GLuint) -> String;
    fn delete_program(&mut self, program: GLuint);
    fn use_program(&mut self, program: GLuint);

    /// Active uniforms of a linked program, samplers included
    fn active_uniforms(&self, program: GLuint) -> Vec<ActiveUniform>;

    /// glUniform* / glUniformMatrix* on the current program
    ///
    /// `data` holds `count` tightly packed elements of `ty`.
    fn uniform(&mut self, location: i32, ty: UniformType, count: u32, data: &[u8]);

    // ===== Vertex arrays =====

    fn gen_vertex_array(&mut self) -> Result<GLuint, String>;
    fn bind_vertex_array(&mut self, name: GLuint);
    fn delete_vertex_array(&mut self, name: GLuint);
    fn enable_vertex_attrib_array(&mut self, index: u32);
    /// Source float attribute `index` from the buffer bound to ARRAY_BUFFER
    fn vertex_attrib_pointer(&mut self, index: u32, components: u32, stride: u32, offset: u32);

    // ===== Fixed-function state =====

    fn enable(&mut self, cap: Capability);
    fn disable(&mut self, cap: Capability);
    fn blend_func(&mut self, src: BlendFactor, dst: BlendFactor);
    fn polygon_mode(&mut self, mode: PolygonMode);
    fn viewport(&mut self, viewport: Viewport);
    fn scissor(&mut self, rect: Rect2D);
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    fn clear_depth(&mut self, depth: f32);
    fn clear(&mut self, mask: ClearFlags);

    // ===== Draw =====

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32);
    /// Draw `count` 32-bit indices from the bound ELEMENT_ARRAY_BUFFER
    fn draw_elements(&mut self, mode: DrawMode, count: u32);

    // ===== Default framebuffer =====

    fn set_swap_interval(&mut self, vsync: bool) -> Result<(), String>;
    fn swap_buffers(&mut self) -> Result<(), String>;
    /// Track a window resize (the default framebuffer follows the window)
    fn resize_surface(&mut self, width: u32, height: u32);
    fn framebuffer_size(&self) -> (u32, u32);
}
