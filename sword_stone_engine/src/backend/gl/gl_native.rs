//! OpenGL through `glow`, with the context created by `glutin`
//!
//! glutin picks the platform binding (WGL on Windows, CGL on macOS, EGL
//! elsewhere), creates a 3.3 core context for the window and makes it
//! current; glow loads the entry points from that display.

use glow::HasContext;
use glutin::config::{ConfigTemplateBuilder, GlConfig};
use glutin::context::{ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, PossiblyCurrentContext, Version};
use glutin::display::{Display, DisplayApiPreference, GlDisplay};
use glutin::surface::{GlSurface, Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use std::num::NonZeroU32;

use super::gl_device::{
    ActiveUniform, BlendFactor, BufferTarget, Capability, DrawMode, GLuint, GlDevice, GlError, PolygonMode, UsageHint,
};
use crate::renderer::{ClearFlags, NativeWindow, Rect2D, RendererConfig, ShaderStage, TextureFormat, UniformType, Viewport};

/// A current GL context, its window surface and the loaded entry points
pub struct NativeGl {
    gl: glow::Context,
    surface: Surface<WindowSurface>,
    context: PossiblyCurrentContext,
    _display: Display,
    size: (u32, u32),
}

// SAFETY: the context is made current on the creating thread and the renderer
// contract requires every call to come from one thread. Moving the renderer
// between threads behind the engine mutex does not issue GL calls.
unsafe impl Send for NativeGl {}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

fn buffer(name: GLuint) -> Option<glow::NativeBuffer> {
    NonZeroU32::new(name).map(glow::NativeBuffer)
}

fn texture(name: GLuint) -> Option<glow::NativeTexture> {
    NonZeroU32::new(name).map(glow::NativeTexture)
}

fn shader(name: GLuint) -> Option<glow::NativeShader> {
    NonZeroU32::new(name).map(glow::NativeShader)
}

fn program(name: GLuint) -> Option<glow::NativeProgram> {
    NonZeroU32::new(name).map(glow::NativeProgram)
}

fn vertex_array(name: GLuint) -> Option<glow::NativeVertexArray> {
    NonZeroU32::new(name).map(glow::NativeVertexArray)
}

fn target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
    }
}

fn usage(usage: UsageHint) -> u32 {
    match usage {
        UsageHint::StaticDraw => glow::STATIC_DRAW,
        UsageHint::DynamicDraw => glow::DYNAMIC_DRAW,
        UsageHint::StreamDraw => glow::STREAM_DRAW,
    }
}

fn capability(cap: Capability) -> u32 {
    match cap {
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::Blend => glow::BLEND,
        Capability::CullFace => glow::CULL_FACE,
        Capability::ScissorTest => glow::SCISSOR_TEST,
    }
}

fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::One => glow::ONE,
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
    }
}

fn draw_mode(mode: DrawMode) -> u32 {
    match mode {
        DrawMode::Triangles => glow::TRIANGLES,
        DrawMode::TriangleStrip => glow::TRIANGLE_STRIP,
        DrawMode::Lines => glow::LINES,
        DrawMode::Points => glow::POINTS,
    }
}

/// (internal format, pixel format, pixel type)
fn texture_format(format: TextureFormat) -> (u32, u32, u32) {
    match format {
        TextureFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgb8 => (glow::RGB8, glow::RGB, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16F => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        TextureFormat::Rgba32F => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        TextureFormat::Depth24Stencil8 => (glow::DEPTH24_STENCIL8, glow::DEPTH_STENCIL, glow::UNSIGNED_INT_24_8),
        TextureFormat::Depth32F => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
    }
}

fn uniform_type(gl_type: u32) -> Option<UniformType> {
    Some(match gl_type {
        glow::FLOAT => UniformType::Float,
        glow::FLOAT_VEC2 => UniformType::Vec2,
        glow::FLOAT_VEC3 => UniformType::Vec3,
        glow::FLOAT_VEC4 => UniformType::Vec4,
        glow::FLOAT_MAT3 => UniformType::Mat3,
        glow::FLOAT_MAT4 => UniformType::Mat4,
        glow::INT => UniformType::Int,
        glow::UNSIGNED_INT => UniformType::UInt,
        glow::BOOL => UniformType::Bool,
        glow::SAMPLER_2D => UniformType::Sampler2D,
        _ => return None,
    })
}

fn floats(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn ints(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn uints(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn display_preference(window: &NativeWindow) -> DisplayApiPreference {
    #[cfg(windows)]
    {
        DisplayApiPreference::Wgl(Some(window.window))
    }
    #[cfg(target_os = "macos")]
    {
        let _ = window;
        DisplayApiPreference::Cgl
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        let _ = window;
        DisplayApiPreference::Egl
    }
}

impl GlDevice for NativeGl {
    fn create(window: &NativeWindow, width: u32, height: u32, config: &RendererConfig) -> Result<Self, String> {
        let raw_display = window
            .display
            .ok_or_else(|| format!("no display connection for {:?}", window.window))?;
        let raw_window = window.window;

        // SAFETY: the caller guarantees both handles stay valid for the
        // lifetime of the renderer.
        let display = unsafe { Display::new(raw_display, display_preference(window)) }
            .map_err(|e| format!("display: {}", e))?;

        let template = ConfigTemplateBuilder::new()
            .with_alpha_size(8)
            .with_depth_size(24)
            .with_stencil_size(8)
            .compatible_with_native_window(raw_window)
            .build();
        let gl_config = unsafe { display.find_configs(template) }
            .map_err(|e| format!("no pixel format: {}", e))?
            .next()
            .ok_or_else(|| "no pixel format matches the window".to_string())?;

        let attributes = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .with_profile(GlProfile::Core)
            .with_debug(config.enable_validation)
            .build(Some(raw_window));
        let not_current = unsafe { display.create_context(&gl_config, &attributes) }
            .map_err(|e| format!("context: {}", e))?;

        let surface_attributes =
            SurfaceAttributesBuilder::<WindowSurface>::new().build(raw_window, non_zero(width), non_zero(height));
        let surface = unsafe { display.create_window_surface(&gl_config, &surface_attributes) }
            .map_err(|e| format!("window surface: {}", e))?;
        let context = not_current
            .make_current(&surface)
            .map_err(|e| format!("make current: {}", e))?;

        let gl = unsafe { glow::Context::from_loader_function_cstr(|name| display.get_proc_address(name)) };
        unsafe {
            // Tightly packed RGB8 rows are not 4-byte aligned
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        }

        Ok(Self {
            gl,
            surface,
            context,
            _display: display,
            size: (width, height),
        })
    }

    fn describe(&self) -> String {
        unsafe {
            format!(
                "{} ({})",
                self.gl.get_parameter_string(glow::VERSION),
                self.gl.get_parameter_string(glow::RENDERER)
            )
        }
    }

    fn get_error(&mut self) -> GlError {
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => GlError::NoError,
            glow::INVALID_ENUM => GlError::InvalidEnum,
            glow::INVALID_VALUE => GlError::InvalidValue,
            glow::INVALID_OPERATION => GlError::InvalidOperation,
            glow::OUT_OF_MEMORY => GlError::OutOfMemory,
            other => GlError::Other(other),
        }
    }

    // ===== Buffers =====

    fn gen_buffer(&mut self) -> Result<GLuint, String> {
        unsafe { self.gl.create_buffer() }.map(|b| b.0.get())
    }

    fn delete_buffer(&mut self, name: GLuint) {
        if let Some(b) = buffer(name) {
            unsafe { self.gl.delete_buffer(b) }
        }
    }

    fn bind_buffer(&mut self, bind_target: BufferTarget, name: GLuint) {
        unsafe { self.gl.bind_buffer(target(bind_target), buffer(name)) }
    }

    fn buffer_data(&mut self, bind_target: BufferTarget, size: usize, data: Option<&[u8]>, hint: UsageHint) {
        unsafe {
            match data {
                Some(data) => self.gl.buffer_data_u8_slice(target(bind_target), &data[..size.min(data.len())], usage(hint)),
                None => self.gl.buffer_data_size(target(bind_target), size as i32, usage(hint)),
            }
        }
    }

    fn buffer_sub_data(&mut self, bind_target: BufferTarget, offset: usize, data: &[u8]) {
        unsafe { self.gl.buffer_sub_data_u8_slice(target(bind_target), offset as i32, data) }
    }

    // ===== Textures =====

    fn gen_texture(&mut self) -> Result<GLuint, String> {
        unsafe { self.gl.create_texture() }.map(|t| t.0.get())
    }

    fn delete_texture(&mut self, name: GLuint) {
        if let Some(t) = texture(name) {
            unsafe { self.gl.delete_texture(t) }
        }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn bind_texture_2d(&mut self, name: GLuint) {
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, texture(name)) }
    }

    fn tex_storage_2d(&mut self, levels: u32, format: TextureFormat, width: u32, height: u32) {
        let (internal, _, _) = texture_format(format);
        unsafe {
            self.gl
                .tex_storage_2d(glow::TEXTURE_2D, levels as i32, internal, width as i32, height as i32);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR_MIPMAP_LINEAR as i32);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        }
    }

    fn tex_sub_image_2d(&mut self, level: u32, width: u32, height: u32, format: TextureFormat, data: &[u8]) {
        let (_, pixel_format, pixel_type) = texture_format(format);
        unsafe {
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                level as i32,
                0,
                0,
                width as i32,
                height as i32,
                pixel_format,
                pixel_type,
                glow::PixelUnpackData::Slice(data),
            );
        }
    }

    // ===== Shaders and programs =====

    fn create_shader(&mut self, stage: ShaderStage) -> Result<GLuint, String> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        unsafe { self.gl.create_shader(kind) }.map(|s| s.0.get())
    }

    fn shader_source(&mut self, name: GLuint, source: &str) {
        if let Some(s) = shader(name) {
            unsafe { self.gl.shader_source(s, source) }
        }
    }

    fn compile_shader(&mut self, name: GLuint) {
        if let Some(s) = shader(name) {
            unsafe { self.gl.compile_shader(s) }
        }
    }

    fn get_shader_compile_status(&self, name: GLuint) -> bool {
        shader(name).is_some_and(|s| unsafe { self.gl.get_shader_compile_status(s) })
    }

    fn get_shader_info_log(&self, name: GLuint) -> String {
        shader(name)
            .map(|s| unsafe { self.gl.get_shader_info_log(s) })
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, name: GLuint) {
        if let Some(s) = shader(name) {
            unsafe { self.gl.delete_shader(s) }
        }
    }

    fn create_program(&mut self) -> Result<GLuint, String> {
        unsafe { self.gl.create_program() }.map(|p| p.0.get())
    }

    fn attach_shader(&mut self, name: GLuint, shader_name: GLuint) {
        if let (Some(p), Some(s)) = (program(name), shader(shader_name)) {
            unsafe { self.gl.attach_shader(p, s) }
        }
    }

    fn link_program(&mut self, name: GLuint) {
        if let Some(p) = program(name) {
            unsafe { self.gl.link_program(p) }
        }
    }

    fn get_program_link_status(&self, name: GLuint) -> bool {
        program(name).is_some_and(|p| unsafe { self.gl.get_program_link_status(p) })
    }

    fn get_program_info_log(&self, name: GLuint) -> String {
        program(name)
            .map(|p| unsafe { self.gl.get_program_info_log(p) })
            .unwrap_or_default()
    }

    fn delete_program(&mut self, name: GLuint) {
        if let Some(p) = program(name) {
            unsafe { self.gl.delete_program(p) }
        }
    }

    fn use_program(&mut self, name: GLuint) {
        unsafe { self.gl.use_program(program(name)) }
    }

    fn active_uniforms(&self, name: GLuint) -> Vec<ActiveUniform> {
        let Some(p) = program(name) else {
            return Vec::new();
        };
        let count = unsafe { self.gl.get_active_uniforms(p) };
        let mut uniforms = Vec::with_capacity(count as usize);
        for index in 0..count {
            let Some(active) = (unsafe { self.gl.get_active_uniform(p, index) }) else {
                continue;
            };
            // Uniforms inside named blocks have no location and are skipped
            let Some(location) = (unsafe { self.gl.get_uniform_location(p, &active.name) }) else {
                continue;
            };
            let Some(ty) = uniform_type(active.utype) else {
                continue;
            };
            let name = active.name.strip_suffix("[0]").unwrap_or(&active.name).to_string();
            uniforms.push(ActiveUniform {
                name,
                ty,
                array_len: active.size.max(1) as u32,
                location: location.0 as i32,
            });
        }
        uniforms
    }

    fn uniform(&mut self, location: i32, ty: UniformType, _count: u32, data: &[u8]) {
        if location < 0 {
            return;
        }
        let location = glow::NativeUniformLocation(location as u32);
        let at = Some(&location);
        unsafe {
            match ty {
                UniformType::Float => self.gl.uniform_1_f32_slice(at, &floats(data)),
                UniformType::Vec2 => self.gl.uniform_2_f32_slice(at, &floats(data)),
                UniformType::Vec3 => self.gl.uniform_3_f32_slice(at, &floats(data)),
                UniformType::Vec4 => self.gl.uniform_4_f32_slice(at, &floats(data)),
                UniformType::Mat3 => self.gl.uniform_matrix_3_f32_slice(at, false, &floats(data)),
                UniformType::Mat4 => self.gl.uniform_matrix_4_f32_slice(at, false, &floats(data)),
                UniformType::Int | UniformType::Bool | UniformType::Sampler2D => {
                    self.gl.uniform_1_i32_slice(at, &ints(data))
                }
                UniformType::UInt => self.gl.uniform_1_u32_slice(at, &uints(data)),
            }
        }
    }

    // ===== Vertex arrays =====

    fn gen_vertex_array(&mut self) -> Result<GLuint, String> {
        unsafe { self.gl.create_vertex_array() }.map(|v| v.0.get())
    }

    fn bind_vertex_array(&mut self, name: GLuint) {
        unsafe { self.gl.bind_vertex_array(vertex_array(name)) }
    }

    fn delete_vertex_array(&mut self, name: GLuint) {
        if let Some(v) = vertex_array(name) {
            unsafe { self.gl.delete_vertex_array(v) }
        }
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) }
    }

    fn vertex_attrib_pointer(&mut self, index: u32, components: u32, stride: u32, offset: u32) {
        unsafe {
            self.gl
                .vertex_attrib_pointer_f32(index, components as i32, glow::FLOAT, false, stride as i32, offset as i32)
        }
    }

    // ===== Fixed-function state =====

    fn enable(&mut self, cap: Capability) {
        unsafe { self.gl.enable(capability(cap)) }
    }

    fn disable(&mut self, cap: Capability) {
        unsafe { self.gl.disable(capability(cap)) }
    }

    fn blend_func(&mut self, src: BlendFactor, dst: BlendFactor) {
        unsafe { self.gl.blend_func(blend_factor(src), blend_factor(dst)) }
    }

    fn polygon_mode(&mut self, mode: PolygonMode) {
        let mode = match mode {
            PolygonMode::Fill => glow::FILL,
            PolygonMode::Line => glow::LINE,
        };
        unsafe { self.gl.polygon_mode(glow::FRONT_AND_BACK, mode) }
    }

    fn viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.gl
                .viewport(viewport.x, viewport.y, viewport.width as i32, viewport.height as i32)
        }
    }

    fn scissor(&mut self, rect: Rect2D) {
        unsafe { self.gl.scissor(rect.x, rect.y, rect.width as i32, rect.height as i32) }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        unsafe { self.gl.clear_color(r, g, b, a) }
    }

    fn clear_depth(&mut self, depth: f32) {
        unsafe { self.gl.clear_depth_f32(depth) }
    }

    fn clear(&mut self, mask: ClearFlags) {
        let mut bits = 0;
        if mask.contains(ClearFlags::COLOR) {
            bits |= glow::COLOR_BUFFER_BIT;
        }
        if mask.contains(ClearFlags::DEPTH) {
            bits |= glow::DEPTH_BUFFER_BIT;
        }
        if mask.contains(ClearFlags::STENCIL) {
            bits |= glow::STENCIL_BUFFER_BIT;
        }
        if bits != 0 {
            unsafe { self.gl.clear(bits) }
        }
    }

    // ===== Draw =====

    fn draw_arrays(&mut self, mode: DrawMode, first: u32, count: u32) {
        unsafe { self.gl.draw_arrays(draw_mode(mode), first as i32, count as i32) }
    }

    fn draw_elements(&mut self, mode: DrawMode, count: u32) {
        unsafe { self.gl.draw_elements(draw_mode(mode), count as i32, glow::UNSIGNED_INT, 0) }
    }

    // ===== Default framebuffer =====

    fn set_swap_interval(&mut self, vsync: bool) -> Result<(), String> {
        let interval = if vsync {
            SwapInterval::Wait(NonZeroU32::MIN)
        } else {
            SwapInterval::DontWait
        };
        self.surface
            .set_swap_interval(&self.context, interval)
            .map_err(|e| e.to_string())
    }

    fn swap_buffers(&mut self) -> Result<(), String> {
        self.surface.swap_buffers(&self.context).map_err(|e| e.to_string())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface.resize(&self.context, non_zero(width), non_zero(height));
        self.size = (width, height);
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }
}
