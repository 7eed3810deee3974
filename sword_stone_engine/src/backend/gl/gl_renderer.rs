/// GlRenderer - OpenGL implementation of the Renderer trait
///
/// Immediate-mode state machine: every operation binds what it needs and then
/// acts on the bind point. There is no frame synchronization; `present` is a
/// blocking buffer swap and deletion is immediate.

use glam::Vec4;
use raw_window_handle::RawWindowHandle;
use rustc_hash::FxHashMap;

use super::gl_device::{
    ActiveUniform, BlendFactor, BufferTarget, Capability, DrawMode, GLuint, GlDevice, GlError, PolygonMode, UsageHint,
};
use crate::backend::surface::Surface;
use crate::renderer::{
    mip_extent, mip_level_count, BufferUsage, ClearFlags, FixedFunctionState, Handle, HandleAllocator, NativeWindow,
    PrimitiveTopology, Rect2D, RenderApi, RenderStats, Renderer, RendererConfig, ResourceRegistry, ShaderStage,
    TextureFormat, UniformType, Vertex, Viewport, DEFAULT_CLEAR_COLOR, MAX_TEXTURE_SLOTS,
};
use crate::{engine_debug, engine_error, engine_info, engine_trace, engine_warn};

const SOURCE: &str = "stone::gl";

struct GlBuffer {
    name: GLuint,
    size: usize,
}

struct GlTexture {
    name: GLuint,
    width: u32,
    height: u32,
    format: TextureFormat,
    mip_levels: u32,
}

struct GlProgram {
    name: GLuint,
    uniforms: FxHashMap<String, ActiveUniform>,
}

/// Everything that only exists between `initialize` and `shutdown`
struct GlState<G> {
    gl: G,
    vao: GLuint,
    viewport: Viewport,
    buffers: ResourceRegistry<GlBuffer>,
    textures: ResourceRegistry<GlTexture>,
    programs: ResourceRegistry<GlProgram>,
    current_program: Handle,
}

/// OpenGL renderer over a [`GlDevice`]
pub struct GlRenderer<G: GlDevice> {
    config: RendererConfig,
    device: Option<GlState<G>>,
    handles: HandleAllocator,
    stats: RenderStats,
    clear_color: Vec4,
    fixed: FixedFunctionState,
    last_shader_error: Option<String>,
}

impl<G: GlDevice> GlRenderer<G> {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            device: None,
            handles: HandleAllocator::new(),
            stats: RenderStats::default(),
            clear_color: DEFAULT_CLEAR_COLOR,
            fixed: FixedFunctionState::default(),
            last_shader_error: None,
        }
    }

    /// The live context, `None` before `initialize`
    pub fn device(&self) -> Option<&G> {
        self.device.as_ref().map(|d| &d.gl)
    }

    fn convert_usage(usage: BufferUsage) -> UsageHint {
        match usage {
            BufferUsage::Static => UsageHint::StaticDraw,
            BufferUsage::Dynamic => UsageHint::DynamicDraw,
            BufferUsage::Stream => UsageHint::StreamDraw,
        }
    }

    fn convert_topology(topology: PrimitiveTopology) -> DrawMode {
        match topology {
            PrimitiveTopology::TriangleList => DrawMode::Triangles,
            PrimitiveTopology::TriangleStrip => DrawMode::TriangleStrip,
            PrimitiveTopology::LineList => DrawMode::Lines,
            PrimitiveTopology::PointList => DrawMode::Points,
        }
    }

    /// Point the four fixed attributes at the buffer bound to ARRAY_BUFFER
    fn setup_vertex_attributes(gl: &mut G) {
        for attribute in Vertex::ATTRIBUTES.iter() {
            gl.vertex_attrib_pointer(attribute.location, attribute.components, Vertex::STRIDE, attribute.offset);
            gl.enable_vertex_attrib_array(attribute.location);
        }
    }

    fn apply_fixed_function(gl: &mut G, fixed: FixedFunctionState) {
        let toggle = |gl: &mut G, cap: Capability, on: bool| {
            if on {
                gl.enable(cap);
            } else {
                gl.disable(cap);
            }
        };
        toggle(gl, Capability::DepthTest, fixed.depth_test);
        toggle(gl, Capability::Blend, fixed.blending);
        if fixed.blending {
            gl.blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        }
        toggle(gl, Capability::CullFace, fixed.culling);
        gl.polygon_mode(if fixed.wireframe { PolygonMode::Line } else { PolygonMode::Fill });
    }

    /// Drain the error flag after a call that can fail; logs when validation is on
    fn check_error(validation: bool, gl: &mut G, operation: &str) -> bool {
        match gl.get_error() {
            GlError::NoError => true,
            error => {
                if validation {
                    engine_warn!(SOURCE, "{} raised {:?}", operation, error);
                }
                false
            }
        }
    }

    fn create_buffer(&mut self, target: BufferTarget, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle {
        let Some(device) = self.device.as_mut() else {
            return Handle::NULL;
        };
        if size == 0 {
            engine_warn!(SOURCE, "Refusing to create a zero-size buffer");
            return Handle::NULL;
        }
        if matches!(data, Some(d) if d.len() < size) {
            engine_warn!(SOURCE, "Buffer data is shorter than the requested size ({} bytes)", size);
            return Handle::NULL;
        }
        if size as u64 > self.config.limits.max_buffer_size {
            engine_error!(SOURCE, "Buffer of {} bytes exceeds the {} byte limit", size, self.config.limits.max_buffer_size);
            return Handle::NULL;
        }

        let gl = &mut device.gl;
        let name = match gl.gen_buffer() {
            Ok(name) => name,
            Err(e) => {
                engine_error!(SOURCE, "glGenBuffers failed: {}", e);
                return Handle::NULL;
            }
        };
        gl.bind_buffer(target, name);
        gl.buffer_data(target, size, data, Self::convert_usage(usage));
        let error = gl.get_error();
        if error != GlError::NoError {
            gl.delete_buffer(name);
            engine_error!(SOURCE, "glBufferData({} bytes) failed: {:?}", size, error);
            return Handle::NULL;
        }

        let handle = device.buffers.insert(&mut self.handles, GlBuffer { name, size });
        if handle.is_null() {
            device.gl.delete_buffer(name);
            engine_error!(SOURCE, "Handle space exhausted");
            return Handle::NULL;
        }
        engine_trace!(SOURCE, "Created buffer {} ({} bytes, {:?})", handle, size, usage);
        handle
    }
}

impl<G: GlDevice> Renderer for GlRenderer<G> {
    fn initialize(&mut self, window: RawWindowHandle, width: u32, height: u32) -> bool {
        self.initialize_window(&NativeWindow::from(window), width, height)
    }

    fn initialize_window(&mut self, window: &NativeWindow, width: u32, height: u32) -> bool {
        if self.device.is_some() {
            engine_warn!(SOURCE, "initialize called twice; keeping the existing context");
            return true;
        }

        let surface = Surface::from_raw(window.window);
        let mut gl = match G::create(window, width, height, &self.config) {
            Ok(gl) => gl,
            Err(e) => {
                engine_error!(SOURCE, "Failed to create GL context on {}: {}", surface, e);
                return false;
            }
        };

        let vao = match gl.gen_vertex_array() {
            Ok(vao) => vao,
            Err(e) => {
                engine_error!(SOURCE, "glGenVertexArrays failed: {}", e);
                return false;
            }
        };
        gl.bind_vertex_array(vao);
        self.fixed = FixedFunctionState::default();
        Self::apply_fixed_function(&mut gl, self.fixed);
        let viewport = Viewport::full(width, height);
        gl.viewport(viewport);
        gl.enable(Capability::ScissorTest);
        gl.scissor(Rect2D::new(0, 0, width, height));
        if let Err(e) = gl.set_swap_interval(self.config.vsync) {
            engine_warn!(SOURCE, "Could not set the swap interval: {}", e);
        }

        engine_info!(
            SOURCE,
            "OpenGL renderer initialized on {} ({}x{}) for '{}': {}",
            surface, width, height, self.config.app_name, gl.describe()
        );

        self.device = Some(GlState {
            gl,
            vao,
            viewport,
            buffers: ResourceRegistry::new(),
            textures: ResourceRegistry::new(),
            programs: ResourceRegistry::new(),
            current_program: Handle::NULL,
        });
        true
    }

    fn shutdown(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        let gl = &mut device.gl;
        gl.use_program(0);
        for (_, program) in device.programs.drain() {
            gl.delete_program(program.name);
        }
        for (_, texture) in device.textures.drain() {
            gl.delete_texture(texture.name);
        }
        for (_, buffer) in device.buffers.drain() {
            gl.delete_buffer(buffer.name);
        }
        gl.delete_vertex_array(device.vao);
        engine_info!(SOURCE, "OpenGL renderer shut down");
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if width == 0 || height == 0 {
            engine_debug!(SOURCE, "Ignoring resize to {}x{}", width, height);
            return;
        }
        device.gl.resize_surface(width, height);
        device.viewport = Viewport::full(width, height);
        device.gl.viewport(device.viewport);
        device.gl.scissor(Rect2D::new(0, 0, width, height));
        engine_debug!(SOURCE, "Resized to {}x{}", width, height);
    }

    fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    fn begin_frame(&mut self) {
        self.stats = RenderStats::default();
    }

    fn end_frame(&mut self) {}

    fn present(&mut self) {
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.gl.swap_buffers() {
                engine_warn!(SOURCE, "Buffer swap failed: {}", e);
            }
        }
    }

    fn clear(&mut self, flags: ClearFlags, color: Vec4) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if flags.contains(ClearFlags::COLOR) {
            device.gl.clear_color(color.x, color.y, color.z, color.w);
        }
        if flags.contains(ClearFlags::DEPTH) {
            device.gl.clear_depth(1.0);
        }
        device.gl.clear(flags);
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if let Some(device) = self.device.as_mut() {
            device.viewport = viewport;
            device.gl.viewport(viewport);
        }
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        if let Some(device) = self.device.as_mut() {
            device.gl.scissor(rect);
        }
    }

    fn viewport(&self) -> Viewport {
        self.device.as_ref().map(|d| d.viewport).unwrap_or_default()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        self.device.as_ref().map(|d| d.gl.framebuffer_size()).unwrap_or((0, 0))
    }

    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle {
        self.create_buffer(BufferTarget::Array, data, size, usage)
    }

    fn create_index_buffer(&mut self, indices: Option<&[u32]>, count: usize, usage: BufferUsage) -> Handle {
        let bytes = indices.map(bytemuck::cast_slice::<u32, u8>);
        let Some(size) = count.checked_mul(4) else {
            return Handle::NULL;
        };
        self.create_buffer(BufferTarget::ElementArray, bytes, size, usage)
    }

    fn update_vertex_buffer(&mut self, buffer: Handle, data: &[u8], offset: usize) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let Some(entry) = device.buffers.get(buffer) else {
            return;
        };
        if offset.saturating_add(data.len()) > entry.size {
            engine_warn!(SOURCE, "Update of buffer {} out of range ({}+{} > {})", buffer, offset, data.len(), entry.size);
            return;
        }
        let name = entry.name;
        device.gl.bind_buffer(BufferTarget::Array, name);
        device.gl.buffer_sub_data(BufferTarget::Array, offset, data);
        Self::check_error(self.config.enable_validation, &mut device.gl, "glBufferSubData");
    }

    fn delete_buffer(&mut self, buffer: Handle) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if let Some(entry) = device.buffers.remove(buffer) {
            device.gl.delete_buffer(entry.name);
        }
    }

    fn create_texture_2d(&mut self, width: u32, height: u32, format: TextureFormat, data: Option<&[u8]>) -> Handle {
        let Some(device) = self.device.as_mut() else {
            return Handle::NULL;
        };
        let max = self.config.limits.max_texture_dimension;
        if width == 0 || height == 0 || width > max || height > max {
            engine_warn!(SOURCE, "Invalid texture size {}x{}", width, height);
            return Handle::NULL;
        }
        if let Some(data) = data {
            if data.len() != format.image_size(width, height) {
                engine_warn!(SOURCE, "Texture data is {} bytes, expected {}", data.len(), format.image_size(width, height));
                return Handle::NULL;
            }
        }

        let mip_levels = mip_level_count(width, height);
        let gl = &mut device.gl;
        let name = match gl.gen_texture() {
            Ok(name) => name,
            Err(e) => {
                engine_error!(SOURCE, "glGenTextures failed: {}", e);
                return Handle::NULL;
            }
        };
        gl.active_texture(0);
        gl.bind_texture_2d(name);
        gl.tex_storage_2d(mip_levels, format, width, height);
        if let Some(data) = data {
            gl.tex_sub_image_2d(0, width, height, format, data);
        }
        let error = gl.get_error();
        if error != GlError::NoError {
            gl.delete_texture(name);
            engine_error!(SOURCE, "glTexStorage2D({}x{} {:?}) failed: {:?}", width, height, format, error);
            return Handle::NULL;
        }

        let handle = device.textures.insert(
            &mut self.handles,
            GlTexture { name, width, height, format, mip_levels },
        );
        if handle.is_null() {
            device.gl.delete_texture(name);
        }
        handle
    }

    fn update_texture_2d(&mut self, texture: Handle, data: &[u8], mip_level: u32) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let Some(entry) = device.textures.get(texture) else {
            return;
        };
        if mip_level >= entry.mip_levels {
            engine_warn!(SOURCE, "Texture {} has no mip level {}", texture, mip_level);
            return;
        }
        let (w, h) = mip_extent(entry.width, entry.height, mip_level);
        if data.len() != entry.format.image_size(w, h) {
            engine_warn!(SOURCE, "Mip {} of texture {} needs {} bytes, got {}", mip_level, texture, entry.format.image_size(w, h), data.len());
            return;
        }
        let (name, format) = (entry.name, entry.format);
        device.gl.active_texture(0);
        device.gl.bind_texture_2d(name);
        device.gl.tex_sub_image_2d(mip_level, w, h, format, data);
        Self::check_error(self.config.enable_validation, &mut device.gl, "glTexSubImage2D");
    }

    fn delete_texture(&mut self, texture: Handle) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if let Some(entry) = device.textures.remove(texture) {
            device.gl.delete_texture(entry.name);
        }
    }

    fn bind_texture(&mut self, slot: u32, texture: Handle) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if slot >= MAX_TEXTURE_SLOTS {
            engine_warn!(SOURCE, "Texture slot {} out of range", slot);
            return;
        }
        let Some(entry) = device.textures.get(texture) else {
            return;
        };
        let name = entry.name;
        device.gl.active_texture(slot);
        device.gl.bind_texture_2d(name);
        self.stats.texture_binds += 1;
    }

    fn create_shader(&mut self, vertex_source: &str, fragment_source: &str) -> Handle {
        let Some(device) = self.device.as_mut() else {
            return Handle::NULL;
        };
        let gl = &mut device.gl;

        let mut stages = Vec::with_capacity(2);
        for (stage, source) in [(ShaderStage::Vertex, vertex_source), (ShaderStage::Fragment, fragment_source)] {
            let shader = match gl.create_shader(stage) {
                Ok(shader) => shader,
                Err(e) => {
                    for compiled in stages {
                        gl.delete_shader(compiled);
                    }
                    engine_error!(SOURCE, "glCreateShader failed: {}", e);
                    self.last_shader_error = Some(e);
                    return Handle::NULL;
                }
            };
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                for compiled in stages {
                    gl.delete_shader(compiled);
                }
                engine_error!(SOURCE, "Shader compilation failed: {}", log);
                self.last_shader_error = Some(log);
                return Handle::NULL;
            }
            stages.push(shader);
        }

        let program = match gl.create_program() {
            Ok(program) => program,
            Err(e) => {
                for shader in stages {
                    gl.delete_shader(shader);
                }
                engine_error!(SOURCE, "glCreateProgram failed: {}", e);
                self.last_shader_error = Some(e);
                return Handle::NULL;
            }
        };
        for shader in &stages {
            gl.attach_shader(program, *shader);
        }
        gl.link_program(program);
        for shader in stages {
            gl.delete_shader(shader);
        }
        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            engine_error!(SOURCE, "Program link failed: {}", log);
            self.last_shader_error = Some(log);
            return Handle::NULL;
        }

        let uniforms: FxHashMap<String, ActiveUniform> =
            gl.active_uniforms(program).into_iter().map(|u| (u.name.clone(), u)).collect();

        // Sampler N reads texture unit N, in declaration order
        let mut samplers: Vec<&ActiveUniform> = uniforms.values().filter(|u| u.ty.is_sampler()).collect();
        samplers.sort_by_key(|u| u.location);
        if !samplers.is_empty() {
            let previous = device.current_program;
            gl.use_program(program);
            for (unit, sampler) in samplers.iter().enumerate() {
                gl.uniform(sampler.location, UniformType::Sampler2D, 1, &(unit as i32).to_ne_bytes());
            }
            let restore = device.programs.get(previous).map(|p| p.name).unwrap_or(0);
            gl.use_program(restore);
        }

        self.last_shader_error = None;
        let handle = device.programs.insert(&mut self.handles, GlProgram { name: program, uniforms });
        if handle.is_null() {
            device.gl.delete_program(program);
        }
        handle
    }

    fn delete_shader(&mut self, shader: Handle) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if let Some(entry) = device.programs.remove(shader) {
            device.gl.delete_program(entry.name);
            if device.current_program == shader {
                device.current_program = Handle::NULL;
            }
        }
    }

    fn bind_shader(&mut self, shader: Handle) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let Some(entry) = device.programs.get(shader) else {
            return;
        };
        let name = entry.name;
        device.gl.use_program(name);
        if device.current_program != shader {
            device.current_program = shader;
            self.stats.shader_switches += 1;
        }
    }

    fn set_shader_uniform(&mut self, shader: Handle, name: &str, data: &[u8]) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let Some(entry) = device.programs.get(shader) else {
            return;
        };
        let program = entry.name;
        let Some(uniform) = entry.uniforms.get(name) else {
            engine_warn!(SOURCE, "Program {} has no uniform '{}'", shader, name);
            return;
        };
        if uniform.ty.is_sampler() {
            engine_warn!(SOURCE, "Uniform '{}' of program {} is a sampler; use bind_texture", name, shader);
            return;
        }
        let expected = (uniform.ty.client_size() * uniform.array_len) as usize;
        if data.len() != expected {
            engine_warn!(SOURCE, "Uniform '{}' of program {} needs {} bytes, got {}", name, shader, expected, data.len());
            return;
        }
        let (location, ty, count) = (uniform.location, uniform.ty, uniform.array_len);

        // glUniform* targets the current program; restore it afterwards
        let previous = device.programs.get(device.current_program).map(|p| p.name).unwrap_or(0);
        device.gl.use_program(program);
        device.gl.uniform(location, ty, count, data);
        let error = device.gl.get_error();
        device.gl.use_program(previous);
        if error != GlError::NoError {
            engine_warn!(SOURCE, "Uniform '{}' of program {} rejected {} bytes: {:?}", name, shader, data.len(), error);
        }
    }

    fn last_shader_error(&self) -> Option<&str> {
        self.last_shader_error.as_deref()
    }

    fn draw_indexed(&mut self, vertex_buffer: Handle, index_buffer: Handle, index_count: u32, topology: PrimitiveTopology) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let (Some(vb), Some(ib)) = (device.buffers.get(vertex_buffer), device.buffers.get(index_buffer)) else {
            return;
        };
        let (vb, ib) = (vb.name, ib.name);

        let gl = &mut device.gl;
        gl.bind_vertex_array(device.vao);
        gl.bind_buffer(BufferTarget::Array, vb);
        gl.bind_buffer(BufferTarget::ElementArray, ib);
        Self::setup_vertex_attributes(gl);
        gl.draw_elements(Self::convert_topology(topology), index_count);
        Self::check_error(self.config.enable_validation, gl, "glDrawElements");

        self.stats.draw_calls += 1;
        self.stats.triangles += topology.counted_triangles(index_count);
    }

    fn draw(&mut self, vertex_buffer: Handle, vertex_count: u32, topology: PrimitiveTopology) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let Some(vb) = device.buffers.get(vertex_buffer) else {
            return;
        };
        let vb = vb.name;

        let gl = &mut device.gl;
        gl.bind_vertex_array(device.vao);
        gl.bind_buffer(BufferTarget::Array, vb);
        Self::setup_vertex_attributes(gl);
        gl.draw_arrays(Self::convert_topology(topology), 0, vertex_count);
        Self::check_error(self.config.enable_validation, gl, "glDrawArrays");

        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_count as u64;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.fixed.depth_test = enabled;
        if let Some(device) = self.device.as_mut() {
            Self::apply_fixed_function(&mut device.gl, self.fixed);
        }
    }

    fn set_blending(&mut self, enabled: bool) {
        self.fixed.blending = enabled;
        if let Some(device) = self.device.as_mut() {
            Self::apply_fixed_function(&mut device.gl, self.fixed);
        }
    }

    fn set_culling(&mut self, enabled: bool) {
        self.fixed.culling = enabled;
        if let Some(device) = self.device.as_mut() {
            Self::apply_fixed_function(&mut device.gl, self.fixed);
        }
    }

    fn set_wireframe(&mut self, enabled: bool) {
        self.fixed.wireframe = enabled;
        if let Some(device) = self.device.as_mut() {
            Self::apply_fixed_function(&mut device.gl, self.fixed);
        }
    }

    fn stats(&self) -> RenderStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    fn api(&self) -> RenderApi {
        RenderApi::OpenGL
    }
}

impl<G: GlDevice> Drop for GlRenderer<G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "gl_renderer_tests.rs"]
mod tests;
