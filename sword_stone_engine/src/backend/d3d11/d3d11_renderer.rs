/// D3d11Renderer - Direct3D 11 implementation of the Renderer trait
///
/// Retained device/context model. Fixed-function state lives in immutable
/// state objects that are all created at initialization; the toggles only
/// choose which one is bound. Dynamic buffers are updated with
/// Map/copy/Unmap, static buffers are never written after creation. Each
/// program stage has its own `b0` constant buffer.

use glam::Vec4;
use raw_window_handle::RawWindowHandle;

use super::d3d11_device::{
    BindFlag, BlendDesc, BufferDesc, CullMode, D3d11Device, DepthStencilDesc, DxgiFormat, FillMode, HResult,
    InputElementDesc, MapType, RasterizerDesc, Texture2dDesc, TextureBind, Topology, Usage,
};
use crate::backend::surface::Surface;
use crate::renderer::{
    expand_rgb8_to_rgba8, mip_extent, mip_level_count, BufferUsage, ClearFlags, FixedFunctionState, Handle,
    HandleAllocator, NativeWindow, PrimitiveTopology, ProgramReflection, Rect2D, RenderApi, RenderStats, Renderer,
    RendererConfig, ResourceRegistry, ShaderStage, TextureFormat, UniformError, Vertex, Viewport, DEFAULT_CLEAR_COLOR,
    MAX_TEXTURE_SLOTS,
};
use crate::{engine_debug, engine_error, engine_info, engine_trace, engine_warn};

const SOURCE: &str = "stone::d3d11";

/// Program used for draws issued while no shader is bound
const DEFAULT_VERTEX_SHADER: &str = r#"
struct VsOut { float4 position : SV_Position; float4 color : COLOR; };
VsOut main(float3 position : POSITION, float4 color : COLOR) {
    VsOut result;
    result.position = float4(position, 1.0);
    result.color = color;
    return result;
}
"#;
const DEFAULT_PIXEL_SHADER: &str =
    "float4 main(float4 position : SV_Position, float4 color : COLOR) : SV_Target { return color; }";

struct D3d11Buffer<D: D3d11Device> {
    buffer: D::Buffer,
    usage: BufferUsage,
    size: usize,
}

struct D3d11Texture<D: D3d11Device> {
    texture: D::Texture,
    view: D::ShaderResourceView,
    format: TextureFormat,
    width: u32,
    height: u32,
    mip_levels: u32,
}

/// CPU copy of one stage's constant block, uploaded before the next draw when dirty
struct StageConstants<B> {
    data: Vec<u8>,
    buffer: Option<B>,
    dirty: bool,
}

impl<B> StageConstants<B> {
    fn upload<D: D3d11Device<Buffer = B>>(&mut self, device: &mut D) {
        if !self.dirty {
            return;
        }
        if let Some(buffer) = &self.buffer {
            if let Err(e) = device.update_subresource(buffer, &self.data) {
                engine_warn!(SOURCE, "Constant upload failed: {}", e);
            }
        }
        self.dirty = false;
    }
}

struct D3d11Program<D: D3d11Device> {
    vertex_shader: D::VertexShader,
    pixel_shader: D::PixelShader,
    input_layout: D::InputLayout,
    reflection: ProgramReflection,
    vertex_constants: StageConstants<D::Buffer>,
    pixel_constants: StageConstants<D::Buffer>,
}

/// Every state object the toggles can select, created once
struct StateObjects<D: D3d11Device> {
    /// Indexed by [wireframe][culling]
    rasterizer: [[D::RasterizerState; 2]; 2],
    /// Indexed by depth test
    depth: [D::DepthStencilState; 2],
    /// Indexed by blending
    blend: [D::BlendState; 2],
}

impl<D: D3d11Device> StateObjects<D> {
    fn create(device: &D) -> Result<Self, HResult> {
        let rasterizer = |wireframe: bool, culling: bool| {
            device.create_rasterizer_state(RasterizerDesc {
                fill_mode: if wireframe { FillMode::Wireframe } else { FillMode::Solid },
                cull_mode: if culling { CullMode::Back } else { CullMode::None },
                scissor_enable: true,
            })
        };
        let depth = |enabled: bool| {
            device.create_depth_stencil_state(DepthStencilDesc { depth_enable: enabled, depth_write: enabled })
        };
        Ok(Self {
            rasterizer: [
                [rasterizer(false, false)?, rasterizer(false, true)?],
                [rasterizer(true, false)?, rasterizer(true, true)?],
            ],
            depth: [depth(false)?, depth(true)?],
            blend: [
                device.create_blend_state(BlendDesc::opaque())?,
                device.create_blend_state(BlendDesc::alpha_blend())?,
            ],
        })
    }

    fn apply(&self, device: &mut D, fixed: FixedFunctionState) {
        device.rs_set_state(&self.rasterizer[fixed.wireframe as usize][fixed.culling as usize]);
        device.om_set_depth_stencil_state(&self.depth[fixed.depth_test as usize]);
        device.om_set_blend_state(&self.blend[fixed.blending as usize]);
    }
}

/// Size-dependent targets, rebuilt on resize
struct RenderTargets<D: D3d11Device> {
    color: D::RenderTargetView,
    depth: D::DepthStencilView,
}

/// Everything that only exists between `initialize` and `shutdown`
struct D3d11State<D: D3d11Device> {
    device: D,
    targets: Option<RenderTargets<D>>,
    states: StateObjects<D>,
    default_program: D3d11Program<D>,
    buffers: ResourceRegistry<D3d11Buffer<D>>,
    textures: ResourceRegistry<D3d11Texture<D>>,
    programs: ResourceRegistry<D3d11Program<D>>,
    bound_textures: [Handle; MAX_TEXTURE_SLOTS as usize],
    current_program: Handle,
    viewport: Viewport,
    scissor: Rect2D,
}

/// Direct3D 11 renderer over a [`D3d11Device`]
pub struct D3d11Renderer<D: D3d11Device> {
    config: RendererConfig,
    device: Option<D3d11State<D>>,
    handles: HandleAllocator,
    stats: RenderStats,
    clear_color: Vec4,
    fixed: FixedFunctionState,
    last_shader_error: Option<String>,
}

// SAFETY: every object stored next to the device was created by it and is
// only used together with it, on the one thread driving the renderer.
unsafe impl<D: D3d11Device> Send for D3d11Renderer<D> {}

impl<D: D3d11Device> D3d11Renderer<D> {
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

    /// The live device, `None` before `initialize`
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref().map(|d| &d.device)
    }

    fn convert_topology(topology: PrimitiveTopology) -> Topology {
        match topology {
            PrimitiveTopology::TriangleList => Topology::TriangleList,
            PrimitiveTopology::TriangleStrip => Topology::TriangleStrip,
            PrimitiveTopology::LineList => Topology::LineList,
            PrimitiveTopology::PointList => Topology::PointList,
        }
    }

    fn input_elements() -> Vec<InputElementDesc> {
        Vertex::ATTRIBUTES
            .iter()
            .map(|a| InputElementDesc {
                semantic: a.semantic,
                components: a.components,
                offset: a.offset,
            })
            .collect()
    }

    fn stage_constants(device: &D, size: u32) -> Result<StageConstants<D::Buffer>, HResult> {
        let buffer = if size > 0 {
            let desc = BufferDesc {
                byte_width: size as usize,
                usage: Usage::Default,
                bind: BindFlag::ConstantBuffer,
                cpu_write: false,
            };
            Some(device.create_buffer(&desc, None)?)
        } else {
            None
        };
        Ok(StageConstants {
            data: vec![0; size as usize],
            buffer,
            dirty: false,
        })
    }

    /// Compile, link and create every object of a program
    fn build_program(device: &D, vertex_source: &str, pixel_source: &str) -> Result<D3d11Program<D>, String> {
        let (vs_code, vs_reflection) = device.compile(ShaderStage::Vertex, vertex_source).map_err(|e| e.to_string())?;
        let (ps_code, ps_reflection) = device.compile(ShaderStage::Fragment, pixel_source).map_err(|e| e.to_string())?;
        let reflection = ProgramReflection::link(vs_reflection, ps_reflection).map_err(|e| e.to_string())?;

        let describe = |e: HResult| format!("shader object creation failed: {}", e);
        let vertex_shader = device.create_vertex_shader(&vs_code).map_err(describe)?;
        let pixel_shader = device.create_pixel_shader(&ps_code).map_err(describe)?;
        let input_layout = device.create_input_layout(&Self::input_elements(), &vs_code).map_err(describe)?;
        let vertex_constants =
            Self::stage_constants(device, reflection.block(ShaderStage::Vertex).size()).map_err(describe)?;
        let pixel_constants =
            Self::stage_constants(device, reflection.block(ShaderStage::Fragment).size()).map_err(describe)?;

        Ok(D3d11Program {
            vertex_shader,
            pixel_shader,
            input_layout,
            reflection,
            vertex_constants,
            pixel_constants,
        })
    }

    /// Back-buffer RTV plus a matching depth buffer and DSV
    fn create_targets(device: &mut D) -> Result<RenderTargets<D>, HResult> {
        let color = device.back_buffer_view()?;
        let (width, height) = device.back_buffer_size();
        let depth_buffer = device.create_texture_2d(
            &Texture2dDesc {
                width,
                height,
                mip_levels: 1,
                format: DxgiFormat::D24UnormS8Uint,
                bind: TextureBind::DepthStencil,
            },
            None,
        )?;
        let depth = device.create_depth_stencil_view(&depth_buffer)?;
        Ok(RenderTargets { color, depth })
    }

    fn create_buffer(&mut self, bind: BindFlag, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle {
        let Some(state) = self.device.as_mut() else {
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
            engine_error!(SOURCE, "Buffer of {} bytes exceeds the device limit", size);
            return Handle::NULL;
        }

        let desc = BufferDesc {
            byte_width: size,
            usage: if usage.is_cpu_writable() { Usage::Dynamic } else { Usage::Default },
            bind,
            cpu_write: usage.is_cpu_writable(),
        };
        let buffer = match state.device.create_buffer(&desc, data.map(|d| &d[..size])) {
            Ok(buffer) => buffer,
            Err(e) => {
                engine_error!(SOURCE, "CreateBuffer({} bytes, {:?}) failed: {}", size, usage, e);
                return Handle::NULL;
            }
        };
        let handle = state.buffers.insert(&mut self.handles, D3d11Buffer { buffer, usage, size });
        engine_trace!(SOURCE, "Created buffer {} ({} bytes, {:?})", handle, size, usage);
        handle
    }

    /// Bind the program (or the default one) and upload its dirty constants
    fn prepare_draw(state: &mut D3d11State<D>, topology: PrimitiveTopology) {
        let D3d11State { device, programs, default_program, current_program, .. } = state;
        let program = programs.get_mut(*current_program).unwrap_or(default_program);

        program.vertex_constants.upload(device);
        program.pixel_constants.upload(device);

        device.ia_set_input_layout(Some(&program.input_layout));
        device.vs_set_shader(Some(&program.vertex_shader));
        device.ps_set_shader(Some(&program.pixel_shader));
        device.vs_set_constant_buffer(program.vertex_constants.buffer.as_ref());
        device.ps_set_constant_buffer(program.pixel_constants.buffer.as_ref());
        device.ia_set_primitive_topology(Self::convert_topology(topology));
    }

    fn apply_fixed_function(&mut self) {
        if let Some(state) = self.device.as_mut() {
            state.states.apply(&mut state.device, self.fixed);
        }
    }
}

impl<D: D3d11Device> Renderer for D3d11Renderer<D> {
    fn initialize(&mut self, window: RawWindowHandle, width: u32, height: u32) -> bool {
        self.initialize_window(&NativeWindow::from(window), width, height)
    }

    fn initialize_window(&mut self, window: &NativeWindow, width: u32, height: u32) -> bool {
        if self.device.is_some() {
            engine_warn!(SOURCE, "initialize called twice; keeping the existing device");
            return true;
        }

        let surface = Surface::from_raw(window.window);
        if !surface.is_hwnd() {
            engine_error!(SOURCE, "Direct3D 11 needs a Win32 window, got {}", surface);
            return false;
        }

        let mut device = match D::create(window, width, height, &self.config) {
            Ok(device) => device,
            Err(e) => {
                engine_error!(SOURCE, "D3D11CreateDeviceAndSwapChain failed on {}: {}", surface, e);
                return false;
            }
        };

        let targets = match Self::create_targets(&mut device) {
            Ok(targets) => targets,
            Err(e) => {
                engine_error!(SOURCE, "Failed to create render targets: {}", e);
                return false;
            }
        };

        let default_program = match Self::build_program(&device, DEFAULT_VERTEX_SHADER, DEFAULT_PIXEL_SHADER) {
            Ok(program) => program,
            Err(e) => {
                engine_error!(SOURCE, "Failed to build the default program: {}", e);
                return false;
            }
        };

        let states = match StateObjects::create(&device) {
            Ok(states) => states,
            Err(e) => {
                engine_error!(SOURCE, "Failed to create pipeline state objects: {}", e);
                return false;
            }
        };
        self.fixed = FixedFunctionState::default();
        states.apply(&mut device, self.fixed);

        let viewport = Viewport::full(width, height);
        let scissor = Rect2D::new(0, 0, width, height);
        device.om_set_render_targets(Some(&targets.color), Some(&targets.depth));
        device.rs_set_viewport(viewport);
        device.rs_set_scissor_rect(scissor);

        engine_info!(
            SOURCE,
            "Direct3D 11 renderer initialized on {} ({}x{}) for '{}': {}",
            surface, width, height, self.config.app_name, device.describe()
        );

        self.device = Some(D3d11State {
            device,
            targets: Some(targets),
            states,
            default_program,
            buffers: ResourceRegistry::new(),
            textures: ResourceRegistry::new(),
            programs: ResourceRegistry::new(),
            bound_textures: [Handle::NULL; MAX_TEXTURE_SLOTS as usize],
            current_program: Handle::NULL,
            viewport,
            scissor,
        });
        true
    }

    fn shutdown(&mut self) {
        let Some(mut state) = self.device.take() else {
            return;
        };
        state.device.clear_state();
        let buffers = state.buffers.drain().len();
        let textures = state.textures.drain().len();
        let programs = state.programs.drain().len();
        engine_debug!(SOURCE, "Released {} buffers, {} textures, {} programs", buffers, textures, programs);
        drop(state);
        engine_info!(SOURCE, "Direct3D 11 renderer shut down");
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if width == 0 || height == 0 {
            engine_debug!(SOURCE, "Ignoring resize to {}x{}", width, height);
            return;
        }

        // Every back-buffer reference must be gone before ResizeBuffers
        state.device.om_set_render_targets(None, None);
        state.targets = None;

        if let Err(e) = state.device.resize_buffers(width, height) {
            engine_error!(SOURCE, "ResizeBuffers({}x{}) failed: {}", width, height, e);
        }
        match Self::create_targets(&mut state.device) {
            Ok(targets) => {
                state.device.om_set_render_targets(Some(&targets.color), Some(&targets.depth));
                state.targets = Some(targets);
            }
            Err(e) => engine_error!(SOURCE, "Failed to recreate render targets: {}", e),
        }

        let (w, h) = state.device.back_buffer_size();
        state.viewport = Viewport::full(w, h);
        state.scissor = Rect2D::new(0, 0, w, h);
        state.device.rs_set_viewport(state.viewport);
        state.device.rs_set_scissor_rect(state.scissor);
        engine_debug!(SOURCE, "Resized to {}x{}", w, h);
    }

    fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    fn begin_frame(&mut self) {
        self.stats = RenderStats::default();
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if let Some(targets) = &state.targets {
            state.device.om_set_render_targets(Some(&targets.color), Some(&targets.depth));
        }
        state.device.rs_set_viewport(state.viewport);
        state.device.rs_set_scissor_rect(state.scissor);
    }

    fn end_frame(&mut self) {}

    fn present(&mut self) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let sync_interval = if self.config.vsync { 1 } else { 0 };
        if let Err(e) = state.device.present(sync_interval) {
            engine_error!(SOURCE, "Present failed: {}", e);
        }
    }

    fn clear(&mut self, flags: ClearFlags, color: Vec4) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let Some(targets) = &state.targets else {
            return;
        };
        if flags.contains(ClearFlags::COLOR) {
            state.device.clear_render_target_view(&targets.color, color.to_array());
        }
        if flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) {
            state.device.clear_depth_stencil_view(
                &targets.depth,
                flags.contains(ClearFlags::DEPTH),
                flags.contains(ClearFlags::STENCIL),
            );
        }
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if let Some(state) = self.device.as_mut() {
            state.viewport = viewport;
            state.device.rs_set_viewport(viewport);
        }
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        if let Some(state) = self.device.as_mut() {
            state.scissor = rect;
            state.device.rs_set_scissor_rect(rect);
        }
    }

    fn viewport(&self) -> Viewport {
        self.device.as_ref().map(|d| d.viewport).unwrap_or_default()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        self.device.as_ref().map(|d| d.device.back_buffer_size()).unwrap_or((0, 0))
    }

    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle {
        self.create_buffer(BindFlag::VertexBuffer, data, size, usage)
    }

    fn create_index_buffer(&mut self, indices: Option<&[u32]>, count: usize, usage: BufferUsage) -> Handle {
        let bytes = indices.map(bytemuck::cast_slice::<u32, u8>);
        let Some(size) = count.checked_mul(4) else {
            return Handle::NULL;
        };
        self.create_buffer(BindFlag::IndexBuffer, bytes, size, usage)
    }

    fn update_vertex_buffer(&mut self, buffer: Handle, data: &[u8], offset: usize) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let Some(entry) = state.buffers.get(buffer) else {
            return;
        };
        if !entry.usage.is_cpu_writable() {
            engine_error!(SOURCE, "Buffer {} is static and cannot be updated", buffer);
            return;
        }
        if offset.saturating_add(data.len()) > entry.size {
            engine_warn!(SOURCE, "Update of buffer {} out of range ({}+{} > {})", buffer, offset, data.len(), entry.size);
            return;
        }

        let map_type = if offset == 0 && data.len() == entry.size {
            MapType::WriteDiscard
        } else {
            MapType::WriteNoOverwrite
        };
        if let Err(e) = state.device.map_write(&entry.buffer, map_type, offset, data) {
            engine_error!(SOURCE, "Map of buffer {} failed: {}", buffer, e);
        }
    }

    fn delete_buffer(&mut self, buffer: Handle) {
        if let Some(state) = self.device.as_mut() {
            state.buffers.remove(buffer);
        }
    }

    fn create_texture_2d(&mut self, width: u32, height: u32, format: TextureFormat, data: Option<&[u8]>) -> Handle {
        let Some(state) = self.device.as_mut() else {
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

        let expanded = match (format, data) {
            (TextureFormat::Rgb8, Some(data)) => Some(expand_rgb8_to_rgba8(data)),
            _ => None,
        };
        let initial = expanded.as_deref().or(data);

        let mip_levels = mip_level_count(width, height);
        let desc = Texture2dDesc {
            width,
            height,
            mip_levels,
            format: DxgiFormat::from_texture_format(format),
            bind: TextureBind::ShaderResource,
        };
        let device = &state.device;
        let created = device
            .create_texture_2d(&desc, initial)
            .and_then(|texture| Ok((device.create_shader_resource_view(&texture)?, texture)));
        let (view, texture) = match created {
            Ok(created) => created,
            Err(e) => {
                engine_error!(SOURCE, "CreateTexture2D({}x{} {:?}) failed: {}", width, height, format, e);
                return Handle::NULL;
            }
        };
        state.textures.insert(
            &mut self.handles,
            D3d11Texture { texture, view, format, width, height, mip_levels },
        )
    }

    fn update_texture_2d(&mut self, texture: Handle, data: &[u8], mip_level: u32) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let Some(entry) = state.textures.get(texture) else {
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
        let row_pitch = w * DxgiFormat::from_texture_format(entry.format).bytes_per_pixel();
        let result = if entry.format == TextureFormat::Rgb8 {
            state.device.update_texture_subresource(&entry.texture, mip_level, row_pitch, &expand_rgb8_to_rgba8(data))
        } else {
            state.device.update_texture_subresource(&entry.texture, mip_level, row_pitch, data)
        };
        if let Err(e) = result {
            engine_error!(SOURCE, "UpdateSubresource of texture {} failed: {}", texture, e);
        }
    }

    fn delete_texture(&mut self, texture: Handle) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if state.textures.remove(texture).is_none() {
            return;
        }
        for slot in 0..MAX_TEXTURE_SLOTS {
            if state.bound_textures[slot as usize] == texture {
                state.bound_textures[slot as usize] = Handle::NULL;
                state.device.ps_set_shader_resource(slot, None);
            }
        }
    }

    fn bind_texture(&mut self, slot: u32, texture: Handle) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if slot >= MAX_TEXTURE_SLOTS {
            engine_warn!(SOURCE, "Texture slot {} out of range", slot);
            return;
        }
        let Some(entry) = state.textures.get(texture) else {
            return;
        };
        state.device.ps_set_shader_resource(slot, Some(&entry.view));
        state.bound_textures[slot as usize] = texture;
        self.stats.texture_binds += 1;
    }

    fn create_shader(&mut self, vertex_source: &str, fragment_source: &str) -> Handle {
        let Some(state) = self.device.as_mut() else {
            return Handle::NULL;
        };
        match Self::build_program(&state.device, vertex_source, fragment_source) {
            Ok(program) => {
                self.last_shader_error = None;
                state.programs.insert(&mut self.handles, program)
            }
            Err(log) => {
                engine_error!(SOURCE, "Shader creation failed: {}", log);
                self.last_shader_error = Some(log);
                Handle::NULL
            }
        }
    }

    fn delete_shader(&mut self, shader: Handle) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if state.programs.remove(shader).is_some() && state.current_program == shader {
            state.current_program = Handle::NULL;
        }
    }

    fn bind_shader(&mut self, shader: Handle) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if !state.programs.contains(shader) {
            return;
        }
        if state.current_program != shader {
            state.current_program = shader;
            self.stats.shader_switches += 1;
        }
    }

    fn set_shader_uniform(&mut self, shader: Handle, name: &str, data: &[u8]) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let Some(program) = state.programs.get_mut(shader) else {
            return;
        };
        let D3d11Program { reflection, vertex_constants, pixel_constants, .. } = program;
        match reflection.write_uniform(name, data, &mut vertex_constants.data, &mut pixel_constants.data) {
            Ok(written) => {
                vertex_constants.dirty |= written.vertex;
                pixel_constants.dirty |= written.fragment;
            }
            Err(UniformError::Unknown) => engine_warn!(SOURCE, "Program {} has no uniform '{}'", shader, name),
            Err(e) => engine_warn!(SOURCE, "Uniform '{}' of program {} not set: {}", name, shader, e),
        }
    }

    fn last_shader_error(&self) -> Option<&str> {
        self.last_shader_error.as_deref()
    }

    fn draw_indexed(&mut self, vertex_buffer: Handle, index_buffer: Handle, index_count: u32, topology: PrimitiveTopology) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let (Some(vb), Some(ib)) = (state.buffers.get(vertex_buffer), state.buffers.get(index_buffer)) else {
            return;
        };
        let (vb, ib) = (vb.buffer.clone(), ib.buffer.clone());

        Self::prepare_draw(state, topology);
        state.device.ia_set_vertex_buffer(Some(&vb), Vertex::STRIDE);
        state.device.ia_set_index_buffer(Some(&ib));
        state.device.draw_indexed(index_count, 0);

        self.stats.draw_calls += 1;
        self.stats.triangles += topology.counted_triangles(index_count);
    }

    fn draw(&mut self, vertex_buffer: Handle, vertex_count: u32, topology: PrimitiveTopology) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        let Some(vb) = state.buffers.get(vertex_buffer) else {
            return;
        };
        let vb = vb.buffer.clone();

        Self::prepare_draw(state, topology);
        state.device.ia_set_vertex_buffer(Some(&vb), Vertex::STRIDE);
        state.device.draw(vertex_count, 0);

        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_count as u64;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.fixed.depth_test = enabled;
        self.apply_fixed_function();
    }

    fn set_blending(&mut self, enabled: bool) {
        self.fixed.blending = enabled;
        self.apply_fixed_function();
    }

    fn set_culling(&mut self, enabled: bool) {
        self.fixed.culling = enabled;
        self.apply_fixed_function();
    }

    fn set_wireframe(&mut self, enabled: bool) {
        self.fixed.wireframe = enabled;
        self.apply_fixed_function();
    }

    fn stats(&self) -> RenderStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    fn api(&self) -> RenderApi {
        RenderApi::DirectX11
    }
}

impl<D: D3d11Device> Drop for D3d11Renderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "d3d11_renderer_tests.rs"]
mod tests;
