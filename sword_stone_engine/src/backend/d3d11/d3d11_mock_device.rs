//! In-memory Direct3D 11 device for unit tests
//!
//! Objects are shared with `Arc` the way COM objects are shared by reference
//! count, and every object holds a [`LiveToken`] so tests can check that the
//! renderer released everything. Draws validate the bound pipeline and are
//! dropped (and counted) when something required is missing.

use std::sync::{Arc, Mutex, MutexGuard};

use super::d3d11_device::*;
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
// Objects
// ============================================================================

pub struct MockBuffer {
    desc: BufferDesc,
    data: Mutex<Vec<u8>>,
    _live: LiveToken,
}

impl MockBuffer {
    pub fn desc(&self) -> BufferDesc {
        self.desc
    }

    /// Snapshot of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }
}

pub struct MockTexture {
    desc: Texture2dDesc,
    levels: Mutex<Vec<Vec<u8>>>,
    _live: LiveToken,
}

impl MockTexture {
    pub fn desc(&self) -> Texture2dDesc {
        self.desc
    }

    pub fn level(&self, mip: u32) -> Option<Vec<u8>> {
        lock(&self.levels).get(mip as usize).cloned()
    }
}

/// A view of a texture (SRV, RTV or DSV)
pub struct MockView {
    resource: Arc<MockTexture>,
    _live: LiveToken,
}

impl MockView {
    pub fn resource(&self) -> &Arc<MockTexture> {
        &self.resource
    }
}

/// An immutable state object
pub struct MockState<T> {
    desc: T,
    _live: LiveToken,
}

impl<T: Copy> MockState<T> {
    pub fn desc(&self) -> T {
        self.desc
    }
}

/// Bytecode plus the stage it was compiled for
#[derive(Debug, Clone)]
pub struct MockBlob {
    stage: ShaderStage,
}

pub struct MockShader {
    stage: ShaderStage,
    _live: LiveToken,
}

pub struct MockInputLayout {
    elements: Vec<InputElementDesc>,
    _live: LiveToken,
}

impl MockInputLayout {
    pub fn elements(&self) -> &[InputElementDesc] {
        &self.elements
    }
}

// ============================================================================
// Device
// ============================================================================

/// Pipeline counters of the immediate context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextCounters {
    pub draws: u64,
    pub dropped_draws: u64,
    pub clears: u64,
    pub maps: u64,
    pub discards: u64,
    pub subresource_updates: u64,
}

/// What the immediate context has bound
#[derive(Default)]
struct ContextState {
    vertex_buffer: Option<(Arc<MockBuffer>, u32)>,
    index_buffer: Option<Arc<MockBuffer>>,
    layout: Option<Arc<MockInputLayout>>,
    topology: Option<Topology>,
    vertex_shader: Option<Arc<MockShader>>,
    pixel_shader: Option<Arc<MockShader>>,
    vs_constants: Option<Arc<MockBuffer>>,
    ps_constants: Option<Arc<MockBuffer>>,
    shader_resources: [Option<Arc<MockView>>; PS_RESOURCE_SLOTS as usize],
    rasterizer: Option<Arc<MockState<RasterizerDesc>>>,
    depth_stencil: Option<Arc<MockState<DepthStencilDesc>>>,
    blend: Option<Arc<MockState<BlendDesc>>>,
    render_target: Option<Arc<MockView>>,
    depth_target: Option<Arc<MockView>>,
    viewport: Viewport,
    scissor: Rect2D,
}

pub struct MockD3d11 {
    live: LiveObjects,
    limits: DeviceLimits,
    surface: Surface,
    state: ContextState,
    counters: ContextCounters,
    last_clear_color: [f32; 4],
    back_buffer: Arc<MockTexture>,
    presents: u64,
    last_sync_interval: u32,
}

impl MockD3d11 {
    /// Objects created on this device that are still referenced
    pub fn live_objects(&self) -> LiveObjects {
        self.live.clone()
    }

    pub fn live_object_count(&self) -> usize {
        self.live.count()
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn counters(&self) -> ContextCounters {
        self.counters
    }

    pub fn rs_state(&self) -> Option<RasterizerDesc> {
        self.state.rasterizer.as_ref().map(|s| s.desc())
    }

    pub fn om_depth_stencil_state(&self) -> Option<DepthStencilDesc> {
        self.state.depth_stencil.as_ref().map(|s| s.desc())
    }

    pub fn om_blend_state(&self) -> Option<BlendDesc> {
        self.state.blend.as_ref().map(|s| s.desc())
    }

    pub fn om_render_target(&self) -> Option<&Arc<MockView>> {
        self.state.render_target.as_ref()
    }

    pub fn rs_viewport(&self) -> Viewport {
        self.state.viewport
    }

    pub fn rs_scissor_rect(&self) -> Rect2D {
        self.state.scissor
    }

    pub fn ps_shader_resource(&self, slot: u32) -> Option<&Arc<MockView>> {
        self.state.shader_resources.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn vs_constant_buffer(&self) -> Option<&Arc<MockBuffer>> {
        self.state.vs_constants.as_ref()
    }

    pub fn ps_constant_buffer(&self) -> Option<&Arc<MockBuffer>> {
        self.state.ps_constants.as_ref()
    }

    pub fn last_clear_color(&self) -> [f32; 4] {
        self.last_clear_color
    }

    pub fn back_buffer(&self) -> &Arc<MockTexture> {
        &self.back_buffer
    }

    pub fn present_count(&self) -> u64 {
        self.presents
    }

    pub fn last_sync_interval(&self) -> u32 {
        self.last_sync_interval
    }

    fn texture(&self, desc: &Texture2dDesc, initial_data: Option<&[u8]>) -> Result<Arc<MockTexture>, HResult> {
        let max = self.limits.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max || desc.mip_levels == 0 {
            return Err(HResult::InvalidArg);
        }
        if desc.mip_levels > mip_level_count(desc.width, desc.height) {
            return Err(HResult::InvalidArg);
        }
        if desc.bind == TextureBind::DepthStencil && !desc.format.is_depth() {
            return Err(HResult::InvalidArg);
        }

        let bpp = desc.format.bytes_per_pixel() as usize;
        let mut levels: Vec<Vec<u8>> = (0..desc.mip_levels)
            .map(|level| {
                let (w, h) = mip_extent(desc.width, desc.height, level);
                vec![0u8; w as usize * h as usize * bpp]
            })
            .collect();
        if let Some(initial) = initial_data {
            if initial.len() != levels[0].len() {
                return Err(HResult::InvalidArg);
            }
            levels[0].copy_from_slice(initial);
        }
        Ok(Arc::new(MockTexture {
            desc: *desc,
            levels: Mutex::new(levels),
            _live: self.live.token(),
        }))
    }

    fn view(&self, texture: &Arc<MockTexture>, bind: TextureBind) -> Result<Arc<MockView>, HResult> {
        if texture.desc.bind != bind {
            return Err(HResult::InvalidArg);
        }
        Ok(Arc::new(MockView {
            resource: Arc::clone(texture),
            _live: self.live.token(),
        }))
    }

    fn state_object<T>(&self, desc: T) -> Arc<MockState<T>> {
        Arc::new(MockState { desc, _live: self.live.token() })
    }

    fn shader(&self, code: &MockBlob, stage: ShaderStage) -> Result<Arc<MockShader>, HResult> {
        if code.stage != stage {
            return Err(HResult::InvalidArg);
        }
        Ok(Arc::new(MockShader { stage, _live: self.live.token() }))
    }

    fn pipeline_is_complete(&self) -> bool {
        let state = &self.state;
        state.vertex_buffer.is_some()
            && state.layout.is_some()
            && state.topology.is_some()
            && state.vertex_shader.as_ref().is_some_and(|s| s.stage == ShaderStage::Vertex)
            && state.pixel_shader.as_ref().is_some_and(|s| s.stage == ShaderStage::Fragment)
            && state.render_target.is_some()
    }
}

impl D3d11Device for MockD3d11 {
    type Buffer = Arc<MockBuffer>;
    type Texture = Arc<MockTexture>;
    type ShaderResourceView = Arc<MockView>;
    type RenderTargetView = Arc<MockView>;
    type DepthStencilView = Arc<MockView>;
    type RasterizerState = Arc<MockState<RasterizerDesc>>;
    type DepthStencilState = Arc<MockState<DepthStencilDesc>>;
    type BlendState = Arc<MockState<BlendDesc>>;
    type VertexShader = Arc<MockShader>;
    type PixelShader = Arc<MockShader>;
    type InputLayout = Arc<MockInputLayout>;
    type Bytecode = MockBlob;

    fn create(window: &NativeWindow, width: u32, height: u32, config: &RendererConfig) -> Result<Self, HResult> {
        let surface = Surface::from_raw(window.window);
        if !surface.is_hwnd() {
            return Err(HResult::Unsupported);
        }
        if width == 0 || height == 0 {
            return Err(HResult::InvalidArg);
        }
        let live = LiveObjects::new();
        let back_buffer = Arc::new(MockTexture {
            desc: Texture2dDesc {
                width,
                height,
                mip_levels: 1,
                format: DxgiFormat::R8G8B8A8Unorm,
                bind: TextureBind::RenderTarget,
            },
            levels: Mutex::new(vec![vec![0u8; width as usize * height as usize * 4]]),
            _live: live.token(),
        });
        Ok(Self {
            live,
            limits: config.limits,
            surface,
            state: ContextState::default(),
            counters: ContextCounters::default(),
            last_clear_color: [0.0; 4],
            back_buffer,
            presents: 0,
            last_sync_interval: 0,
        })
    }

    fn describe(&self) -> String {
        format!("mock device on {}", self.surface)
    }

    fn compile(&self, stage: ShaderStage, source: &str) -> Result<(MockBlob, StageReflection), ShaderError> {
        let reflection = mock_shader_compiler::compile_stage(stage, source)?;
        Ok((MockBlob { stage }, reflection))
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<Arc<MockBuffer>, HResult> {
        if desc.byte_width == 0 {
            return Err(HResult::InvalidArg);
        }
        if desc.byte_width as u64 > self.limits.max_buffer_size {
            return Err(HResult::OutOfMemory);
        }
        if desc.cpu_write != (desc.usage == Usage::Dynamic) {
            return Err(HResult::InvalidArg);
        }
        let mut data = vec![0u8; desc.byte_width];
        if let Some(initial) = initial_data {
            if initial.len() < desc.byte_width {
                return Err(HResult::InvalidArg);
            }
            data.copy_from_slice(&initial[..desc.byte_width]);
        }
        Ok(Arc::new(MockBuffer {
            desc: *desc,
            data: Mutex::new(data),
            _live: self.live.token(),
        }))
    }

    fn create_texture_2d(&self, desc: &Texture2dDesc, initial_data: Option<&[u8]>) -> Result<Arc<MockTexture>, HResult> {
        self.texture(desc, initial_data)
    }

    fn create_shader_resource_view(&self, texture: &Arc<MockTexture>) -> Result<Arc<MockView>, HResult> {
        self.view(texture, TextureBind::ShaderResource)
    }

    fn create_depth_stencil_view(&self, texture: &Arc<MockTexture>) -> Result<Arc<MockView>, HResult> {
        self.view(texture, TextureBind::DepthStencil)
    }

    fn create_rasterizer_state(&self, desc: RasterizerDesc) -> Result<Self::RasterizerState, HResult> {
        Ok(self.state_object(desc))
    }

    fn create_depth_stencil_state(&self, desc: DepthStencilDesc) -> Result<Self::DepthStencilState, HResult> {
        Ok(self.state_object(desc))
    }

    fn create_blend_state(&self, desc: BlendDesc) -> Result<Self::BlendState, HResult> {
        Ok(self.state_object(desc))
    }

    fn create_vertex_shader(&self, code: &MockBlob) -> Result<Arc<MockShader>, HResult> {
        self.shader(code, ShaderStage::Vertex)
    }

    fn create_pixel_shader(&self, code: &MockBlob) -> Result<Arc<MockShader>, HResult> {
        self.shader(code, ShaderStage::Fragment)
    }

    fn create_input_layout(&self, elements: &[InputElementDesc], code: &MockBlob) -> Result<Arc<MockInputLayout>, HResult> {
        if elements.is_empty() || code.stage != ShaderStage::Vertex {
            return Err(HResult::InvalidArg);
        }
        if elements.iter().any(|e| e.components == 0 || e.components > 4) {
            return Err(HResult::InvalidArg);
        }
        Ok(Arc::new(MockInputLayout {
            elements: elements.to_vec(),
            _live: self.live.token(),
        }))
    }

    fn ia_set_vertex_buffer(&mut self, buffer: Option<&Arc<MockBuffer>>, stride: u32) {
        self.state.vertex_buffer = buffer.map(|b| (Arc::clone(b), stride));
    }

    fn ia_set_index_buffer(&mut self, buffer: Option<&Arc<MockBuffer>>) {
        self.state.index_buffer = buffer.cloned();
    }

    fn ia_set_input_layout(&mut self, layout: Option<&Arc<MockInputLayout>>) {
        self.state.layout = layout.cloned();
    }

    fn ia_set_primitive_topology(&mut self, topology: Topology) {
        self.state.topology = Some(topology);
    }

    fn vs_set_shader(&mut self, shader: Option<&Arc<MockShader>>) {
        self.state.vertex_shader = shader.cloned();
    }

    fn ps_set_shader(&mut self, shader: Option<&Arc<MockShader>>) {
        self.state.pixel_shader = shader.cloned();
    }

    fn vs_set_constant_buffer(&mut self, buffer: Option<&Arc<MockBuffer>>) {
        self.state.vs_constants = buffer.cloned();
    }

    fn ps_set_constant_buffer(&mut self, buffer: Option<&Arc<MockBuffer>>) {
        self.state.ps_constants = buffer.cloned();
    }

    fn ps_set_shader_resource(&mut self, slot: u32, view: Option<&Arc<MockView>>) {
        if let Some(entry) = self.state.shader_resources.get_mut(slot as usize) {
            *entry = view.cloned();
        }
    }

    fn rs_set_state(&mut self, state: &Self::RasterizerState) {
        self.state.rasterizer = Some(Arc::clone(state));
    }

    fn rs_set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn rs_set_scissor_rect(&mut self, rect: Rect2D) {
        self.state.scissor = rect;
    }

    fn om_set_depth_stencil_state(&mut self, state: &Self::DepthStencilState) {
        self.state.depth_stencil = Some(Arc::clone(state));
    }

    fn om_set_blend_state(&mut self, state: &Self::BlendState) {
        self.state.blend = Some(Arc::clone(state));
    }

    fn om_set_render_targets(&mut self, target: Option<&Arc<MockView>>, depth: Option<&Arc<MockView>>) {
        self.state.render_target = target.cloned();
        self.state.depth_target = depth.cloned();
    }

    /// Fills level 0 with `color` (RGBA8 targets only store bytes)
    fn clear_render_target_view(&mut self, view: &Arc<MockView>, color: [f32; 4]) {
        let texel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        if let Some(level) = lock(&view.resource.levels).first_mut() {
            for pixel in level.chunks_exact_mut(4) {
                pixel.copy_from_slice(&texel);
            }
        }
        self.last_clear_color = color;
        self.counters.clears += 1;
    }

    fn clear_depth_stencil_view(&mut self, _view: &Arc<MockView>, clear_depth: bool, clear_stencil: bool) {
        if clear_depth || clear_stencil {
            self.counters.clears += 1;
        }
    }

    fn map_write(&mut self, buffer: &Arc<MockBuffer>, map_type: MapType, offset: usize, data: &[u8]) -> Result<(), HResult> {
        if buffer.desc.usage != Usage::Dynamic || !buffer.desc.cpu_write {
            return Err(HResult::InvalidArg);
        }
        if map_type == MapType::WriteNoOverwrite && buffer.desc.bind == BindFlag::ConstantBuffer {
            return Err(HResult::InvalidArg);
        }
        let mut contents = lock(&buffer.data);
        let Some(target) = contents.get_mut(offset..offset.saturating_add(data.len())) else {
            return Err(HResult::InvalidArg);
        };
        target.copy_from_slice(data);
        if map_type == MapType::WriteDiscard {
            // Renamed storage: nothing outside the written range survives
            let end = offset + data.len();
            contents[..offset].fill(0);
            contents[end..].fill(0);
            self.counters.discards += 1;
        }
        self.counters.maps += 1;
        Ok(())
    }

    fn update_subresource(&mut self, buffer: &Arc<MockBuffer>, data: &[u8]) -> Result<(), HResult> {
        if buffer.desc.usage != Usage::Default || data.len() != buffer.desc.byte_width {
            return Err(HResult::InvalidArg);
        }
        lock(&buffer.data).copy_from_slice(data);
        self.counters.subresource_updates += 1;
        Ok(())
    }

    fn update_texture_subresource(&mut self, texture: &Arc<MockTexture>, mip: u32, row_pitch: u32, data: &[u8]) -> Result<(), HResult> {
        let (width, _) = mip_extent(texture.desc.width, texture.desc.height, mip);
        if row_pitch != width * texture.desc.format.bytes_per_pixel() {
            return Err(HResult::InvalidArg);
        }
        let mut levels = lock(&texture.levels);
        let Some(level) = levels.get_mut(mip as usize) else {
            return Err(HResult::InvalidArg);
        };
        if level.len() != data.len() {
            return Err(HResult::InvalidArg);
        }
        level.copy_from_slice(data);
        self.counters.subresource_updates += 1;
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) {
        let capacity = self
            .state
            .vertex_buffer
            .as_ref()
            .map(|(b, stride)| if *stride == 0 { 0 } else { b.desc.byte_width / *stride as usize })
            .unwrap_or(0);
        if !self.pipeline_is_complete() || (start_vertex as usize + vertex_count as usize) > capacity {
            self.counters.dropped_draws += 1;
            return;
        }
        self.counters.draws += 1;
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32) {
        let capacity = self.state.index_buffer.as_ref().map(|b| b.desc.byte_width / 4).unwrap_or(0);
        if !self.pipeline_is_complete() || (start_index as usize + index_count as usize) > capacity {
            self.counters.dropped_draws += 1;
            return;
        }
        self.counters.draws += 1;
    }

    fn clear_state(&mut self) {
        self.state = ContextState::default();
    }

    fn back_buffer_view(&mut self) -> Result<Arc<MockView>, HResult> {
        self.view(&self.back_buffer.clone(), TextureBind::RenderTarget)
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), HResult> {
        if Arc::strong_count(&self.back_buffer) > 1 {
            return Err(HResult::InvalidCall);
        }
        let desc = Texture2dDesc {
            width,
            height,
            ..self.back_buffer.desc
        };
        self.back_buffer = self.texture(&desc, None)?;
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> Result<(), HResult> {
        if sync_interval > 4 {
            return Err(HResult::InvalidCall);
        }
        self.presents += 1;
        self.last_sync_interval = sync_interval;
        Ok(())
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        (self.back_buffer.desc.width, self.back_buffer.desc.height)
    }
}

#[cfg(test)]
#[path = "d3d11_mock_device_tests.rs"]
mod tests;
