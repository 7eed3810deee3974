/// D3d12Renderer - Direct3D 12 implementation of the Renderer trait
///
/// Every frame records one command list against the current frame slot;
/// `end_frame` submits it and `present` runs the frame-advance protocol of
/// [`FrameRing`], which is the only place the CPU blocks on the GPU outside
/// resource creation. Buffers and textures live in the DEFAULT heap. Creation
/// data goes through a blocking copy; buffer updates are staged in upload
/// memory that the GPU is known not to be reading and copied on the queue.

use glam::Vec4;
use raw_window_handle::RawWindowHandle;

use super::d3d12_device::{
    texture_footprint, BlendDesc, CullMode, D3d12CommandList, D3d12Device, DepthStencilDesc, DescriptorHeapType,
    DxgiFormat, FillMode, Footprint, GraphicsPipelineDesc, HResult, HeapType, InputElementDesc, RasterizerDesc,
    ResourceDesc, ResourceState, RootSignatureDesc, Topology, TopologyType,
};
use super::d3d12_frame::{DeferredRelease, FrameRing, FrameState, CONSTANT_ALIGNMENT, FRAME_COUNT};
use super::d3d12_pipeline_cache::{PipelineCache, PipelineKey};
use crate::backend::surface::Surface;
use crate::error::Result;
use crate::renderer::{
    expand_rgb8_to_rgba8, mip_extent, mip_level_count, BufferUsage, ClearFlags, FixedFunctionState, Handle,
    HandleAllocator, NativeWindow, PrimitiveTopology, ProgramReflection, Rect2D, RenderApi, RenderStats, Renderer,
    RendererConfig, ResourceRegistry, ShaderStage, TextureFormat, UniformError, Vertex, Viewport, DEFAULT_CLEAR_COLOR,
    MAX_TEXTURE_SLOTS,
};
use crate::utils::SlotAllocator;
use crate::{engine_debug, engine_err, engine_error, engine_info, engine_trace, engine_warn};

const SOURCE: &str = "stone::d3d12";

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

const BACK_BUFFER_FORMAT: DxgiFormat = DxgiFormat::R8G8B8A8Unorm;
const DEPTH_FORMAT: DxgiFormat = DxgiFormat::D24UnormS8Uint;

/// Alignment of staged buffer updates in the upload ring
const COPY_ALIGNMENT: u64 = 16;

struct D3d12Buffer<D: D3d12Device> {
    resource: D::Resource,
    usage: BufferUsage,
    size: u64,
    /// State between copies: vertex or index buffer
    bound_state: ResourceState,
}

struct D3d12Texture<D: D3d12Device> {
    resource: D::Resource,
    /// Descriptor index in the shader-visible heap
    srv_slot: u32,
    format: TextureFormat,
    width: u32,
    height: u32,
    mip_levels: u32,
}

struct D3d12Program<D: D3d12Device> {
    vs: D::Bytecode,
    ps: D::Bytecode,
    reflection: ProgramReflection,
    /// CPU copies of each stage's b0 block, pushed to the upload ring per draw
    vertex_constants: Vec<u8>,
    pixel_constants: Vec<u8>,
}

/// Buffer update requested outside a frame, copied at the next `begin_frame`
struct PendingCopy<D: D3d12Device> {
    staging: D::Resource,
    dst: D::Resource,
    dst_offset: u64,
    size: u64,
    bound_state: ResourceState,
}

/// UPLOAD buffer holding `data`
fn create_staging<D: D3d12Device>(device: &D, data: &[u8]) -> std::result::Result<D::Resource, HResult> {
    let staging =
        device.create_committed_resource(HeapType::Upload, &ResourceDesc::buffer(data.len() as u64), ResourceState::GenericRead)?;
    device.write_buffer(&staging, 0, data)?;
    Ok(staging)
}

/// Lay tightly packed rows out at the footprint's row pitch
fn pitch_rows(data: &[u8], footprint: &Footprint) -> Vec<u8> {
    let mut staged = vec![0u8; footprint.total_bytes() as usize];
    let row_bytes = footprint.row_bytes as usize;
    for (y, row) in data.chunks_exact(row_bytes).enumerate() {
        let start = y * footprint.row_pitch as usize;
        staged[start..start + row_bytes].copy_from_slice(row);
    }
    staged
}

/// Blocking copies into DEFAULT-heap resources, on a list and fence of their own
struct Uploader<D: D3d12Device> {
    allocator: D::CommandAllocator,
    list: D::CommandList,
    fence: D::Fence,
    fence_value: u64,
}

impl<D: D3d12Device> Uploader<D> {
    fn new(device: &D) -> std::result::Result<Self, HResult> {
        let allocator = device.create_command_allocator()?;
        let mut list = device.create_command_list(&allocator)?;
        list.close()?;
        Ok(Self {
            allocator,
            list,
            fence: device.create_fence(0)?,
            fence_value: 0,
        })
    }

    /// Stage `data` in an UPLOAD buffer, let `record` copy from it, and wait for the GPU
    fn submit(
        &mut self,
        device: &D,
        data: &[u8],
        record: impl FnOnce(&mut D::CommandList, &D::Resource),
    ) -> std::result::Result<(), HResult> {
        let staging = create_staging(device, data)?;
        device.reset_command_allocator(&self.allocator)?;
        self.list.reset(&self.allocator)?;
        record(&mut self.list, &staging);
        self.list.close()?;
        device.execute_command_list(&mut self.list)?;

        self.fence_value += 1;
        device.signal(&self.fence, self.fence_value)?;
        device.wait_for_fence(&self.fence, self.fence_value)
    }
}

/// Everything that only exists between `initialize` and `shutdown`
struct D3d12State<D: D3d12Device> {
    device: D,
    rtv_heap: D::DescriptorHeap,
    dsv_heap: D::DescriptorHeap,
    srv_heap: D::DescriptorHeap,
    srv_slots: SlotAllocator,
    back_buffers: Vec<D::Resource>,
    depth_buffer: Option<D::Resource>,
    root_signature: D::RootSignature,
    command_list: D::CommandList,
    frames: FrameRing<D>,
    uploader: Uploader<D>,
    pipelines: PipelineCache<D::PipelineState>,
    default_program: D3d12Program<D>,
    buffers: ResourceRegistry<D3d12Buffer<D>>,
    textures: ResourceRegistry<D3d12Texture<D>>,
    programs: ResourceRegistry<D3d12Program<D>>,
    pending_copies: Vec<PendingCopy<D>>,
    current_program: Handle,
    bound_textures: [Handle; MAX_TEXTURE_SLOTS as usize],
    viewport: Viewport,
    scissor: Rect2D,
    /// Between `begin_frame` and `end_frame`
    recording: bool,
}

/// Direct3D 12 renderer over a [`D3d12Device`]
pub struct D3d12Renderer<D: D3d12Device> {
    config: RendererConfig,
    device: Option<D3d12State<D>>,
    handles: HandleAllocator,
    stats: RenderStats,
    clear_color: Vec4,
    fixed: FixedFunctionState,
    last_shader_error: Option<String>,
}

// SAFETY: every object stored next to the device was created by it and is
// only used together with it, on the one thread driving the renderer.
unsafe impl<D: D3d12Device> Send for D3d12Renderer<D> {}

impl<D: D3d12Device> D3d12Renderer<D> {
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

    // ===== Inspection =====

    /// The live device, `None` before `initialize`
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref().map(|d| &d.device)
    }

    pub fn frames(&self) -> Option<&FrameRing<D>> {
        self.device.as_ref().map(|d| &d.frames)
    }

    pub fn pipeline_cache(&self) -> Option<&PipelineCache<D::PipelineState>> {
        self.device.as_ref().map(|d| &d.pipelines)
    }

    pub fn command_list(&self) -> Option<&D::CommandList> {
        self.device.as_ref().map(|d| &d.command_list)
    }

    /// Shader-visible texture descriptors currently allocated
    pub fn texture_descriptors_in_use(&self) -> u32 {
        self.device.as_ref().map(|d| d.srv_slots.len()).unwrap_or(0)
    }

    /// Buffer updates waiting for the next frame's command list
    pub fn pending_copy_count(&self) -> usize {
        self.device.as_ref().map(|d| d.pending_copies.len()).unwrap_or(0)
    }

    pub fn is_recording(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.recording)
    }

    // ===== Creation helpers =====

    fn create_state(config: &RendererConfig, device: D) -> Result<D3d12State<D>> {
        let heap = |kind: DescriptorHeapType, capacity: u32, shader_visible: bool| {
            device
                .create_descriptor_heap(kind, capacity, shader_visible)
                .map_err(|e| engine_err!(SOURCE, "CreateDescriptorHeap({:?} x{}) failed: {}", kind, capacity, e))
        };
        let rtv_heap = heap(DescriptorHeapType::Rtv, FRAME_COUNT as u32, false)?;
        let dsv_heap = heap(DescriptorHeapType::Dsv, 1, false)?;
        let srv_heap = heap(DescriptorHeapType::CbvSrv, config.limits.max_texture_descriptors, true)?;

        let root_signature = device
            .create_root_signature(RootSignatureDesc { srv_tables: MAX_TEXTURE_SLOTS })
            .map_err(|e| engine_err!(SOURCE, "CreateRootSignature failed: {}", e))?;

        let (back_buffers, depth_buffer) = Self::create_targets(&device, &rtv_heap, &dsv_heap)
            .map_err(|e| engine_err!(SOURCE, "Failed to create render targets: {}", e))?;

        let frames = FrameRing::new(&device, device.current_back_buffer_index() as usize)
            .map_err(|e| engine_err!(SOURCE, "Failed to create frame resources: {}", e))?;
        let mut command_list = device
            .create_command_list(&frames.current().allocator)
            .map_err(|e| engine_err!(SOURCE, "CreateCommandList failed: {}", e))?;
        command_list
            .close()
            .map_err(|e| engine_err!(SOURCE, "Failed to close the initial command list: {}", e))?;
        let uploader = Uploader::new(&device).map_err(|e| engine_err!(SOURCE, "Failed to create the upload context: {}", e))?;

        let default_program = Self::build_program(&device, DEFAULT_VERTEX_SHADER, DEFAULT_PIXEL_SHADER)
            .map_err(|e| engine_err!(SOURCE, "Failed to build the default program: {}", e))?;

        let (width, height) = device.back_buffer_size();
        Ok(D3d12State {
            device,
            rtv_heap,
            dsv_heap,
            srv_heap,
            srv_slots: SlotAllocator::with_capacity(config.limits.max_texture_descriptors),
            back_buffers,
            depth_buffer: Some(depth_buffer),
            root_signature,
            command_list,
            frames,
            uploader,
            pipelines: PipelineCache::new(),
            default_program,
            buffers: ResourceRegistry::new(),
            textures: ResourceRegistry::new(),
            programs: ResourceRegistry::new(),
            pending_copies: Vec::new(),
            current_program: Handle::NULL,
            bound_textures: [Handle::NULL; MAX_TEXTURE_SLOTS as usize],
            viewport: Viewport::full(width, height),
            scissor: Rect2D::new(0, 0, width, height),
            recording: false,
        })
    }

    /// One RTV per back buffer plus a depth buffer and its DSV
    fn create_targets(
        device: &D,
        rtv_heap: &D::DescriptorHeap,
        dsv_heap: &D::DescriptorHeap,
    ) -> std::result::Result<(Vec<D::Resource>, D::Resource), HResult> {
        let mut back_buffers = Vec::with_capacity(FRAME_COUNT);
        for index in 0..FRAME_COUNT as u32 {
            let buffer = device.back_buffer(index)?;
            device.create_render_target_view(&buffer, rtv_heap, index)?;
            back_buffers.push(buffer);
        }
        let (width, height) = device.back_buffer_size();
        let depth = device.create_committed_resource(
            HeapType::Default,
            &ResourceDesc::depth_stencil(width, height, DEPTH_FORMAT),
            ResourceState::DepthWrite,
        )?;
        device.create_depth_stencil_view(&depth, dsv_heap, 0)?;
        Ok((back_buffers, depth))
    }

    /// Compile and link; pipeline objects are built per toggle combination at draw time
    fn build_program(device: &D, vertex_source: &str, pixel_source: &str) -> std::result::Result<D3d12Program<D>, String> {
        let (vs, vs_reflection) = device.compile(ShaderStage::Vertex, vertex_source).map_err(|e| e.to_string())?;
        let (ps, ps_reflection) = device.compile(ShaderStage::Fragment, pixel_source).map_err(|e| e.to_string())?;
        let reflection = ProgramReflection::link(vs_reflection, ps_reflection).map_err(|e| e.to_string())?;
        let vertex_constants = vec![0; reflection.block(ShaderStage::Vertex).size() as usize];
        let pixel_constants = vec![0; reflection.block(ShaderStage::Fragment).size() as usize];
        Ok(D3d12Program {
            vs,
            ps,
            reflection,
            vertex_constants,
            pixel_constants,
        })
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

    /// Cached PSO for the bound program (or the default one) and the toggles
    fn pipeline_for(
        state: &mut D3d12State<D>,
        fixed: FixedFunctionState,
        topology_type: TopologyType,
    ) -> std::result::Result<D::PipelineState, HResult> {
        let D3d12State { device, pipelines, programs, default_program, root_signature, current_program, .. } = state;
        let (device, root_signature) = (&*device, &*root_signature);
        let (key_program, program) = match programs.get(*current_program) {
            Some(program) => (*current_program, program),
            None => (Handle::NULL, &*default_program),
        };
        let key = PipelineKey {
            program: key_program,
            fixed,
            topology: topology_type,
        };
        let input_layout = Self::input_elements();
        pipelines.get_or_create(key, || {
            device.create_graphics_pipeline_state(&GraphicsPipelineDesc {
                root_signature,
                vs: &program.vs,
                ps: &program.ps,
                input_layout: &input_layout,
                rasterizer: RasterizerDesc {
                    fill_mode: if fixed.wireframe { FillMode::Wireframe } else { FillMode::Solid },
                    cull_mode: if fixed.culling { CullMode::Back } else { CullMode::None },
                },
                depth_stencil: DepthStencilDesc {
                    depth_enable: fixed.depth_test,
                    depth_write: fixed.depth_test,
                },
                blend: BlendDesc { blend_enable: fixed.blending },
                topology_type,
                rtv_format: BACK_BUFFER_FORMAT,
                dsv_format: DEPTH_FORMAT,
            })
        })
    }

    /// Bind the pipeline, this draw's constants and the bound textures
    ///
    /// Returns `false` if the draw cannot be recorded.
    fn prepare_draw(state: &mut D3d12State<D>, fixed: FixedFunctionState, topology: PrimitiveTopology) -> bool {
        let topology = Self::convert_topology(topology);
        let pipeline = match Self::pipeline_for(state, fixed, topology.topology_type()) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                engine_error!(SOURCE, "CreateGraphicsPipelineState failed: {}", e);
                return false;
            }
        };

        let D3d12State {
            device, command_list, frames, programs, default_program, textures, srv_heap, bound_textures, current_program, ..
        } = state;
        let program = programs.get(*current_program).unwrap_or(&*default_program);
        command_list.set_pipeline_state(&pipeline);

        let frame_index = frames.frame_index();
        let upload = &mut frames.current_mut().upload;
        for (stage, block) in [(ShaderStage::Vertex, &program.vertex_constants), (ShaderStage::Fragment, &program.pixel_constants)] {
            if block.is_empty() {
                continue;
            }
            match upload.push(device, block, CONSTANT_ALIGNMENT) {
                Ok(Some(offset)) => command_list.set_graphics_root_constant_buffer_view(stage, upload.buffer(), offset),
                Ok(None) => {
                    engine_warn!(SOURCE, "Upload ring of frame {} is full; draw skipped", frame_index);
                    return false;
                }
                Err(e) => {
                    engine_error!(SOURCE, "Map of the upload ring failed: {}", e);
                    return false;
                }
            }
        }
        for (slot, texture) in bound_textures.iter().enumerate() {
            if let Some(texture) = textures.get(*texture) {
                command_list.set_graphics_root_descriptor_table(slot as u32, srv_heap, texture.srv_slot);
            }
        }
        command_list.ia_set_primitive_topology(topology);
        true
    }

    /// DEFAULT-heap buffer, filled through the uploader when `data` is given
    fn create_default_buffer(
        state: &mut D3d12State<D>,
        size: usize,
        data: Option<&[u8]>,
        bound_state: ResourceState,
    ) -> std::result::Result<D::Resource, HResult> {
        let desc = ResourceDesc::buffer(size as u64);
        let Some(data) = data else {
            return state.device.create_committed_resource(HeapType::Default, &desc, bound_state);
        };
        let resource = state.device.create_committed_resource(HeapType::Default, &desc, ResourceState::CopyDest)?;
        state.uploader.submit(&state.device, data, |list, staging| {
            list.copy_buffer_region(&resource, 0, staging, 0, data.len() as u64);
            list.resource_barrier(&resource, ResourceState::CopyDest, bound_state);
        })?;
        Ok(resource)
    }

    fn create_buffer(&mut self, bound_state: ResourceState, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle {
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

        let resource = match Self::create_default_buffer(state, size, data.map(|d| &d[..size]), bound_state) {
            Ok(resource) => resource,
            Err(e) => {
                engine_error!(SOURCE, "CreateCommittedResource({} bytes, {:?}) failed: {}", size, usage, e);
                return Handle::NULL;
            }
        };
        let buffer = D3d12Buffer {
            resource,
            usage,
            size: size as u64,
            bound_state,
        };
        let handle = state.buffers.insert(&mut self.handles, buffer);
        engine_trace!(SOURCE, "Created buffer {} ({} bytes, {:?})", handle, size, usage);
        handle
    }

    /// Record a copy of `data` into `dst` on the frame's command list
    ///
    /// The bytes are staged in the current slot's upload ring, which the GPU
    /// stops reading before the slot is reused. A full ring falls back to a
    /// one-off staging buffer released with the frame.
    fn record_buffer_update(
        state: &mut D3d12State<D>,
        dst: &D::Resource,
        bound_state: ResourceState,
        dst_offset: u64,
        data: &[u8],
    ) -> std::result::Result<(), HResult> {
        let D3d12State { device, frames, command_list, .. } = state;
        let staged = frames.current_mut().upload.push(device, data, COPY_ALIGNMENT)?;
        let (staging, src_offset) = match staged {
            Some(offset) => (frames.current().upload.buffer().clone(), offset),
            None => {
                let staging = create_staging(device, data)?;
                frames.defer(DeferredRelease {
                    resources: vec![staging.clone()],
                    ..Default::default()
                });
                (staging, 0)
            }
        };
        command_list.resource_barrier(dst, bound_state, ResourceState::CopyDest);
        command_list.copy_buffer_region(dst, dst_offset, &staging, src_offset, data.len() as u64);
        command_list.resource_barrier(dst, ResourceState::CopyDest, bound_state);
        Ok(())
    }

    /// Record the copies queued outside a frame; their staging buffers
    /// retire with this frame
    fn record_pending_copies(state: &mut D3d12State<D>) {
        if state.pending_copies.is_empty() {
            return;
        }
        let mut staging = Vec::with_capacity(state.pending_copies.len());
        for copy in state.pending_copies.drain(..) {
            let list = &mut state.command_list;
            list.resource_barrier(&copy.dst, copy.bound_state, ResourceState::CopyDest);
            list.copy_buffer_region(&copy.dst, copy.dst_offset, &copy.staging, 0, copy.size);
            list.resource_barrier(&copy.dst, ResourceState::CopyDest, copy.bound_state);
            staging.push(copy.staging);
        }
        engine_trace!(SOURCE, "Recorded {} staged buffer update(s)", staging.len());
        state.frames.defer(DeferredRelease {
            resources: staging,
            ..Default::default()
        });
    }

    /// DEFAULT-heap texture with a full mip chain, left in `PixelShaderResource`
    fn create_texture_resource(
        state: &mut D3d12State<D>,
        width: u32,
        height: u32,
        format: TextureFormat,
        initial: Option<&[u8]>,
    ) -> std::result::Result<D::Resource, HResult> {
        let desc = ResourceDesc::texture_2d(width, height, mip_level_count(width, height), DxgiFormat::from_texture_format(format));
        let Some(initial) = initial else {
            return state.device.create_committed_resource(HeapType::Default, &desc, ResourceState::PixelShaderResource);
        };
        let footprint = texture_footprint(&desc, 0).ok_or(HResult::InvalidArg)?;
        let resource = state.device.create_committed_resource(HeapType::Default, &desc, ResourceState::CopyDest)?;
        state.uploader.submit(&state.device, &pitch_rows(initial, &footprint), |list, staging| {
            list.copy_texture_region(&resource, 0, staging, 0);
            list.resource_barrier(&resource, ResourceState::CopyDest, ResourceState::PixelShaderResource);
        })?;
        Ok(resource)
    }

    /// Release what the GPU no longer references
    fn release(state: &mut D3d12State<D>, releases: Vec<DeferredRelease<D>>) {
        for release in releases {
            if let Some(slot) = release.srv_slot {
                state.srv_slots.free(slot);
            }
        }
    }

    fn log_debug_messages(state: &D3d12State<D>) {
        for message in state.device.take_debug_messages() {
            engine_error!(SOURCE, "D3D12 debug layer: {}", message);
        }
    }

    fn current_back_buffer(state: &D3d12State<D>) -> Option<(D::Resource, u32)> {
        let index = state.device.current_back_buffer_index();
        state.back_buffers.get(index as usize).map(|buffer| (buffer.clone(), index))
    }
}

impl<D: D3d12Device> Renderer for D3d12Renderer<D> {
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
            engine_error!(SOURCE, "Direct3D 12 needs a Win32 window, got {}", surface);
            return false;
        }

        let device = match D::create(window, width, height, FRAME_COUNT as u32, &self.config) {
            Ok(device) => device,
            Err(e) => {
                engine_error!(SOURCE, "Device and swap chain creation failed on {} ({}x{}): {}", surface, width, height, e);
                return false;
            }
        };
        let description = device.describe();

        match Self::create_state(&self.config, device) {
            Ok(state) => {
                self.fixed = FixedFunctionState::default();
                self.device = Some(state);
                engine_info!(
                    SOURCE,
                    "Direct3D 12 renderer initialized on {} ({}x{}, {} frames in flight) for '{}': {}",
                    surface, width, height, FRAME_COUNT, self.config.app_name, description
                );
                true
            }
            Err(_) => false,
        }
    }

    fn shutdown(&mut self) {
        let Some(mut state) = self.device.take() else {
            return;
        };
        if state.recording {
            engine_warn!(SOURCE, "Shutting down inside a frame; its commands are discarded");
            if let Err(e) = state.command_list.close() {
                engine_debug!(SOURCE, "Close of the frame command list failed: {}", e);
            }
            state.recording = false;
        }

        // The GPU may still read anything below; drain before releasing
        if let Err(e) = state.frames.wait_for_gpu(&state.device) {
            engine_error!(SOURCE, "GPU drain failed during shutdown: {}", e);
        }
        let pending = state.frames.drain_deferred();
        Self::release(&mut state, pending);
        if !state.pending_copies.is_empty() {
            engine_debug!(SOURCE, "Dropping {} buffer update(s) that never reached a frame", state.pending_copies.len());
        }

        let buffers = state.buffers.drain().len();
        let textures = state.textures.drain().len();
        let programs = state.programs.drain().len();
        state.pipelines.clear();
        engine_debug!(SOURCE, "Released {} buffers, {} textures, {} programs", buffers, textures, programs);
        Self::log_debug_messages(&state);
        drop(state);
        engine_info!(SOURCE, "Direct3D 12 renderer shut down");
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if width == 0 || height == 0 {
            engine_debug!(SOURCE, "Ignoring resize to {}x{}", width, height);
            return;
        }
        if state.recording {
            engine_error!(SOURCE, "resize called while a frame is being recorded; ignored");
            return;
        }

        if let Err(e) = state.frames.wait_for_gpu(&state.device) {
            engine_error!(SOURCE, "GPU drain before resize failed: {}", e);
            return;
        }
        let pending = state.frames.drain_deferred();
        Self::release(state, pending);

        // Every back-buffer reference must be gone before ResizeBuffers
        state.back_buffers.clear();
        state.depth_buffer = None;

        let resized = state.device.resize_buffers(width, height);
        match Self::create_targets(&state.device, &state.rtv_heap, &state.dsv_heap) {
            Ok((back_buffers, depth)) => {
                state.back_buffers = back_buffers;
                state.depth_buffer = Some(depth);
            }
            Err(e) => engine_error!(SOURCE, "Failed to recreate render targets: {}", e),
        }
        if let Err(e) = resized {
            // The swap chain kept its old buffers; the views above point at them again
            engine_error!(SOURCE, "ResizeBuffers({}x{}) failed: {}", width, height, e);
            Self::log_debug_messages(state);
            return;
        }
        state.frames.reset_fence_values(state.device.current_back_buffer_index() as usize);

        let (w, h) = state.device.back_buffer_size();
        state.viewport = Viewport::full(w, h);
        state.scissor = Rect2D::new(0, 0, w, h);
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
        if state.recording {
            engine_warn!(SOURCE, "begin_frame called twice without end_frame");
            return;
        }
        let retired = state.frames.collect_retired(&state.device);
        Self::release(state, retired);

        let Some((back_buffer, rtv_index)) = Self::current_back_buffer(state) else {
            engine_error!(SOURCE, "No back buffer to render into");
            return;
        };
        {
            let D3d12State { device, frames, command_list, .. } = &mut *state;
            let slot = frames.current_mut();
            if let Err(e) = device.reset_command_allocator(&slot.allocator) {
                engine_error!(SOURCE, "Command allocator reset failed: {}", e);
                return;
            }
            if let Err(e) = command_list.reset(&slot.allocator) {
                engine_error!(SOURCE, "Command list reset failed: {}", e);
                return;
            }
            slot.state = FrameState::Recording;
        }
        state.recording = true;
        Self::record_pending_copies(state);

        let list = &mut state.command_list;
        list.resource_barrier(&back_buffer, ResourceState::Present, ResourceState::RenderTarget);
        list.set_descriptor_heap(&state.srv_heap);
        list.set_graphics_root_signature(&state.root_signature);
        let dsv = state.depth_buffer.as_ref().map(|_| (&state.dsv_heap, 0));
        list.om_set_render_targets((&state.rtv_heap, rtv_index), dsv);
        list.rs_set_viewport(state.viewport);
        list.rs_set_scissor_rect(state.scissor);
    }

    fn end_frame(&mut self) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if !state.recording {
            engine_debug!(SOURCE, "end_frame without begin_frame; nothing to submit");
            return;
        }
        state.recording = false;

        if let Some((back_buffer, _)) = Self::current_back_buffer(state) {
            state
                .command_list
                .resource_barrier(&back_buffer, ResourceState::RenderTarget, ResourceState::Present);
        }
        if let Err(e) = state.command_list.close() {
            engine_error!(SOURCE, "Close of the frame command list failed: {}", e);
            return;
        }
        if let Err(e) = state.device.execute_command_list(&mut state.command_list) {
            engine_error!(SOURCE, "ExecuteCommandLists failed: {}", e);
            return;
        }
        state.frames.current_mut().state = FrameState::Submitted;
        Self::log_debug_messages(state);
    }

    fn present(&mut self) {
        let Some(recording) = self.device.as_ref().map(|d| d.recording) else {
            return;
        };
        if recording {
            engine_warn!(SOURCE, "present called inside a frame; submitting it first");
            self.end_frame();
        }
        let Some(state) = self.device.as_mut() else {
            return;
        };

        let sync_interval = if self.config.vsync { 1 } else { 0 };
        if let Err(e) = state.device.present(sync_interval) {
            engine_error!(SOURCE, "Present failed: {}", e);
        }
        let next = state.device.current_back_buffer_index() as usize;
        if let Err(e) = state.frames.advance(&state.device, next) {
            engine_error!(SOURCE, "Frame advance failed: {}", e);
        }
        Self::log_debug_messages(state);
    }

    fn clear(&mut self, flags: ClearFlags, color: Vec4) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if !state.recording {
            engine_warn!(SOURCE, "clear called outside begin_frame/end_frame; ignored");
            return;
        }
        if flags.contains(ClearFlags::COLOR) {
            let index = state.device.current_back_buffer_index();
            state.command_list.clear_render_target_view(&state.rtv_heap, index, color.to_array());
        }
        if flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL) && state.depth_buffer.is_some() {
            state.command_list.clear_depth_stencil_view(
                &state.dsv_heap,
                0,
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
            if state.recording {
                state.command_list.rs_set_viewport(viewport);
            }
        }
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        if let Some(state) = self.device.as_mut() {
            state.scissor = rect;
            if state.recording {
                state.command_list.rs_set_scissor_rect(rect);
            }
        }
    }

    fn viewport(&self) -> Viewport {
        self.device.as_ref().map(|d| d.viewport).unwrap_or_default()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        self.device.as_ref().map(|d| d.device.back_buffer_size()).unwrap_or((0, 0))
    }

    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle {
        self.create_buffer(ResourceState::VertexAndConstantBuffer, data, size, usage)
    }

    fn create_index_buffer(&mut self, indices: Option<&[u32]>, count: usize, usage: BufferUsage) -> Handle {
        let bytes = indices.map(bytemuck::cast_slice::<u32, u8>);
        let Some(size) = count.checked_mul(4) else {
            return Handle::NULL;
        };
        self.create_buffer(ResourceState::IndexBuffer, bytes, size, usage)
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
        if (offset as u64).saturating_add(data.len() as u64) > entry.size {
            engine_warn!(SOURCE, "Update of buffer {} out of range ({}+{} > {})", buffer, offset, data.len(), entry.size);
            return;
        }
        if data.is_empty() {
            return;
        }
        let (dst, bound_state) = (entry.resource.clone(), entry.bound_state);

        if state.recording {
            if let Err(e) = Self::record_buffer_update(state, &dst, bound_state, offset as u64, data) {
                engine_error!(SOURCE, "Staging update of buffer {} failed: {}", buffer, e);
            }
            return;
        }
        match create_staging(&state.device, data) {
            Ok(staging) => state.pending_copies.push(PendingCopy {
                staging,
                dst,
                dst_offset: offset as u64,
                size: data.len() as u64,
                bound_state,
            }),
            Err(e) => engine_error!(SOURCE, "Staging update of buffer {} failed: {}", buffer, e),
        }
    }

    fn delete_buffer(&mut self, buffer: Handle) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if let Some(entry) = state.buffers.remove(buffer) {
            state.frames.defer(DeferredRelease {
                resources: vec![entry.resource],
                ..Default::default()
            });
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
        let Some(srv_slot) = state.srv_slots.alloc() else {
            engine_error!(SOURCE, "Texture descriptor heap is full ({} descriptors)", state.srv_slots.capacity());
            return Handle::NULL;
        };

        let expanded = match (format, data) {
            (TextureFormat::Rgb8, Some(data)) => Some(expand_rgb8_to_rgba8(data)),
            _ => None,
        };
        let initial = expanded.as_deref().or(data);
        let created = Self::create_texture_resource(state, width, height, format, initial).and_then(|resource| {
            state.device.create_shader_resource_view(&resource, &state.srv_heap, srv_slot)?;
            Ok(resource)
        });
        match created {
            Ok(resource) => {
                let texture = D3d12Texture {
                    resource,
                    srv_slot,
                    format,
                    width,
                    height,
                    mip_levels: mip_level_count(width, height),
                };
                state.textures.insert(&mut self.handles, texture)
            }
            Err(e) => {
                state.srv_slots.free(srv_slot);
                engine_error!(SOURCE, "CreateCommittedResource(texture {}x{} {:?}) failed: {}", width, height, format, e);
                Handle::NULL
            }
        }
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
        let expected = entry.format.image_size(w, h);
        if data.len() != expected {
            engine_warn!(SOURCE, "Mip {} of texture {} needs {} bytes, got {}", mip_level, texture, expected, data.len());
            return;
        }
        let bytes = if entry.format == TextureFormat::Rgb8 { expand_rgb8_to_rgba8(data) } else { data.to_vec() };
        let desc = ResourceDesc::texture_2d(entry.width, entry.height, entry.mip_levels, DxgiFormat::from_texture_format(entry.format));
        let Some(footprint) = texture_footprint(&desc, mip_level) else {
            return;
        };
        let resource = entry.resource.clone();

        let result = state.uploader.submit(&state.device, &pitch_rows(&bytes, &footprint), |list, staging| {
            list.resource_barrier(&resource, ResourceState::PixelShaderResource, ResourceState::CopyDest);
            list.copy_texture_region(&resource, mip_level, staging, 0);
            list.resource_barrier(&resource, ResourceState::CopyDest, ResourceState::PixelShaderResource);
        });
        if let Err(e) = result {
            engine_error!(SOURCE, "Upload of texture {} mip {} failed: {}", texture, mip_level, e);
        }
    }

    fn delete_texture(&mut self, texture: Handle) {
        let Some(state) = self.device.as_mut() else {
            return;
        };
        if let Some(entry) = state.textures.remove(texture) {
            for bound in state.bound_textures.iter_mut().filter(|bound| **bound == texture) {
                *bound = Handle::NULL;
            }
            state.frames.defer(DeferredRelease {
                resources: vec![entry.resource],
                srv_slot: Some(entry.srv_slot),
                ..Default::default()
            });
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
        if !state.textures.contains(texture) {
            return;
        }
        state.bound_textures[slot as usize] = texture;
        self.stats.texture_binds += 1;
    }

    fn create_shader(&mut self, vertex_source: &str, fragment_source: &str) -> Handle {
        let Some(state) = self.device.as_mut() else {
            return Handle::NULL;
        };
        match Self::build_program(&state.device, vertex_source, fragment_source) {
            Ok(program) => state.programs.insert(&mut self.handles, program),
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
        if state.programs.remove(shader).is_none() {
            return;
        }
        if state.current_program == shader {
            state.current_program = Handle::NULL;
        }
        let pipelines = state.pipelines.evict_program(shader);
        if !pipelines.is_empty() {
            state.frames.defer(DeferredRelease {
                pipelines,
                ..Default::default()
            });
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
        let D3d12Program { reflection, vertex_constants, pixel_constants, .. } = program;
        match reflection.write_uniform(name, data, vertex_constants, pixel_constants) {
            Ok(_) => {}
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
        let (vb, vb_size, ib, ib_size) = (vb.resource.clone(), vb.size, ib.resource.clone(), ib.size);
        if !state.recording {
            engine_warn!(SOURCE, "draw_indexed called outside begin_frame/end_frame; ignored");
            return;
        }
        if !Self::prepare_draw(state, self.fixed, topology) {
            return;
        }
        state.command_list.ia_set_vertex_buffer(&vb, vb_size, Vertex::STRIDE);
        state.command_list.ia_set_index_buffer(&ib, ib_size);
        state.command_list.draw_indexed_instanced(index_count);

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
        let (vb, vb_size) = (vb.resource.clone(), vb.size);
        if !state.recording {
            engine_warn!(SOURCE, "draw called outside begin_frame/end_frame; ignored");
            return;
        }
        if !Self::prepare_draw(state, self.fixed, topology) {
            return;
        }
        state.command_list.ia_set_vertex_buffer(&vb, vb_size, Vertex::STRIDE);
        state.command_list.draw_instanced(vertex_count);

        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_count as u64;
    }

    // Toggles select a pipeline state object at the next draw

    fn set_depth_test(&mut self, enabled: bool) {
        self.fixed.depth_test = enabled;
    }

    fn set_blending(&mut self, enabled: bool) {
        self.fixed.blending = enabled;
    }

    fn set_culling(&mut self, enabled: bool) {
        self.fixed.culling = enabled;
    }

    fn set_wireframe(&mut self, enabled: bool) {
        self.fixed.wireframe = enabled;
    }

    fn stats(&self) -> RenderStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    fn api(&self) -> RenderApi {
        RenderApi::DirectX12
    }
}

impl<D: D3d12Device> Drop for D3d12Renderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "d3d12_renderer_tests.rs"]
mod tests;
