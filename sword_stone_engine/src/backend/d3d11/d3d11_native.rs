//! Direct3D 11 through the `windows` crate

use std::ffi::{c_void, CString};

use raw_window_handle::RawWindowHandle;
use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::{E_POINTER, HMODULE, HWND, RECT};
use windows::Win32::Graphics::Direct3D::{
    ID3DBlob, D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_PRIMITIVE_TOPOLOGY,
    D3D_PRIMITIVE_TOPOLOGY_LINELIST, D3D_PRIMITIVE_TOPOLOGY_POINTLIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{
    IDXGIDevice, IDXGISwapChain, DXGI_PRESENT, DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_CHAIN_FLAG,
    DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::UI::WindowsAndMessaging::IsWindow;

use super::d3d11_device::*;
use crate::backend::hlsl_compiler;
use crate::renderer::{NativeWindow, Rect2D, RendererConfig, ShaderError, ShaderStage, StageReflection, Viewport};

pub struct NativeD3d11 {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain,
    _sampler: ID3D11SamplerState,
    description: String,
    size: (u32, u32),
}

// SAFETY: the immediate context is only used by the thread driving the
// renderer; the engine moves the renderer between threads behind a mutex
// and never shares it.
unsafe impl Send for NativeD3d11 {}

/// Out-parameter a successful call left empty
fn created<T>(object: Option<T>) -> Result<T, HResult> {
    object.ok_or(HResult::Other(E_POINTER.0))
}

fn usage(usage: Usage) -> D3D11_USAGE {
    match usage {
        Usage::Default => D3D11_USAGE_DEFAULT,
        Usage::Dynamic => D3D11_USAGE_DYNAMIC,
    }
}

fn bind_flags(bind: BindFlag) -> u32 {
    let flag = match bind {
        BindFlag::VertexBuffer => D3D11_BIND_VERTEX_BUFFER,
        BindFlag::IndexBuffer => D3D11_BIND_INDEX_BUFFER,
        BindFlag::ConstantBuffer => D3D11_BIND_CONSTANT_BUFFER,
    };
    flag.0 as u32
}

fn texture_bind_flags(bind: TextureBind) -> u32 {
    let flag = match bind {
        TextureBind::ShaderResource => D3D11_BIND_SHADER_RESOURCE,
        TextureBind::RenderTarget => D3D11_BIND_RENDER_TARGET,
        TextureBind::DepthStencil => D3D11_BIND_DEPTH_STENCIL,
    };
    flag.0 as u32
}

fn blend(factor: Blend) -> D3D11_BLEND {
    match factor {
        Blend::One => D3D11_BLEND_ONE,
        Blend::Zero => D3D11_BLEND_ZERO,
        Blend::SrcAlpha => D3D11_BLEND_SRC_ALPHA,
        Blend::InvSrcAlpha => D3D11_BLEND_INV_SRC_ALPHA,
    }
}

fn topology(topology: Topology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        Topology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        Topology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        Topology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        Topology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
    }
}

fn adapter_name(device: &ID3D11Device) -> Option<String> {
    let dxgi: IDXGIDevice = device.cast().ok()?;
    // SAFETY: plain COM queries on a live device
    let desc = unsafe { dxgi.GetAdapter().and_then(|adapter| adapter.GetDesc()) }.ok()?;
    let len = desc.Description.iter().position(|c| *c == 0).unwrap_or(desc.Description.len());
    Some(String::from_utf16_lossy(&desc.Description[..len]))
}

impl D3d11Device for NativeD3d11 {
    type Buffer = ID3D11Buffer;
    type Texture = ID3D11Texture2D;
    type ShaderResourceView = ID3D11ShaderResourceView;
    type RenderTargetView = ID3D11RenderTargetView;
    type DepthStencilView = ID3D11DepthStencilView;
    type RasterizerState = ID3D11RasterizerState;
    type DepthStencilState = ID3D11DepthStencilState;
    type BlendState = ID3D11BlendState;
    type VertexShader = ID3D11VertexShader;
    type PixelShader = ID3D11PixelShader;
    type InputLayout = ID3D11InputLayout;
    type Bytecode = ID3DBlob;

    fn create(window: &NativeWindow, width: u32, height: u32, config: &RendererConfig) -> Result<Self, HResult> {
        let RawWindowHandle::Win32(handle) = window.window else {
            return Err(HResult::Unsupported);
        };
        let hwnd = HWND(handle.hwnd.get() as _);
        // SAFETY: IsWindow accepts any value and only reads the handle table
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(HResult::InvalidArg);
        }

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC {
            BufferDesc: DXGI_MODE_DESC {
                Width: width,
                Height: height,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                ..Default::default()
            },
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: 2,
            OutputWindow: hwnd,
            Windowed: true.into(),
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            Flags: 0,
        };
        let flags = if config.enable_validation { D3D11_CREATE_DEVICE_DEBUG } else { D3D11_CREATE_DEVICE_FLAG(0) };

        let mut swap_chain = None;
        let mut device = None;
        let mut context = None;
        let mut feature_level = D3D_FEATURE_LEVEL::default();
        // SAFETY: every out-parameter is a live local and the HWND was checked above
        unsafe {
            D3D11CreateDeviceAndSwapChain(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                flags,
                Some(&[D3D_FEATURE_LEVEL_11_0]),
                D3D11_SDK_VERSION,
                Some(&swap_chain_desc),
                Some(&mut swap_chain),
                Some(&mut device),
                Some(&mut feature_level),
                Some(&mut context),
            )?;
        }
        let (device, context, swap_chain): (ID3D11Device, ID3D11DeviceContext, IDXGISwapChain) =
            (created(device)?, created(context)?, created(swap_chain)?);

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_WRAP,
            AddressV: D3D11_TEXTURE_ADDRESS_WRAP,
            AddressW: D3D11_TEXTURE_ADDRESS_WRAP,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            MaxLOD: D3D11_FLOAT32_MAX,
            ..Default::default()
        };
        let mut sampler = None;
        // SAFETY: valid descriptor and out-parameter
        unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler))? };
        let sampler = created(sampler)?;
        let samplers = vec![Some(sampler.clone()); PS_RESOURCE_SLOTS as usize];
        // SAFETY: the slice outlives the call; the context keeps its own references
        unsafe { context.PSSetSamplers(0, Some(&samplers)) };

        let description = format!(
            "{} (feature level {}.{})",
            adapter_name(&device).unwrap_or_else(|| "unknown adapter".to_string()),
            (feature_level.0 >> 12) & 0xF,
            (feature_level.0 >> 8) & 0xF
        );
        Ok(Self {
            device,
            context,
            swap_chain,
            _sampler: sampler,
            description,
            size: (width, height),
        })
    }

    fn describe(&self) -> String {
        self.description.clone()
    }

    fn compile(&self, stage: ShaderStage, source: &str) -> Result<(ID3DBlob, StageReflection), ShaderError> {
        hlsl_compiler::compile(stage, source)
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<ID3D11Buffer, HResult> {
        let byte_width = u32::try_from(desc.byte_width).map_err(|_| HResult::OutOfMemory)?;
        if matches!(initial_data, Some(data) if data.len() < desc.byte_width) {
            return Err(HResult::InvalidArg);
        }
        let native = D3D11_BUFFER_DESC {
            ByteWidth: byte_width,
            Usage: usage(desc.usage),
            BindFlags: bind_flags(desc.bind),
            CPUAccessFlags: if desc.cpu_write { D3D11_CPU_ACCESS_WRITE.0 as u32 } else { 0 },
            MiscFlags: 0,
            StructureByteStride: 0,
        };
        let initial = initial_data.map(|data| D3D11_SUBRESOURCE_DATA {
            pSysMem: data.as_ptr() as *const c_void,
            SysMemPitch: 0,
            SysMemSlicePitch: 0,
        });
        let mut buffer = None;
        // SAFETY: the initial data (checked to cover byte_width) outlives the call
        unsafe {
            self.device.CreateBuffer(
                &native,
                initial.as_ref().map(|d| d as *const D3D11_SUBRESOURCE_DATA),
                Some(&mut buffer),
            )?;
        }
        created(buffer)
    }

    fn create_texture_2d(&self, desc: &Texture2dDesc, initial_data: Option<&[u8]>) -> Result<ID3D11Texture2D, HResult> {
        let native = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: desc.mip_levels,
            ArraySize: 1,
            Format: desc.format.native(),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: texture_bind_flags(desc.bind),
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let row_pitch = desc.width * desc.format.bytes_per_pixel();
        if matches!(initial_data, Some(data) if data.len() != (row_pitch * desc.height) as usize) {
            return Err(HResult::InvalidArg);
        }
        let mut texture = None;
        // SAFETY: valid descriptor and out-parameter
        unsafe { self.device.CreateTexture2D(&native, None, Some(&mut texture))? };
        let texture = created(texture)?;
        // Initial data at creation must cover every mip, so level 0 is uploaded afterwards
        if let Some(data) = initial_data {
            // SAFETY: data holds row_pitch * height bytes (checked above)
            unsafe {
                self.context
                    .UpdateSubresource(&texture, 0, None, data.as_ptr() as *const c_void, row_pitch, 0)
            };
        }
        Ok(texture)
    }

    fn create_shader_resource_view(&self, texture: &ID3D11Texture2D) -> Result<ID3D11ShaderResourceView, HResult> {
        let mut view = None;
        // SAFETY: live resource, default view description
        unsafe { self.device.CreateShaderResourceView(texture, None, Some(&mut view))? };
        created(view)
    }

    fn create_depth_stencil_view(&self, texture: &ID3D11Texture2D) -> Result<ID3D11DepthStencilView, HResult> {
        let mut view = None;
        // SAFETY: live resource, default view description
        unsafe { self.device.CreateDepthStencilView(texture, None, Some(&mut view))? };
        created(view)
    }

    fn create_rasterizer_state(&self, desc: RasterizerDesc) -> Result<ID3D11RasterizerState, HResult> {
        let native = D3D11_RASTERIZER_DESC {
            FillMode: match desc.fill_mode {
                FillMode::Solid => D3D11_FILL_SOLID,
                FillMode::Wireframe => D3D11_FILL_WIREFRAME,
            },
            CullMode: match desc.cull_mode {
                CullMode::None => D3D11_CULL_NONE,
                CullMode::Back => D3D11_CULL_BACK,
            },
            // Counter-clockwise front faces, as in the OpenGL backend
            FrontCounterClockwise: true.into(),
            DepthClipEnable: true.into(),
            ScissorEnable: desc.scissor_enable.into(),
            ..Default::default()
        };
        let mut state = None;
        // SAFETY: valid descriptor and out-parameter
        unsafe { self.device.CreateRasterizerState(&native, Some(&mut state))? };
        created(state)
    }

    fn create_depth_stencil_state(&self, desc: DepthStencilDesc) -> Result<ID3D11DepthStencilState, HResult> {
        let native = D3D11_DEPTH_STENCIL_DESC {
            DepthEnable: desc.depth_enable.into(),
            DepthWriteMask: if desc.depth_write { D3D11_DEPTH_WRITE_MASK_ALL } else { D3D11_DEPTH_WRITE_MASK_ZERO },
            DepthFunc: D3D11_COMPARISON_LESS,
            ..Default::default()
        };
        let mut state = None;
        // SAFETY: valid descriptor and out-parameter
        unsafe { self.device.CreateDepthStencilState(&native, Some(&mut state))? };
        created(state)
    }

    fn create_blend_state(&self, desc: BlendDesc) -> Result<ID3D11BlendState, HResult> {
        let target = D3D11_RENDER_TARGET_BLEND_DESC {
            BlendEnable: desc.blend_enable.into(),
            SrcBlend: blend(desc.src_blend),
            DestBlend: blend(desc.dest_blend),
            BlendOp: D3D11_BLEND_OP_ADD,
            SrcBlendAlpha: D3D11_BLEND_ONE,
            DestBlendAlpha: blend(desc.dest_blend),
            BlendOpAlpha: D3D11_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };
        let native = D3D11_BLEND_DESC {
            AlphaToCoverageEnable: false.into(),
            IndependentBlendEnable: false.into(),
            RenderTarget: [target; 8],
        };
        let mut state = None;
        // SAFETY: valid descriptor and out-parameter
        unsafe { self.device.CreateBlendState(&native, Some(&mut state))? };
        created(state)
    }

    fn create_vertex_shader(&self, code: &ID3DBlob) -> Result<ID3D11VertexShader, HResult> {
        let mut shader = None;
        // SAFETY: bytecode produced by D3DCompile, borrowed for the call
        unsafe { self.device.CreateVertexShader(hlsl_compiler::blob_bytes(code), None, Some(&mut shader))? };
        created(shader)
    }

    fn create_pixel_shader(&self, code: &ID3DBlob) -> Result<ID3D11PixelShader, HResult> {
        let mut shader = None;
        // SAFETY: bytecode produced by D3DCompile, borrowed for the call
        unsafe { self.device.CreatePixelShader(hlsl_compiler::blob_bytes(code), None, Some(&mut shader))? };
        created(shader)
    }

    fn create_input_layout(&self, elements: &[InputElementDesc], code: &ID3DBlob) -> Result<ID3D11InputLayout, HResult> {
        let names = elements
            .iter()
            .map(|e| CString::new(e.semantic).map_err(|_| HResult::InvalidArg))
            .collect::<Result<Vec<_>, _>>()?;
        let native = elements
            .iter()
            .zip(&names)
            .map(|(element, name)| {
                Ok(D3D11_INPUT_ELEMENT_DESC {
                    SemanticName: PCSTR(name.as_ptr() as *const u8),
                    SemanticIndex: 0,
                    Format: element.native_format()?,
                    InputSlot: 0,
                    AlignedByteOffset: element.offset,
                    InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                    InstanceDataStepRate: 0,
                })
            })
            .collect::<Result<Vec<_>, HResult>>()?;
        let mut layout = None;
        // SAFETY: the semantic names outlive the call
        unsafe {
            self.device
                .CreateInputLayout(&native, hlsl_compiler::blob_bytes(code), Some(&mut layout))?
        };
        created(layout)
    }

    fn ia_set_vertex_buffer(&mut self, buffer: Option<&ID3D11Buffer>, stride: u32) {
        let buffers = [buffer.cloned()];
        let offset = 0u32;
        // SAFETY: the arrays live until the call returns
        unsafe {
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(buffers.as_ptr()),
                Some(&stride as *const u32),
                Some(&offset as *const u32),
            )
        };
    }

    fn ia_set_index_buffer(&mut self, buffer: Option<&ID3D11Buffer>) {
        // SAFETY: plain state setter
        unsafe { self.context.IASetIndexBuffer(buffer, DXGI_FORMAT_R32_UINT, 0) };
    }

    fn ia_set_input_layout(&mut self, layout: Option<&ID3D11InputLayout>) {
        // SAFETY: plain state setter
        unsafe { self.context.IASetInputLayout(layout) };
    }

    fn ia_set_primitive_topology(&mut self, value: Topology) {
        // SAFETY: plain state setter
        unsafe { self.context.IASetPrimitiveTopology(topology(value)) };
    }

    fn vs_set_shader(&mut self, shader: Option<&ID3D11VertexShader>) {
        // SAFETY: plain state setter
        unsafe { self.context.VSSetShader(shader, None) };
    }

    fn ps_set_shader(&mut self, shader: Option<&ID3D11PixelShader>) {
        // SAFETY: plain state setter
        unsafe { self.context.PSSetShader(shader, None) };
    }

    fn vs_set_constant_buffer(&mut self, buffer: Option<&ID3D11Buffer>) {
        // SAFETY: plain state setter
        unsafe { self.context.VSSetConstantBuffers(0, Some(&[buffer.cloned()])) };
    }

    fn ps_set_constant_buffer(&mut self, buffer: Option<&ID3D11Buffer>) {
        // SAFETY: plain state setter
        unsafe { self.context.PSSetConstantBuffers(0, Some(&[buffer.cloned()])) };
    }

    fn ps_set_shader_resource(&mut self, slot: u32, view: Option<&ID3D11ShaderResourceView>) {
        // SAFETY: plain state setter
        unsafe { self.context.PSSetShaderResources(slot, Some(&[view.cloned()])) };
    }

    fn rs_set_state(&mut self, state: &ID3D11RasterizerState) {
        // SAFETY: plain state setter
        unsafe { self.context.RSSetState(state) };
    }

    fn rs_set_viewport(&mut self, viewport: Viewport) {
        let native = D3D11_VIEWPORT {
            TopLeftX: viewport.x as f32,
            TopLeftY: viewport.y as f32,
            Width: viewport.width as f32,
            Height: viewport.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        // SAFETY: plain state setter
        unsafe { self.context.RSSetViewports(Some(&[native])) };
    }

    fn rs_set_scissor_rect(&mut self, rect: Rect2D) {
        let native = RECT {
            left: rect.x,
            top: rect.y,
            right: rect.x.saturating_add(rect.width as i32),
            bottom: rect.y.saturating_add(rect.height as i32),
        };
        // SAFETY: plain state setter
        unsafe { self.context.RSSetScissorRects(Some(&[native])) };
    }

    fn om_set_depth_stencil_state(&mut self, state: &ID3D11DepthStencilState) {
        // SAFETY: plain state setter
        unsafe { self.context.OMSetDepthStencilState(state, 0) };
    }

    fn om_set_blend_state(&mut self, state: &ID3D11BlendState) {
        // SAFETY: plain state setter
        unsafe { self.context.OMSetBlendState(state, None, u32::MAX) };
    }

    fn om_set_render_targets(&mut self, target: Option<&ID3D11RenderTargetView>, depth: Option<&ID3D11DepthStencilView>) {
        // SAFETY: plain state setter
        unsafe {
            match target {
                Some(target) => self.context.OMSetRenderTargets(Some(&[Some(target.clone())]), depth),
                None => self.context.OMSetRenderTargets(None, depth),
            }
        };
    }

    fn clear_render_target_view(&mut self, view: &ID3D11RenderTargetView, color: [f32; 4]) {
        // SAFETY: color lives for the call
        unsafe { self.context.ClearRenderTargetView(view, &color) };
    }

    fn clear_depth_stencil_view(&mut self, view: &ID3D11DepthStencilView, clear_depth: bool, clear_stencil: bool) {
        let mut flags = 0u32;
        if clear_depth {
            flags |= D3D11_CLEAR_DEPTH.0 as u32;
        }
        if clear_stencil {
            flags |= D3D11_CLEAR_STENCIL.0 as u32;
        }
        if flags != 0 {
            // SAFETY: live view
            unsafe { self.context.ClearDepthStencilView(view, flags, 1.0, 0) };
        }
    }

    fn map_write(&mut self, buffer: &ID3D11Buffer, map_type: MapType, offset: usize, data: &[u8]) -> Result<(), HResult> {
        let map = match map_type {
            MapType::WriteDiscard => D3D11_MAP_WRITE_DISCARD,
            MapType::WriteNoOverwrite => D3D11_MAP_WRITE_NO_OVERWRITE,
        };
        let mut desc = D3D11_BUFFER_DESC::default();
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        // SAFETY: the write stays inside ByteWidth (checked before copying) and
        // the pointer is only used between Map and Unmap.
        unsafe {
            buffer.GetDesc(&mut desc);
            if offset.saturating_add(data.len()) > desc.ByteWidth as usize {
                return Err(HResult::InvalidArg);
            }
            self.context
                .Map(buffer, 0, map, 0, Some(&mut mapped as *mut D3D11_MAPPED_SUBRESOURCE))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), (mapped.pData as *mut u8).add(offset), data.len());
            self.context.Unmap(buffer, 0);
        }
        Ok(())
    }

    fn update_subresource(&mut self, buffer: &ID3D11Buffer, data: &[u8]) -> Result<(), HResult> {
        let mut desc = D3D11_BUFFER_DESC::default();
        // SAFETY: data covers the whole buffer (checked)
        unsafe {
            buffer.GetDesc(&mut desc);
            if data.len() != desc.ByteWidth as usize {
                return Err(HResult::InvalidArg);
            }
            self.context
                .UpdateSubresource(buffer, 0, None, data.as_ptr() as *const c_void, 0, 0);
        }
        Ok(())
    }

    fn update_texture_subresource(&mut self, texture: &ID3D11Texture2D, mip: u32, row_pitch: u32, data: &[u8]) -> Result<(), HResult> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        // SAFETY: data holds row_pitch bytes for every row of the mip (checked)
        unsafe {
            texture.GetDesc(&mut desc);
            if mip >= desc.MipLevels {
                return Err(HResult::InvalidArg);
            }
            let rows = (desc.Height >> mip).max(1) as usize;
            if data.len() != rows * row_pitch as usize {
                return Err(HResult::InvalidArg);
            }
            self.context
                .UpdateSubresource(texture, mip, None, data.as_ptr() as *const c_void, row_pitch, 0);
        }
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) {
        // SAFETY: draw with the bound pipeline
        unsafe { self.context.Draw(vertex_count, start_vertex) };
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32) {
        // SAFETY: draw with the bound pipeline
        unsafe { self.context.DrawIndexed(index_count, start_index, 0) };
    }

    fn clear_state(&mut self) {
        // SAFETY: unbinds every object from the context
        unsafe {
            self.context.ClearState();
            self.context.Flush();
        }
    }

    fn back_buffer_view(&mut self) -> Result<ID3D11RenderTargetView, HResult> {
        let mut view = None;
        // SAFETY: GetBuffer(0) of a live swap chain, default view description
        unsafe {
            let back_buffer: ID3D11Texture2D = self.swap_chain.GetBuffer(0)?;
            self.device.CreateRenderTargetView(&back_buffer, None, Some(&mut view))?;
        }
        created(view)
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), HResult> {
        // SAFETY: the renderer released every back-buffer view before calling
        unsafe {
            self.context.Flush();
            self.swap_chain
                .ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))?;
        }
        self.size = (width, height);
        Ok(())
    }

    fn present(&mut self, sync_interval: u32) -> Result<(), HResult> {
        // SAFETY: plain present of a live swap chain
        unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)).ok()? };
        Ok(())
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        self.size
    }
}
