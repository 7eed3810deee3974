//! Direct3D 12 through the `windows` crate

use std::ffi::CString;
use std::mem::ManuallyDrop;

use raw_window_handle::RawWindowHandle;
use windows::core::{Interface, PCSTR, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, E_POINTER, HANDLE, HWND, RECT};
use windows::Win32::Graphics::Direct3D::{
    ID3DBlob, D3D_FEATURE_LEVEL_11_0, D3D_PRIMITIVE_TOPOLOGY, D3D_PRIMITIVE_TOPOLOGY_LINELIST,
    D3D_PRIMITIVE_TOPOLOGY_POINTLIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIAdapter1, IDXGIFactory4, IDXGISwapChain3, DXGI_CREATE_FACTORY_DEBUG,
    DXGI_CREATE_FACTORY_FLAGS, DXGI_PRESENT, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_FLIP_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
use windows::Win32::UI::WindowsAndMessaging::IsWindow;

use super::d3d12_device::*;
use crate::backend::hlsl_compiler;
use crate::renderer::{NativeWindow, Rect2D, RendererConfig, ShaderError, ShaderStage, StageReflection, Viewport};

pub struct NativeD3d12 {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    info_queue: Option<ID3D12InfoQueue>,
    description: String,
    size: (u32, u32),
}

// SAFETY: the device, queue and swap chain are free-threaded COM objects;
// the renderer drives them from one thread at a time.
unsafe impl Send for NativeD3d12 {}

/// Descriptor heap with its handle increment
pub struct NativeDescriptorHeap {
    heap: ID3D12DescriptorHeap,
    increment: u32,
    capacity: u32,
}

impl NativeDescriptorHeap {
    fn cpu(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        // SAFETY: plain query on a live heap
        let start = unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (index * self.increment) as usize,
        }
    }

    fn gpu(&self, index: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        // SAFETY: plain query on a live shader-visible heap
        let start = unsafe { self.heap.GetGPUDescriptorHandleForHeapStart() };
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (index * self.increment) as u64,
        }
    }

    fn checked(&self, index: u32) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE, HResult> {
        if index >= self.capacity {
            return Err(HResult::InvalidArg);
        }
        Ok(self.cpu(index))
    }
}

/// Fence with the event its waits block on
pub struct NativeFence {
    fence: ID3D12Fence,
    event: HANDLE,
}

impl Drop for NativeFence {
    fn drop(&mut self) {
        // SAFETY: the event was created with the fence and is closed once
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

pub struct NativeCommandList {
    list: ID3D12GraphicsCommandList,
    /// For copyable footprints of texture copies
    device: ID3D12Device,
}

/// Out-parameter a successful call left empty
fn created<T>(object: Option<T>) -> Result<T, HResult> {
    object.ok_or(HResult::Other(E_POINTER.0))
}

/// Borrow a COM pointer into a descriptor field without an extra reference
fn borrowed<T: Interface>(object: &T) -> ManuallyDrop<Option<T>> {
    // SAFETY: Option<T> has the layout of T's interface pointer and the copy
    // is never dropped, so the reference count stays untouched
    unsafe { std::mem::transmute_copy(object) }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::VertexAndConstantBuffer => D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
    }
}

fn heap_type(kind: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorHeapType::CbvSrv => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    }
}

fn topology(value: Topology) -> D3D_PRIMITIVE_TOPOLOGY {
    match value {
        Topology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        Topology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        Topology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        Topology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

fn topology_type(value: TopologyType) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match value {
        TopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        TopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        TopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.allow_render_target {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if desc.allow_depth_stencil {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    let (dimension, layout) = match desc.dimension {
        ResourceDimension::Buffer => (D3D12_RESOURCE_DIMENSION_BUFFER, D3D12_TEXTURE_LAYOUT_ROW_MAJOR),
        ResourceDimension::Texture2d => (D3D12_RESOURCE_DIMENSION_TEXTURE2D, D3D12_TEXTURE_LAYOUT_UNKNOWN),
    };
    D3D12_RESOURCE_DESC {
        Dimension: dimension,
        Alignment: 0,
        Width: desc.width,
        Height: desc.height,
        DepthOrArraySize: 1,
        MipLevels: desc.mip_levels as u16,
        Format: desc.format.map(DxgiFormat::native).unwrap_or(DXGI_FORMAT_UNKNOWN),
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: layout,
        Flags: flags,
    }
}

fn transition(resource: &ID3D12Resource, before: ResourceState, after: ResourceState) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: borrowed(resource),
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: resource_state(before),
                StateAfter: resource_state(after),
            }),
        },
    }
}

fn adapter_name(adapter: &IDXGIAdapter1) -> Option<String> {
    // SAFETY: plain query on a live adapter
    let desc = unsafe { adapter.GetDesc1() }.ok()?;
    let len = desc.Description.iter().position(|c| *c == 0).unwrap_or(desc.Description.len());
    Some(String::from_utf16_lossy(&desc.Description[..len]))
}

impl D3d12Device for NativeD3d12 {
    type Resource = ID3D12Resource;
    type DescriptorHeap = NativeDescriptorHeap;
    type RootSignature = ID3D12RootSignature;
    type PipelineState = ID3D12PipelineState;
    type CommandAllocator = ID3D12CommandAllocator;
    type CommandList = NativeCommandList;
    type Fence = NativeFence;
    type Bytecode = ID3DBlob;

    fn create(window: &NativeWindow, width: u32, height: u32, buffer_count: u32, config: &RendererConfig) -> Result<Self, HResult> {
        let RawWindowHandle::Win32(handle) = window.window else {
            return Err(HResult::Unsupported);
        };
        let hwnd = HWND(handle.hwnd.get() as _);
        // SAFETY: IsWindow accepts any value and only reads the handle table
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(HResult::InvalidArg);
        }
        if width == 0 || height == 0 {
            return Err(HResult::InvalidArg);
        }

        if config.enable_validation {
            let mut debug: Option<ID3D12Debug> = None;
            // SAFETY: out-parameter is a live local; the debug layer must be on before the device exists
            if unsafe { D3D12GetDebugInterface(&mut debug) }.is_ok() {
                if let Some(debug) = debug {
                    // SAFETY: live debug interface
                    unsafe { debug.EnableDebugLayer() };
                }
            }
        }
        let factory_flags = if config.enable_validation { DXGI_CREATE_FACTORY_DEBUG } else { DXGI_CREATE_FACTORY_FLAGS(0) };
        // SAFETY: plain factory creation
        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(factory_flags)? };
        // SAFETY: adapter 0 is the default adapter
        let adapter: IDXGIAdapter1 = unsafe { factory.EnumAdapters1(0)? };

        let mut device: Option<ID3D12Device> = None;
        // SAFETY: out-parameter is a live local
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)? };
        let device = created(device)?;

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        // SAFETY: valid descriptor
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc)? };

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: width,
            Height: height,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };
        // SAFETY: the queue is live and the HWND was checked above
        let swap_chain: IDXGISwapChain3 =
            unsafe { factory.CreateSwapChainForHwnd(&queue, hwnd, &swap_chain_desc, None, None)? }.cast()?;

        let info_queue = if config.enable_validation { device.cast::<ID3D12InfoQueue>().ok() } else { None };
        let description = format!(
            "{} (Direct3D 12, {} buffers)",
            adapter_name(&adapter).unwrap_or_else(|| "unknown adapter".to_string()),
            buffer_count
        );
        Ok(Self {
            device,
            queue,
            swap_chain,
            info_queue,
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

    fn take_debug_messages(&self) -> Vec<String> {
        let Some(info_queue) = &self.info_queue else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        // SAFETY: each message is read into a buffer of the length the first
        // GetMessage call reports, aligned for D3D12_MESSAGE
        unsafe {
            for index in 0..info_queue.GetNumStoredMessages() {
                let mut length = 0usize;
                if info_queue.GetMessage(index, None, &mut length).is_err() {
                    continue;
                }
                let mut storage = vec![0u64; length.div_ceil(8)];
                let message = storage.as_mut_ptr() as *mut D3D12_MESSAGE;
                if info_queue.GetMessage(index, Some(message), &mut length).is_err() {
                    continue;
                }
                let message = &*message;
                if message.Severity.0 > D3D12_MESSAGE_SEVERITY_ERROR.0 {
                    continue;
                }
                let text = std::slice::from_raw_parts(message.pDescription, message.DescriptionByteLength);
                messages.push(String::from_utf8_lossy(text).trim_end_matches('\0').to_string());
            }
            info_queue.ClearStoredMessages();
        }
        messages
    }

    fn create_command_allocator(&self) -> Result<ID3D12CommandAllocator, HResult> {
        // SAFETY: plain creation call
        Ok(unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? })
    }

    fn create_command_list(&self, allocator: &ID3D12CommandAllocator) -> Result<NativeCommandList, HResult> {
        // SAFETY: the allocator is live and not recording
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, allocator, None::<&ID3D12PipelineState>)?
        };
        Ok(NativeCommandList {
            list,
            device: self.device.clone(),
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, HResult> {
        // SAFETY: plain creation calls; the event is owned by the returned fence
        unsafe {
            let fence: ID3D12Fence = self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)?;
            let event = CreateEventW(None, false, false, PCWSTR::null())?;
            Ok(NativeFence { fence, event })
        }
    }

    fn create_descriptor_heap(&self, kind: DescriptorHeapType, capacity: u32, shader_visible: bool) -> Result<NativeDescriptorHeap, HResult> {
        if shader_visible && kind != DescriptorHeapType::CbvSrv {
            return Err(HResult::InvalidArg);
        }
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type(kind),
            NumDescriptors: capacity,
            Flags: if shader_visible { D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE } else { D3D12_DESCRIPTOR_HEAP_FLAG_NONE },
            NodeMask: 0,
        };
        // SAFETY: valid descriptor
        unsafe {
            let heap: ID3D12DescriptorHeap = self.device.CreateDescriptorHeap(&desc)?;
            let increment = self.device.GetDescriptorHandleIncrementSize(heap_type(kind));
            Ok(NativeDescriptorHeap { heap, increment, capacity })
        }
    }

    fn create_committed_resource(&self, heap: HeapType, desc: &ResourceDesc, initial_state: ResourceState) -> Result<ID3D12Resource, HResult> {
        let properties = D3D12_HEAP_PROPERTIES {
            Type: match heap {
                HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
                HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
            },
            ..Default::default()
        };
        let native = resource_desc(desc);
        let clear_value = desc.allow_depth_stencil.then(|| D3D12_CLEAR_VALUE {
            Format: native.Format,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
            },
        });
        let mut resource: Option<ID3D12Resource> = None;
        // SAFETY: every pointer refers to a live local for the duration of the call
        unsafe {
            self.device.CreateCommittedResource(
                &properties,
                D3D12_HEAP_FLAG_NONE,
                &native,
                resource_state(initial_state),
                clear_value.as_ref().map(|v| v as *const D3D12_CLEAR_VALUE),
                &mut resource,
            )?;
        }
        created(resource)
    }

    fn create_render_target_view(&self, resource: &ID3D12Resource, heap: &NativeDescriptorHeap, index: u32) -> Result<(), HResult> {
        let handle = heap.checked(index)?;
        // SAFETY: live resource, handle inside the heap
        unsafe { self.device.CreateRenderTargetView(resource, None, handle) };
        Ok(())
    }

    fn create_depth_stencil_view(&self, resource: &ID3D12Resource, heap: &NativeDescriptorHeap, index: u32) -> Result<(), HResult> {
        let handle = heap.checked(index)?;
        // SAFETY: live resource, handle inside the heap
        unsafe { self.device.CreateDepthStencilView(resource, None, handle) };
        Ok(())
    }

    fn create_shader_resource_view(&self, resource: &ID3D12Resource, heap: &NativeDescriptorHeap, index: u32) -> Result<(), HResult> {
        let handle = heap.checked(index)?;
        // SAFETY: live resource, handle inside the heap; the default view covers every mip
        unsafe { self.device.CreateShaderResourceView(resource, None, handle) };
        Ok(())
    }

    fn create_root_signature(&self, desc: RootSignatureDesc) -> Result<ID3D12RootSignature, HResult> {
        let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = (0..desc.srv_tables)
            .map(|register| D3D12_DESCRIPTOR_RANGE {
                RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                NumDescriptors: 1,
                BaseShaderRegister: register,
                RegisterSpace: 0,
                OffsetInDescriptorsFromTableStart: 0,
            })
            .collect();
        let constants = |visibility: D3D12_SHADER_VISIBILITY| D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Descriptor: D3D12_ROOT_DESCRIPTOR { ShaderRegister: 0, RegisterSpace: 0 },
            },
            ShaderVisibility: visibility,
        };
        let mut parameters = vec![constants(D3D12_SHADER_VISIBILITY_VERTEX), constants(D3D12_SHADER_VISIBILITY_PIXEL)];
        parameters.extend(ranges.iter().map(|range| D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        }));
        let sampler = D3D12_STATIC_SAMPLER_DESC {
            Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
            ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
            MaxLOD: D3D12_FLOAT32_MAX,
            ShaderRegister: 0,
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
            ..Default::default()
        };
        let native = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 1,
            pStaticSamplers: &sampler,
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        // SAFETY: ranges, parameters and sampler outlive the call
        unsafe {
            if let Err(e) = D3D12SerializeRootSignature(&native, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut error)) {
                if let Some(error) = &error {
                    log::error!(
                        "D3D12SerializeRootSignature: {}",
                        String::from_utf8_lossy(hlsl_compiler::blob_bytes(error))
                    );
                }
                return Err(e.into());
            }
            let blob = created(blob)?;
            Ok(self.device.CreateRootSignature(0, hlsl_compiler::blob_bytes(&blob))?)
        }
    }

    fn create_graphics_pipeline_state(&self, desc: &GraphicsPipelineDesc<'_, Self>) -> Result<ID3D12PipelineState, HResult> {
        let names = desc
            .input_layout
            .iter()
            .map(|e| CString::new(e.semantic).map_err(|_| HResult::InvalidArg))
            .collect::<Result<Vec<_>, _>>()?;
        let elements = desc
            .input_layout
            .iter()
            .zip(&names)
            .map(|(element, name)| {
                Ok(D3D12_INPUT_ELEMENT_DESC {
                    SemanticName: PCSTR(name.as_ptr() as *const u8),
                    SemanticIndex: 0,
                    Format: element.native_format()?,
                    InputSlot: 0,
                    AlignedByteOffset: element.offset,
                    InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                    InstanceDataStepRate: 0,
                })
            })
            .collect::<Result<Vec<_>, HResult>>()?;

        let bytecode = |blob: &ID3DBlob| {
            let bytes = hlsl_compiler::blob_bytes(blob);
            D3D12_SHADER_BYTECODE {
                pShaderBytecode: bytes.as_ptr() as *const _,
                BytecodeLength: bytes.len(),
            }
        };
        let mut blend = D3D12_BLEND_DESC::default();
        blend.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: desc.blend.blend_enable.into(),
            SrcBlend: D3D12_BLEND_SRC_ALPHA,
            DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_INV_SRC_ALPHA,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            ..Default::default()
        };
        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = desc.rtv_format.native();

        let native = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: borrowed(desc.root_signature),
            VS: bytecode(desc.vs),
            PS: bytecode(desc.ps),
            BlendState: blend,
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: match desc.rasterizer.fill_mode {
                    FillMode::Solid => D3D12_FILL_MODE_SOLID,
                    FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
                },
                CullMode: match desc.rasterizer.cull_mode {
                    CullMode::None => D3D12_CULL_MODE_NONE,
                    CullMode::Back => D3D12_CULL_MODE_BACK,
                },
                // Counter-clockwise front faces, as in the OpenGL backend
                FrontCounterClockwise: true.into(),
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: desc.depth_stencil.depth_enable.into(),
                DepthWriteMask: if desc.depth_stencil.depth_write {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: D3D12_COMPARISON_FUNC_LESS,
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: elements.as_ptr(),
                NumElements: elements.len() as u32,
            },
            PrimitiveTopologyType: topology_type(desc.topology_type),
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            DSVFormat: desc.dsv_format.native(),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        // SAFETY: bytecode, semantic names and elements outlive the call
        Ok(unsafe { self.device.CreateGraphicsPipelineState(&native)? })
    }

    fn write_buffer(&self, resource: &ID3D12Resource, offset: u64, data: &[u8]) -> Result<(), HResult> {
        // SAFETY: the write stays inside the buffer (checked before copying)
        // and the pointer is only used between Map and Unmap
        unsafe {
            let desc = resource.GetDesc();
            if desc.Dimension != D3D12_RESOURCE_DIMENSION_BUFFER
                || offset.saturating_add(data.len() as u64) > desc.Width
            {
                return Err(HResult::InvalidArg);
            }
            let no_reads = D3D12_RANGE { Begin: 0, End: 0 };
            let mut mapped: *mut std::ffi::c_void = std::ptr::null_mut();
            resource.Map(0, Some(&no_reads), Some(&mut mapped))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), (mapped as *mut u8).add(offset as usize), data.len());
            let written = D3D12_RANGE {
                Begin: offset as usize,
                End: offset as usize + data.len(),
            };
            resource.Unmap(0, Some(&written));
        }
        Ok(())
    }

    fn reset_command_allocator(&self, allocator: &ID3D12CommandAllocator) -> Result<(), HResult> {
        // SAFETY: the caller guarantees the GPU finished every list recorded from it
        unsafe { allocator.Reset()? };
        Ok(())
    }

    fn execute_command_list(&self, list: &mut NativeCommandList) -> Result<(), HResult> {
        let list: ID3D12CommandList = list.list.cast()?;
        // SAFETY: closed list on the queue's own device
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn signal(&self, fence: &NativeFence, value: u64) -> Result<(), HResult> {
        // SAFETY: live queue and fence
        unsafe { self.queue.Signal(&fence.fence, value)? };
        Ok(())
    }

    fn completed_value(&self, fence: &NativeFence) -> u64 {
        // SAFETY: plain query
        unsafe { fence.fence.GetCompletedValue() }
    }

    fn wait_for_fence(&self, fence: &NativeFence, value: u64) -> Result<(), HResult> {
        // SAFETY: the event belongs to the fence and outlives the wait
        unsafe {
            if fence.fence.GetCompletedValue() < value {
                fence.fence.SetEventOnCompletion(value, fence.event)?;
                WaitForSingleObject(fence.event, INFINITE);
            }
        }
        Ok(())
    }

    fn back_buffer(&self, index: u32) -> Result<ID3D12Resource, HResult> {
        // SAFETY: plain query on a live swap chain
        Ok(unsafe { self.swap_chain.GetBuffer(index)? })
    }

    fn current_back_buffer_index(&self) -> u32 {
        // SAFETY: plain query
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn present(&mut self, sync_interval: u32) -> Result<(), HResult> {
        // SAFETY: plain present of a live swap chain
        unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)).ok()? };
        Ok(())
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), HResult> {
        // SAFETY: the renderer drained the queue and dropped its back-buffer references
        unsafe {
            self.swap_chain
                .ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))?;
        }
        self.size = (width, height);
        Ok(())
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        self.size
    }
}

impl D3d12CommandList<NativeD3d12> for NativeCommandList {
    fn reset(&mut self, allocator: &ID3D12CommandAllocator) -> Result<(), HResult> {
        // SAFETY: the list is closed and the allocator was reset by the caller
        unsafe { self.list.Reset(allocator, None::<&ID3D12PipelineState>)? };
        Ok(())
    }

    fn close(&mut self) -> Result<(), HResult> {
        // SAFETY: plain call on a recording list
        unsafe { self.list.Close()? };
        Ok(())
    }

    fn resource_barrier(&mut self, resource: &ID3D12Resource, before: ResourceState, after: ResourceState) {
        if before == after {
            return;
        }
        // SAFETY: the barrier borrows a live resource for the duration of the call
        unsafe { self.list.ResourceBarrier(&[transition(resource, before, after)]) };
    }

    fn copy_buffer_region(&mut self, dst: &ID3D12Resource, dst_offset: u64, src: &ID3D12Resource, src_offset: u64, size: u64) {
        // SAFETY: both resources are live; the renderer checked the ranges
        unsafe { self.list.CopyBufferRegion(dst, dst_offset, src, src_offset, size) };
    }

    fn copy_texture_region(&mut self, dst: &ID3D12Resource, mip: u32, src: &ID3D12Resource, src_offset: u64) {
        let mut footprint = D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default();
        // SAFETY: the copy locations borrow live resources for the duration of the calls
        unsafe {
            let desc = dst.GetDesc();
            self.device
                .GetCopyableFootprints(&desc, mip, 1, src_offset, Some(&mut footprint), None, None, None);
            let dst_location = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(dst),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: mip },
            };
            let src_location = D3D12_TEXTURE_COPY_LOCATION {
                pResource: borrowed(src),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { PlacedFootprint: footprint },
            };
            self.list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
    }

    fn clear_render_target_view(&mut self, heap: &NativeDescriptorHeap, index: u32, color: [f32; 4]) {
        // SAFETY: handle inside the heap; the color outlives the call
        unsafe { self.list.ClearRenderTargetView(heap.cpu(index), &color, None) };
    }

    fn clear_depth_stencil_view(&mut self, heap: &NativeDescriptorHeap, index: u32, clear_depth: bool, clear_stencil: bool) {
        let mut flags = D3D12_CLEAR_FLAGS(0);
        if clear_depth {
            flags |= D3D12_CLEAR_FLAG_DEPTH;
        }
        if clear_stencil {
            flags |= D3D12_CLEAR_FLAG_STENCIL;
        }
        if flags.0 != 0 {
            // SAFETY: handle inside the heap
            unsafe { self.list.ClearDepthStencilView(heap.cpu(index), flags, 1.0, 0, &[]) };
        }
    }

    fn set_descriptor_heap(&mut self, heap: &NativeDescriptorHeap) {
        // SAFETY: the heap outlives every list that references it
        unsafe { self.list.SetDescriptorHeaps(&[Some(heap.heap.clone())]) };
    }

    fn set_graphics_root_signature(&mut self, root_signature: &ID3D12RootSignature) {
        // SAFETY: plain state setter
        unsafe { self.list.SetGraphicsRootSignature(root_signature) };
    }

    fn set_pipeline_state(&mut self, pipeline: &ID3D12PipelineState) {
        // SAFETY: plain state setter
        unsafe { self.list.SetPipelineState(pipeline) };
    }

    fn set_graphics_root_constant_buffer_view(&mut self, stage: ShaderStage, buffer: &ID3D12Resource, offset: u64) {
        let parameter = match stage {
            ShaderStage::Vertex => ROOT_VERTEX_CONSTANTS,
            ShaderStage::Fragment => ROOT_PIXEL_CONSTANTS,
        };
        // SAFETY: the buffer stays alive until the frame retires
        unsafe {
            let address = buffer.GetGPUVirtualAddress() + offset;
            self.list.SetGraphicsRootConstantBufferView(parameter, address);
        }
    }

    fn set_graphics_root_descriptor_table(&mut self, slot: u32, heap: &NativeDescriptorHeap, index: u32) {
        // SAFETY: handle inside the bound shader-visible heap
        unsafe { self.list.SetGraphicsRootDescriptorTable(ROOT_FIRST_SRV_TABLE + slot, heap.gpu(index)) };
    }

    fn ia_set_primitive_topology(&mut self, value: Topology) {
        // SAFETY: plain state setter
        unsafe { self.list.IASetPrimitiveTopology(topology(value)) };
    }

    fn ia_set_vertex_buffer(&mut self, buffer: &ID3D12Resource, size: u64, stride: u32) {
        // SAFETY: the view is copied by the call
        unsafe {
            let view = D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: buffer.GetGPUVirtualAddress(),
                SizeInBytes: size as u32,
                StrideInBytes: stride,
            };
            self.list.IASetVertexBuffers(0, Some(&[view]));
        }
    }

    fn ia_set_index_buffer(&mut self, buffer: &ID3D12Resource, size: u64) {
        // SAFETY: the view is copied by the call
        unsafe {
            let view = D3D12_INDEX_BUFFER_VIEW {
                BufferLocation: buffer.GetGPUVirtualAddress(),
                SizeInBytes: size as u32,
                Format: DXGI_FORMAT_R32_UINT,
            };
            self.list.IASetIndexBuffer(Some(&view));
        }
    }

    fn om_set_render_targets(&mut self, rtv: (&NativeDescriptorHeap, u32), dsv: Option<(&NativeDescriptorHeap, u32)>) {
        let target = rtv.0.cpu(rtv.1);
        let depth = dsv.map(|(heap, index)| heap.cpu(index));
        // SAFETY: both handles are read during the call
        unsafe {
            self.list.OMSetRenderTargets(
                1,
                Some(&target as *const D3D12_CPU_DESCRIPTOR_HANDLE),
                false,
                depth.as_ref().map(|d| d as *const D3D12_CPU_DESCRIPTOR_HANDLE),
            )
        };
    }

    fn rs_set_viewport(&mut self, viewport: Viewport) {
        let native = D3D12_VIEWPORT {
            TopLeftX: viewport.x as f32,
            TopLeftY: viewport.y as f32,
            Width: viewport.width as f32,
            Height: viewport.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        // SAFETY: plain state setter
        unsafe { self.list.RSSetViewports(&[native]) };
    }

    fn rs_set_scissor_rect(&mut self, rect: Rect2D) {
        let native = RECT {
            left: rect.x,
            top: rect.y,
            right: rect.x.saturating_add(rect.width as i32),
            bottom: rect.y.saturating_add(rect.height as i32),
        };
        // SAFETY: plain state setter
        unsafe { self.list.RSSetScissorRects(&[native]) };
    }

    fn draw_instanced(&mut self, vertex_count: u32) {
        // SAFETY: draw with the bound pipeline
        unsafe { self.list.DrawInstanced(vertex_count, 1, 0, 0) };
    }

    fn draw_indexed_instanced(&mut self, index_count: u32) {
        // SAFETY: draw with the bound pipeline
        unsafe { self.list.DrawIndexedInstanced(index_count, 1, 0, 0, 0) };
    }
}
