/// Direct3D 12 backend: command lists, frame fences and pipeline state objects over a [`D3d12Device`]

pub mod d3d12_device;
pub mod d3d12_frame;
#[cfg(test)]
pub mod d3d12_mock_device;
#[cfg(windows)]
pub mod d3d12_native;
pub mod d3d12_pipeline_cache;
pub mod d3d12_renderer;

pub use d3d12_device::D3d12Device;
#[cfg(test)]
pub use d3d12_mock_device::MockD3d12;
#[cfg(windows)]
pub use d3d12_native::NativeD3d12;
pub use d3d12_renderer::D3d12Renderer;
