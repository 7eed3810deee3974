/// Direct3D 11 backend: retained device / immediate context over a [`D3d11Device`]

pub mod d3d11_device;
#[cfg(test)]
pub mod d3d11_mock_device;
#[cfg(windows)]
pub mod d3d11_native;
pub mod d3d11_renderer;

pub use d3d11_device::D3d11Device;
#[cfg(test)]
pub use d3d11_mock_device::MockD3d11;
#[cfg(windows)]
pub use d3d11_native::NativeD3d11;
pub use d3d11_renderer::D3d11Renderer;
