/// Backend module - the three native API implementations of the Renderer trait
///
/// Each renderer is generic over a thin device trait: the native devices
/// call OpenGL through `glow` and Direct3D through the `windows` crate, and
/// unit tests swap in in-memory devices that keep the same object model.
/// Backends are selected at build time with the `opengl`, `d3d11` and
/// `d3d12` features.

pub mod surface;

#[cfg(any(feature = "d3d11", feature = "d3d12"))]
pub mod dxgi;

#[cfg(all(windows, any(feature = "d3d11", feature = "d3d12")))]
pub mod hlsl_compiler;



#[cfg(feature = "opengl")]
pub mod gl;

#[cfg(feature = "d3d11")]
pub mod d3d11;

#[cfg(feature = "d3d12")]
pub mod d3d12;


pub use surface::{Surface, WindowPlatform};

#[cfg(feature = "opengl")]
pub use gl::{GlRenderer, NativeGl};

#[cfg(feature = "d3d11")]
pub use d3d11::D3d11Renderer;

#[cfg(all(feature = "d3d11", windows))]
pub use d3d11::NativeD3d11;

#[cfg(feature = "d3d12")]
pub use d3d12::D3d12Renderer;

#[cfg(all(feature = "d3d12", windows))]
pub use d3d12::NativeD3d12;
