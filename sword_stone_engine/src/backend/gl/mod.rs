/// OpenGL backend: immediate-mode state machine over a [`GlDevice`]

pub mod gl_device;
#[cfg(feature = "opengl")]
pub mod gl_native;
pub mod gl_renderer;

pub use gl_device::GlDevice;
#[cfg(test)]
pub use gl_mock_device::MockGl;
#[cfg(feature = "opengl")]
pub use gl_native::NativeGl;
pub use gl_renderer::GlRenderer;
