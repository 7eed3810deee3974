//! The renderer contract implemented by every backend
//!
//! One trait object per renderer instance. All resource-creation calls return
//! an opaque [`Handle`]; `Handle::NULL` means the call failed. Calls that take
//! a handle the renderer does not know are silent no-ops (no panic, no stats).

use glam::Vec4;
use raw_window_handle::{
    AppKitDisplayHandle, RawDisplayHandle, RawWindowHandle, WindowsDisplayHandle, XlibDisplayHandle,
};
use std::fmt;
use std::str::FromStr;

use super::handle::Handle;
use super::types::{BufferUsage, ClearFlags, PrimitiveTopology, Rect2D, TextureFormat, Viewport};
use crate::error::Error;

// ============================================================================
// Render API identification
// ============================================================================

/// Native graphics API behind a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderApi {
    /// No API selected (never constructible through the factory)
    None,
    OpenGL,
    DirectX11,
    DirectX12,
}

impl RenderApi {
    /// Display name (`"OpenGL"`, `"DirectX 11"`, `"DirectX 12"`)
    pub fn name(self) -> &'static str {
        match self {
            RenderApi::None => "None",
            RenderApi::OpenGL => "OpenGL",
            RenderApi::DirectX11 => "DirectX 11",
            RenderApi::DirectX12 => "DirectX 12",
        }
    }
}

impl fmt::Display for RenderApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RenderApi {
    type Err = Error;

    /// Accepts display names and the usual short forms, case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "opengl" | "gl" => Ok(RenderApi::OpenGL),
            "directx11" | "dx11" | "d3d11" => Ok(RenderApi::DirectX11),
            "directx12" | "dx12" | "d3d12" => Ok(RenderApi::DirectX12),
            _ => Err(Error::UnknownApi(s.to_string())),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-renderer counters, reset by `reset_stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub draw_calls: u64,
    pub triangles: u64,
    pub vertices: u64,
    pub texture_binds: u64,
    pub shader_switches: u64,
}

// ============================================================================
// Configuration
// ============================================================================

/// Limits the backends enforce before asking the driver for memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest buffer a device accepts, in bytes
    pub max_buffer_size: u64,
    /// Largest texture width or height
    pub max_texture_dimension: u32,
    /// Shader-visible SRV descriptors (D3D12 texture heap size)
    pub max_texture_descriptors: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_buffer_size: 256 * 1024 * 1024,
            max_texture_dimension: 16384,
            max_texture_descriptors: 100,
        }
    }
}

/// Renderer construction parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Enable the native validation layer (GL error checks, D3D debug layer)
    pub enable_validation: bool,

    /// Application name reported in logs
    pub app_name: String,

    /// Present with vertical sync (sync interval 1 instead of 0)
    pub vsync: bool,

    /// Order the factory tries backends in; empty means "every compiled backend"
    pub preferred_apis: Vec<RenderApi>,

    pub limits: DeviceLimits,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Sword and Stone Application".to_string(),
            vsync: true,
            preferred_apis: Vec::new(),
            limits: DeviceLimits::default(),
        }
    }
}

// ============================================================================
// Native window
// ============================================================================

/// A native window plus the display connection it lives on
///
/// Direct3D only needs the HWND. OpenGL contexts are created through the
/// platform display (EGL, GLX, WGL, CGL), so callers that have one should
/// pass it; `From<RawWindowHandle>` fills in the implicit default display of
/// platforms that have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeWindow {
    pub window: RawWindowHandle,
    pub display: Option<RawDisplayHandle>,
}

impl NativeWindow {
    pub fn new(window: RawWindowHandle, display: Option<RawDisplayHandle>) -> Self {
        Self { window, display }
    }

    /// The process-wide display for platforms where one is implied
    pub fn default_display(window: RawWindowHandle) -> Option<RawDisplayHandle> {
        match window {
            RawWindowHandle::Win32(_) | RawWindowHandle::WinRt(_) => {
                Some(RawDisplayHandle::Windows(WindowsDisplayHandle::new()))
            }
            RawWindowHandle::AppKit(_) => Some(RawDisplayHandle::AppKit(AppKitDisplayHandle::new())),
            // Xlib's default display comes from $DISPLAY
            RawWindowHandle::Xlib(_) => Some(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0))),
            _ => None,
        }
    }
}

impl From<RawWindowHandle> for NativeWindow {
    fn from(window: RawWindowHandle) -> Self {
        Self::new(window, Self::default_display(window))
    }
}

// ============================================================================
// Renderer trait
// ============================================================================

/// Backend-agnostic renderer
///
/// Lifecycle: construct → `initialize` → frames (`begin_frame`, clears and
/// draws, `end_frame`, `present`) → `shutdown`. Calls made while not
/// initialized are ignored and creation calls return `Handle::NULL`.
///
/// Not thread-safe: one thread drives a renderer. `Send` lets the engine hand
/// it between threads behind a mutex.
pub trait Renderer: Send {
    // ===== Lifecycle =====

    /// Bind the renderer to a native window and create every device object
    ///
    /// Returns `false` if any native step failed. A failed initialize leaves
    /// the instance safe to `shutdown` or drop.
    fn initialize(&mut self, window: RawWindowHandle, width: u32, height: u32) -> bool;

    /// `initialize` with an explicit display connection
    ///
    /// Backends that do not need the display ignore it.
    fn initialize_window(&mut self, window: &NativeWindow, width: u32, height: u32) -> bool {
        self.initialize(window.window, width, height)
    }

    /// Release all native objects. Idempotent.
    fn shutdown(&mut self);

    /// Resize the back buffers; the viewport is reset to the full new size
    fn resize(&mut self, width: u32, height: u32);

    fn is_initialized(&self) -> bool;

    // ===== Frame =====

    fn begin_frame(&mut self);
    fn end_frame(&mut self);
    fn present(&mut self);

    /// Clear the selected attachments; depth clears to 1.0, stencil to 0
    fn clear(&mut self, flags: ClearFlags, color: Vec4);

    /// Clear using the stored clear color
    fn clear_with_default(&mut self, flags: ClearFlags) {
        let color = self.clear_color();
        self.clear(flags, color);
    }

    fn set_clear_color(&mut self, color: Vec4);
    fn clear_color(&self) -> Vec4;

    fn set_viewport(&mut self, viewport: Viewport);
    fn set_scissor(&mut self, rect: Rect2D);
    fn viewport(&self) -> Viewport;

    /// Current back buffer size, `(0, 0)` when not initialized
    fn backbuffer_size(&self) -> (u32, u32);

    // ===== Buffers =====

    /// Create a vertex buffer of `size` bytes
    ///
    /// With `data`, the first `size` bytes are uploaded (`data` shorter than
    /// `size` is a failure). Without it, storage is left uninitialized.
    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize, usage: BufferUsage) -> Handle;

    /// Create an index buffer of `count` 32-bit indices
    fn create_index_buffer(&mut self, indices: Option<&[u32]>, count: usize, usage: BufferUsage) -> Handle;

    /// Overwrite `data.len()` bytes at `offset`
    fn update_vertex_buffer(&mut self, buffer: Handle, data: &[u8], offset: usize);

    /// Delete a vertex or index buffer
    fn delete_buffer(&mut self, buffer: Handle);

    // ===== Textures =====

    fn create_texture_2d(&mut self, width: u32, height: u32, format: TextureFormat, data: Option<&[u8]>) -> Handle;

    /// Replace mip level `mip_level` entirely with `data`
    fn update_texture_2d(&mut self, texture: Handle, data: &[u8], mip_level: u32);

    fn delete_texture(&mut self, texture: Handle);

    /// Bind `texture` to sampler slot `slot` (`0..MAX_TEXTURE_SLOTS`)
    fn bind_texture(&mut self, slot: u32, texture: Handle);

    // ===== Shaders =====

    /// Compile and link a program; `Handle::NULL` on failure (see `last_shader_error`)
    fn create_shader(&mut self, vertex_source: &str, fragment_source: &str) -> Handle;

    fn delete_shader(&mut self, shader: Handle);

    fn bind_shader(&mut self, shader: Handle);

    /// Set a uniform by name; `data` must match the reflected size
    fn set_shader_uniform(&mut self, shader: Handle, name: &str, data: &[u8]);

    /// Diagnostic of the last failed `create_shader`
    fn last_shader_error(&self) -> Option<&str>;

    // ===== Draw =====

    fn draw_indexed(&mut self, vertex_buffer: Handle, index_buffer: Handle, index_count: u32, topology: PrimitiveTopology);

    fn draw(&mut self, vertex_buffer: Handle, vertex_count: u32, topology: PrimitiveTopology);

    // ===== Fixed-function state =====

    fn set_depth_test(&mut self, enabled: bool);
    fn set_blending(&mut self, enabled: bool);
    fn set_culling(&mut self, enabled: bool);
    fn set_wireframe(&mut self, enabled: bool);

    // ===== Introspection =====

    fn stats(&self) -> RenderStats;
    fn reset_stats(&mut self);

    fn api(&self) -> RenderApi;

    fn api_name(&self) -> &'static str {
        self.api().name()
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
