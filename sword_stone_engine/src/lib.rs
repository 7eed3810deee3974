/*!
# Sword and Stone Engine

Core of the Sword and Stone 3D engine: one backend-agnostic renderer contract
implemented by three native-API backends with different resource models.

## Architecture

- **Renderer**: the capability contract every backend implements (lifecycle,
  frame bracketing, buffers, textures, shaders, draws, fixed-function toggles)
- **GlRenderer**: immediate-mode OpenGL state machine
- **D3d11Renderer**: retained Direct3D 11 device / immediate context
- **D3d12Renderer**: explicit Direct3D 12 command lists with double-buffered
  frame fences
- **RendererFactory**: build-time availability and ordered runtime fallback
- **Engine**: process-wide logger and the single live renderer

Backends are compiled in with the `opengl`, `d3d11` and `d3d12` features.
OpenGL goes through `glow` on a `glutin` context; Direct3D goes through the
`windows` crate and is only built on Windows.
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod renderer;
pub mod backend;

#[cfg(feature = "d3d12")]
mod utils;

// Main stone namespace module
pub mod stone {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton
    pub use crate::engine::{Engine, SharedRenderer};

    // Renderer contract and factory
    pub use crate::renderer::{Renderer, RendererFactory};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{CaptureLogger, DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::renderer::*;
    }

    // Backend sub-module with the concrete renderers
    pub mod backend {
        #[cfg(feature = "opengl")]
        pub use crate::backend::GlRenderer;

        #[cfg(feature = "d3d11")]
        pub use crate::backend::D3d11Renderer;

        #[cfg(feature = "d3d12")]
        pub use crate::backend::D3d12Renderer;
    }
}

// Re-export math and windowing boundary crates at crate root
pub use glam;
pub use raw_window_handle;
