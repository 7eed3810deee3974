//! Error types for the Sword and Stone engine
//!
//! Errors here cover the "hard" failures only: selecting, constructing and
//! initializing a backend, and engine singleton misuse. Per-call renderer
//! failures (unknown handle, failed creation) are reported through sentinel
//! handles and log entries instead.

use std::fmt;

use crate::renderer::RenderApi;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sword and Stone engine errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Backend-specific error (GL, D3D11, D3D12)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, shader, etc.)
    InvalidResource(String),

    /// Initialization failed (engine, renderer, subsystems)
    InitializationFailed(String),

    /// The requested backend is a known API that was not compiled into this build
    BackendNotCompiled(RenderApi),

    /// The requested API is `None` or a name no backend answers to
    UnknownApi(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::BackendNotCompiled(api) => {
                write!(f, "Backend not compiled: {} support is disabled in this build", api)
            }
            Error::UnknownApi(name) => write!(f, "Unknown render API: '{}'", name),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
