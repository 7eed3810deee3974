//! Pieces the two Direct3D backends share: HRESULT codes, DXGI formats and
//! the vertex input description.

use std::fmt;

use crate::renderer::TextureFormat;

/// A failed HRESULT, with the codes the backends react to named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HResult {
    /// E_INVALIDARG
    InvalidArg,
    /// E_OUTOFMEMORY
    OutOfMemory,
    /// DXGI_ERROR_INVALID_CALL
    InvalidCall,
    /// DXGI_ERROR_UNSUPPORTED
    Unsupported,
    /// DXGI_ERROR_DEVICE_REMOVED
    DeviceRemoved,
    Other(i32),
}

impl HResult {
    pub fn from_code(code: i32) -> Self {
        match code as u32 {
            0x8007_0057 => HResult::InvalidArg,
            0x8007_000E => HResult::OutOfMemory,
            0x887A_0001 => HResult::InvalidCall,
            0x887A_0004 => HResult::Unsupported,
            0x887A_0005 => HResult::DeviceRemoved,
            _ => HResult::Other(code),
        }
    }

    pub fn code(self) -> i32 {
        let code: u32 = match self {
            HResult::InvalidArg => 0x8007_0057,
            HResult::OutOfMemory => 0x8007_000E,
            HResult::InvalidCall => 0x887A_0001,
            HResult::Unsupported => 0x887A_0004,
            HResult::DeviceRemoved => 0x887A_0005,
            HResult::Other(code) => return code,
        };
        code as i32
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HResult::InvalidArg => write!(f, "E_INVALIDARG"),
            HResult::OutOfMemory => write!(f, "E_OUTOFMEMORY"),
            HResult::InvalidCall => write!(f, "DXGI_ERROR_INVALID_CALL"),
            HResult::Unsupported => write!(f, "DXGI_ERROR_UNSUPPORTED"),
            HResult::DeviceRemoved => write!(f, "DXGI_ERROR_DEVICE_REMOVED"),
            HResult::Other(code) => write!(f, "HRESULT 0x{:08X}", *code as u32),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for HResult {
    fn from(error: windows::core::Error) -> Self {
        HResult::from_code(error.code().0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DxgiFormat {
    R8G8B8A8Unorm,
    R16G16B16A16Float,
    R32G32B32A32Float,
    D24UnormS8Uint,
    D32Float,
}

impl DxgiFormat {
    /// Device format for a client texture format (RGB8 has no 24-bit DXGI format)
    pub fn from_texture_format(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8 | TextureFormat::Rgb8 => DxgiFormat::R8G8B8A8Unorm,
            TextureFormat::Rgba16F => DxgiFormat::R16G16B16A16Float,
            TextureFormat::Rgba32F => DxgiFormat::R32G32B32A32Float,
            TextureFormat::Depth24Stencil8 => DxgiFormat::D24UnormS8Uint,
            TextureFormat::Depth32F => DxgiFormat::D32Float,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            DxgiFormat::R8G8B8A8Unorm | DxgiFormat::D24UnormS8Uint | DxgiFormat::D32Float => 4,
            DxgiFormat::R16G16B16A16Float => 8,
            DxgiFormat::R32G32B32A32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, DxgiFormat::D24UnormS8Uint | DxgiFormat::D32Float)
    }

    #[cfg(windows)]
    pub fn native(self) -> windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT {
        use windows::Win32::Graphics::Dxgi::Common::*;
        match self {
            DxgiFormat::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
            DxgiFormat::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
            DxgiFormat::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
            DxgiFormat::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
            DxgiFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
        }
    }
}

/// One vertex input element, matched to the shader by semantic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputElementDesc {
    pub semantic: &'static str,
    pub components: u32,
    pub offset: u32,
}

impl InputElementDesc {
    /// Float format of the element, from its component count
    #[cfg(windows)]
    pub fn native_format(&self) -> Result<windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT, HResult> {
        use windows::Win32::Graphics::Dxgi::Common::*;
        Ok(match self.components {
            1 => DXGI_FORMAT_R32_FLOAT,
            2 => DXGI_FORMAT_R32G32_FLOAT,
            3 => DXGI_FORMAT_R32G32B32_FLOAT,
            4 => DXGI_FORMAT_R32G32B32A32_FLOAT,
            _ => return Err(HResult::InvalidArg),
        })
    }
}
