//! Shader interface reflection
//!
//! Drivers compile each stage and report the constants it reads; this module
//! holds what they report in one backend-neutral shape. A program keeps one
//! constant block per stage, both bound at register `b0`, so a name declared
//! in both stages is written into both blocks.
//!
//! Offsets come from the driver. Matrices are stored as 16-byte strided
//! columns and array elements start on a 16-byte boundary, which holds for
//! both HLSL cbuffer packing and std140.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Compile or link diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderError {
    /// Failing stage, `None` for link errors
    pub stage: Option<ShaderStage>,
    pub message: String,
}

impl ShaderError {
    pub fn compile(stage: ShaderStage, message: impl Into<String>) -> Self {
        Self { stage: Some(stage), message: message.into() }
    }

    pub fn link(message: impl Into<String>) -> Self {
        Self { stage: None, message: message.into() }
    }
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} shader: {}", stage, self.message),
            None => write!(f, "program link: {}", self.message),
        }
    }
}

impl std::error::Error for ShaderError {}

// ============================================================================
// Uniform types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Int,
    UInt,
    Bool,
    Sampler2D,
}

impl UniformType {
    /// Parse a GLSL or HLSL type name
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "float" => UniformType::Float,
            "vec2" | "float2" => UniformType::Vec2,
            "vec3" | "float3" => UniformType::Vec3,
            "vec4" | "float4" => UniformType::Vec4,
            "mat3" | "float3x3" => UniformType::Mat3,
            "mat4" | "float4x4" => UniformType::Mat4,
            "int" => UniformType::Int,
            "uint" => UniformType::UInt,
            "bool" => UniformType::Bool,
            "sampler2D" | "Texture2D" => UniformType::Sampler2D,
            _ => return None,
        })
    }

    pub fn is_sampler(self) -> bool {
        matches!(self, UniformType::Sampler2D)
    }

    /// Tightly packed size of one element as supplied by the caller
    pub fn client_size(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt | UniformType::Bool => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat3 => 36,
            UniformType::Mat4 => 64,
            UniformType::Sampler2D => 4,
        }
    }

    /// (column count, bytes per column) as stored in a constant block
    pub fn columns(self) -> (u32, u32) {
        match self {
            UniformType::Mat3 => (3, 12),
            UniformType::Mat4 => (4, 16),
            other => (1, other.client_size()),
        }
    }

    /// Block size of one element (matrix columns padded to 16)
    pub fn block_size(self) -> u32 {
        match self {
            UniformType::Mat3 => 48,
            other => other.client_size(),
        }
    }
}

// ============================================================================
// Constant blocks
// ============================================================================

/// A uniform placed in a stage's constant block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub ty: UniformType,
    /// 1 for non-array uniforms
    pub array_len: u32,
    /// Byte offset inside the constant block
    pub offset: u32,
}

impl UniformField {
    /// Byte count `set_shader_uniform` must supply for this uniform
    pub fn client_size(&self) -> usize {
        (self.ty.client_size() * self.array_len) as usize
    }

    pub fn element_stride(&self) -> u32 {
        if self.array_len > 1 {
            self.ty.block_size().div_ceil(16) * 16
        } else {
            self.ty.block_size()
        }
    }

    /// Scatter tightly packed `data` into `block`
    ///
    /// `data` must be exactly `client_size()` bytes; columns that would land
    /// past the end of `block` are dropped.
    pub fn write_into(&self, block: &mut [u8], data: &[u8]) {
        let (columns, column_bytes) = self.ty.columns();
        let column_stride = if columns > 1 { 16 } else { column_bytes };
        let mut src = 0usize;
        for element in 0..self.array_len {
            let element_base = self.offset + element * self.element_stride();
            for column in 0..columns {
                let dst = (element_base + column * column_stride) as usize;
                let len = column_bytes as usize;
                if dst + len > block.len() || src + len > data.len() {
                    return;
                }
                block[dst..dst + len].copy_from_slice(&data[src..src + len]);
                src += len;
            }
        }
    }
}

/// The `b0` constant buffer of one stage
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstantBlock {
    fields: Vec<UniformField>,
    size: u32,
}

impl ConstantBlock {
    /// `size` is rounded up to a multiple of 16
    pub fn new(fields: Vec<UniformField>, size: u32) -> Self {
        Self { fields, size: size.div_ceil(16) * 16 }
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    /// Byte size of the block (multiple of 16, 0 when the stage reads no constants)
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// What the driver reported for one compiled stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReflection {
    pub stage: ShaderStage,
    pub constants: ConstantBlock,
    /// Texture bindings in register order (slot = index)
    pub samplers: Vec<String>,
}

/// Why a uniform write was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformError {
    Unknown,
    Sampler,
    SizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for UniformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformError::Unknown => write!(f, "no such uniform"),
            UniformError::Sampler => write!(f, "sampler uniforms are bound with bind_texture"),
            UniformError::SizeMismatch { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
        }
    }
}

/// Stages whose block a uniform write touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StagesWritten {
    pub vertex: bool,
    pub fragment: bool,
}

/// Linked program interface: one constant block per stage plus the samplers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramReflection {
    vertex: ConstantBlock,
    fragment: ConstantBlock,
    samplers: Vec<String>,
}

impl ProgramReflection {
    /// Pair two stages; a constant both stages read must agree on type and length
    pub fn link(vertex: StageReflection, fragment: StageReflection) -> Result<Self, ShaderError> {
        for field in fragment.constants.fields() {
            if let Some(existing) = vertex.constants.field(&field.name) {
                if existing.ty != field.ty || existing.array_len != field.array_len {
                    return Err(ShaderError::link(format!(
                        "uniform '{}' is {:?}[{}] in the vertex stage but {:?}[{}] in the fragment stage",
                        field.name, existing.ty, existing.array_len, field.ty, field.array_len
                    )));
                }
            }
        }

        let mut samplers = vertex.samplers;
        for sampler in fragment.samplers {
            if !samplers.contains(&sampler) {
                samplers.push(sampler);
            }
        }

        Ok(Self {
            vertex: vertex.constants,
            fragment: fragment.constants,
            samplers,
        })
    }

    pub fn block(&self, stage: ShaderStage) -> &ConstantBlock {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    /// Sampler bindings in slot order
    pub fn samplers(&self) -> &[String] {
        &self.samplers
    }

    pub fn is_sampler(&self, name: &str) -> bool {
        self.samplers.iter().any(|s| s == name)
    }

    /// Write `data` into every stage block that declares `name`
    pub fn write_uniform(
        &self,
        name: &str,
        data: &[u8],
        vertex_block: &mut [u8],
        fragment_block: &mut [u8],
    ) -> Result<StagesWritten, UniformError> {
        if self.is_sampler(name) {
            return Err(UniformError::Sampler);
        }
        let vertex = self.vertex.field(name);
        let fragment = self.fragment.field(name);
        let Some(expected) = vertex.or(fragment).map(UniformField::client_size) else {
            return Err(UniformError::Unknown);
        };
        if expected != data.len() {
            return Err(UniformError::SizeMismatch { expected, actual: data.len() });
        }

        if let Some(field) = vertex {
            field.write_into(vertex_block, data);
        }
        if let Some(field) = fragment {
            field.write_into(fragment_block, data);
        }
        Ok(StagesWritten {
            vertex: vertex.is_some(),
            fragment: fragment.is_some(),
        })
    }
}

#[cfg(test)]
#[path = "shader_reflection_tests.rs"]
mod tests;
