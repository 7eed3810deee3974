/// Renderer module - the backend-agnostic contract and its building blocks

pub mod factory;
pub mod handle;
pub mod registry;
pub mod renderer;
pub mod shader_reflection;
pub mod types;

pub use factory::RendererFactory;
pub use handle::{Handle, HandleAllocator};
pub use registry::ResourceRegistry;
pub use renderer::*;
pub use shader_reflection::{
    ConstantBlock, ProgramReflection, ShaderError, ShaderStage, StageReflection, UniformError, UniformField,
    UniformType,
};
pub use types::*;
