//! HLSL compilation with `D3DCompile`, reflected through `D3DReflect`
//!
//! Both Direct3D backends compile shader model 5.0 bytecode with entry point
//! `main`. Reflection reads the constant buffer bound at `b0` and every
//! `Texture2D` binding of the stage.

use std::ffi::c_void;

use windows::core::{s, Interface, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::{
    D3DCompile, D3DReflect, D3DCOMPILE_ENABLE_STRICTNESS, D3DCOMPILE_OPTIMIZATION_LEVEL3,
};
use windows::Win32::Graphics::Direct3D::{
    ID3DBlob, D3D_SIT_CBUFFER, D3D_SIT_TEXTURE, D3D_SVC_MATRIX_COLUMNS, D3D_SVC_SCALAR, D3D_SVC_VECTOR, D3D_SVT_BOOL,
    D3D_SVT_FLOAT, D3D_SVT_INT, D3D_SVT_UINT,
};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11ShaderReflection, D3D11_SHADER_BUFFER_DESC, D3D11_SHADER_DESC, D3D11_SHADER_INPUT_BIND_DESC,
    D3D11_SHADER_TYPE_DESC, D3D11_SHADER_VARIABLE_DESC,
};

use crate::renderer::shader_reflection::{ConstantBlock, ShaderError, ShaderStage, StageReflection, UniformField, UniformType};

/// Bytes of a blob (bytecode or compiler messages)
pub fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    // SAFETY: the blob owns GetBufferSize() bytes at GetBufferPointer() for
    // as long as it is alive, and the slice borrows it.
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// Compile one stage and reflect its interface
pub fn compile(stage: ShaderStage, source: &str) -> Result<(ID3DBlob, StageReflection), ShaderError> {
    let target = match stage {
        ShaderStage::Vertex => s!("vs_5_0"),
        ShaderStage::Fragment => s!("ps_5_0"),
    };
    let mut code: Option<ID3DBlob> = None;
    let mut messages: Option<ID3DBlob> = None;
    // SAFETY: the source pointer and length describe a live &str and both
    // out-parameters outlive the call.
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
            PCSTR::null(),
            None,
            None,
            s!("main"),
            target,
            D3DCOMPILE_ENABLE_STRICTNESS | D3DCOMPILE_OPTIMIZATION_LEVEL3,
            0,
            &mut code,
            Some(&mut messages),
        )
    };
    let log = messages
        .as_ref()
        .map(|blob| String::from_utf8_lossy(blob_bytes(blob)).trim_end_matches('\0').trim().to_string());

    let code = match (result, code) {
        (Ok(()), Some(code)) => code,
        (Err(e), _) => return Err(ShaderError::compile(stage, log.unwrap_or_else(|| e.message().to_string()))),
        (Ok(()), None) => return Err(ShaderError::compile(stage, "D3DCompile returned no bytecode")),
    };
    let reflection = reflect(stage, &code)?;
    Ok((code, reflection))
}

fn uniform_type(desc: &D3D11_SHADER_TYPE_DESC) -> Option<UniformType> {
    Some(match (desc.Class, desc.Type, desc.Rows, desc.Columns) {
        (D3D_SVC_SCALAR, D3D_SVT_FLOAT, _, _) => UniformType::Float,
        (D3D_SVC_SCALAR, D3D_SVT_INT, _, _) => UniformType::Int,
        (D3D_SVC_SCALAR, D3D_SVT_UINT, _, _) => UniformType::UInt,
        (D3D_SVC_SCALAR, D3D_SVT_BOOL, _, _) => UniformType::Bool,
        (D3D_SVC_VECTOR, D3D_SVT_FLOAT, 1, 2) => UniformType::Vec2,
        (D3D_SVC_VECTOR, D3D_SVT_FLOAT, 1, 3) => UniformType::Vec3,
        (D3D_SVC_VECTOR, D3D_SVT_FLOAT, 1, 4) => UniformType::Vec4,
        (D3D_SVC_MATRIX_COLUMNS, D3D_SVT_FLOAT, 3, 3) => UniformType::Mat3,
        (D3D_SVC_MATRIX_COLUMNS, D3D_SVT_FLOAT, 4, 4) => UniformType::Mat4,
        _ => return None,
    })
}

fn reflect(stage: ShaderStage, code: &ID3DBlob) -> Result<StageReflection, ShaderError> {
    let failed = |e: windows::core::Error| ShaderError::compile(stage, format!("D3DReflect failed: {}", e));

    // SAFETY: the bytecode blob is alive for the whole function, D3DReflect
    // hands back an owned reference that from_raw adopts, and every name
    // pointer is read while the reflector still holds the bytecode.
    unsafe {
        let bytes = blob_bytes(code);
        let mut raw = std::ptr::null_mut();
        D3DReflect(bytes.as_ptr() as *const c_void, bytes.len(), &ID3D11ShaderReflection::IID, &mut raw).map_err(failed)?;
        let reflector = ID3D11ShaderReflection::from_raw(raw);

        let mut desc = D3D11_SHADER_DESC::default();
        reflector.GetDesc(&mut desc).map_err(failed)?;

        let mut fields = Vec::new();
        let mut block_size = 0;
        let mut textures: Vec<(u32, String)> = Vec::new();
        for index in 0..desc.BoundResources {
            let mut bind = D3D11_SHADER_INPUT_BIND_DESC::default();
            reflector.GetResourceBindingDesc(index, &mut bind).map_err(failed)?;
            let name = bind.Name.to_string().unwrap_or_default();

            if bind.Type == D3D_SIT_TEXTURE {
                textures.push((bind.BindPoint, name));
                continue;
            }
            if bind.Type != D3D_SIT_CBUFFER || bind.BindPoint != 0 {
                continue;
            }
            let Some(buffer) = reflector.GetConstantBufferByName(bind.Name) else {
                continue;
            };
            let mut buffer_desc = D3D11_SHADER_BUFFER_DESC::default();
            buffer.GetDesc(&mut buffer_desc).map_err(failed)?;
            block_size = buffer_desc.Size;

            for v in 0..buffer_desc.Variables {
                let Some(variable) = buffer.GetVariableByIndex(v) else {
                    continue;
                };
                let mut variable_desc = D3D11_SHADER_VARIABLE_DESC::default();
                variable.GetDesc(&mut variable_desc).map_err(failed)?;
                let variable_name = variable_desc.Name.to_string().unwrap_or_default();
                let Some(ty) = variable.GetType() else {
                    continue;
                };
                let mut type_desc = D3D11_SHADER_TYPE_DESC::default();
                ty.GetDesc(&mut type_desc).map_err(failed)?;
                let Some(uniform) = uniform_type(&type_desc) else {
                    return Err(ShaderError::compile(
                        stage,
                        format!("constant '{}' has a type the renderer cannot set", variable_name),
                    ));
                };
                fields.push(UniformField {
                    name: variable_name,
                    ty: uniform,
                    array_len: type_desc.Elements.max(1),
                    offset: variable_desc.StartOffset,
                });
            }
        }

        textures.sort_by_key(|(slot, _)| *slot);
        Ok(StageReflection {
            stage,
            constants: ConstantBlock::new(fields, block_size),
            samplers: textures.into_iter().map(|(_, name)| name).collect(),
        })
    }
}

#[cfg(test)]
#[path = "hlsl_compiler_tests.rs"]
mod tests;
