//! Bytecode of the composite vertex and pixel shaders.
//!
//! `build.rs` compiles `composite.hlsl` with `fxc.exe` when one is available and the blobs are
//! embedded directly. Otherwise the same source is compiled once at runtime with `D3DCompile`.
use crate::compositor::ShaderBytecode;
use crate::error::Error;

#[cfg(has_precompiled_composite)]
const PRECOMPILED_VS: &[u8] = include_bytes!(env!("COMPOSITE_VS_CSO_PATH"));

#[cfg(has_precompiled_composite)]
const PRECOMPILED_PS: &[u8] = include_bytes!(env!("COMPOSITE_PS_CSO_PATH"));

/// Returns the composite shader bytecode, compiling it on first use when it was not precompiled.
///
/// # Errors
///
/// Returns [`Error::GraphicsApi`] when runtime compilation fails. The failure is cached.
pub fn composite_shaders() -> Result<ShaderBytecode<'static>, Error> {
    #[cfg(has_precompiled_composite)]
    {
        Ok(ShaderBytecode { vertex: PRECOMPILED_VS, pixel: PRECOMPILED_PS })
    }

    #[cfg(not(has_precompiled_composite))]
    {
        use std::sync::OnceLock;

        use log::debug;

        static BYTECODE: OnceLock<Result<(Vec<u8>, Vec<u8>), &'static str>> = OnceLock::new();

        let (vertex, pixel) = BYTECODE
            .get_or_init(|| {
                debug!("Compiling composite shaders at runtime");
                Ok((runtime::compile(c"vs_main", c"vs_4_0")?, runtime::compile(c"ps_main", c"ps_4_0")?))
            })
            .as_ref()
            .map_err(|call| Error::GraphicsApi(*call))?;

        Ok(ShaderBytecode { vertex, pixel })
    }
}

#[cfg(not(has_precompiled_composite))]
mod runtime {
    use std::ffi::CStr;
    use std::slice;

    use log::warn;
    use windows::Win32::Graphics::Direct3D::Fxc::{D3DCOMPILE_ENABLE_STRICTNESS, D3DCompile};
    use windows::Win32::Graphics::Direct3D::ID3DBlob;
    use windows::core::PCSTR;

    const HLSL_SOURCE: &str = include_str!("composite.hlsl");

    fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
        unsafe { slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize()) }
    }

    pub fn compile(entry_point: &CStr, profile: &CStr) -> Result<Vec<u8>, &'static str> {
        let mut blob = None;
        let mut errors = None;

        let result = unsafe {
            D3DCompile(
                HLSL_SOURCE.as_ptr().cast(),
                HLSL_SOURCE.len(),
                None,
                None,
                None,
                PCSTR::from_raw(entry_point.as_ptr().cast()),
                PCSTR::from_raw(profile.as_ptr().cast()),
                D3DCOMPILE_ENABLE_STRICTNESS,
                0,
                &mut blob,
                Some(&mut errors),
            )
        };

        if let Err(e) = result {
            let diagnostic = errors.as_ref().map(|errors| String::from_utf8_lossy(blob_bytes(errors)).into_owned());
            warn!("D3DCompile {entry_point:?} failed: {e} {}", diagnostic.unwrap_or_default());
            return Err("D3DCompile");
        }

        blob.as_ref().map(|blob| blob_bytes(blob).to_vec()).ok_or("D3DCompile returned no blob")
    }
}
