//! Direct3D 11 graphics context and the [`GraphicsDevice`] implementation used on Windows.
use std::mem;

use log::{debug, warn};
use windows::Win32::Foundation::{HANDLE, HMODULE, WAIT_ABANDONED, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_10_0,
    D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1, D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BIND_VERTEX_BUFFER, D3D11_BUFFER_DESC,
    D3D11_COMPARISON_NEVER, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_FILTER_MIN_MAG_MIP_POINT,
    D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA, D3D11_SAMPLER_DESC, D3D11_SDK_VERSION,
    D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_IMMUTABLE, D3D11_VIEWPORT, D3D11CreateDevice, ID3D11Buffer, ID3D11Device, ID3D11DeviceContext,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11RenderTargetView, ID3D11SamplerState, ID3D11ShaderResourceView,
    ID3D11Texture2D, ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_TYPELESS, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{IDXGIAdapter1, IDXGIDevice, IDXGIKeyedMutex};
use windows::core::{HRESULT, Interface, s};

use crate::compositor::{QUAD_VERTICES, ShaderBytecode, Vertex};
use crate::device::{GraphicsDevice, KeyedLock, OutputDuplication, SharedHandle, Viewport, WaitOutcome};
use crate::dxgi_duplication_api::{DxgiDuplication, DxgiFrame, duplicate_outputs};
use crate::error::Error;

/// To share DirectX objects between threads.
pub struct SendDirectX<T>(pub T);

impl<T> SendDirectX<T> {
    #[inline]
    #[must_use]
    pub const fn new(object: T) -> Self {
        Self(object)
    }
}

#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl<T> Send for SendDirectX<T> {}

const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 4] =
    [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_10_0];

const QUAD_VERTEX_COUNT: u32 = QUAD_VERTICES.len() as u32;

/// Creates an `ID3D11Device` and its immediate context on the given driver.
///
/// Fails with [`Error::FeatureLevelNotSatisfied`] below Direct3D 10.0.
pub fn create_d3d_device(driver_type: D3D_DRIVER_TYPE) -> Result<(ID3D11Device, ID3D11DeviceContext), Error> {
    let mut d3d_device = None;
    let mut feature_level = D3D_FEATURE_LEVEL::default();
    let mut d3d_device_context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            driver_type,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&FEATURE_LEVELS),
            D3D11_SDK_VERSION,
            Some(&mut d3d_device),
            Some(&mut feature_level),
            Some(&mut d3d_device_context),
        )?;
    };

    if feature_level.0 < D3D_FEATURE_LEVEL_10_0.0 {
        return Err(Error::FeatureLevelNotSatisfied);
    }

    match (d3d_device, d3d_device_context) {
        (Some(device), Some(context)) => Ok((device, context)),
        _ => Err(Error::GraphicsApi("D3D11CreateDevice returned no object")),
    }
}

/// Direct3D 11 device, immediate context and the adapter whose outputs are duplicated.
pub struct D3D11Context {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    adapter: IDXGIAdapter1,
}

// The immediate context is never used from two threads at once, the session serializes access.
#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for D3D11Context {}

impl D3D11Context {
    /// Creates a hardware device, falling back to WARP.
    pub fn create() -> Result<Self, Error> {
        let (device, context) = match create_d3d_device(D3D_DRIVER_TYPE_HARDWARE) {
            Ok(created) => created,
            Err(e) => {
                warn!("Hardware Direct3D device unavailable ({e}), falling back to WARP");
                create_d3d_device(D3D_DRIVER_TYPE_WARP)?
            }
        };

        Self::from_device(device, context)
    }

    /// Wraps an existing device. Outputs are enumerated from the device's own adapter.
    pub fn from_device(device: ID3D11Device, context: ID3D11DeviceContext) -> Result<Self, Error> {
        let dxgi_device = device.cast::<IDXGIDevice>()?;
        let adapter = unsafe { dxgi_device.GetAdapter()? }.cast::<IDXGIAdapter1>()?;

        let desc = unsafe { adapter.GetDesc1()? };
        let name_len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        debug!("Using adapter {}", String::from_utf16_lossy(&desc.Description[..name_len]));

        Ok(Self { device, context, adapter })
    }

    /// Bytecode of the composite shaders for this device.
    pub fn composite_shaders(&self) -> Result<ShaderBytecode<'static>, Error> {
        crate::shader::composite_shaders()
    }

    #[inline]
    #[must_use]
    pub const fn device(&self) -> &ID3D11Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub const fn device_context(&self) -> &ID3D11DeviceContext {
        &self.context
    }
}

/// A destination texture opened from a shared handle, with its keyed mutex.
pub struct SharedTexture {
    texture: ID3D11Texture2D,
    keyed_mutex: IDXGIKeyedMutex,
}

impl KeyedLock for SharedTexture {
    fn acquire_sync(&self, key: u64, timeout_ms: u32) -> Result<WaitOutcome<()>, Error> {
        // WAIT_TIMEOUT is a success code, so the raw HRESULT is inspected before it is turned
        // into a `Result`.
        let hr = unsafe {
            (Interface::vtable(&self.keyed_mutex).AcquireSync)(Interface::as_raw(&self.keyed_mutex), key, timeout_ms)
        };

        if hr == HRESULT(WAIT_TIMEOUT.0 as i32) {
            return Ok(WaitOutcome::TimedOut);
        }
        if hr == HRESULT(WAIT_ABANDONED.0 as i32) {
            warn!("Keyed mutex {key} was abandoned by its previous owner");
        }
        hr.ok()?;

        Ok(WaitOutcome::Ready(()))
    }

    fn release_sync(&self, key: u64) -> Result<(), Error> {
        unsafe { self.keyed_mutex.ReleaseSync(key)? };
        Ok(())
    }
}

/// Shaders, input layout and sampler of the composite pass.
pub struct CompositePipeline {
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    sampler: ID3D11SamplerState,
}

#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for CompositePipeline {}

fn created<T>(object: Option<T>, call: &'static str) -> Result<T, Error> {
    object.ok_or(Error::GraphicsApi(call))
}

impl GraphicsDevice for D3D11Context {
    type Texture = SendDirectX<ID3D11Texture2D>;
    type Frame = DxgiFrame;
    type Stream = DxgiDuplication;
    type SharedTexture = SharedTexture;
    type Pipeline = CompositePipeline;
    type RenderTarget = ID3D11RenderTargetView;
    type VertexBuffer = ID3D11Buffer;
    type ShaderView = ID3D11ShaderResourceView;

    fn enumerate_outputs(&self) -> Result<Vec<OutputDuplication<Self::Stream>>, Error> {
        duplicate_outputs(&self.adapter, &self.device)
    }

    fn create_capture_texture(&self, width: u32, height: u32) -> Result<Self::Texture, Error> {
        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32 | D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe { self.device.CreateTexture2D(&texture_desc, None, Some(&mut texture))? };

        created(texture, "CreateTexture2D returned no object").map(SendDirectX::new)
    }

    fn copy_frame(&self, frame: &Self::Frame, destination: &Self::Texture) -> Result<(), Error> {
        let mut frame_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { frame.texture().GetDesc(&mut frame_desc) };

        let mut destination_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { destination.0.GetDesc(&mut destination_desc) };

        // Capture textures are sized in frame orientation, so rotated displays match too.
        // CopyResource silently does nothing on mismatched resources, a stale mode is reported
        // as lost access so the caller re-enumerates.
        if (frame_desc.Width, frame_desc.Height) != (destination_desc.Width, destination_desc.Height) {
            warn!(
                "Frame is {}x{} but the capture texture is {}x{}",
                frame_desc.Width, frame_desc.Height, destination_desc.Width, destination_desc.Height
            );
            return Err(Error::AccessLost);
        }

        unsafe { self.context.CopyResource(&destination.0, frame.texture()) };
        Ok(())
    }

    fn create_pipeline(&self, shaders: &ShaderBytecode<'_>) -> Result<Self::Pipeline, Error> {
        let mut vertex_shader = None;
        unsafe { self.device.CreateVertexShader(shaders.vertex, None, Some(&mut vertex_shader))? };
        let vertex_shader = created(vertex_shader, "CreateVertexShader returned no object")?;

        let mut pixel_shader = None;
        unsafe { self.device.CreatePixelShader(shaders.pixel, None, Some(&mut pixel_shader))? };
        let pixel_shader = created(pixel_shader, "CreatePixelShader returned no object")?;

        let input_elements = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: mem::offset_of!(Vertex, position) as u32,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: mem::offset_of!(Vertex, tex_coord) as u32,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];

        let mut input_layout = None;
        unsafe { self.device.CreateInputLayout(&input_elements, shaders.vertex, Some(&mut input_layout))? };
        let input_layout = created(input_layout, "CreateInputLayout returned no object")?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_POINT,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: [0.0; 4],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };

        let mut sampler = None;
        unsafe { self.device.CreateSamplerState(&sampler_desc, Some(&mut sampler))? };
        let sampler = created(sampler, "CreateSamplerState returned no object")?;

        Ok(CompositePipeline { vertex_shader, pixel_shader, input_layout, sampler })
    }

    fn open_shared_texture(&self, handle: SharedHandle) -> Result<Self::SharedTexture, Error> {
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.OpenSharedResource(HANDLE(handle.as_raw()), &mut texture)? };
        let texture = created(texture, "OpenSharedResource returned no object")?;

        let mut texture_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut texture_desc) };
        if ![DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB, DXGI_FORMAT_B8G8R8A8_TYPELESS]
            .contains(&texture_desc.Format)
        {
            warn!("Shared destination format {:?} is not BGRA8", texture_desc.Format);
        }

        let keyed_mutex = texture.cast::<IDXGIKeyedMutex>()?;

        Ok(SharedTexture { texture, keyed_mutex })
    }

    fn create_render_target(&self, texture: &Self::SharedTexture) -> Result<Self::RenderTarget, Error> {
        let mut render_target = None;
        unsafe { self.device.CreateRenderTargetView(&texture.texture, None, Some(&mut render_target))? };

        created(render_target, "CreateRenderTargetView returned no object")
    }

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> Result<Self::VertexBuffer, Error> {
        let byte_width =
            u32::try_from(mem::size_of_val(vertices)).map_err(|_| Error::GraphicsApi("vertex data exceeds 4 GiB"))?;

        let buffer_desc = D3D11_BUFFER_DESC {
            ByteWidth: byte_width,
            Usage: D3D11_USAGE_IMMUTABLE,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
            StructureByteStride: 0,
        };
        let vertex_data =
            D3D11_SUBRESOURCE_DATA { pSysMem: vertices.as_ptr().cast(), SysMemPitch: 0, SysMemSlicePitch: 0 };

        let mut buffer = None;
        unsafe { self.device.CreateBuffer(&buffer_desc, Some(&vertex_data), Some(&mut buffer))? };

        created(buffer, "CreateBuffer returned no object")
    }

    fn create_shader_view(&self, texture: &Self::Texture) -> Result<Self::ShaderView, Error> {
        let mut view = None;
        unsafe { self.device.CreateShaderResourceView(&texture.0, None, Some(&mut view))? };

        created(view, "CreateShaderResourceView returned no object")
    }

    fn clear_render_target(&self, target: &Self::RenderTarget) {
        unsafe { self.context.ClearRenderTargetView(target, &[0.0, 0.0, 0.0, 1.0]) };
    }

    fn draw_quad(
        &self,
        pipeline: &Self::Pipeline,
        target: &Self::RenderTarget,
        vertices: &Self::VertexBuffer,
        source: &Self::ShaderView,
        viewport: Viewport,
    ) {
        let stride = mem::size_of::<Vertex>() as u32;
        let offset = 0;

        let viewport = D3D11_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };

        unsafe {
            self.context.OMSetRenderTargets(Some(&[Some(target.clone())]), None);
            self.context.RSSetViewports(Some(&[viewport]));

            self.context.IASetInputLayout(&pipeline.input_layout);
            self.context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context.IASetVertexBuffers(0, 1, Some(&Some(vertices.clone())), Some(&stride), Some(&offset));

            self.context.VSSetShader(&pipeline.vertex_shader, None);
            self.context.PSSetShader(&pipeline.pixel_shader, None);
            self.context.PSSetShaderResources(0, Some(&[Some(source.clone())]));
            self.context.PSSetSamplers(0, Some(&[Some(pipeline.sampler.clone())]));

            self.context.Draw(QUAD_VERTEX_COUNT, 0);
        }
    }

    fn unbind_views(&self) {
        unsafe {
            self.context.PSSetShaderResources(0, Some(&[None]));
            self.context.IASetVertexBuffers(0, 1, Some(&None), Some(&0), Some(&0));
            self.context.OMSetRenderTargets(None, None);
        }
    }
}
