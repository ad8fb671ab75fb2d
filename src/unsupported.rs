//! Stand-in device for platforms without DXGI Desktop Duplication.
use std::convert::Infallible;

use crate::compositor::{ShaderBytecode, Vertex};
use crate::device::{
    DuplicationStream, GraphicsDevice, KeyedLock, OutputDuplication, SharedHandle, Viewport, WaitOutcome,
};
use crate::error::Error;

/// A graphics device that cannot be created. Every constructor returns [`Error::NotSupported`].
pub enum UnsupportedDevice {}

impl UnsupportedDevice {
    /// Always fails with [`Error::NotSupported`].
    pub const fn create() -> Result<Self, Error> {
        Err(Error::NotSupported)
    }

    pub fn composite_shaders(&self) -> Result<ShaderBytecode<'static>, Error> {
        match *self {}
    }
}

impl DuplicationStream for UnsupportedDevice {
    type Frame = Infallible;

    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> Result<WaitOutcome<Self::Frame>, Error> {
        match *self {}
    }

    fn release_frame(&mut self) -> Result<(), Error> {
        match *self {}
    }
}

impl KeyedLock for UnsupportedDevice {
    fn acquire_sync(&self, _key: u64, _timeout_ms: u32) -> Result<WaitOutcome<()>, Error> {
        match *self {}
    }

    fn release_sync(&self, _key: u64) -> Result<(), Error> {
        match *self {}
    }
}

impl GraphicsDevice for UnsupportedDevice {
    type Texture = Infallible;
    type Frame = Infallible;
    type Stream = Self;
    type SharedTexture = Self;
    type Pipeline = Infallible;
    type RenderTarget = Infallible;
    type VertexBuffer = Infallible;
    type ShaderView = Infallible;

    fn enumerate_outputs(&self) -> Result<Vec<OutputDuplication<Self::Stream>>, Error> {
        match *self {}
    }

    fn create_capture_texture(&self, _width: u32, _height: u32) -> Result<Self::Texture, Error> {
        match *self {}
    }

    fn copy_frame(&self, _frame: &Self::Frame, _destination: &Self::Texture) -> Result<(), Error> {
        match *self {}
    }

    fn create_pipeline(&self, _shaders: &ShaderBytecode<'_>) -> Result<Self::Pipeline, Error> {
        match *self {}
    }

    fn open_shared_texture(&self, _handle: SharedHandle) -> Result<Self::SharedTexture, Error> {
        match *self {}
    }

    fn create_render_target(&self, _texture: &Self::SharedTexture) -> Result<Self::RenderTarget, Error> {
        match *self {}
    }

    fn create_vertex_buffer(&self, _vertices: &[Vertex]) -> Result<Self::VertexBuffer, Error> {
        match *self {}
    }

    fn create_shader_view(&self, _texture: &Self::Texture) -> Result<Self::ShaderView, Error> {
        match *self {}
    }

    fn clear_render_target(&self, _target: &Self::RenderTarget) {
        match *self {}
    }

    fn draw_quad(
        &self,
        _pipeline: &Self::Pipeline,
        _target: &Self::RenderTarget,
        _vertices: &Self::VertexBuffer,
        _source: &Self::ShaderView,
        _viewport: Viewport,
    ) {
        match *self {}
    }

    fn unbind_views(&self) {
        match *self {}
    }
}
