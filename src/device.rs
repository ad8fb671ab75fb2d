//! Seam between the capture/composite pipeline and the graphics API.
//!
//! [`crate::capture_manager::CaptureManager`] and [`crate::compositor::Compositor`] only talk to
//! the GPU through [`GraphicsDevice`]. On Windows it is implemented by
//! [`crate::d3d11::D3D11Context`] on top of Direct3D 11 and DXGI Desktop Duplication.
use std::ffi::c_void;

use crate::compositor::{ShaderBytecode, Vertex};
use crate::error::Error;
use crate::rect::Rect;

/// Result of a single bounded wait.
///
/// A timeout is an expected outcome, not an error: the pipeline polls again.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum WaitOutcome<T> {
    /// The wait completed with a value.
    Ready(T),
    /// The per-attempt wait bound elapsed without a result.
    TimedOut,
}

/// Opaque cross-process handle of a shared destination texture.
///
/// The handle is borrowed for one composite call. It is never opened outside of that call and
/// never cached.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Hash)]
pub struct SharedHandle(*mut c_void);

// The handle is a kernel object value, not a pointer into this process.
unsafe impl Send for SharedHandle {}
unsafe impl Sync for SharedHandle {}

impl SharedHandle {
    /// Wraps a raw shared handle value.
    #[inline]
    #[must_use]
    pub const fn from_raw(handle: *mut c_void) -> Self {
        Self(handle)
    }

    /// Returns the raw handle value.
    #[inline]
    #[must_use]
    pub const fn as_raw(&self) -> *mut c_void {
        self.0
    }
}

/// Rotation of a display's scan-out mode relative to its desktop orientation.
///
/// Frames of a rotated display are delivered unrotated, in the size of the display mode. A
/// portrait display at `1080x1920` on the desktop hands out `1920x1080` frames under
/// [`Rotation::Rotate90`] or [`Rotation::Rotate270`].
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default, Hash)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    /// Size of the frames delivered for a display covering `rect` on the desktop.
    #[inline]
    #[must_use]
    pub const fn frame_size(self, rect: &Rect) -> (u32, u32) {
        match self {
            Self::Rotate90 | Self::Rotate270 => (rect.height, rect.width),
            Self::Identity | Self::Rotate180 => (rect.width, rect.height),
        }
    }

    /// Maps a texture coordinate in desktop orientation to the coordinate of the same pixel in
    /// the delivered frame.
    #[inline]
    #[must_use]
    pub fn frame_tex_coord(self, [u, v]: [f32; 2]) -> [f32; 2] {
        match self {
            Self::Identity => [u, v],
            Self::Rotate90 => [v, 1.0 - u],
            Self::Rotate180 => [1.0 - u, 1.0 - v],
            Self::Rotate270 => [1.0 - v, u],
        }
    }
}

/// Description of an enumerated display output.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct OutputDesc {
    /// Device name reported by the platform, e.g. `\\.\DISPLAY1`.
    pub name: String,
    /// Bounds in desktop coordinates.
    pub rect: Rect,
    /// Orientation of the delivered frames.
    pub rotation: Rotation,
}

/// An enumerated output together with its freshly opened duplication stream.
pub struct OutputDuplication<S> {
    pub desc: OutputDesc,
    pub stream: S,
}

/// Destination viewport in pixels, relative to the destination texture's origin.
#[derive(PartialEq, Clone, Copy, Debug, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Viewport that places a buffer covering `rect` inside a destination showing `target`.
    ///
    /// The origin is `rect`'s offset from `target`'s origin and the extent is `rect`'s own size,
    /// so a buffer equal to `target` lands at `(0, 0)` and pixels map 1:1.
    #[inline]
    #[must_use]
    pub fn for_buffer(rect: &Rect, target: &Rect) -> Self {
        let (x, y) = rect.offset_from(target);

        Self {
            x: x as f32,
            y: y as f32,
            width: rect.width as f32,
            height: rect.height as f32,
        }
    }
}

/// A display's frame stream.
pub trait DuplicationStream {
    /// Transient frame resource handed out between acquire and release.
    type Frame;

    /// Waits up to `timeout_ms` for the next frame.
    ///
    /// Returns [`WaitOutcome::TimedOut`] when no new frame arrived in time. Any other failure is
    /// a hard error.
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> Result<WaitOutcome<Self::Frame>, Error>;

    /// Hands the last acquired frame back to the stream.
    fn release_frame(&mut self) -> Result<(), Error>;
}

/// Cross-process keyed lock bound to a shared texture.
pub trait KeyedLock {
    /// Waits up to `timeout_ms` for the lock under `key`.
    fn acquire_sync(&self, key: u64, timeout_ms: u32) -> Result<WaitOutcome<()>, Error>;

    /// Releases the lock, handing it over under `key`.
    fn release_sync(&self, key: u64) -> Result<(), Error>;
}

/// GPU device and immediate context used by the whole pipeline.
///
/// Resource types are owned handles. Dropping one releases the underlying GPU object.
pub trait GraphicsDevice {
    /// Persistent per-display capture texture (BGRA8, render target and shader resource).
    type Texture;
    /// Frame resource produced by [`Self::Stream`].
    type Frame;
    /// Per-display duplication stream.
    type Stream: DuplicationStream<Frame = Self::Frame>;
    /// A destination texture opened from a [`SharedHandle`], with its keyed lock.
    type SharedTexture: KeyedLock;
    /// Fixed composite pipeline: shaders, input layout and sampler.
    type Pipeline;
    /// Render target view over a shared texture.
    type RenderTarget;
    /// Vertex buffer holding the composite quad.
    type VertexBuffer;
    /// Shader resource view over a capture texture.
    type ShaderView;

    /// Enumerates the display outputs and opens one duplication stream per output, in
    /// enumeration order.
    fn enumerate_outputs(&self) -> Result<Vec<OutputDuplication<Self::Stream>>, Error>;

    /// Creates a persistent capture texture of the given size, in frame orientation.
    fn create_capture_texture(&self, width: u32, height: u32) -> Result<Self::Texture, Error>;

    /// Copies an acquired frame into a capture texture on the GPU.
    ///
    /// Returns [`Error::AccessLost`] when the frame no longer matches the texture's size.
    fn copy_frame(&self, frame: &Self::Frame, destination: &Self::Texture) -> Result<(), Error>;

    /// Builds the composite pipeline from precompiled shader bytecode.
    fn create_pipeline(&self, shaders: &ShaderBytecode<'_>) -> Result<Self::Pipeline, Error>;

    /// Opens a shared destination texture and queries its keyed lock.
    fn open_shared_texture(&self, handle: SharedHandle) -> Result<Self::SharedTexture, Error>;

    /// Creates a render target view over the whole destination texture.
    fn create_render_target(&self, texture: &Self::SharedTexture) -> Result<Self::RenderTarget, Error>;

    /// Creates an immutable vertex buffer from `vertices`.
    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> Result<Self::VertexBuffer, Error>;

    /// Creates a shader resource view over a capture texture.
    fn create_shader_view(&self, texture: &Self::Texture) -> Result<Self::ShaderView, Error>;

    /// Clears the whole render target to opaque black.
    fn clear_render_target(&self, target: &Self::RenderTarget);

    /// Binds the pipeline and draws the vertex buffer as a triangle list into `target`,
    /// sampling `source`, inside `viewport`.
    fn draw_quad(
        &self,
        pipeline: &Self::Pipeline,
        target: &Self::RenderTarget,
        vertices: &Self::VertexBuffer,
        source: &Self::ShaderView,
        viewport: Viewport,
    );

    /// Unbinds every per-call view from the immediate context.
    fn unbind_views(&self);
}
