//! Synchronized drawing of captured display buffers into a shared destination texture.
use log::trace;

use crate::capture_manager::CapturedBuffer;
use crate::device::{GraphicsDevice, KeyedLock, Rotation, SharedHandle, Viewport, WaitOutcome};
use crate::error::Error;
use crate::rect::Rect;
use crate::settings::Settings;

/// Vertex layout of the composite pipeline: a 3D position followed by a 2D texture coordinate.
#[repr(C)]
#[derive(PartialEq, Clone, Copy, Debug, Default)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    #[inline]
    #[must_use]
    pub const fn new(position: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, tex_coord }
    }
}

/// Full-viewport quad as a six-vertex triangle list.
///
/// Positions cover `[-1, 1]²` and texture coordinates cover `[0, 1]²` with V pointing down, so
/// the whole source texture maps onto the whole viewport.
pub const QUAD_VERTICES: [Vertex; 6] = [
    Vertex::new([-1.0, -1.0, 0.0], [0.0, 1.0]),
    Vertex::new([-1.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([1.0, -1.0, 0.0], [1.0, 1.0]),
    Vertex::new([1.0, -1.0, 0.0], [1.0, 1.0]),
    Vertex::new([-1.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([1.0, 1.0, 0.0], [1.0, 0.0]),
];

/// [`QUAD_VERTICES`] with texture coordinates turned so a frame delivered under `rotation` shows
/// upright in the viewport.
#[must_use]
pub fn quad_vertices(rotation: Rotation) -> [Vertex; 6] {
    QUAD_VERTICES.map(|vertex| Vertex::new(vertex.position, rotation.frame_tex_coord(vertex.tex_coord)))
}

/// Compiled vertex and pixel shader blobs for the composite pipeline.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct ShaderBytecode<'a> {
    pub vertex: &'a [u8],
    pub pixel: &'a [u8],
}

/// Owns the fixed composite pipeline and draws captured buffers into shared destinations.
pub struct Compositor<G: GraphicsDevice> {
    pipeline: G::Pipeline,
    acquire_key: u64,
    release_key: u64,
    lock_timeout_ms: u32,
}

impl<G: GraphicsDevice> Compositor<G> {
    /// Builds the sampler, shaders and input layout from precompiled bytecode.
    ///
    /// # Errors
    ///
    /// Any creation failure is returned as a graphics error.
    pub fn new(device: &G, shaders: &ShaderBytecode<'_>, settings: &Settings) -> Result<Self, Error> {
        let pipeline = device.create_pipeline(shaders)?;

        Ok(Self {
            pipeline,
            acquire_key: settings.acquire_key,
            release_key: settings.release_key,
            lock_timeout_ms: settings.lock_timeout_ms,
        })
    }

    /// Draws `buffers` into the texture behind `destination`, which shows the desktop region
    /// `target`.
    ///
    /// Blocks until the destination's keyed lock is acquired, polling on every timeout. The lock
    /// is held for every draw and released exactly once before returning, including when a draw
    /// step fails. Every view and buffer created for the call is dropped before returning.
    ///
    /// The destination is cleared to opaque black first, so parts of `target` no display covers
    /// never show an earlier composite. Buffers are then drawn in the supplied order, each with a
    /// viewport placed at its offset from `target`'s origin and sized to its own rectangle, and
    /// turned upright according to its rotation. Buffers that do not intersect `target` are
    /// skipped.
    pub fn render_composite(
        &self,
        device: &G,
        destination: SharedHandle,
        target: Rect,
        buffers: &[CapturedBuffer<'_, G::Texture>],
    ) -> Result<(), Error> {
        // Everything that can fail before the lock is taken is created up front.
        let shared = device.open_shared_texture(destination)?;
        let render_target = device.create_render_target(&shared)?;
        let quads = Self::create_quads(device, target, buffers)?;

        self.acquire_lock(&shared)?;

        device.clear_render_target(&render_target);
        let drawn = self.draw_buffers(device, &render_target, &quads, target, buffers);
        device.unbind_views();
        let released = shared.release_sync(self.release_key);

        drawn?;
        released
    }

    /// Key passed when acquiring the destination's keyed lock.
    #[inline]
    #[must_use]
    pub const fn acquire_key(&self) -> u64 {
        self.acquire_key
    }

    /// Key passed when releasing the destination's keyed lock.
    #[inline]
    #[must_use]
    pub const fn release_key(&self) -> u64 {
        self.release_key
    }

    fn acquire_lock(&self, shared: &G::SharedTexture) -> Result<(), Error> {
        let mut timeouts = 0_u32;
        loop {
            match shared.acquire_sync(self.acquire_key, self.lock_timeout_ms)? {
                WaitOutcome::Ready(()) => return Ok(()),
                WaitOutcome::TimedOut => {
                    timeouts = timeouts.saturating_add(1);
                    trace!("Keyed lock {} still busy after {timeouts} attempt(s)", self.acquire_key);
                }
            }
        }
    }

    // One quad per rotation among the drawn buffers. The upright quad is always created.
    fn create_quads(
        device: &G,
        target: Rect,
        buffers: &[CapturedBuffer<'_, G::Texture>],
    ) -> Result<Vec<(Rotation, G::VertexBuffer)>, Error> {
        let mut quads = vec![(Rotation::Identity, device.create_vertex_buffer(&QUAD_VERTICES)?)];

        for buffer in buffers.iter().filter(|buffer| buffer.rect.intersects(&target)) {
            if quads.iter().all(|(rotation, _)| *rotation != buffer.rotation) {
                quads.push((buffer.rotation, device.create_vertex_buffer(&quad_vertices(buffer.rotation))?));
            }
        }

        Ok(quads)
    }

    fn draw_buffers(
        &self,
        device: &G,
        render_target: &G::RenderTarget,
        quads: &[(Rotation, G::VertexBuffer)],
        target: Rect,
        buffers: &[CapturedBuffer<'_, G::Texture>],
    ) -> Result<(), Error> {
        for buffer in buffers {
            if !buffer.rect.intersects(&target) {
                trace!("Skipping display {} at {}, outside {target}", buffer.display_index, buffer.rect);
                continue;
            }

            let vertices = quads
                .iter()
                .find_map(|(rotation, quad)| (*rotation == buffer.rotation).then_some(quad))
                .ok_or(Error::GraphicsApi("no quad for the buffer's rotation"))?;

            let view = device.create_shader_view(buffer.texture)?;
            let viewport = Viewport::for_buffer(&buffer.rect, &target);
            device.draw_quad(&self.pipeline, render_target, vertices, &view, viewport);
        }

        Ok(())
    }
}
