//! In-memory [`GraphicsDevice`] used by the unit tests.
//!
//! Every call is recorded in a [`Journal`], timeouts are scripted per output and per lock, and
//! any step can be made to fail through [`Failures`].
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compositor::{ShaderBytecode, Vertex};
use crate::device::{
    DuplicationStream, GraphicsDevice, KeyedLock, OutputDesc, OutputDuplication, Rotation, SharedHandle, Viewport,
    WaitOutcome,
};
use crate::error::Error;
use crate::rect::Rect;

pub const TEST_SHADERS: ShaderBytecode<'static> = ShaderBytecode { vertex: b"DXBC-vs", pixel: b"DXBC-ps" };

/// A scripted display output.
#[derive(Clone, Debug)]
pub struct MockOutput {
    rect: Rect,
    rotation: Rotation,
    frame_timeouts: usize,
    fail_acquire: bool,
}

impl MockOutput {
    pub const fn new(rect: Rect) -> Self {
        Self { rect, rotation: Rotation::Identity, frame_timeouts: 0, fail_acquire: false }
    }

    pub const fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    // Frames come in mode orientation, independent of how the manager sizes its textures.
    const fn frame_size(&self) -> (u32, u32) {
        match self.rotation {
            Rotation::Rotate90 | Rotation::Rotate270 => (self.rect.height, self.rect.width),
            Rotation::Identity | Rotation::Rotate180 => (self.rect.width, self.rect.height),
        }
    }

    /// Times out `count` times before every delivered frame.
    pub const fn with_frame_timeouts(mut self, count: usize) -> Self {
        self.frame_timeouts = count;
        self
    }

    /// Every frame wait fails with a hard error.
    pub const fn with_failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }
}

/// Injected failures.
#[derive(Clone, Debug, Default)]
pub struct Failures {
    pub enumerate: bool,
    pub texture: bool,
    pub copy: bool,
    pub pipeline: bool,
    pub open: bool,
    pub render_target: bool,
    pub vertex_buffer: bool,
    pub shader_view: bool,
    pub acquire_sync: bool,
    pub release_sync: bool,
    /// Number of keyed lock waits that time out before the lock is granted.
    pub lock_timeouts: usize,
}

#[derive(PartialEq, Clone, Debug)]
pub struct Draw {
    pub texture: usize,
    pub viewport: Viewport,
    pub vertices: Vec<Vertex>,
    pub lock_held: bool,
}

/// Everything the device was asked to do.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    pub enumerations: usize,
    pub textures_created: Vec<(u32, u32)>,
    pub frame_acquire_attempts: usize,
    pub frames_acquired: usize,
    pub frames_released: usize,
    /// `(output index, texture id)` per successful copy.
    pub copies: Vec<(usize, usize)>,
    pub pipelines_created: usize,
    pub vertex_buffers_created: usize,
    pub opened_handles: Vec<SharedHandle>,
    pub lock_attempts: usize,
    pub locks_acquired: usize,
    pub locks_released: usize,
    pub lock_held: bool,
    pub acquire_keys: Vec<u64>,
    pub release_keys: Vec<u64>,
    pub draws: Vec<Draw>,
    /// Whether the keyed lock was held, per render target clear.
    pub clears: Vec<bool>,
    pub unbinds: usize,
    pub live_views: usize,
}

#[derive(Default)]
struct MockState {
    outputs: Vec<MockOutput>,
    failures: Failures,
    journal: Journal,
    next_texture: usize,
    /// Frame size overrides per output index, set after enumeration.
    frame_sizes: Vec<(usize, (u32, u32))>,
}

type SharedState = Arc<Mutex<MockState>>;

#[derive(Clone, Default)]
pub struct MockDevice {
    state: SharedState,
}

impl MockDevice {
    pub fn new(outputs: Vec<MockOutput>) -> Self {
        let device = Self::default();
        device.set_outputs(outputs);
        device
    }

    pub fn with_displays(rects: &[Rect]) -> Self {
        Self::new(rects.iter().copied().map(MockOutput::new).collect())
    }

    /// Replaces the outputs returned by the next enumeration.
    pub fn set_outputs(&self, outputs: Vec<MockOutput>) {
        self.state.lock().outputs = outputs;
    }

    pub fn fail(&self, inject: impl FnOnce(&mut Failures)) {
        inject(&mut self.state.lock().failures);
    }

    /// Makes output `index` deliver frames of `size` from now on.
    pub fn set_frame_size(&self, index: usize, size: (u32, u32)) {
        self.state.lock().frame_sizes.push((index, size));
    }

    pub fn journal<R>(&self, inspect: impl FnOnce(&Journal) -> R) -> R {
        inspect(&self.state.lock().journal)
    }

    /// A standalone capture texture, outside of any display.
    pub fn texture(&self) -> MockTexture {
        self.sized_texture((0, 0))
    }

    fn sized_texture(&self, size: (u32, u32)) -> MockTexture {
        let mut state = self.state.lock();
        let id = state.next_texture;
        state.next_texture += 1;
        MockTexture { id, size }
    }
}

#[derive(Eq, PartialEq, Debug)]
pub struct MockTexture {
    id: usize,
    size: (u32, u32),
}

impl MockTexture {
    pub const fn id(&self) -> usize {
        self.id
    }
}

#[derive(Debug)]
pub struct MockFrame {
    output: usize,
    size: (u32, u32),
}

pub struct MockStream {
    output: usize,
    frame_size: (u32, u32),
    frame_timeouts: usize,
    pending_timeouts: usize,
    fail_acquire: bool,
    holding_frame: bool,
    state: SharedState,
}

impl DuplicationStream for MockStream {
    type Frame = MockFrame;

    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> Result<WaitOutcome<Self::Frame>, Error> {
        let mut state = self.state.lock();
        state.journal.frame_acquire_attempts += 1;

        if self.fail_acquire {
            return Err(Error::GraphicsApi("AcquireNextFrame"));
        }
        if self.holding_frame {
            return Err(Error::GraphicsApi("AcquireNextFrame called while holding a frame"));
        }
        if self.pending_timeouts > 0 {
            self.pending_timeouts -= 1;
            return Ok(WaitOutcome::TimedOut);
        }

        let size = state
            .frame_sizes
            .iter()
            .rev()
            .find(|(index, _)| *index == self.output)
            .map_or(self.frame_size, |(_, size)| *size);

        self.pending_timeouts = self.frame_timeouts;
        self.holding_frame = true;
        state.journal.frames_acquired += 1;
        Ok(WaitOutcome::Ready(MockFrame { output: self.output, size }))
    }

    fn release_frame(&mut self) -> Result<(), Error> {
        if !self.holding_frame {
            return Err(Error::GraphicsApi("ReleaseFrame without a frame"));
        }

        self.holding_frame = false;
        self.state.lock().journal.frames_released += 1;
        Ok(())
    }
}

pub struct MockSharedTexture {
    state: SharedState,
}

impl KeyedLock for MockSharedTexture {
    fn acquire_sync(&self, key: u64, _timeout_ms: u32) -> Result<WaitOutcome<()>, Error> {
        let mut state = self.state.lock();
        state.journal.lock_attempts += 1;
        state.journal.acquire_keys.push(key);

        if state.failures.acquire_sync {
            return Err(Error::GraphicsApi("AcquireSync"));
        }
        if state.failures.lock_timeouts > 0 {
            state.failures.lock_timeouts -= 1;
            return Ok(WaitOutcome::TimedOut);
        }

        state.journal.locks_acquired += 1;
        state.journal.lock_held = true;
        Ok(WaitOutcome::Ready(()))
    }

    fn release_sync(&self, key: u64) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.journal.locks_released += 1;
        state.journal.release_keys.push(key);
        state.journal.lock_held = false;

        if state.failures.release_sync {
            return Err(Error::GraphicsApi("ReleaseSync"));
        }
        Ok(())
    }
}

pub struct MockPipeline;

/// A per-call view or buffer, counted while alive.
pub struct MockView {
    texture: Option<usize>,
    vertices: Vec<Vertex>,
    state: SharedState,
}

impl MockView {
    fn new(state: &SharedState, texture: Option<usize>, vertices: Vec<Vertex>) -> Self {
        state.lock().journal.live_views += 1;
        Self { texture, vertices, state: Arc::clone(state) }
    }
}

impl Drop for MockView {
    fn drop(&mut self) {
        self.state.lock().journal.live_views -= 1;
    }
}

impl MockDevice {
    fn check(&self, failing: impl FnOnce(&Failures) -> bool, call: &'static str) -> Result<(), Error> {
        if failing(&self.state.lock().failures) {
            return Err(Error::GraphicsApi(call));
        }
        Ok(())
    }
}

impl GraphicsDevice for MockDevice {
    type Texture = MockTexture;
    type Frame = MockFrame;
    type Stream = MockStream;
    type SharedTexture = MockSharedTexture;
    type Pipeline = MockPipeline;
    type RenderTarget = MockView;
    type VertexBuffer = MockView;
    type ShaderView = MockView;

    fn enumerate_outputs(&self) -> Result<Vec<OutputDuplication<Self::Stream>>, Error> {
        self.check(|failures| failures.enumerate, "EnumOutputs")?;

        let mut state = self.state.lock();
        state.journal.enumerations += 1;

        let outputs = state
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| OutputDuplication {
                desc: OutputDesc {
                    name: format!("\\\\.\\DISPLAY{}", index + 1),
                    rect: output.rect,
                    rotation: output.rotation,
                },
                stream: MockStream {
                    output: index,
                    frame_size: output.frame_size(),
                    frame_timeouts: output.frame_timeouts,
                    pending_timeouts: output.frame_timeouts,
                    fail_acquire: output.fail_acquire,
                    holding_frame: false,
                    state: Arc::clone(&self.state),
                },
            })
            .collect();

        Ok(outputs)
    }

    fn create_capture_texture(&self, width: u32, height: u32) -> Result<Self::Texture, Error> {
        self.check(|failures| failures.texture, "CreateTexture2D")?;

        self.state.lock().journal.textures_created.push((width, height));
        Ok(self.sized_texture((width, height)))
    }

    fn copy_frame(&self, frame: &Self::Frame, destination: &Self::Texture) -> Result<(), Error> {
        self.check(|failures| failures.copy, "CopyResource")?;
        if frame.size != destination.size {
            return Err(Error::AccessLost);
        }

        self.state.lock().journal.copies.push((frame.output, destination.id));
        Ok(())
    }

    fn create_pipeline(&self, shaders: &ShaderBytecode<'_>) -> Result<Self::Pipeline, Error> {
        self.check(|failures| failures.pipeline, "CreateVertexShader")?;
        if shaders.vertex.is_empty() || shaders.pixel.is_empty() {
            return Err(Error::GraphicsApi("CreatePixelShader"));
        }

        self.state.lock().journal.pipelines_created += 1;
        Ok(MockPipeline)
    }

    fn open_shared_texture(&self, handle: SharedHandle) -> Result<Self::SharedTexture, Error> {
        self.check(|failures| failures.open, "OpenSharedResource")?;

        self.state.lock().journal.opened_handles.push(handle);
        Ok(MockSharedTexture { state: Arc::clone(&self.state) })
    }

    fn create_render_target(&self, _texture: &Self::SharedTexture) -> Result<Self::RenderTarget, Error> {
        self.check(|failures| failures.render_target, "CreateRenderTargetView")?;
        Ok(MockView::new(&self.state, None, Vec::new()))
    }

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> Result<Self::VertexBuffer, Error> {
        self.check(|failures| failures.vertex_buffer, "CreateBuffer")?;

        self.state.lock().journal.vertex_buffers_created += 1;
        Ok(MockView::new(&self.state, None, vertices.to_vec()))
    }

    fn create_shader_view(&self, texture: &Self::Texture) -> Result<Self::ShaderView, Error> {
        self.check(|failures| failures.shader_view, "CreateShaderResourceView")?;
        Ok(MockView::new(&self.state, Some(texture.id), Vec::new()))
    }

    fn draw_quad(
        &self,
        _pipeline: &Self::Pipeline,
        _target: &Self::RenderTarget,
        vertices: &Self::VertexBuffer,
        source: &Self::ShaderView,
        viewport: Viewport,
    ) {
        let mut state = self.state.lock();
        let lock_held = state.journal.lock_held;
        state.journal.draws.push(Draw {
            texture: source.texture.unwrap_or(usize::MAX),
            viewport,
            vertices: vertices.vertices.clone(),
            lock_held,
        });
    }

    fn clear_render_target(&self, _target: &Self::RenderTarget) {
        let mut state = self.state.lock();
        let lock_held = state.journal.lock_held;
        state.journal.clears.push(lock_held);
    }

    fn unbind_views(&self) {
        self.state.lock().journal.unbinds += 1;
    }
}
