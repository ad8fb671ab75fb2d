//! Display topology and per-display frame capture.
//!
//! [`CaptureManager`] enumerates the display outputs once, keeps one duplication stream and one
//! persistent capture texture per output, and copies the latest frame of every display that
//! overlaps a requested region into that display's texture.
use log::{debug, info, trace};

use crate::device::{DuplicationStream, GraphicsDevice, OutputDuplication, Rotation, WaitOutcome};
use crate::error::Error;
use crate::rect::{Rect, bounding_rect};
use crate::settings::Settings;

/// One enumerated display with its duplication stream and capture texture.
pub struct DisplayOutput<G: GraphicsDevice> {
    index: usize,
    name: String,
    rect: Rect,
    rotation: Rotation,
    stream: G::Stream,
    texture: G::Texture,
}

impl<G: GraphicsDevice> DisplayOutput<G> {
    /// Position of the display in enumeration order.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Device name reported by the platform.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bounds in desktop coordinates.
    #[inline]
    #[must_use]
    pub const fn rect(&self) -> Rect {
        self.rect
    }

    /// Orientation of the display's frames relative to the desktop.
    #[inline]
    #[must_use]
    pub const fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// The persistent capture texture holding the display's last captured frame, unrotated.
    #[inline]
    #[must_use]
    pub const fn texture(&self) -> &G::Texture {
        &self.texture
    }
}

/// A display's capture texture borrowed from the [`CaptureManager`].
///
/// The borrow ends before the next capture can overwrite the texture, so a buffer cannot outlive
/// the composite call it was captured for.
pub struct CapturedBuffer<'a, T> {
    /// The display's persistent capture texture.
    pub texture: &'a T,
    /// The display's bounds at capture time.
    pub rect: Rect,
    /// How the texture is turned relative to `rect`.
    pub rotation: Rotation,
    /// Index of the originating display.
    pub display_index: usize,
}

/// Keeps the display topology and serves per-display and aggregate captures.
///
/// A manager exclusively owns its duplication streams and capture textures. It is meant to be
/// driven from one thread at a time.
pub struct CaptureManager<G: GraphicsDevice> {
    displays: Vec<DisplayOutput<G>>,
    desktop_rect: Rect,
    frame_timeout_ms: u32,
}

impl<G: GraphicsDevice> CaptureManager<G> {
    /// Enumerates the outputs, opens their duplication streams, allocates their capture textures
    /// and computes the desktop rectangle.
    ///
    /// # Errors
    ///
    /// - [`Error::NoOutputsAvailable`] when no output can be enumerated. This is transient, retry
    ///   after a delay.
    /// - [`Error::InvalidDesktopRect`] when the outputs do not span a valid rectangle.
    /// - Any graphics error raised while enumerating or allocating.
    pub fn new(device: &G, settings: &Settings) -> Result<Self, Error> {
        let displays = Self::enumerate_displays(device)?;
        let desktop_rect = bounding_rect(displays.iter().map(|display| display.rect))?;

        info!("Capturing {} display(s), desktop {desktop_rect}", displays.len());

        Ok(Self { displays, desktop_rect, frame_timeout_ms: settings.frame_timeout_ms })
    }

    /// Drops every stream and texture, then enumerates the outputs again.
    ///
    /// Used after a display configuration change or an [`Error::AccessLost`]. On error the
    /// manager holds no display until the next successful call.
    pub fn reinitialize(&mut self, device: &G) -> Result<(), Error> {
        // The old duplications must be gone before the same outputs can be duplicated again.
        self.displays.clear();

        let displays = Self::enumerate_displays(device)?;
        self.desktop_rect = bounding_rect(displays.iter().map(|display| display.rect))?;
        self.displays = displays;

        info!("Re-enumerated {} display(s), desktop {}", self.displays.len(), self.desktop_rect);

        Ok(())
    }

    /// The bounding union of every display rectangle.
    #[inline]
    #[must_use]
    pub const fn desktop_rect(&self) -> Rect {
        self.desktop_rect
    }

    /// The enumerated displays in enumeration order.
    #[inline]
    #[must_use]
    pub fn displays(&self) -> &[DisplayOutput<G>] {
        &self.displays
    }

    /// Captures every display whose rectangle intersects `target`, in enumeration order.
    ///
    /// Blocks until each of those displays delivers a frame. A hard error on any display aborts
    /// the whole call; the streams stay open so the call can be retried.
    pub fn capture(&mut self, device: &G, target: Rect) -> Result<Vec<CapturedBuffer<'_, G::Texture>>, Error> {
        let frame_timeout_ms = self.frame_timeout_ms;

        let mut captured = Vec::with_capacity(self.displays.len());
        for (position, display) in self.displays.iter_mut().enumerate() {
            if !display.rect.intersects(&target) {
                trace!("Display {} at {} is outside {target}", display.index, display.rect);
                continue;
            }

            Self::capture_into_texture(device, display, frame_timeout_ms)?;
            captured.push(position);
        }

        Ok(captured.into_iter().map(|position| Self::buffer(&self.displays[position])).collect())
    }

    /// Captures a single display regardless of any target rectangle.
    ///
    /// Returns `Ok(None)` when `display_index` is out of range.
    pub fn capture_display(
        &mut self,
        device: &G,
        display_index: usize,
    ) -> Result<Option<CapturedBuffer<'_, G::Texture>>, Error> {
        let frame_timeout_ms = self.frame_timeout_ms;

        let Some(display) = self.displays.get_mut(display_index) else {
            return Ok(None);
        };
        Self::capture_into_texture(device, display, frame_timeout_ms)?;

        Ok(Some(Self::buffer(display)))
    }

    fn buffer(display: &DisplayOutput<G>) -> CapturedBuffer<'_, G::Texture> {
        CapturedBuffer {
            texture: &display.texture,
            rect: display.rect,
            rotation: display.rotation,
            display_index: display.index,
        }
    }

    fn enumerate_displays(device: &G) -> Result<Vec<DisplayOutput<G>>, Error> {
        let outputs = device.enumerate_outputs()?;
        if outputs.is_empty() {
            return Err(Error::NoOutputsAvailable);
        }

        outputs
            .into_iter()
            .enumerate()
            .map(|(index, OutputDuplication { desc, stream })| {
                let (width, height) = desc.rotation.frame_size(&desc.rect);
                let texture = device.create_capture_texture(width, height)?;
                debug!("Display {index} ({}) at {}, {:?}", desc.name, desc.rect, desc.rotation);

                Ok(DisplayOutput { index, name: desc.name, rect: desc.rect, rotation: desc.rotation, stream, texture })
            })
            .collect()
    }

    // Waits for the next frame, copies it into the display's texture and hands it back to the
    // stream. The frame is released exactly once, whether or not the copy worked.
    fn capture_into_texture(device: &G, display: &mut DisplayOutput<G>, frame_timeout_ms: u32) -> Result<(), Error> {
        let frame = loop {
            match display.stream.acquire_next_frame(frame_timeout_ms)? {
                WaitOutcome::Ready(frame) => break frame,
                WaitOutcome::TimedOut => trace!("Display {} has no new frame yet", display.index),
            }
        };

        let copied = device.copy_frame(&frame, &display.texture);
        drop(frame);
        let released = display.stream.release_frame();

        copied?;
        released
    }
}
