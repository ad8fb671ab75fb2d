//! Owning context tying the graphics device, the capture manager and the compositor together.
use std::sync::Arc;

use log::info;
use parking_lot::{Mutex, MutexGuard};

use crate::PlatformDevice;
use crate::capture_manager::CaptureManager;
use crate::compositor::{Compositor, ShaderBytecode};
use crate::device::{GraphicsDevice, SharedHandle};
use crate::error::Error;
use crate::rect::Rect;
use crate::settings::Settings;

/// A running capture session.
///
/// Built in the order graphics device, capture manager, compositor, and torn down in the
/// reverse order.
pub struct Session<G: GraphicsDevice> {
    // Field order is drop order.
    compositor: Compositor<G>,
    capture_manager: CaptureManager<G>,
    graphics: G,
}

impl<G: GraphicsDevice> Session<G> {
    /// Starts a session on an existing graphics device.
    ///
    /// # Errors
    ///
    /// - [`Error::NoOutputsAvailable`] when no display can be enumerated right now.
    /// - Any error raised while creating the capture resources or the composite pipeline.
    pub fn new(graphics: G, shaders: &ShaderBytecode<'_>, settings: Settings) -> Result<Self, Error> {
        let capture_manager = CaptureManager::new(&graphics, &settings)?;
        let compositor = Compositor::new(&graphics, shaders, &settings)?;

        Ok(Self { compositor, capture_manager, graphics })
    }

    /// Captures every display overlapping `target` and composites them into the shared texture
    /// behind `destination`.
    ///
    /// Returns the first error of either step. Nothing is drawn when the capture fails.
    pub fn capture_into_buffer(&mut self, destination: SharedHandle, target: Rect) -> Result<(), Error> {
        let Self { compositor, capture_manager, graphics } = self;

        let buffers = capture_manager.capture(graphics, target)?;
        compositor.render_composite(graphics, destination, target, &buffers)
    }

    /// Re-enumerates the displays after a configuration change or lost access.
    pub fn reinitialize_outputs(&mut self) -> Result<(), Error> {
        self.capture_manager.reinitialize(&self.graphics)
    }

    /// The bounding rectangle of every display.
    #[inline]
    #[must_use]
    pub const fn desktop_rect(&self) -> Rect {
        self.capture_manager.desktop_rect()
    }

    #[inline]
    #[must_use]
    pub const fn graphics(&self) -> &G {
        &self.graphics
    }

    #[inline]
    #[must_use]
    pub const fn capture_manager(&self) -> &CaptureManager<G> {
        &self.capture_manager
    }

    /// Tears the session down in reverse initialization order.
    pub fn shutdown(self) {
        let Self { compositor, capture_manager, graphics } = self;

        drop(compositor);
        drop(capture_manager);
        drop(graphics);

        info!("Capture session shut down");
    }
}

impl Session<PlatformDevice> {
    /// Creates the platform graphics device and starts a session on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] on platforms without desktop duplication.
    pub fn open(settings: Settings) -> Result<Self, Error> {
        let graphics = PlatformDevice::create()?;
        let shaders = graphics.composite_shaders()?;

        Self::new(graphics, &shaders, settings)
    }
}

/// Cloneable handle to a [`Session`] for driving it from a dedicated thread.
///
/// Both capture and composite block until they succeed, so callers that need bounded latency
/// run them on a worker thread they can abandon.
pub struct SessionHandle<G: GraphicsDevice> {
    session: Arc<Mutex<Session<G>>>,
}

impl<G: GraphicsDevice> SessionHandle<G> {
    #[must_use]
    pub fn new(session: Session<G>) -> Self {
        Self { session: Arc::new(Mutex::new(session)) }
    }

    /// Locks the session and runs [`Session::capture_into_buffer`].
    pub fn capture_into_buffer(&self, destination: SharedHandle, target: Rect) -> Result<(), Error> {
        self.session.lock().capture_into_buffer(destination, target)
    }

    /// Locks the session for direct access.
    pub fn lock(&self) -> MutexGuard<'_, Session<G>> {
        self.session.lock()
    }
}

impl<G: GraphicsDevice> Clone for SessionHandle<G> {
    fn clone(&self) -> Self {
        Self { session: Arc::clone(&self.session) }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::compositor::quad_vertices;
    use crate::device::{Rotation, Viewport};
    use crate::error::ErrorKind;
    use crate::testing::{MockDevice, MockOutput, TEST_SHADERS};

    const DESTINATION: SharedHandle = SharedHandle::from_raw(std::ptr::without_provenance_mut(0x7f0));

    fn two_displays() -> MockDevice {
        MockDevice::with_displays(&[Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1280, 1024)])
    }

    #[test]
    fn composites_only_intersecting_display() {
        let device = two_displays();
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();
        assert_eq!(session.desktop_rect(), Rect::new(0, 0, 3200, 1080));

        session.capture_into_buffer(DESTINATION, Rect::new(0, 0, 1920, 1080)).unwrap();

        let first_texture = session.capture_manager().displays()[0].texture().id();
        device.journal(|journal| {
            assert_eq!(journal.copies, vec![(0, first_texture)]);
            assert_eq!(journal.draws.len(), 1);
            assert_eq!(journal.draws[0].texture, first_texture);
            assert_eq!(journal.draws[0].viewport, Viewport { x: 0.0, y: 0.0, width: 1920.0, height: 1080.0 });
            assert_eq!((journal.locks_acquired, journal.locks_released), (1, 1));
            assert_eq!(journal.frames_acquired, journal.frames_released);
        });
    }

    #[test]
    fn spanning_target_composites_both_displays() {
        let device = two_displays();
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();

        let desktop = session.desktop_rect();
        session.capture_into_buffer(DESTINATION, desktop).unwrap();

        device.journal(|journal| {
            let origins: Vec<(f32, f32)> = journal.draws.iter().map(|draw| (draw.viewport.x, draw.viewport.y)).collect();
            assert_eq!(origins, vec![(0.0, 0.0), (1920.0, 0.0)]);
        });
    }

    #[test]
    fn survives_three_lock_timeouts() {
        let device = two_displays();
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();
        device.fail(|failures| failures.lock_timeouts = 3);

        session.capture_into_buffer(DESTINATION, Rect::new(0, 0, 1920, 1080)).unwrap();

        device.journal(|journal| {
            assert_eq!(journal.lock_attempts, 4);
            assert_eq!(journal.locks_acquired, 1);
            assert_eq!(journal.locks_released, 1);
            assert_eq!(journal.draws.len(), 1);
        });
    }

    #[test]
    fn capture_error_skips_composite() {
        let device = MockDevice::new(vec![MockOutput::new(Rect::new(0, 0, 1920, 1080)).with_failing_acquire()]);
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();

        assert!(session.capture_into_buffer(DESTINATION, Rect::new(0, 0, 100, 100)).is_err());

        device.journal(|journal| {
            assert!(journal.opened_handles.is_empty());
            assert_eq!(journal.lock_attempts, 0);
        });
    }

    #[test]
    fn no_outputs_is_transient() {
        let device = MockDevice::new(Vec::new());
        let error = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).err().unwrap();

        assert_eq!(error.kind(), ErrorKind::TransientUnavailable);
        device.journal(|journal| assert_eq!(journal.pipelines_created, 0));
    }

    #[test]
    fn reinitialize_outputs_follows_topology() {
        let device = two_displays();
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();

        device.set_outputs(vec![MockOutput::new(Rect::new(0, 0, 2560, 1440))]);
        session.reinitialize_outputs().unwrap();
        assert_eq!(session.desktop_rect(), Rect::new(0, 0, 2560, 1440));

        session.capture_into_buffer(DESTINATION, Rect::new(0, 0, 2560, 1440)).unwrap();
        device.journal(|journal| {
            assert_eq!(journal.enumerations, 2);
            assert_eq!(journal.draws.len(), 1);
            assert_eq!(journal.draws[0].viewport.width, 2560.0);
        });
    }

    #[test]
    fn reinitialize_enumeration_failure_is_graphics_error() {
        let device = two_displays();
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();
        device.fail(|failures| failures.enumerate = true);

        let error = session.reinitialize_outputs().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::GraphicsApiError);
        assert!(session.capture_manager().displays().is_empty());

        device.fail(|failures| failures.enumerate = false);
        session.reinitialize_outputs().unwrap();
        assert_eq!(session.capture_manager().displays().len(), 2);
    }

    #[test]
    fn portrait_display_composites_next_to_landscape() {
        let device = MockDevice::new(vec![
            MockOutput::new(Rect::new(0, 0, 1920, 1080)),
            MockOutput::new(Rect::new(1920, 0, 1080, 1920)).with_rotation(Rotation::Rotate90),
        ]);
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();

        let desktop = session.desktop_rect();
        assert_eq!(desktop, Rect::new(0, 0, 3000, 1920));
        session.capture_into_buffer(DESTINATION, desktop).unwrap();

        device.journal(|journal| {
            assert_eq!(journal.draws.len(), 2);
            assert_eq!(journal.draws[1].vertices, quad_vertices(Rotation::Rotate90));
            assert_eq!(journal.draws[1].viewport, Viewport { x: 1920.0, y: 0.0, width: 1080.0, height: 1920.0 });
            assert_eq!(journal.clears, vec![true]);
        });
    }

    #[test]
    fn handle_drives_session_from_worker_thread() {
        let device = two_displays();
        let session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();
        let handle = SessionHandle::new(session);

        let worker = {
            let handle = handle.clone();
            thread::spawn(move || {
                for _ in 0..3 {
                    handle.capture_into_buffer(DESTINATION, Rect::new(1920, 0, 1280, 1024))?;
                }
                Ok::<(), Error>(())
            })
        };
        worker.join().unwrap().unwrap();

        assert_eq!(handle.lock().desktop_rect(), Rect::new(0, 0, 3200, 1080));
        device.journal(|journal| {
            assert_eq!(journal.draws.len(), 3);
            assert_eq!(journal.locks_acquired, journal.locks_released);
            assert_eq!(journal.live_views, 0);
        });
    }

    #[test]
    fn shutdown_releases_everything() {
        let device = two_displays();
        let mut session = Session::new(device.clone(), &TEST_SHADERS, Settings::default()).unwrap();
        session.capture_into_buffer(DESTINATION, Rect::new(0, 0, 3200, 1080)).unwrap();

        session.shutdown();

        device.journal(|journal| {
            assert_eq!(journal.live_views, 0);
            assert_eq!(journal.frames_acquired, journal.frames_released);
        });
    }
}
