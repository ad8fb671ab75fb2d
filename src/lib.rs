//! # Desktop Compositor
//!
//! Captures every display of the desktop with DXGI Desktop Duplication and composites any
//! region of the combined desktop into a shared, keyed-mutex protected Direct3D 11 texture,
//! without the pixels ever leaving the GPU.
//!
//! The texture usually belongs to another process (a screen-sharing or recording client) that
//! hands over its shared handle. Access to it is serialized through the texture's keyed mutex.
//!
//! ## Usage
//!
//! ```no_run
//! use desktop_compositor::{Rect, Session, Settings, SharedHandle};
//!
//! fn main() -> Result<(), desktop_compositor::Error> {
//!     // Handle of a texture created with `D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX`
//!     let destination = SharedHandle::from_raw(std::ptr::null_mut());
//!
//!     let mut session = Session::open(Settings::default())?;
//!
//!     // Composite the left 1920x1080 of the desktop into the shared texture
//!     session.capture_into_buffer(destination, Rect::new(0, 0, 1920, 1080))?;
//!
//!     session.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! Both steps block: capturing waits for a new frame on every display that overlaps the region,
//! compositing waits for the keyed mutex. Use [`SessionHandle`] to drive a session from a
//! dedicated thread.
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::inconsistent_struct_constructor)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::ptr_as_ptr)]
#![warn(clippy::borrow_as_ptr)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]

pub mod capture_manager;
pub mod compositor;
pub mod device;
pub mod error;
pub mod rect;
pub mod session;
pub mod settings;

#[cfg(windows)]
pub mod d3d11;
#[cfg(windows)]
pub mod dxgi_duplication_api;
#[cfg(windows)]
mod shader;
#[cfg(not(windows))]
pub mod unsupported;

#[cfg(test)]
mod testing;

pub use capture_manager::{CaptureManager, CapturedBuffer, DisplayOutput};
pub use compositor::Compositor;
pub use device::{GraphicsDevice, Rotation, SharedHandle, WaitOutcome};
pub use error::{Error, ErrorKind};
pub use rect::Rect;
pub use session::{Session, SessionHandle};
pub use settings::Settings;

/// The graphics device used by [`Session::open`] on this platform.
#[cfg(windows)]
pub type PlatformDevice = d3d11::D3D11Context;

/// The graphics device used by [`Session::open`] on this platform.
#[cfg(not(windows))]
pub type PlatformDevice = unsupported::UnsupportedDevice;
