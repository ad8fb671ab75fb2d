//! DXGI Desktop Duplication streams.
//!
//! [`duplicate_outputs`] walks the outputs of an adapter and opens one
//! [`IDXGIOutputDuplication`] per output attached to the desktop. Each [`DxgiDuplication`] hands
//! out the desktop image of its output as a GPU texture, one frame at a time.
use log::{debug, warn};
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_ROTATE180, DXGI_MODE_ROTATION_ROTATE270,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_NOT_FOUND, DXGI_ERROR_UNSUPPORTED,
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, IDXGIAdapter1, IDXGIOutput1, IDXGIOutputDuplication,
};
use windows::Win32::UI::HiDpi::{DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2, SetProcessDpiAwarenessContext};
use windows::core::Interface;

use crate::device::{DuplicationStream, OutputDesc, OutputDuplication, Rotation, WaitOutcome};
use crate::error::Error;
use crate::rect::Rect;

/// A desktop image acquired from a [`DxgiDuplication`].
///
/// Valid until the stream's [`DuplicationStream::release_frame`] is called.
pub struct DxgiFrame {
    texture: ID3D11Texture2D,
}

impl DxgiFrame {
    /// The full desktop image of the output.
    #[inline]
    #[must_use]
    pub const fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }
}

/// Duplication stream of one output.
pub struct DxgiDuplication {
    output: IDXGIOutput1,
    duplication: IDXGIOutputDuplication,
    is_holding_frame: bool,
}

// A stream is only driven by the thread that currently owns its capture manager.
#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for DxgiDuplication {}

impl DxgiDuplication {
    /// The DXGI output this stream duplicates.
    #[inline]
    #[must_use]
    pub const fn output(&self) -> &IDXGIOutput1 {
        &self.output
    }

    fn release_held_frame(&mut self) -> Result<(), Error> {
        if !self.is_holding_frame {
            return Ok(());
        }
        self.is_holding_frame = false;

        match unsafe { self.duplication.ReleaseFrame() } {
            Ok(()) => Ok(()),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => Err(Error::AccessLost),
            Err(e) => Err(Error::WindowsError(e)),
        }
    }
}

impl DuplicationStream for DxgiDuplication {
    type Frame = DxgiFrame;

    fn acquire_next_frame(&mut self, timeout_ms: u32) -> Result<WaitOutcome<Self::Frame>, Error> {
        // A frame that was never handed back blocks the next acquire.
        self.release_held_frame()?;

        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource = None;

        match unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource) } {
            Ok(()) => (),
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(WaitOutcome::TimedOut),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => return Err(Error::AccessLost),
            Err(e) => return Err(Error::WindowsError(e)),
        }
        self.is_holding_frame = true;

        let texture = resource
            .ok_or(Error::GraphicsApi("AcquireNextFrame returned no resource"))
            .and_then(|resource| resource.cast::<ID3D11Texture2D>().map_err(Error::from));

        match texture {
            Ok(texture) => Ok(WaitOutcome::Ready(DxgiFrame { texture })),
            Err(e) => {
                self.release_held_frame()?;
                Err(e)
            }
        }
    }

    fn release_frame(&mut self) -> Result<(), Error> {
        self.release_held_frame()
    }
}

// The duplication reports quarter turns reliably, the output description covers the rest.
const fn resolve_rotation(duplication: DXGI_MODE_ROTATION, output: DXGI_MODE_ROTATION) -> Rotation {
    let rotation = match duplication {
        DXGI_MODE_ROTATION_ROTATE90 | DXGI_MODE_ROTATION_ROTATE270 => duplication,
        _ => output,
    };

    match rotation {
        DXGI_MODE_ROTATION_ROTATE90 => Rotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => Rotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => Rotation::Rotate270,
        _ => Rotation::Identity,
    }
}

/// Opens a duplication stream for every output of `adapter` attached to the desktop, in
/// enumeration order.
///
/// Outputs that cannot be duplicated on this adapter are skipped with a warning.
///
/// # Errors
///
/// - [`Error::DuplicationUnavailable`] while the secure desktop or another exclusive mode
///   prevents duplication.
/// - [`Error::InvalidDesktopRect`] when an output reports inverted coordinates.
/// - [`Error::WindowsError`] for any other failure.
pub fn duplicate_outputs(
    adapter: &IDXGIAdapter1,
    device: &ID3D11Device,
) -> Result<Vec<OutputDuplication<DxgiDuplication>>, Error> {
    // Desktop coordinates are only reported in physical pixels for per-monitor aware processes.
    match unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) } {
        Ok(()) => (),
        // Already set by a previous call or the application manifest.
        Err(e) if e.code() == E_ACCESSDENIED => (),
        Err(e) => return Err(Error::WindowsError(e)),
    }

    let mut duplications = Vec::new();
    for index in 0_u32.. {
        let output = match unsafe { adapter.EnumOutputs(index) } {
            Ok(output) => output,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(Error::WindowsError(e)),
        };

        let desc = unsafe { output.GetDesc()? };
        let name_len = desc.DeviceName.iter().position(|&c| c == 0).unwrap_or(desc.DeviceName.len());
        let name = String::from_utf16_lossy(&desc.DeviceName[..name_len]);

        if !desc.AttachedToDesktop.as_bool() {
            warn!("Output {index} ({name}) is not attached to the desktop, skipping");
            continue;
        }

        let coordinates = desc.DesktopCoordinates;
        let rect = Rect::from_edges(coordinates.left, coordinates.top, coordinates.right, coordinates.bottom)?;

        let output = output.cast::<IDXGIOutput1>()?;
        let duplication = match unsafe { output.DuplicateOutput(device) } {
            Ok(duplication) => duplication,
            Err(e) if e.code() == DXGI_ERROR_UNSUPPORTED => {
                warn!("Output {index} ({name}) cannot be duplicated on this adapter, skipping");
                continue;
            }
            Err(e) if e.code() == E_ACCESSDENIED || e.code() == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE => {
                return Err(Error::DuplicationUnavailable);
            }
            Err(e) => return Err(Error::WindowsError(e)),
        };

        let duplication_desc = unsafe { duplication.GetDesc() };
        let rotation = resolve_rotation(duplication_desc.Rotation, desc.Rotation);
        if rotation != Rotation::Identity {
            debug!(
                "Output {index} ({name}) is {rotation:?}, frames are {}x{}",
                duplication_desc.ModeDesc.Width, duplication_desc.ModeDesc.Height
            );
        }

        duplications.push(OutputDuplication {
            desc: OutputDesc { name, rect, rotation },
            stream: DxgiDuplication { output, duplication, is_holding_frame: false },
        });
    }

    Ok(duplications)
}

#[cfg(test)]
mod tests {
    use windows::Win32::Graphics::Dxgi::Common::{DXGI_MODE_ROTATION_IDENTITY, DXGI_MODE_ROTATION_UNSPECIFIED};

    use super::*;

    #[test]
    fn quarter_turns_come_from_the_duplication() {
        assert_eq!(resolve_rotation(DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_IDENTITY), Rotation::Rotate90);
        assert_eq!(resolve_rotation(DXGI_MODE_ROTATION_ROTATE270, DXGI_MODE_ROTATION_ROTATE90), Rotation::Rotate270);
    }

    #[test]
    fn other_rotations_fall_back_to_the_output() {
        assert_eq!(
            resolve_rotation(DXGI_MODE_ROTATION_UNSPECIFIED, DXGI_MODE_ROTATION_ROTATE180),
            Rotation::Rotate180
        );
        assert_eq!(resolve_rotation(DXGI_MODE_ROTATION_IDENTITY, DXGI_MODE_ROTATION_ROTATE90), Rotation::Rotate90);
        assert_eq!(
            resolve_rotation(DXGI_MODE_ROTATION_UNSPECIFIED, DXGI_MODE_ROTATION_UNSPECIFIED),
            Rotation::Identity
        );
    }
}
