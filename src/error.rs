//! Error type shared by every stage of the capture and composite pipeline.

/// Error type of the underlying platform graphics API.
#[cfg(windows)]
pub type PlatformError = windows::core::Error;

/// Error type of the underlying platform graphics API.
#[cfg(not(windows))]
pub type PlatformError = std::convert::Infallible;

/// Coarse classification of an [`Error`], used by callers to decide whether to retry.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Hash)]
pub enum ErrorKind {
    /// The operation is unavailable on this platform or hardware.
    NotSupported,
    /// An underlying GPU or platform call failed unexpectedly.
    GraphicsApiError,
    /// Expected condition; retry the call later.
    TransientUnavailable,
    /// An internal invariant was violated.
    UnexpectedError,
}

/// Errors returned by the capture and composite pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Desktop duplication is not available on this platform.
    #[error("Desktop duplication is not supported on this platform")]
    NotSupported,
    /// The created device does not reach the minimum feature level.
    #[error("Failed to create a Direct3D device with the required feature level")]
    FeatureLevelNotSatisfied,
    /// No display output could be enumerated, the desktop is probably changing configuration.
    #[error("No display outputs are currently available")]
    NoOutputsAvailable,
    /// The output exists but cannot be duplicated right now (secure desktop, lock screen).
    #[error("Display duplication is temporarily unavailable")]
    DuplicationUnavailable,
    /// The duplication stream lost access, mostly after a mode change or desktop switch.
    #[error("Duplication access lost; outputs must be re-enumerated")]
    AccessLost,
    /// A graphics call failed or returned no object.
    #[error("Graphics API error: {0}")]
    GraphicsApi(&'static str),
    /// The computed desktop rectangle is empty or inverted.
    #[error("Invalid desktop rectangle: left {left}, top {top}, right {right}, bottom {bottom}")]
    InvalidDesktopRect { left: i32, top: i32, right: i32, bottom: i32 },
    /// Windows API error.
    #[error("Windows API error: {0}")]
    WindowsError(#[from] PlatformError),
}

impl Error {
    /// Maps the error onto its [`ErrorKind`].
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported | Self::FeatureLevelNotSatisfied => ErrorKind::NotSupported,
            Self::NoOutputsAvailable | Self::DuplicationUnavailable => ErrorKind::TransientUnavailable,
            Self::AccessLost | Self::GraphicsApi(_) | Self::WindowsError(_) => ErrorKind::GraphicsApiError,
            Self::InvalidDesktopRect { .. } => ErrorKind::UnexpectedError,
        }
    }

    /// Whether the caller is expected to retry the same call after a delay.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientUnavailable)
    }
}
