//! Tunables for keyed lock handoff and frame waits.

/// Default per-attempt wait for the destination's keyed lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u32 = 1000;

/// Default per-attempt wait for a new duplicated frame.
pub const DEFAULT_FRAME_TIMEOUT_MS: u32 = 1000;

/// Capture and composite settings.
///
/// Both timeouts bound a single attempt only. A timed-out attempt is retried, so from the
/// caller's perspective `capture` and `render_composite` block until they succeed or hit a hard
/// error.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct Settings {
    /// Key passed when acquiring the destination's keyed lock.
    pub acquire_key: u64,
    /// Key passed when releasing the destination's keyed lock.
    pub release_key: u64,
    /// Per-attempt keyed lock wait in milliseconds.
    pub lock_timeout_ms: u32,
    /// Per-attempt frame wait in milliseconds.
    pub frame_timeout_ms: u32,
}

impl Settings {
    /// Create settings, `None` means default.
    #[must_use]
    pub fn new(
        acquire_key: Option<u64>,
        release_key: Option<u64>,
        lock_timeout_ms: Option<u32>,
        frame_timeout_ms: Option<u32>,
    ) -> Self {
        let default = Self::default();

        Self {
            acquire_key: acquire_key.unwrap_or(default.acquire_key),
            release_key: release_key.unwrap_or(default.release_key),
            lock_timeout_ms: lock_timeout_ms.unwrap_or(default.lock_timeout_ms),
            frame_timeout_ms: frame_timeout_ms.unwrap_or(default.frame_timeout_ms),
        }
    }

    /// Sets the keyed lock acquire and release keys.
    #[must_use]
    pub const fn with_keys(mut self, acquire_key: u64, release_key: u64) -> Self {
        self.acquire_key = acquire_key;
        self.release_key = release_key;
        self
    }

    /// Sets the per-attempt keyed lock wait.
    #[must_use]
    pub const fn with_lock_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    /// Sets the per-attempt frame wait.
    #[must_use]
    pub const fn with_frame_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.frame_timeout_ms = timeout_ms;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            acquire_key: 0,
            release_key: 0,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
        }
    }
}
