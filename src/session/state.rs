//! Session state machine and the caller-facing status snapshot.
//!
//! [`SessionState`] is owned by the [`SessionController`](super::SessionController);
//! nothing else transitions it.  Callers observe it, together with the
//! transcript and counters, through [`SessionStatus`] snapshots published on
//! a `tokio::sync::watch` channel.

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of one voice session.
///
/// ```text
/// Idle ──start()──▶ Connecting ──stream open──▶ Active
///   ▲                   │                          │
///   │                   └──open failed/timeout──▶ Failed ◀── stream error
///   │                                              │
///   └──────── Closing ◀── stop() / stream close ───┘ (stop() from Failed → Idle)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session; `start()` is accepted.
    #[default]
    Idle,

    /// Stream requested; waiting for the open acknowledgement.
    Connecting,

    /// Audio flows in both directions.
    Active,

    /// Tearing down after `stop()` or a stream close.
    Closing,

    /// The stream failed; `last_error` says why.  `start()` is accepted.
    Failed,
}

impl SessionState {
    /// `true` while a stream is being opened or is live.
    ///
    /// ```
    /// use live_voice::session::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_running());
    /// assert!(SessionState::Connecting.is_running());
    /// assert!(SessionState::Active.is_running());
    /// assert!(!SessionState::Failed.is_running());
    /// ```
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// `true` when `start()` may begin a new session.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed)
    }

    /// A short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Active => "Active",
            SessionState::Closing => "Closing",
            SessionState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Everything a presentation layer needs about the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,

    /// Transcript segments of the current (or last) session.
    pub transcript: Vec<String>,

    /// Description of the error that moved the session to `Failed`.
    ///
    /// Cleared by the next `start()`.
    pub last_error: Option<String>,

    /// Captured frames handed to the stream.
    pub frames_sent: u64,

    /// Captured frames dropped because the stream was not ready.
    pub frames_dropped: u64,

    /// Captured frames that could not be encoded.
    pub frames_rejected: u64,

    /// Inbound audio chunks scheduled for playback.
    pub chunks_scheduled: u64,

    /// Inbound audio chunks discarded as malformed or empty.
    pub chunks_rejected: u64,

    /// Barge-in notices handled.
    pub interruptions: u64,

    /// RMS level of the last captured frame in `[0.0, 1.0]`.
    pub input_level: f32,
}

impl SessionStatus {
    /// Reset per-session fields for a fresh `start()`.
    pub(crate) fn reset_for_start(&mut self) {
        *self = SessionStatus {
            state: SessionState::Connecting,
            ..SessionStatus::default()
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
