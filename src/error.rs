//! Crate-wide error type.
//!
//! [`VoiceError`] carries a human-readable description for every failure the
//! voice session can hit.  [`ErrorKind`] is the flat taxonomy used for
//! counters, log fields and tests that only care about the category.
//!
//! | Kind | Scope |
//! |------|-------|
//! | `FrameTooLarge`, `MalformedChunk`, `EmptyBuffer` | local; the unit is dropped |
//! | `StreamOpenFailed`, `StreamError`, `DeviceUnavailable` | session; controller enters `Failed` |
//! | `CaptureTransmitDropped` | counted only, never surfaced |
//! | `SessionBusy`, `ControllerGone` | caller misuse of the control surface |

use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Category of a [`VoiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FrameTooLarge,
    MalformedChunk,
    EmptyBuffer,
    StreamOpenFailed,
    StreamError,
    CaptureTransmitDropped,
    DeviceUnavailable,
    SessionBusy,
    ControllerGone,
}

impl ErrorKind {
    /// `true` for errors that only discard the offending unit.
    ///
    /// ```
    /// use live_voice::ErrorKind;
    ///
    /// assert!(ErrorKind::MalformedChunk.is_local());
    /// assert!(!ErrorKind::StreamError.is_local());
    /// ```
    pub fn is_local(self) -> bool {
        matches!(
            self,
            ErrorKind::FrameTooLarge
                | ErrorKind::MalformedChunk
                | ErrorKind::EmptyBuffer
                | ErrorKind::CaptureTransmitDropped
        )
    }
}

// ---------------------------------------------------------------------------
// VoiceError
// ---------------------------------------------------------------------------

/// Errors produced by the codec, scheduler, capture pipeline and session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VoiceError {
    /// A frame handed to the encoder exceeds [`MAX_FRAME_SAMPLES`](crate::audio::MAX_FRAME_SAMPLES).
    #[error("frame too large: {len} samples (maximum {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// An inbound chunk could not be decoded into whole sample frames.
    #[error("malformed audio chunk: {0}")]
    MalformedChunk(String),

    /// A zero-length buffer was handed to the playback scheduler.
    #[error("refusing to schedule an empty playback buffer")]
    EmptyBuffer,

    /// The bidirectional stream could not be opened (or never acknowledged).
    #[error("failed to open voice stream: {0}")]
    StreamOpenFailed(String),

    /// The stream reported an error or ended unexpectedly.
    #[error("voice stream error: {0}")]
    StreamError(String),

    /// The transmit path refused a captured frame.
    #[error("captured frame dropped by the outbound channel")]
    CaptureTransmitDropped,

    /// An audio device could not be opened or started.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `start()` was called while a session is connecting or active.
    #[error("a voice session is already running")]
    SessionBusy,

    /// The controller task is no longer running.
    #[error("session controller has shut down")]
    ControllerGone,
}

impl VoiceError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            VoiceError::MalformedChunk(_) => ErrorKind::MalformedChunk,
            VoiceError::EmptyBuffer => ErrorKind::EmptyBuffer,
            VoiceError::StreamOpenFailed(_) => ErrorKind::StreamOpenFailed,
            VoiceError::StreamError(_) => ErrorKind::StreamError,
            VoiceError::CaptureTransmitDropped => ErrorKind::CaptureTransmitDropped,
            VoiceError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            VoiceError::SessionBusy => ErrorKind::SessionBusy,
            VoiceError::ControllerGone => ErrorKind::ControllerGone,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            VoiceError::FrameTooLarge { len: 10, max: 5 }.kind(),
            ErrorKind::FrameTooLarge
        );
        assert_eq!(
            VoiceError::MalformedChunk("odd".into()).kind(),
            ErrorKind::MalformedChunk
        );
        assert_eq!(VoiceError::EmptyBuffer.kind(), ErrorKind::EmptyBuffer);
        assert_eq!(
            VoiceError::StreamOpenFailed("refused".into()).kind(),
            ErrorKind::StreamOpenFailed
        );
        assert_eq!(VoiceError::SessionBusy.kind(), ErrorKind::SessionBusy);
    }

    #[test]
    fn session_errors_are_not_local() {
        assert!(!ErrorKind::StreamOpenFailed.is_local());
        assert!(!ErrorKind::DeviceUnavailable.is_local());
        assert!(ErrorKind::EmptyBuffer.is_local());
        assert!(ErrorKind::CaptureTransmitDropped.is_local());
    }

    #[test]
    fn display_includes_detail() {
        let err = VoiceError::FrameTooLarge { len: 2_000_000, max: 960_000 };
        assert_eq!(
            err.to_string(),
            "frame too large: 2000000 samples (maximum 960000)"
        );
    }
}
