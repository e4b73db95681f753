//! Capture pipeline: captured frame → PCM codec → transmit callback.
//!
//! [`CapturePipeline::on_frame`] is called by a [`CaptureSource`] once per
//! hardware frame, on the source's own real-time thread.  The frame is
//! encoded and handed straight to the injected [`Transmit`] callback; nothing
//! is buffered across calls, so frames leave in exactly the order they
//! arrived.
//!
//! Audio hardware cannot be paused, so the pipeline never waits on the
//! network: when the transmit path reports it is not ready the frame is
//! dropped and counted.
//!
//! ```text
//! CaptureSource thread ──on_frame──▶ encode ──Transmit──▶ stream send queue
//!                                       │            └─ NotReady / Closed → frames_dropped += 1
//!                                       └─ FrameTooLarge → frames_rejected += 1
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::audio::codec::{self, EncodedChunk};
use crate::audio::level::rms_level;
use crate::error::VoiceError;

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// Outbound transmit callback.  Must never block.
pub type Transmit = Box<dyn Fn(EncodedChunk) -> Result<(), SendError> + Send + Sync>;

/// Per-frame callback registered with a [`CaptureSource`].
///
/// Receives interleaved 16-bit samples at the session capture rate; every
/// invocation carries the same number of samples.
pub type FrameCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

// ---------------------------------------------------------------------------
// SendError
// ---------------------------------------------------------------------------

/// Why the transmit path refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The outbound queue is full; try again with the next frame.
    #[error("outbound channel not ready")]
    NotReady,

    /// The outbound channel has shut down.
    #[error("outbound channel closed")]
    Closed,
}

impl From<SendError> for VoiceError {
    fn from(_: SendError) -> Self {
        VoiceError::CaptureTransmitDropped
    }
}

// ---------------------------------------------------------------------------
// CaptureSource
// ---------------------------------------------------------------------------

/// A periodic source of fixed-length capture frames (e.g. a microphone).
pub trait CaptureSource: Send + Sync {
    /// Begin delivering frames to `on_frame`.  Capture continues until the
    /// returned guard is dropped.
    fn start(&self, on_frame: FrameCallback) -> Result<CaptureGuard, VoiceError>;
}

/// RAII guard returned by [`CaptureSource::start`]; dropping it stops capture.
pub struct CaptureGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureGuard {
    /// Guard that runs `stop` when dropped.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Guard with nothing to stop.
    pub fn noop() -> Self {
        Self { stop: None }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for CaptureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureGuard")
            .field("armed", &self.stop.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FrameOutcome / CaptureStats
// ---------------------------------------------------------------------------

/// What happened to a single frame handed to [`CapturePipeline::on_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    /// Transmit path not ready (or closed); frame discarded.
    Dropped,
    /// Frame could not be encoded; frame discarded.
    Rejected,
    /// Pipeline disabled; frame ignored.
    Disabled,
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_rejected: u64,
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Encodes captured frames and forwards them to a transmit callback.
///
/// # Example
///
/// ```rust
/// use live_voice::audio::{CapturePipeline, FrameOutcome};
///
/// let pipeline = CapturePipeline::new(Box::new(|_chunk| Ok(())));
/// assert_eq!(pipeline.on_frame(&[0; 1_024]), FrameOutcome::Sent);
///
/// pipeline.disable();
/// assert_eq!(pipeline.on_frame(&[0; 1_024]), FrameOutcome::Disabled);
/// assert_eq!(pipeline.stats().frames_sent, 1);
/// ```
pub struct CapturePipeline {
    /// `None` once disabled.  Held for the duration of a transmit so
    /// [`disable`](Self::disable) cannot return while a send is in flight.
    transmit: Mutex<Option<Transmit>>,
    frames_seen: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_rejected: AtomicU64,
    /// `f32` bits of the last frame's RMS level.
    last_level: AtomicU32,
}

impl CapturePipeline {
    pub fn new(transmit: Transmit) -> Self {
        Self {
            transmit: Mutex::new(Some(transmit)),
            frames_seen: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            last_level: AtomicU32::new(0),
        }
    }

    /// Encode `samples` and transmit them.  Never blocks on the network.
    pub fn on_frame(&self, samples: &[i16]) -> FrameOutcome {
        let guard = self.lock_transmit();
        let Some(transmit) = guard.as_ref() else {
            return FrameOutcome::Disabled;
        };

        let index = self.frames_seen.fetch_add(1, Ordering::Relaxed);
        self.last_level
            .store(rms_level(samples).to_bits(), Ordering::Relaxed);

        let chunk = match codec::encode(samples) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.frames_rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("capture: frame {index} rejected: {e}");
                return FrameOutcome::Rejected;
            }
        };

        match transmit(chunk) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Sent
            }
            Err(e) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("capture: frame {index}: {} ({e})", VoiceError::from(e));
                FrameOutcome::Dropped
            }
        }
    }

    /// Stop transmitting.  Once this returns no further frame is sent.
    pub fn disable(&self) {
        let mut guard = self.lock_transmit();
        if guard.take().is_some() {
            log::debug!("capture: transmit disabled");
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }

    /// RMS level of the most recent frame in `[0.0, 1.0]`.
    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.last_level.load(Ordering::Relaxed))
    }

    fn lock_transmit(&self) -> MutexGuard<'_, Option<Transmit>> {
        self.transmit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// ManualCapture  (test-only)
// ---------------------------------------------------------------------------

/// Capture source driven by the test.
///
/// The registered callback is kept after the guard drops so a test can play
/// a frame that races with `stop()`.
#[cfg(test)]
#[derive(Default)]
pub struct ManualCapture {
    callback: Mutex<Option<FrameCallback>>,
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
    starts: AtomicU64,
    fail_with: Mutex<Option<String>>,
}

#[cfg(test)]
impl ManualCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` fail with [`VoiceError::DeviceUnavailable`].
    pub fn fail_start(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    /// Deliver one frame to the last registered callback.  Returns `false`
    /// when nothing was ever registered.
    pub fn push(&self, samples: &[i16]) -> bool {
        match self.callback.lock().unwrap().as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl CaptureSource for ManualCapture {
    fn start(&self, on_frame: FrameCallback) -> Result<CaptureGuard, VoiceError> {
        if let Some(message) = self.fail_with.lock().unwrap().take() {
            return Err(VoiceError::DeviceUnavailable(message));
        }
        *self.callback.lock().unwrap() = Some(on_frame);
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let running = std::sync::Arc::clone(&self.running);
        Ok(CaptureGuard::new(move || running.store(false, Ordering::SeqCst)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
