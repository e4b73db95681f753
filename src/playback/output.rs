//! Audio output device interface.
//!
//! The scheduler never touches hardware directly.  It talks to an
//! [`AudioOutput`], which plays buffers at requested times on its own
//! monotonic clock and can stop any buffer before or during playback.
//! [`CpalOutput`](crate::audio::CpalOutput) is the hardware implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioFrame;

// ---------------------------------------------------------------------------
// HandleId
// ---------------------------------------------------------------------------

/// Identifies one scheduled buffer on an [`AudioOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// A device that plays buffers at scheduled times.
///
/// All times are offsets on the device's output clock, which starts at zero
/// and never goes backwards.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock.
    fn now(&self) -> Duration;

    /// Begin playing `buffer` at `start`.  A `start` already in the past
    /// plays immediately.
    fn play_at(&self, id: HandleId, buffer: Arc<AudioFrame>, start: Duration);

    /// Silence `id` immediately, whether pending or playing.  Unknown or
    /// finished ids are ignored.
    fn stop(&self, id: HandleId);
}

// ---------------------------------------------------------------------------
// MockOutput  (test-only)
// ---------------------------------------------------------------------------

/// Test double with a manually driven clock that records every call.
#[cfg(test)]
pub struct MockOutput {
    now: std::sync::Mutex<Duration>,
    plays: std::sync::Mutex<Vec<(HandleId, Duration, Duration)>>,
    stops: std::sync::Mutex<Vec<HandleId>>,
}

#[cfg(test)]
impl MockOutput {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Duration::ZERO),
            plays: std::sync::Mutex::new(Vec::new()),
            stops: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn set_now(&self, now: Duration) {
        *self.now.lock().unwrap() = now;
    }

    /// `(id, start, duration)` for every `play_at` call, in call order.
    pub fn plays(&self) -> Vec<(HandleId, Duration, Duration)> {
        self.plays.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<HandleId> {
        self.stops.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl AudioOutput for MockOutput {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn play_at(&self, id: HandleId, buffer: Arc<AudioFrame>, start: Duration) {
        self.plays
            .lock()
            .unwrap()
            .push((id, start, buffer.duration()));
    }

    fn stop(&self, id: HandleId) {
        self.stops.lock().unwrap().push(id);
    }
}
