//! Gapless playback scheduling with barge-in cancellation.
//!
//! Decoded buffers arrive in order and are laid end to end on the output
//! device's clock.  Each buffer starts at
//!
//! ```text
//! start = max(output_now, scheduler_clock)
//! scheduler_clock = start + duration
//! ```
//!
//! so consecutive buffers never overlap, and a buffer that arrives after the
//! previous one has finished starts immediately instead of being placed in
//! the past.  Backlog is unbounded: bursty delivery queues buffers further
//! into the future but never drops them.
//!
//! [`PlaybackScheduler::interrupt`] stops every active buffer (pending or
//! playing), empties the active set and pulls the clock back to `output_now`.
//! All operations take the same mutex, so an interruption is ordered strictly
//! before or after any concurrent `schedule` call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::audio::AudioFrame;
use crate::error::VoiceError;
use crate::playback::output::{AudioOutput, HandleId};

// ---------------------------------------------------------------------------
// PlaybackHandle
// ---------------------------------------------------------------------------

/// Where a handle sits relative to the output clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePhase {
    Pending,
    Playing,
    Ended,
}

/// One buffer scheduled on the output device.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: HandleId,
    buffer: Arc<AudioFrame>,
    start: Duration,
    duration: Duration,
}

impl PlaybackHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn buffer(&self) -> &AudioFrame {
        &self.buffer
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn phase(&self, now: Duration) -> HandlePhase {
        if now < self.start {
            HandlePhase::Pending
        } else if now < self.end() {
            HandlePhase::Playing
        } else {
            HandlePhase::Ended
        }
    }
}

/// Placement of a buffer accepted by [`PlaybackScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPlayback {
    pub id: HandleId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledPlayback {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

struct SchedulerState {
    /// Next available start time.
    clock: Duration,
    /// Handles not yet ended or cancelled, in start order.
    active: Vec<PlaybackHandle>,
    next_id: u64,
    backlog_warned: bool,
}

impl SchedulerState {
    fn reap(&mut self, now: Duration) -> usize {
        let before = self.active.len();
        self.active.retain(|h| h.phase(now) != HandlePhase::Ended);
        before - self.active.len()
    }
}

/// Lays decoded buffers back to back on an [`AudioOutput`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use live_voice::audio::AudioFrame;
/// use live_voice::playback::{AudioOutput, PlaybackScheduler};
///
/// # fn device() -> Arc<dyn AudioOutput> { unimplemented!() }
/// let scheduler = PlaybackScheduler::new(device());
/// let first = scheduler.schedule(AudioFrame::mono(vec![0; 24_000], 24_000)).unwrap();
/// let second = scheduler.schedule(AudioFrame::mono(vec![0; 12_000], 24_000)).unwrap();
/// assert!(second.start >= first.end());
///
/// // barge-in
/// scheduler.interrupt();
/// assert_eq!(scheduler.active_count(), 0);
/// ```
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    state: Mutex<SchedulerState>,
    backlog_warn: Option<Duration>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let clock = output.now();
        Self {
            output,
            state: Mutex::new(SchedulerState {
                clock,
                active: Vec::new(),
                next_id: 1,
                backlog_warned: false,
            }),
            backlog_warn: None,
        }
    }

    /// Log a warning whenever the queued backlog grows past `limit`.
    /// Buffers are still scheduled.
    pub fn with_backlog_warning(mut self, limit: Option<Duration>) -> Self {
        self.backlog_warn = limit;
        self
    }

    /// Schedule `frame` to play right after everything already scheduled.
    ///
    /// # Errors
    ///
    /// [`VoiceError::EmptyBuffer`] for a frame with no playable samples; the
    /// clock is left untouched.
    pub fn schedule(&self, frame: AudioFrame) -> Result<ScheduledPlayback, VoiceError> {
        let duration = frame.duration();
        if frame.is_empty() || duration.is_zero() {
            return Err(VoiceError::EmptyBuffer);
        }

        let mut state = self.lock_state();
        let now = self.output.now();
        state.reap(now);

        let start = now.max(state.clock);
        let id = HandleId(state.next_id);
        state.next_id += 1;

        let buffer = Arc::new(frame);
        self.output.play_at(id, Arc::clone(&buffer), start);
        state.active.push(PlaybackHandle {
            id,
            buffer,
            start,
            duration,
        });
        state.clock = start + duration;

        let backlog = state.clock.saturating_sub(now);
        if let Some(limit) = self.backlog_warn {
            if backlog > limit && !state.backlog_warned {
                log::warn!(
                    "playback: backlog {:.1}s exceeds {:.1}s ({} buffers queued)",
                    backlog.as_secs_f32(),
                    limit.as_secs_f32(),
                    state.active.len()
                );
                state.backlog_warned = true;
            } else if backlog <= limit {
                state.backlog_warned = false;
            }
        }

        log::trace!(
            "playback: {id} at {:.3}s for {:.3}s (backlog {:.3}s)",
            start.as_secs_f64(),
            duration.as_secs_f64(),
            backlog.as_secs_f64()
        );

        Ok(ScheduledPlayback {
            id,
            start,
            duration,
        })
    }

    /// Barge-in: stop every active buffer and resynchronise the clock to the
    /// output clock.  Returns the number of buffers cancelled.
    ///
    /// Calling it again with nothing scheduled in between is a no-op.
    pub fn interrupt(&self) -> usize {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            log::debug!("playback: interrupted, {cancelled} buffer(s) cancelled");
        }
        cancelled
    }

    /// Silence everything because the session is stopping.
    pub fn flush(&self) -> usize {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            log::debug!("playback: flushed {cancelled} buffer(s)");
        }
        cancelled
    }

    /// The device reported that `id` finished playing.
    pub fn handle_ended(&self, id: HandleId) {
        self.lock_state().active.retain(|h| h.id != id);
    }

    /// Drop handles whose playback has finished by the current output time.
    /// Returns how many were removed.
    pub fn reap(&self) -> usize {
        let now = self.output.now();
        self.lock_state().reap(now)
    }

    /// Next available start time.
    pub fn clock(&self) -> Duration {
        self.lock_state().clock
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active.len()
    }

    /// Audio queued beyond the current output time.
    pub fn backlog(&self) -> Duration {
        let now = self.output.now();
        self.lock_state().clock.saturating_sub(now)
    }

    /// Snapshot of the active set, in start order.
    pub fn active(&self) -> Vec<PlaybackHandle> {
        self.lock_state().active.clone()
    }

    fn cancel_all(&self) -> usize {
        let mut state = self.lock_state();
        let now = self.output.now();
        let cancelled = std::mem::take(&mut state.active);
        for handle in &cancelled {
            self.output.stop(handle.id);
        }
        state.clock = now;
        state.backlog_warned = false;
        cancelled.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::playback::output::MockOutput;

    const RATE: u32 = 24_000;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn buffer(seconds: f64) -> AudioFrame {
        AudioFrame::mono(vec![0; (seconds * RATE as f64) as usize], RATE)
    }

    fn setup() -> (Arc<MockOutput>, PlaybackScheduler) {
        let output = Arc::new(MockOutput::new());
        let scheduler = PlaybackScheduler::new(output.clone());
        (output, scheduler)
    }

    // ---- scheduling --------------------------------------------------------

    #[test]
    fn back_to_back_scenario() {
        let (output, scheduler) = setup();

        let a = scheduler.schedule(buffer(1.0)).unwrap();
        let b = scheduler.schedule(buffer(0.5)).unwrap();
        let c = scheduler.schedule(buffer(2.0)).unwrap();

        assert_eq!(a.start, secs(0.0));
        assert_eq!(b.start, secs(1.0));
        assert_eq!(c.start, secs(1.5));
        assert_eq!(scheduler.clock(), secs(3.5));
        assert_eq!(scheduler.active_count(), 3);

        let starts: Vec<Duration> = output.plays().iter().map(|p| p.1).collect();
        assert_eq!(starts, vec![secs(0.0), secs(1.0), secs(1.5)]);
    }

    #[test]
    fn adjacent_buffers_never_overlap_or_gap() {
        let (output, scheduler) = setup();
        let lengths = [0.02, 0.1, 0.25, 0.04, 1.0, 0.333, 0.5];

        let mut placed = Vec::new();
        for (i, len) in lengths.iter().enumerate() {
            // the device clock advances a little between arrivals, but
            // chunks still arrive faster than real time
            output.set_now(secs(i as f64 * 0.01));
            placed.push(scheduler.schedule(buffer(*len)).unwrap());
        }

        for pair in placed.windows(2) {
            assert!(pair[1].start >= pair[0].end(), "overlap: {pair:?}");
            assert_eq!(pair[1].start, pair[0].end(), "gap: {pair:?}");
        }
    }

    #[test]
    fn late_arrival_starts_at_output_clock() {
        let (output, scheduler) = setup();
        scheduler.schedule(buffer(0.5)).unwrap();

        // previous buffer finished 0.3 s ago
        output.set_now(secs(0.8));
        let late = scheduler.schedule(buffer(0.5)).unwrap();

        assert_eq!(late.start, secs(0.8));
        assert_eq!(scheduler.clock(), secs(1.3));
    }

    #[test]
    fn bursty_delivery_queues_everything() {
        let (_output, scheduler) = setup();
        for _ in 0..100 {
            scheduler.schedule(buffer(1.0)).unwrap();
        }
        assert_eq!(scheduler.active_count(), 100);
        assert_eq!(scheduler.backlog(), secs(100.0));
    }

    #[test]
    fn empty_buffer_is_rejected_without_moving_clock() {
        let (output, scheduler) = setup();
        scheduler.schedule(buffer(1.0)).unwrap();

        let err = scheduler.schedule(AudioFrame::mono(Vec::new(), RATE)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyBuffer);
        assert_eq!(scheduler.clock(), secs(1.0));
        assert_eq!(output.plays().len(), 1);
    }

    #[test]
    fn handle_ids_are_unique_and_increasing() {
        let (_output, scheduler) = setup();
        let a = scheduler.schedule(buffer(0.1)).unwrap();
        let b = scheduler.schedule(buffer(0.1)).unwrap();
        assert!(b.id > a.id);
    }

    // ---- completion --------------------------------------------------------

    #[test]
    fn ended_handles_are_reaped() {
        let (output, scheduler) = setup();
        scheduler.schedule(buffer(1.0)).unwrap();
        scheduler.schedule(buffer(1.0)).unwrap();

        output.set_now(secs(1.5));
        assert_eq!(scheduler.reap(), 1);
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.active()[0].phase(secs(1.5)), HandlePhase::Playing);
    }

    #[test]
    fn device_reported_end_removes_handle_only() {
        let (output, scheduler) = setup();
        let a = scheduler.schedule(buffer(1.0)).unwrap();
        scheduler.schedule(buffer(1.0)).unwrap();

        scheduler.handle_ended(a.id);
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.clock(), secs(2.0));
        assert!(output.stops().is_empty());
    }

    // ---- interruption ------------------------------------------------------

    #[test]
    fn interruption_cancels_pending_and_playing() {
        let (output, scheduler) = setup();
        let ids: Vec<HandleId> = [1.0, 0.5, 2.0]
            .iter()
            .map(|len| scheduler.schedule(buffer(*len)).unwrap().id)
            .collect();

        output.set_now(secs(1.2));
        assert_eq!(scheduler.interrupt(), 3);

        assert_eq!(output.stops(), ids);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.clock(), secs(1.2));
    }

    #[test]
    fn interruption_is_idempotent() {
        let (output, scheduler) = setup();
        scheduler.schedule(buffer(1.0)).unwrap();
        output.set_now(secs(0.4));

        assert_eq!(scheduler.interrupt(), 1);
        let clock = scheduler.clock();
        let stops = output.stops().len();

        assert_eq!(scheduler.interrupt(), 0);
        assert_eq!(scheduler.clock(), clock);
        assert_eq!(scheduler.clock(), secs(0.4));
        assert_eq!(output.stops().len(), stops);
    }

    #[test]
    fn buffer_after_interruption_starts_immediately() {
        let (output, scheduler) = setup();
        scheduler.schedule(buffer(5.0)).unwrap();
        output.set_now(secs(0.5));
        scheduler.interrupt();

        let next = scheduler.schedule(buffer(0.25)).unwrap();
        assert_eq!(next.start, secs(0.5));
        assert_eq!(scheduler.clock(), secs(0.75));
    }

    #[test]
    fn flush_behaves_like_interrupt() {
        let (output, scheduler) = setup();
        scheduler.schedule(buffer(1.0)).unwrap();
        scheduler.schedule(buffer(1.0)).unwrap();
        output.set_now(secs(0.2));

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(output.stops().len(), 2);
        assert_eq!(scheduler.clock(), secs(0.2));
    }

    // ---- backlog -----------------------------------------------------------

    #[test]
    fn backlog_warning_does_not_drop() {
        let output = Arc::new(MockOutput::new());
        let scheduler =
            PlaybackScheduler::new(output.clone()).with_backlog_warning(Some(secs(1.0)));
        for _ in 0..5 {
            scheduler.schedule(buffer(1.0)).unwrap();
        }
        assert_eq!(scheduler.active_count(), 5);
        assert_eq!(output.plays().len(), 5);
    }

    #[test]
    fn handle_phase_transitions() {
        let (_output, scheduler) = setup();
        scheduler.schedule(buffer(1.0)).unwrap();
        let handle = scheduler.active().remove(0);
        assert_eq!(handle.phase(secs(0.0)), HandlePhase::Playing);
        assert_eq!(handle.phase(secs(1.0)), HandlePhase::Ended);
        assert_eq!(handle.buffer().sample_rate, RATE);

        let later = PlaybackHandle {
            start: secs(2.0),
            ..handle
        };
        assert_eq!(later.phase(secs(1.0)), HandlePhase::Pending);
    }

    #[test]
    fn scheduler_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PlaybackScheduler>();
    }
}
