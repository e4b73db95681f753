//! [`AudioFrame`]: interleaved 16-bit PCM at a known rate.
//!
//! Capture frames (16 kHz by default) and playback buffers (24 kHz by
//! default) share this type but never cross directions: the rate travels with
//! the samples and is only used to compute durations.

use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// An ordered, fixed-channel-count block of signed 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Interleaved samples (`L R L R …` for stereo).
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono).
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Single-channel frame.
    pub fn mono(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Build a frame from `f32` samples in `[-1.0, 1.0]`, clamping anything
    /// outside that range.
    pub fn from_f32(samples: &[f32], sample_rate: u32, channels: u16) -> Self {
        Self::new(
            samples.iter().map(|&s| f32_to_i16(s)).collect(),
            sample_rate,
            channels,
        )
    }

    /// Samples converted to `f32` in `[-1.0, 1.0)`.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| i16_to_f32(s)).collect()
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Playback duration at `sample_rate`, exact to the nanosecond.
    ///
    /// ```
    /// use std::time::Duration;
    /// use live_voice::audio::AudioFrame;
    ///
    /// let half_second = AudioFrame::mono(vec![0; 12_000], 24_000);
    /// assert_eq!(half_second.duration(), Duration::from_millis(500));
    /// ```
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frame_count() as u64, self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Duration of `frames` sample frames at `sample_rate` Hz.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * NANOS_PER_SEC as u128 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Number of whole sample frames at `sample_rate` Hz covering `duration`
/// (rounded to nearest).
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let nanos = duration.as_nanos();
    ((nanos * sample_rate as u128 + NANOS_PER_SEC as u128 / 2) / NANOS_PER_SEC as u128) as u64
}

/// Quantize an `f32` sample to `i16`.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32_768.0) as i16
    } else {
        (clamped * 32_767.0) as i16
    }
}

/// Expand an `i16` sample to `f32`.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_of_mono_frame() {
        let frame = AudioFrame::mono(vec![0; 24_000], 24_000);
        assert_eq!(frame.duration(), Duration::from_secs(1));
    }

    #[test]
    fn duration_counts_frames_not_samples() {
        // 16 000 interleaved stereo samples at 16 kHz = 0.5 s
        let frame = AudioFrame::new(vec![0; 16_000], 16_000, 2);
        assert_eq!(frame.frame_count(), 8_000);
        assert_eq!(frame.duration(), Duration::from_millis(500));
    }

    #[test]
    fn zero_rate_or_channels_is_zero_duration() {
        assert_eq!(AudioFrame::mono(vec![1, 2], 0).duration(), Duration::ZERO);
        let frame = AudioFrame::new(vec![1, 2], 16_000, 0);
        assert_eq!(frame.frame_count(), 0);
        assert!(frame.is_empty());
    }

    #[test]
    fn duration_frame_conversion_is_consistent() {
        assert_eq!(duration_to_frames(Duration::from_millis(1_500), 24_000), 36_000);
        assert_eq!(duration_to_frames(Duration::from_millis(1_200), 48_000), 57_600);
        assert_eq!(frames_to_duration(36_000, 24_000), Duration::from_millis(1_500));
    }

    #[test]
    fn f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn f32_round_trip_is_close() {
        let original = [0.25_f32, -0.5, 0.75, -0.999];
        let frame = AudioFrame::from_f32(&original, 16_000, 1);
        for (a, b) in original.iter().zip(frame.to_f32()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }
}
