//! Input level metering for the status feed.
//!
//! The capture pipeline records the RMS level of every frame it handles so a
//! presentation layer can draw a microphone meter without touching audio.

// ---------------------------------------------------------------------------
// rms_level
// ---------------------------------------------------------------------------

/// RMS amplitude of `samples` normalised to `[0.0, 1.0]`.
///
/// Returns `0.0` for an empty slice.
///
/// ```rust
/// use live_voice::audio::rms_level;
///
/// assert_eq!(rms_level(&[]), 0.0);
/// assert!(rms_level(&[i16::MAX; 160]) > 0.99);
/// ```
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let mean_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32_768.0;
            v * v
        })
        .sum::<f64>()
        / samples.len() as f64;

    (mean_sq.sqrt() as f32).min(1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
