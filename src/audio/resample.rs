//! Sample-rate and channel adaptation between devices and the session.
//!
//! The session speaks fixed rates (16 kHz capture, 24 kHz playback) while
//! audio hardware runs at whatever it prefers (commonly 44.1 or 48 kHz,
//! often stereo).  The device adapters use these two helpers at the edge:
//!
//! 1. [`downmix`]: average interleaved channels to mono.
//! 2. [`resample`]: linear-interpolation rate conversion of a whole buffer.
//! 3. [`Resampler`]: the same conversion over a continuous stream delivered
//!    in blocks, as the capture callback sees it.

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging channels.
///
/// * `channels == 1` returns a copy of the input.
/// * `channels == 0` returns an empty vector.
///
/// ```rust
/// use live_voice::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `from_rate` Hz to `to_rate` Hz.
///
/// * Equal rates return a copy (no interpolation).
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is `ceil(samples.len() * to_rate / from_rate)`.
///
/// ```rust
/// use live_voice::audio::resample;
///
/// let hi = vec![0.5_f32; 480];          // 10 ms @ 48 kHz
/// assert_eq!(resample(&hi, 48_000, 16_000).len(), 160);
/// assert_eq!(resample(&hi, 48_000, 48_000).len(), 480);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Resampler
// ---------------------------------------------------------------------------

/// Streaming linear resampler.
///
/// Keeps the read position and the last input sample between calls, so a
/// signal fed in arbitrary blocks produces the same output as the whole
/// signal converted at once, and exactly `to_rate` samples per `from_rate`
/// input samples over time.
///
/// ```rust
/// use live_voice::audio::Resampler;
///
/// let mut resampler = Resampler::new(48_000, 16_000);
/// let total: usize = (0..100).map(|_| resampler.process(&[0.0; 480]).len()).sum();
/// assert_eq!(total, 16_000);
/// ```
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// Next output position in units of `1 / to_rate` input samples,
    /// relative to the first sample of the next block.  Never below
    /// `-to_rate`, where index `-1` is `last`.
    position: i64,
    last: f32,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            position: 0,
            last: 0.0,
        }
    }

    /// Convert the next block of mono input.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }
        if input.is_empty() || self.from_rate == 0 || self.to_rate == 0 {
            return Vec::new();
        }

        let len = input.len() as i64;
        let to = i64::from(self.to_rate);
        let step = i64::from(self.from_rate);
        let expected = input.len() as u64 * u64::from(self.to_rate) / u64::from(self.from_rate);
        let mut output = Vec::with_capacity(expected as usize + 1);

        // Interpolating at `i` needs `i + 1`; a position on the last sample
        // waits for the next block.
        while self.position < (len - 1) * to {
            let idx = self.position.div_euclid(to);
            let frac = self.position.rem_euclid(to) as f32 / to as f32;
            let a = if idx < 0 { self.last } else { input[idx as usize] };
            let b = input[(idx + 1) as usize];
            output.push(a * (1.0 - frac) + b * frac);
            self.position += step;
        }

        self.position -= len * to;
        self.last = input[input.len() - 1];
        output
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
