//! Hardware adapters built on `cpal`.
//!
//! * [`CpalCapture`]: a [`CaptureSource`] that downmixes and resamples the
//!   default (or named) microphone to the session capture rate and delivers
//!   fixed-length frames.
//! * [`CpalOutput`]: an [`AudioOutput`] backed by a sample-accurate
//!   [`Timeline`]: buffers are placed at device-frame offsets and mixed in
//!   the output callback, and the device clock is the number of frames
//!   rendered so far.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream is built,
//! played and dropped on its own named thread.  The adapters only hold a
//! stop channel and shared state, which keeps them `Send + Sync`.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::capture::{CaptureGuard, CaptureSource, FrameCallback};
use crate::audio::frame::{duration_to_frames, f32_to_i16, frames_to_duration, AudioFrame};
use crate::audio::resample::{downmix, resample, Resampler};
use crate::error::VoiceError;
use crate::playback::output::{AudioOutput, HandleId};

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening or running an audio device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no {0} device found on the default audio host")]
    NoDevice(&'static str),

    #[error("audio device `{0}` not found")]
    NotFound(String),

    #[error("failed to enumerate audio devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio thread failed: {0}")]
    Thread(String),
}

impl From<DeviceError> for VoiceError {
    fn from(e: DeviceError) -> Self {
        VoiceError::DeviceUnavailable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Stream thread
// ---------------------------------------------------------------------------

/// Negotiated device format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Owns the thread that keeps a `cpal::Stream` alive.  Dropping it stops the
/// stream and joins the thread.
struct StreamThread {
    stop_tx: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread's `recv`.
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("audio: stream thread panicked");
            }
        }
    }
}

fn spawn_stream_thread<F>(name: &str, build: F) -> Result<(StreamThread, StreamInfo), DeviceError>
where
    F: FnOnce() -> Result<(cpal::Stream, StreamInfo), DeviceError> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<Result<StreamInfo, DeviceError>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let join = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let started = build().and_then(|(stream, info)| {
                stream.play()?;
                Ok((stream, info))
            });
            let stream = match started {
                Ok((stream, info)) => {
                    let _ = ready_tx.send(Ok(info));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Blocks until the owner drops the sender.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| DeviceError::Thread(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(info)) => Ok((
            StreamThread {
                stop_tx: Some(stop_tx),
                join: Some(join),
            },
            info,
        )),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err(DeviceError::Thread(format!("{name} exited before the stream started")))
        }
    }
}

fn find_device(
    devices: impl Iterator<Item = cpal::Device>,
    default: Option<cpal::Device>,
    name: Option<&str>,
    kind: &'static str,
) -> Result<cpal::Device, DeviceError> {
    match name {
        None => default.ok_or(DeviceError::NoDevice(kind)),
        Some(wanted) => devices
            .into_iter()
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound(wanted.to_string())),
    }
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Re-chunks a stream of variable-sized device buffers into fixed-length
/// 16-bit frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    /// # Panics
    ///
    /// Panics if `frame_samples == 0`.
    pub fn new(frame_samples: usize) -> Self {
        assert!(frame_samples > 0, "frame length must be > 0");
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Append `samples` and call `emit` once for every complete frame.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[i16])) {
        self.pending.extend(samples.iter().map(|&s| f32_to_i16(s)));

        let complete = self.pending.len() / self.frame_samples * self.frame_samples;
        for frame in self.pending[..complete].chunks_exact(self.frame_samples) {
            emit(frame);
        }
        self.pending.drain(..complete);
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// CpalCapture
// ---------------------------------------------------------------------------

/// Microphone capture source.
///
/// Each started capture owns an `audio-capture` thread; dropping the returned
/// [`CaptureGuard`] stops and joins it.
#[derive(Debug, Clone)]
pub struct CpalCapture {
    device_name: Option<String>,
    capture_rate: u32,
    frame_samples: usize,
}

impl CpalCapture {
    /// * `device_name`: input device name, `None` for the system default.
    /// * `capture_rate`: rate of delivered frames (Hz).
    /// * `frame_samples`: samples per delivered frame.
    pub fn new(device_name: Option<String>, capture_rate: u32, frame_samples: usize) -> Self {
        Self {
            device_name,
            capture_rate,
            frame_samples: frame_samples.max(1),
        }
    }
}

impl CaptureSource for CpalCapture {
    fn start(&self, mut on_frame: FrameCallback) -> Result<CaptureGuard, VoiceError> {
        let device_name = self.device_name.clone();
        let capture_rate = self.capture_rate;
        let frame_samples = self.frame_samples;

        let (thread, info) = spawn_stream_thread("audio-capture", move || {
            let host = cpal::default_host();
            let device = find_device(
                host.input_devices()?,
                host.default_input_device(),
                device_name.as_deref(),
                "input",
            )?;

            let supported = device.default_input_config()?;
            let info = StreamInfo {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let config: cpal::StreamConfig = supported.into();

            let mut resampler = Resampler::new(info.sample_rate, capture_rate);
            let mut assembler = FrameAssembler::new(frame_samples);
            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, info.channels);
                    let resampled = resampler.process(&mono);
                    assembler.push(&resampled, |frame| on_frame(frame));
                },
                |err: cpal::StreamError| {
                    log::error!("cpal input stream error: {err}");
                },
                None,
            )?;
            Ok((stream, info))
        })?;

        log::info!(
            "audio: capture started ({} Hz, {} ch → {} Hz mono, {} samples/frame)",
            info.sample_rate,
            info.channels,
            capture_rate,
            frame_samples
        );
        Ok(CaptureGuard::new(move || {
            drop(thread);
            log::info!("audio: capture stopped");
        }))
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

struct Voice {
    id: HandleId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono samples of `buffer` at `device_rate`, ready for [`Timeline::insert`].
pub fn to_device_samples(buffer: &AudioFrame, device_rate: u32) -> Vec<f32> {
    let mono = downmix(&buffer.to_f32(), buffer.channels);
    resample(&mono, buffer.sample_rate, device_rate)
}

/// Sample-accurate mixing timeline driven by the output callback.
///
/// `position` counts device frames rendered so far and is the output clock.
/// A voice covers the device frames from `start` to `start + duration`, both
/// rounded the same way, so buffers whose start and end times meet occupy
/// adjacent frames.
pub struct Timeline {
    device_rate: u32,
    position: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    pub fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            position: 0,
            voices: Vec::new(),
        }
    }

    pub fn now(&self) -> Duration {
        frames_to_duration(self.position, self.device_rate)
    }

    /// Place device-rate `samples` lasting `duration` at `start`.  The samples
    /// are cut or padded with silence to the frames that span covers; a start
    /// already rendered begins at the current position.
    pub fn insert(
        &mut self,
        id: HandleId,
        mut samples: Vec<f32>,
        start: Duration,
        duration: Duration,
    ) {
        let first = duration_to_frames(start, self.device_rate);
        let last = duration_to_frames(start.saturating_add(duration), self.device_rate);
        samples.resize((last - first) as usize, 0.0);

        let start_frame = first.max(self.position);
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
    }

    pub fn remove(&mut self, id: HandleId) {
        self.voices.retain(|v| v.id != id);
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` (interleaved, `channels` wide) with the next block and
    /// advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }

        let frames = (out.len() / channels) as u64;
        let block_start = self.position;
        let block_end = block_start + frames;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for t in from..to {
                let sample = voice.samples[(t - voice.start_frame) as usize];
                let base = (t - block_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.position = block_end;
        self.voices.retain(|v| v.end_frame() > block_end);
    }
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Speaker output with a device-frame clock.
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    info: StreamInfo,
    _thread: StreamThread,
}

impl CpalOutput {
    /// Open the default (or named) output device and start rendering.
    pub fn open(device_name: Option<&str>) -> Result<Self, DeviceError> {
        let device_name = device_name.map(str::to_string);
        let timeline = Arc::new(Mutex::new(Timeline::new(0)));
        let render_timeline = Arc::clone(&timeline);

        let (thread, info) = spawn_stream_thread("audio-output", move || {
            let host = cpal::default_host();
            let device = find_device(
                host.output_devices()?,
                host.default_output_device(),
                device_name.as_deref(),
                "output",
            )?;

            let supported = device.default_output_config()?;
            let info = StreamInfo {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let config: cpal::StreamConfig = supported.into();

            *lock_timeline(&render_timeline) = Timeline::new(info.sample_rate);

            let channels = info.channels as usize;
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    lock_timeline(&render_timeline).render(data, channels);
                },
                |err: cpal::StreamError| {
                    log::error!("cpal output stream error: {err}");
                },
                None,
            )?;
            Ok((stream, info))
        })?;

        log::info!(
            "audio: output started ({} Hz, {} ch)",
            info.sample_rate,
            info.channels
        );

        Ok(Self {
            timeline,
            info,
            _thread: thread,
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> Duration {
        lock_timeline(&self.timeline).now()
    }

    fn play_at(&self, id: HandleId, buffer: Arc<AudioFrame>, start: Duration) {
        // Converted before locking; the render callback shares this lock.
        let samples = to_device_samples(&buffer, self.info.sample_rate);
        lock_timeline(&self.timeline).insert(id, samples, start, buffer.duration());
    }

    fn stop(&self, id: HandleId) {
        lock_timeline(&self.timeline).remove(id);
    }
}

fn lock_timeline(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
