//! Audio plumbing: frames, the PCM codec, the capture pipeline and device adapters.
//!
//! # Outbound path
//!
//! ```text
//! Microphone → cpal callback → downmix → Resampler → FrameAssembler
//!           → CapturePipeline::on_frame → codec::encode → Transmit
//! ```
//!
//! # Inbound path
//!
//! ```text
//! EncodedChunk → codec::decode → AudioFrame → PlaybackScheduler → CpalOutput
//! ```

pub mod capture;
pub mod codec;
pub mod device;
pub mod frame;
pub mod level;
pub mod resample;

pub use capture::{
    CaptureGuard, CaptureSource, CaptureStats, CapturePipeline, FrameCallback, FrameOutcome,
    SendError, Transmit,
};
pub use codec::{decode, decode_interleaved, encode, EncodedChunk, MAX_FRAME_SAMPLES};
pub use device::{CpalCapture, CpalOutput, DeviceError, FrameAssembler, StreamInfo, Timeline};
pub use frame::AudioFrame;
pub use level::rms_level;
pub use resample::{downmix, resample, Resampler};

#[cfg(test)]
pub use capture::ManualCapture;
