//! live-voice: a real-time duplex voice session.
//!
//! Microphone audio is encoded and streamed to a voice service while the
//! service's synthesized speech is played back gaplessly.  When the user
//! talks over the reply, queued speech is silenced at once.
//!
//! | Module | Role |
//! |--------|------|
//! | [`audio`] | frames, PCM codec, capture pipeline, cpal adapters |
//! | [`playback`] | gapless playback scheduler with barge-in |
//! | [`session`] | session state machine, stream interface, transcript |
//! | [`transport`] | NDJSON bridge implementing the stream interface |
//! | [`config`] | `settings.toml` persistence |

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

pub use error::{ErrorKind, VoiceError};
