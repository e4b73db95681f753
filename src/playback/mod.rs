//! Inbound audio playback.
//!
//! ```text
//! decoded AudioFrame ──schedule──▶ PlaybackScheduler ──play_at / stop──▶ AudioOutput
//!                                        ▲
//!                     interrupt / flush ─┘
//! ```

pub mod output;
pub mod scheduler;

pub use output::{AudioOutput, HandleId};
pub use scheduler::{HandlePhase, PlaybackHandle, PlaybackScheduler, ScheduledPlayback};

#[cfg(test)]
pub use output::MockOutput;
