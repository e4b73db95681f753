//! Voice session: state machine, stream interface and transcript.
//!
//! [`SessionController`] is the only owner of [`SessionState`].  It runs as
//! one tokio task and is driven through a [`SessionHandle`].

pub mod controller;
pub mod state;
pub mod stream;
pub mod transcript;

pub use controller::{SessionController, SessionHandle, SessionOptions};
pub use state::{SessionState, SessionStatus};
pub use stream::{
    InboundEvent, Modality, StreamConfig, StreamConnection, StreamSender, VoiceStream,
};
pub use transcript::TranscriptBuffer;
