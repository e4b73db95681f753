//! Stream transport to the voice service bridge.
//!
//! [`NdjsonStream`] implements [`VoiceStream`](crate::session::VoiceStream)
//! by exchanging [`protocol`] messages with a bridge process, one JSON object
//! per line.

pub mod ndjson;
pub mod protocol;

pub use ndjson::{ChildProcess, Connect, NdjsonOptions, NdjsonStream, Pipes};
pub use protocol::{InboundMessage, OutboundMessage, MAX_LINE_BYTES};
