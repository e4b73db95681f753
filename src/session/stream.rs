//! Bidirectional stream interface.
//!
//! The session does not know how bytes travel to the AI service.  A
//! [`VoiceStream`] opens a connection and hands back a [`StreamConnection`]:
//! a non-blocking [`StreamSender`] for outbound audio and a receiver that
//! yields typed [`InboundEvent`]s in arrival order.  Splitting bytes into
//! events is the stream's job; the controller only dispatches them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::{EncodedChunk, SendError};
use crate::error::VoiceError;

// ---------------------------------------------------------------------------
// StreamConfig
// ---------------------------------------------------------------------------

/// What the service should answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

/// Fixed per-session configuration sent when the stream is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub modality: Modality,
    /// Synthesized voice name.
    pub voice: String,
    /// Rate of outbound (captured) audio in Hz.
    pub input_sample_rate: u32,
    /// Rate of inbound (synthesized) audio in Hz.
    pub output_sample_rate: u32,
    pub system_instruction: Option<String>,
}

// ---------------------------------------------------------------------------
// InboundEvent
// ---------------------------------------------------------------------------

/// One unit received from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The stream is open; audio may flow.
    Opened,
    /// Encoded synthesized speech.
    Audio(EncodedChunk),
    /// A transcript fragment.
    Transcript(String),
    /// The user started speaking over the output (barge-in).
    Interrupted,
    /// The stream failed.
    Error(String),
    /// The remote side closed the stream.
    Closed(Option<String>),
}

impl InboundEvent {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Opened => "opened",
            InboundEvent::Audio(_) => "audio",
            InboundEvent::Transcript(_) => "transcript",
            InboundEvent::Interrupted => "interrupted",
            InboundEvent::Error(_) => "error",
            InboundEvent::Closed(_) => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceStream / StreamSender
// ---------------------------------------------------------------------------

/// Outbound half of an open stream.
pub trait StreamSender: Send + Sync {
    /// Queue `chunk` for sending without waiting.
    fn try_send(&self, chunk: EncodedChunk) -> Result<(), SendError>;

    /// Ask the stream to close.  Idempotent.
    fn close(&self);
}

/// An open stream: outbound sender plus the lazy sequence of inbound events.
pub struct StreamConnection {
    pub sender: Arc<dyn StreamSender>,
    pub events: mpsc::Receiver<InboundEvent>,
}

/// Opens bidirectional streams to the voice service.
#[async_trait]
pub trait VoiceStream: Send + Sync {
    /// Open a new stream.  Returning `Ok` does not mean the stream is usable
    /// yet; it is once [`InboundEvent::Opened`] arrives.
    async fn open(&self, config: &StreamConfig) -> Result<StreamConnection, VoiceError>;
}

// ---------------------------------------------------------------------------
// MockStream  (test-only)
// ---------------------------------------------------------------------------

/// Handle on one connection opened through [`MockStream`].
#[cfg(test)]
#[derive(Clone)]
pub struct MockLink {
    pub config: StreamConfig,
    events: Arc<std::sync::Mutex<Option<mpsc::Sender<InboundEvent>>>>,
    pub sent: Arc<std::sync::Mutex<Vec<EncodedChunk>>>,
    pub closed: Arc<std::sync::atomic::AtomicBool>,
    pub ready: Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl MockLink {
    pub async fn push(&self, event: InboundEvent) {
        let tx = self.events.lock().unwrap().clone().expect("link hung up");
        tx.send(event).await.unwrap();
    }

    /// Drop the event sender so the inbound sequence ends without `Closed`.
    pub fn hang_up(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<EncodedChunk> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
struct MockSender {
    sent: Arc<std::sync::Mutex<Vec<EncodedChunk>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
    ready: Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl StreamSender for MockSender {
    fn try_send(&self, chunk: EncodedChunk) -> Result<(), SendError> {
        use std::sync::atomic::Ordering;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        if !self.ready.load(Ordering::SeqCst) {
            return Err(SendError::NotReady);
        }
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// In-memory [`VoiceStream`]; every `open` creates a new [`MockLink`].
#[cfg(test)]
#[derive(Default)]
pub struct MockStream {
    links: std::sync::Mutex<Vec<MockLink>>,
    fail_with: std::sync::Mutex<Option<String>>,
    /// `Some(None)` never completes an open; `Some(Some(d))` completes after `d`.
    open_delay: std::sync::Mutex<Option<Option<std::time::Duration>>>,
}

#[cfg(test)]
impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    /// Make every subsequent `open` succeed at once.
    pub fn succeed_open(&self) {
        *self.fail_with.lock().unwrap() = None;
        *self.open_delay.lock().unwrap() = None;
    }

    /// Make every subsequent `open` hang forever.
    pub fn stall_open(&self) {
        *self.open_delay.lock().unwrap() = Some(None);
    }

    /// Make every subsequent `open` take `delay` before completing.
    pub fn delay_open(&self, delay: std::time::Duration) {
        *self.open_delay.lock().unwrap() = Some(Some(delay));
    }

    pub fn link(&self, index: usize) -> MockLink {
        self.links.lock().unwrap()[index].clone()
    }

    pub fn open_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl VoiceStream for MockStream {
    async fn open(&self, config: &StreamConfig) -> Result<StreamConnection, VoiceError> {
        let delay = *self.open_delay.lock().unwrap();
        match delay {
            Some(None) => std::future::pending::<()>().await,
            Some(Some(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(VoiceError::StreamOpenFailed(message));
        }

        let (tx, rx) = mpsc::channel(64);
        let link = MockLink {
            config: config.clone(),
            events: Arc::new(std::sync::Mutex::new(Some(tx))),
            sent: Arc::default(),
            closed: Arc::default(),
            ready: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };
        let sender = MockSender {
            sent: Arc::clone(&link.sent),
            closed: Arc::clone(&link.closed),
            ready: Arc::clone(&link.ready),
        };
        self.links.lock().unwrap().push(link);

        Ok(StreamConnection {
            sender: Arc::new(sender),
            events: rx,
        })
    }
}
