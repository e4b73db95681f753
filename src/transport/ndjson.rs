//! [`VoiceStream`] over newline-delimited JSON.
//!
//! Each session spawns the configured bridge command and talks to it over
//! stdin/stdout.  The bridge owns the connection to the actual voice
//! service; this side only speaks the line protocol in
//! [`protocol`](super::protocol).
//!
//! ```text
//! StreamSender::try_send ─▶ bounded queue ─▶ writer task ─▶ child stdin
//! child stdout ─▶ reader task ─▶ InboundMessage ─▶ InboundEvent channel
//! ```

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Notify};

use crate::audio::{EncodedChunk, SendError};
use crate::error::VoiceError;
use crate::session::{InboundEvent, StreamConfig, StreamConnection, StreamSender, VoiceStream};

use super::protocol::{InboundMessage, OutboundMessage, MAX_LINE_BYTES};

/// How long a bridge gets to exit on its own after `close` before it is
/// killed.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

/// Byte pipes to one bridge instance.
pub struct Pipes {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Child process behind the pipes, killed when dropped.
    pub child: Option<Child>,
}

/// Produces a fresh [`Pipes`] pair for every session.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self) -> io::Result<Pipes>;
}

/// Spawns `program args...` with piped stdin/stdout; stderr is inherited
/// so bridge diagnostics land next to ours.
#[derive(Debug, Clone)]
pub struct ChildProcess {
    program: String,
    args: Vec<String>,
}

impl ChildProcess {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Connect for ChildProcess {
    async fn connect(&self) -> io::Result<Pipes> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "bridge stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "bridge stdout unavailable"))?;

        log::info!(
            "transport: spawned bridge `{}` (pid {})",
            self.program,
            child.id().unwrap_or_default()
        );

        Ok(Pipes {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

// ---------------------------------------------------------------------------
// NdjsonStream
// ---------------------------------------------------------------------------

/// Queue and framing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdjsonOptions {
    /// Outbound messages buffered before `try_send` reports `NotReady`.
    pub send_queue: usize,
    /// Longest accepted inbound line, newline excluded.
    pub max_line_bytes: usize,
}

impl Default for NdjsonOptions {
    fn default() -> Self {
        Self {
            send_queue: 32,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

pub struct NdjsonStream<C> {
    connector: C,
    options: NdjsonOptions,
}

impl<C: Connect> NdjsonStream<C> {
    pub fn new(connector: C, options: NdjsonOptions) -> Self {
        Self { connector, options }
    }
}

impl NdjsonStream<ChildProcess> {
    /// Stream that launches `program args...` for every session.
    pub fn child_process(program: impl Into<String>, args: Vec<String>, options: NdjsonOptions) -> Self {
        Self::new(ChildProcess::new(program, args), options)
    }
}

#[async_trait]
impl<C: Connect> VoiceStream for NdjsonStream<C> {
    async fn open(&self, config: &StreamConfig) -> Result<StreamConnection, VoiceError> {
        let Pipes {
            reader,
            mut writer,
            child,
        } = self
            .connector
            .connect()
            .await
            .map_err(|e| VoiceError::StreamOpenFailed(format!("bridge unavailable: {e}")))?;

        let setup = OutboundMessage::setup(config)
            .to_line()
            .map_err(|e| VoiceError::StreamOpenFailed(e.to_string()))?;
        writer
            .write_all(setup.as_bytes())
            .await
            .map_err(|e| VoiceError::StreamOpenFailed(format!("writing setup: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| VoiceError::StreamOpenFailed(format!("writing setup: {e}")))?;

        let (queue_tx, queue_rx) = mpsc::channel(self.options.send_queue.max(1));
        let (events_tx, events_rx) = mpsc::channel(64);
        let closing = Arc::new(Notify::new());

        tokio::spawn(write_loop(writer, queue_rx, Arc::clone(&closing), child));
        tokio::spawn(read_loop(reader, events_tx, self.options.max_line_bytes));

        Ok(StreamConnection {
            sender: Arc::new(NdjsonSender {
                queue: queue_tx,
                closing,
                closed: AtomicBool::new(false),
            }),
            events: events_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

struct NdjsonSender {
    queue: mpsc::Sender<OutboundMessage>,
    closing: Arc<Notify>,
    closed: AtomicBool,
}

impl StreamSender for NdjsonSender {
    fn try_send(&self, chunk: EncodedChunk) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.queue
            .try_send(OutboundMessage::audio(&chunk))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::NotReady,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.closing.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn write_loop(
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    mut queue: mpsc::Receiver<OutboundMessage>,
    closing: Arc<Notify>,
    child: Option<Child>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = closing.notified() => OutboundMessage::Close,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let is_close = message == OutboundMessage::Close;
        if let Err(e) = write_message(&mut writer, &message).await {
            log::warn!("transport: write failed: {e}");
            break;
        }
        if is_close {
            log::debug!("transport: close sent");
            break;
        }
    }

    let _ = writer.shutdown().await;
    drop(writer);

    if let Some(mut child) = child {
        match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => log::debug!("transport: bridge exited ({status})"),
            Ok(Err(e)) => log::warn!("transport: waiting for bridge: {e}"),
            Err(_) => log::warn!("transport: bridge still running, killing it"),
        }
    }
}

async fn write_message(
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    message: &OutboundMessage,
) -> io::Result<()> {
    let line = message
        .to_line()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn read_loop(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    events: mpsc::Sender<InboundEvent>,
    max_line_bytes: usize,
) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let limit = max_line_bytes as u64 + 1;
        let read = match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(read) => read,
            Err(e) => {
                let _ = events.send(InboundEvent::Error(format!("bridge read failed: {e}"))).await;
                return;
            }
        };

        if read == 0 {
            log::debug!("transport: bridge output ended");
            let _ = events.send(InboundEvent::Closed(None)).await;
            return;
        }

        if !line.ends_with(b"\n") && line.len() > max_line_bytes {
            let _ = events
                .send(InboundEvent::Error(format!(
                    "inbound line exceeds {max_line_bytes} bytes"
                )))
                .await;
            return;
        }

        let Some(event) = parse_line(&line) else {
            continue;
        };
        let closed = matches!(event, InboundEvent::Closed(_));
        if events.send(event).await.is_err() || closed {
            return;
        }
    }
}

/// Decode one line into an event.  Blank and unparseable lines yield `None`.
fn parse_line(line: &[u8]) -> Option<InboundEvent> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            log::warn!("transport: skipping non-UTF-8 line: {e}");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }

    match InboundMessage::parse(text).map(InboundMessage::into_event) {
        Ok(Ok(event)) => Some(event),
        Ok(Err(e)) => {
            log::warn!("transport: skipping message: {e}");
            None
        }
        Err(e) => {
            log::warn!("transport: skipping unparseable line: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
