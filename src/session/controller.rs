//! Session controller: owns the session state machine and wires the stream,
//! capture pipeline, playback scheduler and transcript together.
//!
//! The controller is a single tokio task.  Callers talk to it through a
//! cloneable [`SessionHandle`]; inbound stream events, a stream open in
//! flight and caller commands are consumed by one `select!` loop, so every
//! state transition happens on this task and nowhere else.  The loop never
//! awaits the stream itself: `stop()` and `status()` are answered while
//! `VoiceStream::open` is still pending.
//!
//! # Event flow
//!
//! ```text
//! SessionHandle::start ─▶ VoiceStream::open (polled)             [Connecting]
//! InboundEvent::Opened ─▶ CapturePipeline + CaptureSource::start [Active]
//! InboundEvent::Audio  ─▶ decode ─▶ PlaybackScheduler::schedule
//! InboundEvent::Interrupted ─▶ PlaybackScheduler::interrupt
//! InboundEvent::Transcript  ─▶ TranscriptBuffer::push
//! InboundEvent::Error  ─▶ teardown                               [Failed]
//! InboundEvent::Closed / SessionHandle::stop ─▶ teardown         [Closing → Idle]
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::error::Elapsed;
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::{
    codec, AudioFrame, CaptureGuard, CapturePipeline, CaptureSource, Transmit,
};
use crate::error::VoiceError;
use crate::playback::{AudioOutput, PlaybackScheduler};

use super::state::{SessionState, SessionStatus};
use super::stream::{
    InboundEvent, Modality, StreamConfig, StreamConnection, StreamSender, VoiceStream,
};
use super::transcript::TranscriptBuffer;

// ---------------------------------------------------------------------------
// SessionOptions
// ---------------------------------------------------------------------------

/// Fixed configuration for every session run by one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Sent to the stream on open.  `output_sample_rate` is also the rate
    /// inbound audio is decoded at.
    pub stream: StreamConfig,

    /// Channel count of inbound audio.
    pub playback_channels: u16,

    /// Fail the session when the stream is not open this long after
    /// `start()`.  Covers both `VoiceStream::open` and the `Opened` event.
    /// `None` waits until the caller stops the session.
    pub connect_timeout: Option<Duration>,

    /// How often capture counters are refreshed in the status feed.
    pub status_interval: Duration,

    /// Warn when queued playback grows past this.
    pub backlog_warning: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                modality: Modality::Audio,
                voice: "Puck".into(),
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                system_instruction: None,
            },
            playback_channels: 1,
            connect_timeout: None,
            status_interval: Duration::from_millis(250),
            backlog_warning: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

enum SessionCommand {
    Start(oneshot::Sender<Result<(), VoiceError>>),
    Stop(oneshot::Sender<()>),
    Status(oneshot::Sender<SessionStatus>),
}

/// Caller-side control surface of a running [`SessionController`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Open a new session.
    ///
    /// Returns once `VoiceStream::open` has completed; the session is then
    /// `Connecting` and becomes `Active` when the stream acknowledges the
    /// open.
    ///
    /// # Errors
    ///
    /// * [`VoiceError::SessionBusy`] while a session is connecting or active.
    /// * [`VoiceError::StreamOpenFailed`] when the stream cannot be opened
    ///   (the session is then `Failed`) or when `stop()` cancels the open
    ///   (the session is then `Idle`).
    pub async fn start(&self) -> Result<(), VoiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Start(tx)).await?;
        rx.await.map_err(|_| VoiceError::ControllerGone)?
    }

    /// End the current session.  Returns after capture has stopped, the
    /// stream was asked to close and every scheduled buffer was silenced.
    pub async fn stop(&self) -> Result<(), VoiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Stop(tx)).await?;
        rx.await.map_err(|_| VoiceError::ControllerGone)
    }

    /// Fresh status snapshot.  Inbound events queued before this call are
    /// reflected in the result.
    pub async fn status(&self) -> Result<SessionStatus, VoiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Status(tx)).await?;
        rx.await.map_err(|_| VoiceError::ControllerGone)
    }

    /// Read-only status feed, updated on every state or transcript change
    /// and on each status tick.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), VoiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::ControllerGone)
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

type OpenFuture = Pin<Box<dyn Future<Output = Result<StreamConnection, VoiceError>> + Send>>;

/// A `VoiceStream::open` in flight, polled by the controller loop.
struct PendingOpen {
    future: OpenFuture,
    reply: oneshot::Sender<Result<(), VoiceError>>,
    deadline: Option<Instant>,
}

/// Components that live exactly as long as one session.
struct LiveSession {
    sender: Arc<dyn StreamSender>,
    /// `None` once the inbound sequence has ended.
    events: Option<mpsc::Receiver<InboundEvent>>,
    scheduler: PlaybackScheduler,
    transcript: TranscriptBuffer,
    pipeline: Option<Arc<CapturePipeline>>,
    capture_guard: Option<CaptureGuard>,
    /// Deadline for the open acknowledgement while connecting.
    open_deadline: Option<Instant>,
}

enum Signal {
    Event(InboundEvent),
    EventsEnded,
    ConnectTimeout,
}

/// Drives voice sessions.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use live_voice::audio::CaptureSource;
/// use live_voice::playback::AudioOutput;
/// use live_voice::session::{SessionController, SessionOptions, VoiceStream};
///
/// # async fn example(
/// #     stream: Arc<dyn VoiceStream>,
/// #     capture: Arc<dyn CaptureSource>,
/// #     output: Arc<dyn AudioOutput>,
/// # ) -> Result<(), live_voice::VoiceError> {
/// let handle = SessionController::new(SessionOptions::default(), stream, capture, output).spawn();
/// handle.start().await?;
/// // ... talk ...
/// handle.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    options: SessionOptions,
    stream: Arc<dyn VoiceStream>,
    capture: Arc<dyn CaptureSource>,
    output: Arc<dyn AudioOutput>,
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    opening: Option<PendingOpen>,
    live: Option<LiveSession>,
}

impl SessionController {
    pub fn new(
        options: SessionOptions,
        stream: Arc<dyn VoiceStream>,
        capture: Arc<dyn CaptureSource>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            options,
            stream,
            capture,
            output,
            status: SessionStatus::default(),
            status_tx,
            opening: None,
            live: None,
        }
    }

    /// Spawn the controller on the current tokio runtime.
    ///
    /// The task ends (tearing down any live session) once every
    /// [`SessionHandle`] has been dropped.
    pub fn spawn(self) -> SessionHandle {
        let (tx, rx) = mpsc::channel(16);
        let handle = SessionHandle {
            commands: tx,
            status: self.status_tx.subscribe(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut tick = tokio::time::interval(self.options.status_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                signal = next_signal(&mut self.live) => self.on_signal(signal),

                opened = poll_open(&mut self.opening) => self.on_opened(opened),

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },

                _ = tick.tick() => self.on_tick(),
            }
        }

        self.teardown();
        log::info!("session: all handles dropped, controller shutting down");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start(reply) => self.start(reply),
            SessionCommand::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            SessionCommand::Status(reply) => {
                self.refresh_capture_stats();
                let _ = reply.send(self.status.clone());
            }
        }
    }

    fn start(&mut self, reply: oneshot::Sender<Result<(), VoiceError>>) {
        if !self.status.state.can_start() {
            log::warn!("session: start() ignored while {}", self.status.state);
            let _ = reply.send(Err(VoiceError::SessionBusy));
            return;
        }

        self.status.reset_for_start();
        self.publish();
        log::info!(
            "session: connecting (voice {}, {} Hz in / {} Hz out)",
            self.options.stream.voice,
            self.options.stream.input_sample_rate,
            self.options.stream.output_sample_rate
        );

        let stream = Arc::clone(&self.stream);
        let config = self.options.stream.clone();
        self.opening = Some(PendingOpen {
            future: Box::pin(async move { stream.open(&config).await }),
            reply,
            deadline: self.options.connect_timeout.map(|t| Instant::now() + t),
        });
    }

    fn on_opened(&mut self, opened: Result<Result<StreamConnection, VoiceError>, Elapsed>) {
        let Some(pending) = self.opening.take() else {
            return;
        };

        let opened = match opened {
            Ok(opened) => opened,
            Err(_) => Err(self.connect_timeout_error()),
        };
        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                self.fail(e.clone());
                let _ = pending.reply.send(Err(e));
                return;
            }
        };

        let scheduler = PlaybackScheduler::new(Arc::clone(&self.output))
            .with_backlog_warning(self.options.backlog_warning);

        self.live = Some(LiveSession {
            sender: connection.sender,
            events: Some(connection.events),
            scheduler,
            transcript: TranscriptBuffer::new(),
            pipeline: None,
            capture_guard: None,
            open_deadline: pending.deadline,
        });
        log::debug!("session: stream requested, waiting for open acknowledgement");
        let _ = pending.reply.send(Ok(()));
    }

    fn connect_timeout_error(&self) -> VoiceError {
        let waited = self.options.connect_timeout.unwrap_or_default();
        VoiceError::StreamOpenFailed(format!(
            "stream not opened within {} ms",
            waited.as_millis()
        ))
    }

    fn stop(&mut self) {
        match self.status.state {
            SessionState::Connecting | SessionState::Active => {
                log::info!("session: stopping");
                self.close_to_idle();
            }
            SessionState::Failed => {
                self.status.state = SessionState::Idle;
                self.publish();
            }
            SessionState::Idle | SessionState::Closing => {}
        }
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Event(event) => self.on_event(event),
            Signal::EventsEnded => {
                if let Some(live) = self.live.as_mut() {
                    live.events = None;
                }
                if self.status.state.is_running() {
                    self.fail(VoiceError::StreamError(
                        "stream ended without a close notice".into(),
                    ));
                }
            }
            Signal::ConnectTimeout => {
                if let Some(live) = self.live.as_mut() {
                    live.open_deadline = None;
                }
                if self.status.state == SessionState::Connecting {
                    let error = self.connect_timeout_error();
                    self.fail(error);
                }
            }
        }
    }

    fn on_event(&mut self, event: InboundEvent) {
        let state = self.status.state;
        match event {
            InboundEvent::Opened if state == SessionState::Connecting => self.activate(),
            InboundEvent::Audio(chunk) if state == SessionState::Active => {
                self.play(chunk.as_bytes())
            }
            InboundEvent::Interrupted if state == SessionState::Active => self.interrupt(),
            InboundEvent::Transcript(text) if state == SessionState::Active => {
                if let Some(live) = self.live.as_mut() {
                    live.transcript.push(&text);
                    self.status.transcript = live.transcript.segments().to_vec();
                    self.publish();
                }
            }
            InboundEvent::Error(message) if state.is_running() => {
                self.fail(VoiceError::StreamError(message));
            }
            InboundEvent::Closed(reason) if state.is_running() => {
                log::info!(
                    "session: stream closed by remote ({})",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.close_to_idle();
            }
            other => {
                log::debug!("session: ignoring {} event while {state}", other.kind());
            }
        }
    }

    fn activate(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        live.open_deadline = None;

        let sender = Arc::clone(&live.sender);
        let transmit: Transmit = Box::new(move |chunk| sender.try_send(chunk));
        let pipeline = Arc::new(CapturePipeline::new(transmit));
        live.pipeline = Some(Arc::clone(&pipeline));

        let sink = Arc::clone(&pipeline);
        match self.capture.start(Box::new(move |samples| {
            sink.on_frame(samples);
        })) {
            Ok(guard) => live.capture_guard = Some(guard),
            Err(e) => {
                self.fail(e);
                return;
            }
        }

        self.status.state = SessionState::Active;
        self.publish();
        log::info!("session: active");
    }

    fn play(&mut self, bytes: &[u8]) {
        let Some(live) = self.live.as_ref() else {
            return;
        };

        let rate = self.options.stream.output_sample_rate;
        let channels = self.options.playback_channels;
        let scheduled = codec::decode_interleaved(bytes, channels)
            .and_then(|samples| live.scheduler.schedule(AudioFrame::new(samples, rate, channels)));

        match scheduled {
            Ok(_) => self.status.chunks_scheduled += 1,
            Err(e) => {
                self.status.chunks_rejected += 1;
                log::warn!("session: inbound audio dropped: {e}");
            }
        }
    }

    fn interrupt(&mut self) {
        let Some(live) = self.live.as_ref() else {
            return;
        };
        let cancelled = live.scheduler.interrupt();
        self.status.interruptions += 1;
        self.publish();
        log::info!("session: interrupted, {cancelled} buffer(s) silenced");
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn close_to_idle(&mut self) {
        self.status.state = SessionState::Closing;
        self.publish();
        self.teardown();
        self.status.state = SessionState::Idle;
        self.publish();
        log::info!("session: idle");
    }

    fn fail(&mut self, error: VoiceError) {
        log::error!("session: {error}");
        self.teardown();
        self.status.state = SessionState::Failed;
        self.status.last_error = Some(error.to_string());
        self.publish();
    }

    /// Release every per-session component.  Capture is disabled before the
    /// stream is closed so no frame is sent after this returns.
    fn teardown(&mut self) {
        if let Some(pending) = self.opening.take() {
            log::info!("session: stream open cancelled");
            let _ = pending.reply.send(Err(VoiceError::StreamOpenFailed(
                "open cancelled by stop()".into(),
            )));
        }

        self.refresh_capture_stats();
        let Some(mut live) = self.live.take() else {
            return;
        };

        if let Some(pipeline) = live.pipeline.take() {
            pipeline.disable();
        }
        drop(live.capture_guard.take());
        live.sender.close();

        let silenced = live.scheduler.flush();
        if silenced > 0 {
            log::debug!("session: silenced {silenced} scheduled buffer(s)");
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    fn on_tick(&mut self) {
        if let Some(live) = self.live.as_ref() {
            live.scheduler.reap();
        }
        self.refresh_capture_stats();

        let status = &self.status;
        self.status_tx.send_if_modified(|current| {
            if current != status {
                *current = status.clone();
                true
            } else {
                false
            }
        });
    }

    fn refresh_capture_stats(&mut self) {
        let Some(pipeline) = self.live.as_ref().and_then(|l| l.pipeline.as_ref()) else {
            return;
        };
        let stats = pipeline.stats();
        self.status.frames_sent = stats.frames_sent;
        self.status.frames_dropped = stats.frames_dropped;
        self.status.frames_rejected = stats.frames_rejected;
        self.status.input_level = pipeline.input_level();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

/// Outcome of the stream open in flight; pending forever without one.
async fn poll_open(
    opening: &mut Option<PendingOpen>,
) -> Result<Result<StreamConnection, VoiceError>, Elapsed> {
    let Some(pending) = opening.as_mut() else {
        return std::future::pending().await;
    };
    match pending.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, &mut pending.future).await,
        None => Ok((&mut pending.future).await),
    }
}

/// Next inbound signal of the live session; pending forever without one.
async fn next_signal(live: &mut Option<LiveSession>) -> Signal {
    let Some(live) = live.as_mut() else {
        return std::future::pending().await;
    };
    let deadline = live.open_deadline;
    let Some(events) = live.events.as_mut() else {
        return std::future::pending().await;
    };

    let received = match deadline {
        Some(deadline) => tokio::select! {
            biased;
            event = events.recv() => event,
            _ = tokio::time::sleep_until(deadline) => return Signal::ConnectTimeout,
        },
        None => events.recv().await,
    };
    received.map_or(Signal::EventsEnded, Signal::Event)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{EncodedChunk, ManualCapture};
    use crate::error::ErrorKind;
    use crate::playback::MockOutput;
    use crate::session::stream::MockStream;

    struct Rig {
        stream: Arc<MockStream>,
        capture: Arc<ManualCapture>,
        output: Arc<MockOutput>,
        handle: SessionHandle,
    }

    fn rig_with(options: SessionOptions) -> Rig {
        let stream = Arc::new(MockStream::new());
        let capture = Arc::new(ManualCapture::new());
        let output = Arc::new(MockOutput::new());
        let handle = SessionController::new(
            options,
            stream.clone(),
            capture.clone(),
            output.clone(),
        )
        .spawn();
        Rig {
            stream,
            capture,
            output,
            handle,
        }
    }

    /// Options whose status tick never fires after the first one, so playback
    /// handles are only reaped when a test asks for it.
    fn quiet() -> SessionOptions {
        SessionOptions {
            status_interval: Duration::from_secs(3_600),
            ..SessionOptions::default()
        }
    }

    fn rig() -> Rig {
        rig_with(quiet())
    }

    /// `seconds` of silence at the default 24 kHz mono output format.
    fn speech(seconds: f64) -> InboundEvent {
        let samples = vec![0_i16; (24_000.0 * seconds) as usize];
        InboundEvent::Audio(codec::encode(&samples).unwrap())
    }

    async fn active_rig() -> Rig {
        let rig = rig();
        rig.handle.start().await.unwrap();
        rig.stream.link(0).push(InboundEvent::Opened).await;
        assert_eq!(rig.handle.status().await.unwrap().state, SessionState::Active);
        rig
    }

    #[tokio::test]
    async fn start_connects_then_opened_activates() {
        let rig = rig();
        rig.handle.start().await.unwrap();

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Connecting);
        assert!(!rig.capture.is_running());

        let link = rig.stream.link(0);
        assert_eq!(link.config.voice, "Puck");
        assert_eq!(link.config.input_sample_rate, 16_000);

        link.push(InboundEvent::Opened).await;
        assert_eq!(rig.handle.status().await.unwrap().state, SessionState::Active);
        assert!(rig.capture.is_running());
        assert_eq!(rig.handle.watch().borrow().state, SessionState::Active);
    }

    #[tokio::test]
    async fn captured_frames_reach_the_stream() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);

        rig.capture.push(&[5; 160]);
        link.set_ready(false);
        rig.capture.push(&[6; 160]);
        link.set_ready(true);
        rig.capture.push(&[7; 160]);

        let sent = link.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(codec::decode(sent[1].as_bytes()).unwrap()[0], 7);

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.frames_sent, 2);
        assert_eq!(status.frames_dropped, 1);
    }

    #[tokio::test]
    async fn start_while_running_is_busy() {
        let rig = rig();
        rig.handle.start().await.unwrap();
        let err = rig.handle.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionBusy);
        assert_eq!(rig.stream.open_count(), 1);
        assert_eq!(
            rig.handle.status().await.unwrap().state,
            SessionState::Connecting
        );
    }

    #[tokio::test]
    async fn open_failure_fails_session_and_allows_retry() {
        let rig = rig();
        rig.stream.fail_open("connection refused");

        let err = rig.handle.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamOpenFailed);

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.unwrap().contains("connection refused"));

        rig.stream.succeed_open();
        rig.handle.start().await.unwrap();
        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Connecting);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn capture_start_failure_fails_session() {
        let rig = rig();
        rig.capture.fail_start("no microphone");
        rig.handle.start().await.unwrap();
        let link = rig.stream.link(0);
        link.push(InboundEvent::Opened).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.unwrap().contains("no microphone"));
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn inbound_audio_is_scheduled_back_to_back() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);
        link.push(speech(1.0)).await;
        link.push(speech(0.5)).await;
        link.push(speech(2.0)).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.chunks_scheduled, 3);

        let starts: Vec<Duration> = rig.output.plays().iter().map(|p| p.1).collect();
        assert_eq!(
            starts,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_millis(1_500)
            ]
        );
    }

    #[tokio::test]
    async fn malformed_and_empty_audio_are_counted_and_dropped() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);
        link.push(InboundEvent::Audio(EncodedChunk::from_bytes(vec![1, 2, 3])))
            .await;
        link.push(InboundEvent::Audio(EncodedChunk::default())).await;
        link.push(speech(0.1)).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.chunks_rejected, 2);
        assert_eq!(status.chunks_scheduled, 1);
    }

    #[tokio::test]
    async fn interruption_silences_playback_and_keeps_transcript() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);
        link.push(InboundEvent::Transcript("Sure.".into())).await;
        link.push(speech(1.0)).await;
        link.push(speech(0.5)).await;
        link.push(speech(2.0)).await;
        rig.output.set_now(Duration::from_millis(1_200));
        link.push(InboundEvent::Interrupted).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.interruptions, 1);
        assert_eq!(status.transcript, vec!["Sure.".to_string()]);
        assert_eq!(rig.output.stops().len(), 3);

        link.push(speech(0.5)).await;
        rig.handle.status().await.unwrap();
        let last = *rig.output.plays().last().unwrap();
        assert_eq!(last.1, Duration::from_millis(1_200));
    }

    #[tokio::test]
    async fn transcript_fragments_become_sentences() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);
        for fragment in ["Hel", "lo.", "How"] {
            link.push(InboundEvent::Transcript(fragment.into())).await;
        }

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.transcript, vec!["Hello.".to_string(), "How".into()]);
    }

    #[tokio::test]
    async fn stop_silences_playback_and_sends_nothing_after() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);
        link.push(speech(1.0)).await;
        link.push(speech(0.5)).await;
        link.push(speech(2.0)).await;
        rig.capture.push(&[1; 160]);

        // first buffer playing, two queued
        rig.output.set_now(Duration::from_millis(400));
        rig.handle.stop().await.unwrap();

        assert_eq!(rig.output.stops().len(), 3);
        assert!(link.is_closed());
        assert!(!rig.capture.is_running());

        // a frame racing with stop() must not reach the stream
        rig.capture.push(&[2; 160]);
        assert_eq!(link.sent().len(), 1);

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.frames_sent, 1);
    }

    #[tokio::test]
    async fn stop_while_connecting_returns_to_idle() {
        let rig = rig();
        rig.handle.start().await.unwrap();
        rig.handle.stop().await.unwrap();
        assert!(rig.stream.link(0).is_closed());
        assert_eq!(rig.handle.status().await.unwrap().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let rig = rig();
        rig.handle.stop().await.unwrap();
        assert_eq!(rig.handle.status().await.unwrap().state, SessionState::Idle);
        assert_eq!(rig.stream.open_count(), 0);
    }

    #[tokio::test]
    async fn stop_cancels_a_stalled_open() {
        let rig = rig();
        rig.stream.stall_open();

        let starter = rig.handle.clone();
        let start = tokio::spawn(async move { starter.start().await });
        rig.handle
            .watch()
            .wait_for(|s| s.state == SessionState::Connecting)
            .await
            .unwrap();

        let status = tokio::time::timeout(Duration::from_secs(1), rig.handle.status())
            .await
            .expect("status answered while the open is pending")
            .unwrap();
        assert_eq!(status.state, SessionState::Connecting);

        tokio::time::timeout(Duration::from_secs(2), rig.handle.stop())
            .await
            .expect("stop answered while the open is pending")
            .unwrap();

        let err = start.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamOpenFailed);

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.last_error.is_none());
        assert_eq!(rig.stream.open_count(), 0);

        rig.stream.succeed_open();
        rig.handle.start().await.unwrap();
        assert_eq!(rig.stream.open_count(), 1);
    }

    #[tokio::test]
    async fn start_while_open_pending_is_busy() {
        let rig = rig();
        rig.stream.stall_open();

        let starter = rig.handle.clone();
        let _pending = tokio::spawn(async move { starter.start().await });
        rig.handle
            .watch()
            .wait_for(|s| s.state == SessionState::Connecting)
            .await
            .unwrap();

        let err = rig.handle.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionBusy);
    }

    #[tokio::test]
    async fn connect_timeout_bounds_a_stalled_open() {
        let rig = rig_with(SessionOptions {
            connect_timeout: Some(Duration::from_millis(30)),
            ..quiet()
        });
        rig.stream.stall_open();

        let err = tokio::time::timeout(Duration::from_secs(2), rig.handle.start())
            .await
            .expect("start returns once the timeout expires")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamOpenFailed);

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.unwrap().contains("not opened within 30 ms"));
    }

    #[tokio::test]
    async fn connect_timeout_counts_from_start() {
        let rig = rig_with(SessionOptions {
            connect_timeout: Some(Duration::from_millis(300)),
            ..quiet()
        });
        rig.stream.delay_open(Duration::from_millis(200));

        rig.handle.start().await.unwrap();
        assert_eq!(
            rig.handle.status().await.unwrap().state,
            SessionState::Connecting
        );

        // 200 ms went into open(); only 100 ms of the budget remain
        tokio::time::sleep(Duration::from_millis(180)).await;
        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.unwrap().contains("not opened"));
    }

    #[tokio::test]
    async fn stream_error_fails_session() {
        let rig = active_rig().await;
        let link = rig.stream.link(0);
        link.push(speech(1.0)).await;
        link.push(InboundEvent::Error("quota exceeded".into())).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.unwrap().contains("quota exceeded"));
        assert!(!rig.capture.is_running());
        assert!(link.is_closed());
        assert_eq!(rig.output.stops().len(), 1);

        rig.handle.stop().await.unwrap();
        assert_eq!(rig.handle.status().await.unwrap().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn remote_close_returns_to_idle() {
        let rig = active_rig().await;
        rig.stream
            .link(0)
            .push(InboundEvent::Closed(Some("goodbye".into())))
            .await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.last_error.is_none());
        assert!(!rig.capture.is_running());
    }

    #[tokio::test]
    async fn stream_ending_without_close_fails_session() {
        let rig = active_rig().await;
        rig.stream.link(0).hang_up();

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn events_outside_active_are_ignored() {
        let rig = rig();
        rig.handle.start().await.unwrap();
        let link = rig.stream.link(0);
        link.push(speech(1.0)).await;
        link.push(InboundEvent::Transcript("early".into())).await;
        link.push(InboundEvent::Interrupted).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Connecting);
        assert_eq!(status.chunks_scheduled, 0);
        assert!(status.transcript.is_empty());
        assert_eq!(status.interruptions, 0);
        assert!(rig.output.plays().is_empty());
    }

    #[tokio::test]
    async fn connect_timeout_fails_session() {
        let rig = rig_with(SessionOptions {
            connect_timeout: Some(Duration::from_millis(20)),
            ..quiet()
        });
        rig.handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(status.last_error.unwrap().contains("not opened"));
        assert!(rig.stream.link(0).is_closed());
    }

    #[tokio::test]
    async fn opened_before_timeout_disarms_it() {
        let rig = rig_with(SessionOptions {
            connect_timeout: Some(Duration::from_millis(20)),
            ..quiet()
        });
        rig.handle.start().await.unwrap();
        rig.stream.link(0).push(InboundEvent::Opened).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(rig.handle.status().await.unwrap().state, SessionState::Active);
    }

    #[tokio::test]
    async fn restart_uses_fresh_components() {
        let rig = active_rig().await;
        let first = rig.stream.link(0);
        first.push(InboundEvent::Transcript("One.".into())).await;
        first.push(speech(1.0)).await;
        rig.capture.push(&[1; 160]);
        rig.handle.stop().await.unwrap();

        rig.handle.start().await.unwrap();
        let second = rig.stream.link(1);
        second.push(InboundEvent::Opened).await;

        let status = rig.handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Active);
        assert!(status.transcript.is_empty());
        assert_eq!(status.frames_sent, 0);
        assert_eq!(status.chunks_scheduled, 0);

        rig.capture.push(&[2; 160]);
        assert_eq!(first.sent().len(), 1);
        assert_eq!(second.sent().len(), 1);
        assert_eq!(rig.capture.start_count(), 2);

        // a new scheduler starts from the output clock, not the old backlog
        rig.output.set_now(Duration::from_millis(100));
        second.push(speech(0.5)).await;
        rig.handle.status().await.unwrap();
        let last = *rig.output.plays().last().unwrap();
        assert_eq!(last.1, Duration::from_millis(100));
    }
}
