//! Application entry point: live-voice.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run, and writes
//!    it out so there is a file to edit).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Open the speaker, prepare the microphone and the bridge stream.
//! 5. Spawn the session controller and start a session.
//! 6. Print transcript sentences as they complete until the session ends or
//!    Ctrl-C is pressed, then stop the session.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use live_voice::{
    audio::{CpalCapture, CpalOutput},
    config::{AppConfig, AppPaths},
    session::{SessionController, SessionState, SessionStatus},
    transport::NdjsonStream,
};

// ---------------------------------------------------------------------------
// Status reporting
// ---------------------------------------------------------------------------

/// Tracks what has already been shown to the user.
#[derive(Default)]
struct Reporter {
    state: SessionState,
    /// Transcript segments already printed.
    printed: usize,
}

impl Reporter {
    fn update(&mut self, status: &SessionStatus) {
        if status.state != self.state {
            match (&status.state, &status.last_error) {
                (SessionState::Failed, Some(error)) => log::error!("session failed: {error}"),
                (state, _) => log::info!("session state: {state}"),
            }
            self.state = status.state;
        }

        // Every segment but the last is complete.
        let complete = status.transcript.len().saturating_sub(1);
        self.print(&status.transcript[..complete]);
    }

    fn finish(&mut self, status: &SessionStatus) {
        self.print(&status.transcript);
    }

    fn print(&mut self, segments: &[String]) {
        if segments.len() <= self.printed {
            return;
        }
        for segment in &segments[self.printed..] {
            println!("{segment}");
        }
        self.printed = segments.len();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run(config: AppConfig) -> Result<()> {
    let output = CpalOutput::open(config.audio.output_device.as_deref())
        .context("opening audio output")?;
    let capture = CpalCapture::new(
        config.audio.input_device.clone(),
        config.audio.capture_sample_rate,
        config.audio.frame_samples(),
    );
    let stream = NdjsonStream::child_process(
        config.transport.command.clone(),
        config.transport.args.clone(),
        config.transport.ndjson_options(),
    );

    let handle = SessionController::new(
        config.session_options(),
        Arc::new(stream),
        Arc::new(capture),
        Arc::new(output),
    )
    .spawn();

    let mut feed = handle.watch();
    let mut reporter = Reporter::default();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        started = handle.start() => started.context("starting session")?,
        _ = &mut ctrl_c => {
            log::info!("interrupt received while connecting");
            handle.stop().await?;
            return Ok(());
        }
    }
    log::info!("speak now; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("interrupt received, stopping");
                break;
            }
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = feed.borrow_and_update().clone();
                reporter.update(&status);
                if matches!(status.state, SessionState::Idle | SessionState::Failed) {
                    break;
                }
            }
        }
    }

    handle.stop().await?;
    let status = handle.status().await?;
    reporter.finish(&status);

    log::info!(
        "session summary: {} frames sent, {} dropped, {} chunks played, {} rejected, {} interruptions",
        status.frames_sent,
        status.frames_dropped,
        status.chunks_scheduled,
        status.chunks_rejected,
        status.interruptions
    );

    match status.last_error {
        Some(error) => Err(anyhow!(error)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-voice starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e:#}); using defaults");
        AppConfig::default()
    });
    if AppConfig::is_first_run() {
        match config.save() {
            Ok(()) => log::info!(
                "wrote default settings to {}",
                AppPaths::new().settings_file.display()
            ),
            Err(e) => log::warn!("could not write default settings: {e:#}"),
        }
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config))
}
