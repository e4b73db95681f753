//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Missing keys fall back
//! to their defaults, so a settings file only needs the values it changes.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::{Modality, SessionOptions, StreamConfig};
use crate::transport::{NdjsonOptions, MAX_LINE_BYTES};

use super::AppPaths;

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Audio formats and devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of captured audio sent to the service (Hz).
    pub capture_sample_rate: u32,
    /// Rate of synthesized audio received from the service (Hz).
    pub playback_sample_rate: u32,
    /// Channel count of received audio.
    pub playback_channels: u16,
    /// Length of one captured frame in milliseconds.
    pub frame_ms: u32,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
    /// Warn when queued playback exceeds this many seconds.
    pub backlog_warn_secs: Option<f32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            playback_channels: 1,
            frame_ms: 100,
            input_device: None,
            output_device: None,
            backlog_warn_secs: None,
        }
    }
}

impl AudioConfig {
    /// Samples in one captured (mono) frame, never zero.
    pub fn frame_samples(&self) -> usize {
        let samples = u64::from(self.capture_sample_rate) * u64::from(self.frame_ms) / 1_000;
        (samples as usize).max(1)
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// What is asked of the voice service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Response modality.
    pub modality: Modality,
    /// Synthesized voice name.
    pub voice: String,
    /// Optional system instruction sent with the stream setup.
    pub system_instruction: Option<String>,
    /// Fail when the stream is not open within this many milliseconds.
    /// `None` waits indefinitely.
    pub connect_timeout_ms: Option<u64>,
    /// Status refresh period in milliseconds.
    pub status_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modality: Modality::Audio,
            voice: "Puck".into(),
            system_instruction: None,
            connect_timeout_ms: None,
            status_interval_ms: 250,
        }
    }
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Bridge process and line-protocol limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bridge executable, spawned once per session.
    pub command: String,
    /// Arguments passed to `command`.
    pub args: Vec<String>,
    /// Outbound audio frames queued before new frames are dropped.
    pub send_queue: usize,
    /// Longest accepted inbound line in bytes.
    pub max_line_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: "live-voice-bridge".into(),
            args: Vec::new(),
            send_queue: 32,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl TransportConfig {
    pub fn ndjson_options(&self) -> NdjsonOptions {
        NdjsonOptions {
            send_queue: self.send_queue.max(1),
            max_line_bytes: self.max_line_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use live_voice::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// let options = config.session_options();
/// assert_eq!(options.stream.voice, config.session.voice);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns `true` when no `settings.toml` file exists yet.
    pub fn is_first_run() -> bool {
        !AppPaths::new().settings_file.exists()
    }

    /// Session controller options derived from these settings.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            stream: StreamConfig {
                modality: self.session.modality,
                voice: self.session.voice.clone(),
                input_sample_rate: self.audio.capture_sample_rate,
                output_sample_rate: self.audio.playback_sample_rate,
                system_instruction: self.session.system_instruction.clone(),
            },
            playback_channels: self.audio.playback_channels.max(1),
            connect_timeout: self.session.connect_timeout_ms.map(Duration::from_millis),
            status_interval: Duration::from_millis(self.session.status_interval_ms.max(10)),
            backlog_warning: self
                .audio
                .backlog_warn_secs
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f32),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
