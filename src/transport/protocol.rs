//! NDJSON bridge protocol.
//!
//! One JSON object per line, tagged by `"type"`.  Audio travels as base64
//! little-endian 16-bit PCM in the `data` field.
//!
//! ```text
//! → {"type":"setup","modality":"audio","voice":"Puck","input_sample_rate":16000,"output_sample_rate":24000}
//! ← {"type":"open"}
//! → {"type":"audio","data":"AAABAA=="}
//! ← {"type":"transcript","text":"Hello."}
//! ← {"type":"audio","data":"..."}
//! ← {"type":"interrupted"}
//! → {"type":"close"}
//! ← {"type":"close","reason":"client closed"}
//! ```

use serde::{Deserialize, Serialize};

use crate::audio::EncodedChunk;
use crate::error::VoiceError;
use crate::session::{InboundEvent, Modality, StreamConfig};

/// Longest inbound line accepted by default (8 MiB).
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Messages written to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Setup {
        modality: Modality,
        voice: String,
        input_sample_rate: u32,
        output_sample_rate: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_instruction: Option<String>,
    },
    Audio {
        data: String,
    },
    Close,
}

impl OutboundMessage {
    pub fn setup(config: &StreamConfig) -> Self {
        OutboundMessage::Setup {
            modality: config.modality,
            voice: config.voice.clone(),
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            system_instruction: config.system_instruction.clone(),
        }
    }

    pub fn audio(chunk: &EncodedChunk) -> Self {
        OutboundMessage::Audio {
            data: chunk.to_base64(),
        }
    }

    /// One protocol line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Messages read from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Open,
    Audio {
        data: String,
    },
    Transcript {
        text: String,
    },
    Interrupted,
    Error {
        message: String,
    },
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl InboundMessage {
    /// Parse one line (surrounding whitespace ignored).
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Convert into the session-level event.
    ///
    /// # Errors
    ///
    /// [`VoiceError::MalformedChunk`] when an audio payload is not base64.
    pub fn into_event(self) -> Result<InboundEvent, VoiceError> {
        Ok(match self {
            InboundMessage::Open => InboundEvent::Opened,
            InboundMessage::Audio { data } => InboundEvent::Audio(EncodedChunk::from_base64(&data)?),
            InboundMessage::Transcript { text } => InboundEvent::Transcript(text),
            InboundMessage::Interrupted => InboundEvent::Interrupted,
            InboundMessage::Error { message } => InboundEvent::Error(message),
            InboundMessage::Close { reason } => InboundEvent::Closed(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn setup_omits_missing_instruction() {
        let config = StreamConfig {
            modality: Modality::Audio,
            voice: "Kore".into(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            system_instruction: None,
        };
        let value: Value = serde_json::to_value(OutboundMessage::setup(&config)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "setup",
                "modality": "audio",
                "voice": "Kore",
                "input_sample_rate": 16000,
                "output_sample_rate": 24000
            })
        );
    }

    #[test]
    fn audio_line_is_base64_and_newline_terminated() {
        let chunk = EncodedChunk::from_bytes(vec![0, 0, 1, 0]);
        let line = OutboundMessage::audio(&chunk).to_line().unwrap();
        assert_eq!(line, "{\"type\":\"audio\",\"data\":\"AAABAA==\"}\n");
    }

    #[test]
    fn close_has_only_a_type() {
        assert_eq!(
            OutboundMessage::Close.to_line().unwrap(),
            "{\"type\":\"close\"}\n"
        );
    }

    #[test]
    fn inbound_messages_map_to_events() {
        let cases = [
            ("{\"type\":\"open\"}", InboundEvent::Opened),
            (
                "{\"type\":\"transcript\",\"text\":\"Hi.\"}",
                InboundEvent::Transcript("Hi.".into()),
            ),
            ("{\"type\":\"interrupted\"}", InboundEvent::Interrupted),
            (
                "{\"type\":\"error\",\"message\":\"quota\"}",
                InboundEvent::Error("quota".into()),
            ),
            ("{\"type\":\"close\"}", InboundEvent::Closed(None)),
            (
                " {\"type\":\"close\",\"reason\":\"bye\"}\r\n",
                InboundEvent::Closed(Some("bye".into())),
            ),
        ];
        for (line, expected) in cases {
            let event = InboundMessage::parse(line).unwrap().into_event().unwrap();
            assert_eq!(event, expected, "line {line:?}");
        }
    }

    #[test]
    fn inbound_audio_is_decoded_from_base64() {
        let event = InboundMessage::parse("{\"type\":\"audio\",\"data\":\"AQACAA==\"}")
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(event, InboundEvent::Audio(EncodedChunk::from_bytes(vec![1, 0, 2, 0])));
    }

    #[test]
    fn bad_base64_is_malformed_chunk() {
        let err = InboundMessage::parse("{\"type\":\"audio\",\"data\":\"***\"}")
            .unwrap()
            .into_event()
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedChunk);
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        assert!(InboundMessage::parse("{\"type\":\"bogus\"}").is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }
}
