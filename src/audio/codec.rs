//! PCM codec: `i16` samples ⇄ little-endian bytes.
//!
//! No header, no compression: two bytes per sample in arrival order.  The
//! functions are pure and touch no shared state, so any thread may call them.
//!
//! For text transports the encoded bytes can additionally be wrapped in
//! standard base64 with [`EncodedChunk::to_base64`].
//!
//! # Example
//!
//! ```rust
//! use live_voice::audio::codec;
//!
//! let samples = vec![0_i16, 1, -1, i16::MAX, i16::MIN];
//! let chunk = codec::encode(&samples).unwrap();
//! assert_eq!(chunk.len(), samples.len() * 2);
//! assert_eq!(codec::decode(chunk.as_bytes()).unwrap(), samples);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::VoiceError;

/// Bytes per encoded sample.
pub const SAMPLE_WIDTH: usize = 2;

/// Largest frame [`encode`] accepts: 60 s at 16 kHz (40 s at 24 kHz).
pub const MAX_FRAME_SAMPLES: usize = 960_000;

// ---------------------------------------------------------------------------
// EncodedChunk
// ---------------------------------------------------------------------------

/// One audio frame serialized for transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedChunk(Vec<u8>);

impl EncodedChunk {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Standard-alphabet base64 of the raw bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Parse a base64 payload.
    ///
    /// # Errors
    ///
    /// [`VoiceError::MalformedChunk`] when `data` is not valid base64.
    pub fn from_base64(data: &str) -> Result<Self, VoiceError> {
        STANDARD
            .decode(data.trim())
            .map(Self)
            .map_err(|e| VoiceError::MalformedChunk(format!("invalid base64: {e}")))
    }
}

impl From<Vec<u8>> for EncodedChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// encode / decode
// ---------------------------------------------------------------------------

/// Serialize `samples` as little-endian 16-bit PCM.
///
/// # Errors
///
/// [`VoiceError::FrameTooLarge`] when `samples.len() > MAX_FRAME_SAMPLES`.
pub fn encode(samples: &[i16]) -> Result<EncodedChunk, VoiceError> {
    if samples.len() > MAX_FRAME_SAMPLES {
        return Err(VoiceError::FrameTooLarge {
            len: samples.len(),
            max: MAX_FRAME_SAMPLES,
        });
    }

    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(EncodedChunk(bytes))
}

/// Inverse of [`encode`].
///
/// # Errors
///
/// [`VoiceError::MalformedChunk`] when the byte length is not a multiple of
/// [`SAMPLE_WIDTH`].
pub fn decode(bytes: &[u8]) -> Result<Vec<i16>, VoiceError> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(VoiceError::MalformedChunk(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode interleaved audio with `channels` channels.
///
/// # Errors
///
/// [`VoiceError::MalformedChunk`] when the bytes are not whole samples, when
/// `channels == 0`, or when the last frame would be missing channels.
pub fn decode_interleaved(bytes: &[u8], channels: u16) -> Result<Vec<i16>, VoiceError> {
    if channels == 0 {
        return Err(VoiceError::MalformedChunk("zero channels".into()));
    }

    let samples = decode(bytes)?;
    if samples.len() % channels as usize != 0 {
        return Err(VoiceError::MalformedChunk(format!(
            "{} samples leave a partial frame for {} channels",
            samples.len(),
            channels
        )));
    }
    Ok(samples)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
