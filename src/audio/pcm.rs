//! PCM16 payload decoding.
//!
//! The synthesis service returns raw little-endian 16-bit samples as base64
//! text. Decoding splits the interleaved stream into one float sequence per
//! channel, scaled by 1/32768.

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::time::Duration;

use crate::error::DecodeError;

/// Encoded audio bytes exactly as received, after base64 decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAudioPayload {
    bytes: Bytes,
    mime_type: Option<String>,
}

impl RawAudioPayload {
    pub fn from_base64(data: &str, mime_type: Option<String>) -> Result<Self, DecodeError> {
        let bytes = general_purpose::STANDARD.decode(data.trim())?;
        Ok(Self {
            bytes: Bytes::from(bytes),
            mime_type,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Sample rate announced in the MIME type, e.g. `audio/L16;codec=pcm;rate=24000`.
    pub fn declared_rate(&self) -> Option<u32> {
        self.mime_type
            .as_deref()?
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }

    pub fn decode_pcm16(&self, sample_rate: u32, channels: u16) -> Result<PcmAudioBuffer, DecodeError> {
        if let Some(declared) = self.declared_rate() {
            if declared != sample_rate {
                log::warn!(
                    "Payload declares {}Hz but is decoded at {}Hz",
                    declared,
                    sample_rate
                );
            }
        }
        decode_pcm16(&self.bytes, sample_rate, channels)
    }
}

/// Decoded audio, one sample sequence per channel, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PcmAudioBuffer {
    /// Build a buffer from per-channel samples. All channels must have the
    /// same length and there must be at least one.
    #[cfg(test)]
    pub fn from_channels(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, DecodeError> {
        let Some(first) = channels.first() else {
            return Err(DecodeError::ZeroChannels);
        };
        let frames = first.len();
        if channels.iter().any(|c| c.len() != frames) {
            let samples = channels.iter().map(Vec::len).sum();
            return Err(DecodeError::ChannelMismatch {
                samples,
                channels: channels.len() as u16,
            });
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Samples of one channel. `index` must be below `channel_count()`.
    pub(crate) fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

/// Decode little-endian signed 16-bit PCM into a [`PcmAudioBuffer`].
///
/// The byte length must split into whole samples and the samples into
/// whole frames; anything else is rejected rather than truncated.
pub fn decode_pcm16(data: &[u8], sample_rate: u32, channels: u16) -> Result<PcmAudioBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::ZeroChannels);
    }
    if data.len() % 2 != 0 {
        return Err(DecodeError::OddByteLength(data.len()));
    }

    let samples = data.len() / 2;
    let ch = channels as usize;
    if samples % ch != 0 {
        return Err(DecodeError::ChannelMismatch { samples, channels });
    }
    let frame_count = samples / ch;

    let mut out: Vec<Vec<f32>> = (0..ch).map(|_| Vec::with_capacity(frame_count)).collect();
    // 交错排列：第 i 帧第 c 声道位于 i * ch + c
    for (index, pair) in data.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out[index % ch].push(f32::from(sample) / 32768.0);
    }

    Ok(PcmAudioBuffer {
        sample_rate,
        channels: out,
    })
}
