//! Error types for the speech pipeline and the tutor calls.
//!
//! None of these are recovered inside the crate. Callers decide whether to
//! show a notice, retry on user action, or disable playback.

use thiserror::Error;

/// Failure to turn a received audio payload into PCM samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd byte length {0}")]
    OddByteLength(usize),

    #[error("{samples} samples cannot be split evenly across {channels} channels")]
    ChannelMismatch { samples: usize, channels: u16 },

    #[error("channel count must be at least 1")]
    ZeroChannels,
}

/// Failure talking to the generative-AI service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to generative service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generative service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse generative service response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("cannot synthesize empty text")]
    EmptyText,

    #[error("speech synthesis request failed: {0}")]
    Request(#[from] RemoteError),

    /// The call succeeded but no candidate carried audio.
    #[error("no audio data received")]
    NoAudioData,

    #[error("audio decode failed: {0}")]
    AudioDecode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The output could not be opened. Playback should stay disabled until
    /// the next user action allows another attempt.
    #[error("failed to resume playback device: {0:#}")]
    DeviceResume(anyhow::Error),

    #[error("playback device is suspended")]
    DeviceSuspended,

    #[error("playback device is closed")]
    DeviceClosed,

    #[error("buffer sample rate {buffer_rate}Hz does not match device rate {device_rate}Hz")]
    FormatMismatch { buffer_rate: u32, device_rate: u32 },
}

#[derive(Debug, Error)]
pub enum TutorError {
    #[error("tutor request failed: {0}")]
    Request(#[from] RemoteError),

    #[error("tutor returned an empty reply")]
    EmptyReply,

    #[error("tutor returned malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("unknown voice: {0}")]
pub struct UnknownVoice(pub String);
