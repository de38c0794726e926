//! audio - PCM decoding, output device and playback handles
//!
//! Synthesized speech arrives as raw PCM16. It is decoded into float
//! buffers and rendered by a mixer thread into ALSA or a WAV file.

#[cfg(feature = "alsa")]
mod alsa_device;
mod device;
mod handle;
mod pcm;
mod play;
pub mod sink;

pub use handle::{PlaybackHandle, PlaybackState};
pub use pcm::{PcmAudioBuffer, RawAudioPayload};
pub use play::AudioPlaybackController;
pub use sink::OutputBackend;

use std::path::PathBuf;

/// Output configuration for the playback device.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Device sample rate; synthesized speech is 24000
    pub sample_rate: u32,
    /// Device channel count
    pub channels: u16,
    /// Where rendered audio goes
    pub backend: OutputBackend,
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    #[cfg_attr(not(feature = "alsa"), allow(dead_code))]
    pub playback_device: String,
    /// Frames rendered per mixer period (also the ALSA period hint, 0 = let ALSA decide)
    pub period_size: usize,
    /// Target file for the WAV backend
    pub wav_path: PathBuf,
    /// Stop the previous playback before starting a new one
    pub interrupt_previous: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            backend: OutputBackend::Wav,
            playback_device: "default".to_string(),
            period_size: 1024,
            wav_path: PathBuf::from("lingua_playback.wav"),
            interrupt_previous: false,
        }
    }
}
