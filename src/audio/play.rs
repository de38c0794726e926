use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;

use super::OutputConfig;
use super::device::{DeviceState, PlaybackDevice};
use super::handle::PlaybackHandle;
use super::pcm::PcmAudioBuffer;
use super::sink::{self, SinkFactory};
use crate::error::PlaybackError;

/// What `play` does when an earlier playback is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPolicy {
    /// Start an independent stream; both are heard at once.
    #[default]
    Overlap,
    /// Stop the previous handle first. Opt-in via `interrupt_previous`.
    InterruptPrevious,
}

/// Owns the playback device for the application and plays decoded buffers.
///
/// The device is built on first use and resumed before any playback; it lives
/// until `shutdown()`.
pub struct AudioPlaybackController {
    config: OutputConfig,
    factory: Arc<dyn SinkFactory>,
    policy: PlaybackPolicy,
    device: OnceLock<Arc<PlaybackDevice>>,
    current: Mutex<Option<PlaybackHandle>>,
}

impl AudioPlaybackController {
    pub fn new(config: OutputConfig, factory: Arc<dyn SinkFactory>) -> Self {
        let policy = if config.interrupt_previous {
            PlaybackPolicy::InterruptPrevious
        } else {
            PlaybackPolicy::Overlap
        };
        Self {
            config,
            factory,
            policy,
            device: OnceLock::new(),
            current: Mutex::new(None),
        }
    }

    /// Build the controller with the sink backend named in `config`.
    pub fn from_config(config: OutputConfig) -> Result<Self> {
        let factory = sink::create_sink_factory(&config)?;
        Ok(Self::new(config, factory))
    }

    pub fn policy(&self) -> PlaybackPolicy {
        self.policy
    }

    /// The application's device, constructed on first call and resumed if it
    /// is still suspended. Awaiting this before `play` is required.
    pub async fn get_device(&self) -> Result<Arc<PlaybackDevice>, PlaybackError> {
        let device = self
            .device
            .get_or_init(|| {
                log::info!(
                    "Creating playback device: rate={}, ch={}",
                    self.config.sample_rate,
                    self.config.channels
                );
                Arc::new(PlaybackDevice::new(
                    self.config.sample_rate,
                    self.config.channels,
                    self.config.period_size,
                    self.factory.clone(),
                ))
            })
            .clone();

        if device.state() == DeviceState::Suspended {
            log::debug!("Playback device suspended, resuming...");
            device.resume().await?;
        }
        Ok(device)
    }

    /// Start `buffer` on `device` right away and hand back its handle.
    pub fn play(&self, buffer: PcmAudioBuffer, device: &PlaybackDevice) -> Result<PlaybackHandle, PlaybackError> {
        if self.policy == PlaybackPolicy::Overlap {
            return device.play(buffer);
        }

        // 单槽策略：先停止上一段仍在播放的音频
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            if previous.is_active() {
                log::info!("Interrupting playback {}", previous.id());
                previous.stop();
            }
        }
        let handle = device.play(buffer)?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// `get_device` followed by `play`.
    pub async fn speak(&self, buffer: PcmAudioBuffer) -> Result<PlaybackHandle, PlaybackError> {
        let device = self.get_device().await?;
        self.play(buffer, &device)
    }

    /// Close the device if it was ever created. Active handles end as stopped.
    pub async fn shutdown(&self) {
        let Some(device) = self.device.get().cloned() else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || device.close()).await {
            log::error!("Playback shutdown failed: {}", e);
        }
    }
}
