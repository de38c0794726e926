//! ALSA PCM playback sink.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::sink::{OutputSink, SinkFactory};

/// 底层持续跟不上写入速度时的最大恢复次数
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

pub struct AlsaSinkFactory {
    device: String,
    period_size: usize,
}

impl AlsaSinkFactory {
    /// `period_size` of 0 lets ALSA decide.
    pub fn new(device: &str, period_size: usize) -> Self {
        Self {
            device: device.to_string(),
            period_size,
        }
    }
}

impl SinkFactory for AlsaSinkFactory {
    fn name(&self) -> &str {
        "alsa"
    }

    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn OutputSink>> {
        let period_size = (self.period_size > 0).then_some(self.period_size);
        let (pcm, params) = open_playback(&self.device, sample_rate, u32::from(channels), period_size)?;

        if params.sample_rate != sample_rate {
            log::warn!(
                "ALSA negotiated {}Hz instead of {}Hz, playback pitch will be off",
                params.sample_rate,
                sample_rate
            );
        }
        if params.channels != u32::from(channels) {
            anyhow::bail!(
                "ALSA device '{}' refused {} channels (got {})",
                self.device,
                channels,
                params.channels
            );
        }

        Ok(Box::new(AlsaSink {
            pcm,
            channels: params.channels as usize,
        }))
    }
}

struct AlsaSink {
    pcm: PCM,
    channels: usize,
}

impl OutputSink for AlsaSink {
    fn write(&mut self, interleaved: &[i16]) -> Result<()> {
        let io = self.pcm.io_i16()?;

        // Retry loop handles short writes and XRUN recovery without losing frames.
        let total_frames = interleaved.len() / self.channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * self.channels;
            match io.writei(&interleaved[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    // 触发 ALSA 硬件恢复状态机
                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM playback")?;

                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.pcm.drain().context("Failed to drain PCM playback")?;
        Ok(())
    }
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}
