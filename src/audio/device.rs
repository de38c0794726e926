//! The playback device and its mixer thread.
//!
//! Uses std::thread (NOT tokio tasks) for the output loop so blocking sink
//! writes never stall the async runtime. Handles attach through a channel and
//! the mixer sums every active source into one stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::{OnceCell, oneshot};

use super::handle::{PlaybackHandle, PlaybackState};
use super::pcm::PcmAudioBuffer;
use super::sink::{OutputSink, SinkFactory};
use crate::error::PlaybackError;

/// 混音周期未配置时使用的帧数
const DEFAULT_PERIOD_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Constructed, output not opened yet.
    Suspended,
    Running,
    Closed,
}

enum MixerCommand {
    Attach(Source),
    Shutdown,
}

struct Source {
    buffer: PcmAudioBuffer,
    position: usize,
    handle: PlaybackHandle,
}

impl Source {
    fn is_finished(&self) -> bool {
        self.position >= self.buffer.frame_count()
    }
}

struct MixerLink {
    tx: mpsc::UnboundedSender<MixerCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// One output for the whole application. Created suspended; the first
/// `resume()` opens the sink and starts mixing.
pub struct PlaybackDevice {
    sample_rate: u32,
    channels: u16,
    period_size: usize,
    factory: Arc<dyn SinkFactory>,
    mixer: OnceCell<MixerLink>,
    closed: AtomicBool,
}

impl PlaybackDevice {
    pub fn new(sample_rate: u32, channels: u16, period_size: usize, factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            period_size: if period_size == 0 { DEFAULT_PERIOD_SIZE } else { period_size },
            factory,
            mixer: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DeviceState {
        if self.closed.load(Ordering::SeqCst) {
            DeviceState::Closed
        } else if self.mixer.initialized() {
            DeviceState::Running
        } else {
            DeviceState::Suspended
        }
    }

    /// Open the output and start the mixer. Repeated or concurrent calls share
    /// one start; after a failure the device stays suspended and may be
    /// resumed again later.
    pub async fn resume(&self) -> Result<(), PlaybackError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlaybackError::DeviceClosed);
        }
        self.mixer.get_or_try_init(|| self.start_mixer()).await?;
        Ok(())
    }

    async fn start_mixer(&self) -> Result<MixerLink, PlaybackError> {
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();
        let (tx, rx) = mpsc::unbounded_channel();

        let factory = self.factory.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let period_size = self.period_size;

        let thread = thread::Builder::new()
            .name("audio-mixer".into())
            .spawn(move || {
                // 在混音线程内打开输出设备
                let sink = match factory.open(sample_rate, channels) {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                mixer_thread(sink, rx, channels as usize, period_size);
            })
            .map_err(|e| PlaybackError::DeviceResume(e.into()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                log::info!(
                    "Playback device resumed: output={}, rate={}, ch={}, period={}",
                    self.factory.name(),
                    sample_rate,
                    channels,
                    period_size
                );
                Ok(MixerLink {
                    tx,
                    thread: Mutex::new(Some(thread)),
                })
            }
            Ok(Err(e)) => {
                log::error!("Failed to open {} output: {:#}", self.factory.name(), e);
                Err(PlaybackError::DeviceResume(e))
            }
            Err(_) => Err(PlaybackError::DeviceResume(anyhow::anyhow!(
                "mixer thread exited before the output opened"
            ))),
        }
    }

    /// Attach `buffer` as a new source and start it immediately.
    pub fn play(&self, buffer: PcmAudioBuffer) -> Result<PlaybackHandle, PlaybackError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlaybackError::DeviceClosed);
        }
        let link = self.mixer.get().ok_or(PlaybackError::DeviceSuspended)?;
        if buffer.sample_rate() != self.sample_rate {
            return Err(PlaybackError::FormatMismatch {
                buffer_rate: buffer.sample_rate(),
                device_rate: self.sample_rate,
            });
        }

        let handle = PlaybackHandle::new(buffer.frame_count(), buffer.sample_rate());
        // 先进入 Playing，混音线程才能在结束时标记 Completed
        handle.start();

        let source = Source {
            buffer,
            position: 0,
            handle: handle.clone(),
        };
        if link.tx.send(MixerCommand::Attach(source)).is_err() {
            handle.stop();
            return Err(PlaybackError::DeviceClosed);
        }

        log::debug!("Playback {} started ({:?})", handle.id(), handle.duration());
        Ok(handle)
    }

    /// Stop every active source, flush the sink and join the mixer thread.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(link) = self.mixer.get() else {
            log::info!("Playback device closed (never resumed)");
            return;
        };

        let _ = link.tx.send(MixerCommand::Shutdown);
        let thread = link.thread.lock().ok().and_then(|mut guard| guard.take());
        if let Some(thread) = thread {
            if thread.join().is_err() {
                log::error!("Mixer thread panicked");
            }
        }
        log::info!("Playback device closed");
    }
}

impl Drop for PlaybackDevice {
    fn drop(&mut self) {
        self.close();
    }
}

// ======================== Mixer thread ========================

fn mixer_thread(
    mut sink: Box<dyn OutputSink>,
    mut rx: mpsc::UnboundedReceiver<MixerCommand>,
    channels: usize,
    period_size: usize,
) {
    let mut sources: Vec<Source> = Vec::new();
    let mut mix = vec![0f32; period_size * channels];
    let mut out = vec![0i16; period_size * channels];

    'outer: loop {
        // 空闲时阻塞等待新的音源
        if sources.is_empty() {
            match rx.blocking_recv() {
                Some(MixerCommand::Attach(source)) => sources.push(source),
                Some(MixerCommand::Shutdown) | None => break,
            }
        }

        loop {
            match rx.try_recv() {
                Ok(MixerCommand::Attach(source)) => sources.push(source),
                Ok(MixerCommand::Shutdown) | Err(TryRecvError::Disconnected) => break 'outer,
                Err(TryRecvError::Empty) => break,
            }
        }

        sources.retain(|s| s.handle.state() != PlaybackState::Stopped);

        let frames = render_period(&mut sources, &mut mix, channels, period_size);
        if frames > 0 {
            let len = frames * channels;
            for (dst, &sample) in out[..len].iter_mut().zip(&mix[..len]) {
                *dst = to_i16(sample);
            }
            if let Err(e) = sink.write(&out[..len]) {
                // 这一周期的音频没有输出，不能算作播放完成
                log::error!("Audio output error, stopping {} source(s): {:#}", sources.len(), e);
                for source in sources.drain(..) {
                    source.handle.stop();
                }
                continue;
            }
        }

        sources.retain(|source| {
            if source.is_finished() {
                source.handle.complete();
                false
            } else {
                true
            }
        });
    }

    for source in &sources {
        source.handle.stop();
    }
    if let Err(e) = sink.finish() {
        log::error!("Failed to finish audio output: {:#}", e);
    }
    log::info!("Mixer stopped");
}

/// Sum up to one period of every source into `mix`. Returns the number of
/// frames that carry audio.
fn render_period(sources: &mut [Source], mix: &mut [f32], channels: usize, period_size: usize) -> usize {
    mix.fill(0.0);
    let mut rendered = 0;

    for source in sources.iter_mut() {
        let remaining = source.buffer.frame_count() - source.position;
        let frames = remaining.min(period_size);
        let src_channels = source.buffer.channel_count();

        for ch in 0..channels {
            // 声道数不同时按取模映射，单声道复制到所有输出声道
            let samples = &source.buffer.channel(ch % src_channels)[source.position..source.position + frames];
            for (frame, &sample) in samples.iter().enumerate() {
                mix[frame * channels + ch] += sample;
            }
        }

        source.position += frames;
        rendered = rendered.max(frames);
    }
    rendered
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}
