//! Output sinks the mixer writes interleaved PCM16 frames into.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::OutputConfig;

/// Destination for rendered audio. Writes block until the data is accepted,
/// which is what paces the mixer.
pub trait OutputSink: Send {
    fn write(&mut self, interleaved: &[i16]) -> Result<()>;

    /// Flush anything still buffered. Called once when the device closes.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens a sink once the device is resumed.
pub trait SinkFactory: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn OutputSink>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputBackend {
    Alsa,
    Wav,
}

impl FromStr for OutputBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alsa" => Ok(Self::Alsa),
            "wav" => Ok(Self::Wav),
            other => anyhow::bail!("Unsupported output backend: {}", other),
        }
    }
}

/// Factory function: pick the sink implementation for the configured backend.
pub fn create_sink_factory(config: &OutputConfig) -> Result<Arc<dyn SinkFactory>> {
    match config.backend {
        OutputBackend::Wav => Ok(Arc::new(WavSinkFactory::new(&config.wav_path))),
        #[cfg(feature = "alsa")]
        OutputBackend::Alsa => Ok(Arc::new(super::alsa_device::AlsaSinkFactory::new(
            &config.playback_device,
            config.period_size,
        ))),
        #[cfg(not(feature = "alsa"))]
        OutputBackend::Alsa => {
            anyhow::bail!("ALSA output requested but this build has no `alsa` feature")
        }
    }
}

/// 落后超过这个时长视为输出曾经空闲，重新对齐时钟
const MAX_PACING_LAG: Duration = Duration::from_millis(100);

/// Holds writes back to wall-clock time for outputs that accept data instantly,
/// so handles finish after their real duration.
struct Pacer {
    sample_rate: u32,
    channels: u16,
    started: Option<Instant>,
    frames: u64,
}

impl Pacer {
    fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            started: None,
            frames: 0,
        }
    }

    fn wait(&mut self, samples: usize) {
        let now = Instant::now();
        let frames = (samples / self.channels as usize) as u64;

        // 首次写入或空闲之后从当前时间重新计时
        let started = match self.started {
            Some(started) if self.due(started) + MAX_PACING_LAG >= now => started,
            _ => {
                self.frames = 0;
                *self.started.insert(now)
            }
        };
        self.frames += frames;

        let due = self.due(started);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }

    fn due(&self, started: Instant) -> Instant {
        started + Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }
}

// ======================== WAV sink ========================

/// Records everything the device plays into a 16-bit WAV file.
pub struct WavSinkFactory {
    path: PathBuf,
}

impl WavSinkFactory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SinkFactory for WavSinkFactory {
    fn name(&self) -> &str {
        "wav"
    }

    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn OutputSink>> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)
            .with_context(|| format!("Failed to create WAV output '{}'", self.path.display()))?;

        log::info!(
            "WAV output: path={}, rate={}, channels={}",
            self.path.display(),
            sample_rate,
            channels
        );

        Ok(Box::new(WavSink {
            writer: Some(writer),
            pacer: Pacer::new(sample_rate, channels),
        }))
    }
}

struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    pacer: Pacer,
}

impl OutputSink for WavSink {
    fn write(&mut self, interleaved: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("WAV output already finalized")?;
        for &sample in interleaved {
            writer.write_sample(sample)?;
        }
        self.pacer.wait(interleaved.len());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV output")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every written sample in memory.
    #[derive(Clone, Default)]
    pub(crate) struct MemorySinkFactory {
        pub written: Arc<Mutex<Vec<i16>>>,
        pub finished: Arc<Mutex<bool>>,
        pub fail_open: bool,
        /// Accept data at real-time speed like a hardware device
        pub paced: bool,
        pub fail_write: bool,
    }

    impl MemorySinkFactory {
        pub fn failing() -> Self {
            Self {
                fail_open: true,
                ..Self::default()
            }
        }

        pub fn paced() -> Self {
            Self {
                paced: true,
                ..Self::default()
            }
        }

        /// Opens fine but rejects every write.
        pub fn broken_output() -> Self {
            Self {
                fail_write: true,
                ..Self::default()
            }
        }

        pub fn samples(&self) -> Vec<i16> {
            self.written.lock().unwrap().clone()
        }

        pub fn is_finished(&self) -> bool {
            *self.finished.lock().unwrap()
        }
    }

    impl SinkFactory for MemorySinkFactory {
        fn name(&self) -> &str {
            "memory"
        }

        fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn OutputSink>> {
            if self.fail_open {
                anyhow::bail!("output unavailable");
            }
            Ok(Box::new(MemorySink {
                written: self.written.clone(),
                finished: self.finished.clone(),
                pacer: self.paced.then(|| Pacer::new(sample_rate, channels)),
                fail_write: self.fail_write,
            }))
        }
    }

    struct MemorySink {
        written: Arc<Mutex<Vec<i16>>>,
        finished: Arc<Mutex<bool>>,
        pacer: Option<Pacer>,
        fail_write: bool,
    }

    impl OutputSink for MemorySink {
        fn write(&mut self, interleaved: &[i16]) -> Result<()> {
            if self.fail_write {
                anyhow::bail!("device write failed");
            }
            self.written.lock().unwrap().extend_from_slice(interleaved);
            if let Some(pacer) = self.pacer.as_mut() {
                pacer.wait(interleaved.len());
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("WAV".parse::<OutputBackend>().unwrap(), OutputBackend::Wav);
        assert_eq!(" alsa ".parse::<OutputBackend>().unwrap(), OutputBackend::Alsa);
        assert!("pulse".parse::<OutputBackend>().is_err());
    }

    #[test]
    fn wav_sink_writes_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let factory = WavSinkFactory::new(&path);
        let mut sink = factory.open(24000, 1).unwrap();
        sink.write(&[0, 1000, -1000, i16::MAX]).unwrap();
        sink.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 1000, -1000, i16::MAX]);
    }

    #[test]
    fn wav_sink_rejects_writes_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavSinkFactory::new(dir.path().join("done.wav"))
            .open(24000, 1)
            .unwrap();
        sink.finish().unwrap();
        assert!(sink.write(&[1]).is_err());
        // 再次 finish 是无操作
        assert!(sink.finish().is_ok());
    }

    #[test]
    fn pacer_holds_writes_to_real_time() {
        let mut pacer = Pacer::new(1000, 1);
        let start = Instant::now();
        pacer.wait(20);
        pacer.wait(20);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn pacer_restarts_clock_after_idle_gap() {
        let mut pacer = Pacer::new(1000, 1);
        pacer.wait(10);
        std::thread::sleep(Duration::from_millis(300));

        // 空闲后的写入仍需按自身时长等待
        let start = Instant::now();
        pacer.wait(50);
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[cfg(not(feature = "alsa"))]
    #[test]
    fn alsa_backend_requires_feature() {
        let config = OutputConfig {
            backend: OutputBackend::Alsa,
            ..OutputConfig::default()
        };
        assert!(create_sink_factory(&config).is_err());
    }
}
