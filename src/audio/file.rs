use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

/// Silence appended after the file so a trailing utterance can close
const TRAILING_SILENCE_MS: u64 = 2000;

/// A WAV file decoded to mono f32
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples; multi-channel input is averaged
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
        };

        let channels = spec.channels.max(1) as usize;
        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that replays a WAV file as fixed-size blocks
pub struct WavFileBackend {
    file: Arc<AudioFile>,
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavFileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let file = AudioFile::open(path)?;
        if file.sample_rate != config.sample_rate {
            anyhow::bail!(
                "{} is {}Hz, capture expects {}Hz",
                file.path,
                file.sample_rate,
                config.sample_rate
            );
        }

        Ok(Self {
            file: Arc::new(file),
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

impl Drop for WavFileBackend {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for WavFileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            anyhow::bail!("capture already started");
        }

        let (tx, rx) = mpsc::channel(100);
        let file = Arc::clone(&self.file);
        let capturing = Arc::clone(&self.capturing);
        let block_size = self.config.block_size.max(1);
        let sample_rate = self.config.sample_rate;
        let realtime = self.config.realtime;

        let silence_samples = (sample_rate as u64 * TRAILING_SILENCE_MS / 1000) as usize;
        let padded_len = file.samples.len() + silence_samples;

        self.task = Some(tokio::spawn(async move {
            let block_period = Duration::from_micros(block_size as u64 * 1_000_000 / sample_rate as u64);
            let mut offset = 0usize;

            while offset < padded_len && capturing.load(Ordering::SeqCst) {
                let samples: Vec<f32> = (offset..offset + block_size)
                    .map(|i| file.samples.get(i).copied().unwrap_or(0.0))
                    .collect();
                let frame = AudioFrame {
                    samples,
                    sample_rate,
                    timestamp_ms: offset as u64 * 1000 / sample_rate as u64,
                };

                if tx.send(frame).await.is_err() {
                    break;
                }
                offset += block_size;

                if realtime {
                    tokio::time::sleep(block_period).await;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("WAV capture finished after {} samples", offset.min(padded_len));
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
