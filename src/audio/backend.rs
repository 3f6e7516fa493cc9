use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// One capture block (mono, normalized f32 in `[-1.0, 1.0]`)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this block in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Root-mean-square energy of the block
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate expected by the upstream model
    pub sample_rate: u32,
    /// Samples per delivered block
    pub block_size: usize,
    /// Deliver blocks at wall-clock cadence instead of as fast as possible
    pub realtime: bool,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            block_size: 4096,
            realtime: true,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: stream a WAV file as fixed-size blocks (CLI calls and tests)
/// - Microphone: platform capture, unavailable unless compiled in
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create the backend for `source`.
    ///
    /// Fails when the source cannot be opened, which callers surface as a
    /// device error before any session starts.
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                anyhow::bail!("no microphone capture device is available in this build")
            }

            AudioSource::File(path) => {
                let backend = super::file::WavFileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Live microphone input
    Microphone,
    /// WAV file input
    File(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_constant_block() {
        let frame = AudioFrame {
            samples: vec![0.5; 100],
            sample_rate: 24000,
            timestamp_ms: 0,
        };
        assert!((frame.rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_of_empty_block_is_zero() {
        let frame = AudioFrame {
            samples: Vec::new(),
            sample_rate: 24000,
            timestamp_ms: 0,
        };
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn test_duration_ms() {
        let frame = AudioFrame {
            samples: vec![0.0; 2400],
            sample_rate: 24000,
            timestamp_ms: 0,
        };
        assert_eq!(frame.duration_ms(), 100);
    }

    #[test]
    fn test_microphone_unavailable() {
        let result = AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default());
        assert!(result.is_err());
    }
}
