//! Playback of assistant audio and accumulation of the assistant transcript.
//!
//! Chunks are handed to the output as soon as they arrive; overlapping
//! chunks are left to the output's own clock to serialize.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::pcm;
use crate::protocol::{ControlSignal, RelayFrame};

/// Output volume shared by every scheduled buffer, like a single gain node
#[derive(Debug, Clone)]
pub struct SharedGain(Arc<AtomicU32>);

impl SharedGain {
    pub fn new(level: f32) -> Self {
        Self(Arc::new(AtomicU32::new(level.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::SeqCst);
    }
}

impl Default for SharedGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Destination of rendered assistant audio
pub trait AudioOutput: Send {
    /// Render `samples` through `gain`; returns how long the buffer plays.
    fn schedule(&mut self, samples: &[f32], sample_rate: u32, gain: &SharedGain) -> Result<Duration>;

    /// Release the underlying device or file
    fn close(&mut self) -> Result<()>;
}

fn buffer_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / sample_rate as u64)
}

/// Discards audio but still reports its play time
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn schedule(&mut self, samples: &[f32], sample_rate: u32, _gain: &SharedGain) -> Result<Duration> {
        Ok(buffer_duration(samples.len(), sample_rate))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Renders assistant audio into a 16-bit mono WAV file
pub struct WavFileOutput {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavFileOutput {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let path = path.as_ref();
        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        Ok(Self { writer: Some(writer) })
    }
}

impl AudioOutput for WavFileOutput {
    fn schedule(&mut self, samples: &[f32], sample_rate: u32, gain: &SharedGain) -> Result<Duration> {
        let writer = self
            .writer
            .as_mut()
            .context("WAV output already closed")?;

        let level = gain.get();
        let scaled: Vec<f32> = samples.iter().map(|s| s * level).collect();
        for sample in pcm::float_to_pcm16(&scaled) {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }

        Ok(buffer_duration(samples.len(), sample_rate))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        Ok(())
    }
}

impl Drop for WavFileOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

/// What the scheduler did with one relay frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Played(Duration),
    Transcribed,
    Control(ControlSignal),
    /// Server error; the session must be torn down
    Terminal(String),
    Dropped,
}

/// State observable while the scheduler runs
#[derive(Debug, Default)]
pub struct PlaybackState {
    transcript: Mutex<String>,
    in_flight: AtomicUsize,
}

impl PlaybackState {
    pub async fn transcript(&self) -> String {
        self.transcript.lock().await.clone()
    }

    /// True while any scheduled buffer is still playing
    pub fn assistant_speaking(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    gain: SharedGain,
    sample_rate: u32,
    state: Arc<PlaybackState>,
    completions: Vec<JoinHandle<()>>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, gain: SharedGain, sample_rate: u32) -> Self {
        Self {
            output,
            gain,
            sample_rate,
            state: Arc::new(PlaybackState::default()),
            completions: Vec::new(),
        }
    }

    pub fn state(&self) -> Arc<PlaybackState> {
        Arc::clone(&self.state)
    }

    pub fn gain(&self) -> &SharedGain {
        &self.gain
    }

    pub async fn handle_frame(&mut self, frame: RelayFrame) -> FrameOutcome {
        match frame {
            RelayFrame::AudioChunk(data) => self.play_chunk(&data),
            RelayFrame::Text(text) => {
                self.state.transcript.lock().await.push_str(&text);
                FrameOutcome::Transcribed
            }
            RelayFrame::Error(message) => {
                error!("Server error: {}", message);
                FrameOutcome::Terminal(message)
            }
            RelayFrame::Control(signal) => {
                debug!("Control signal from relay: {:?}", signal);
                FrameOutcome::Control(signal)
            }
        }
    }

    fn play_chunk(&mut self, data: &str) -> FrameOutcome {
        let samples = match pcm::decode_chunk(data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                return FrameOutcome::Dropped;
            }
        };

        let duration = match self.output.schedule(&samples, self.sample_rate, &self.gain) {
            Ok(duration) => duration,
            Err(e) => {
                error!("Error playing audio chunk: {:#}", e);
                return FrameOutcome::Dropped;
            }
        };

        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        self.completions.retain(|handle| !handle.is_finished());
        self.completions.push(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
        }));

        FrameOutcome::Played(duration)
    }

    /// Stop all in-flight buffers and release the output
    pub fn close(&mut self) -> Result<()> {
        for handle in self.completions.drain(..) {
            handle.abort();
        }
        self.state.in_flight.store(0, Ordering::SeqCst);
        self.output.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct MemoryOutput {
        rendered: Arc<StdMutex<Vec<f32>>>,
        closed: Arc<StdMutex<bool>>,
    }

    impl AudioOutput for MemoryOutput {
        fn schedule(&mut self, samples: &[f32], sample_rate: u32, gain: &SharedGain) -> Result<Duration> {
            let level = gain.get();
            self.rendered
                .lock()
                .unwrap()
                .extend(samples.iter().map(|s| s * level));
            Ok(buffer_duration(samples.len(), sample_rate))
        }

        fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn chunk(samples: &[i16]) -> RelayFrame {
        RelayFrame::AudioChunk(
            base64::engine::general_purpose::STANDARD.encode(pcm::pcm16_to_bytes(samples)),
        )
    }

    #[tokio::test]
    async fn test_text_fragments_concatenate_verbatim() {
        let mut scheduler = PlaybackScheduler::new(Box::new(NullOutput), SharedGain::default(), 24000);
        scheduler.handle_frame(RelayFrame::Text("Hola,".into())).await;
        scheduler.handle_frame(RelayFrame::Text(" ¿en qué".into())).await;
        scheduler.handle_frame(RelayFrame::Text(" puedo ayudarte?".into())).await;
        assert_eq!(scheduler.state().transcript().await, "Hola, ¿en qué puedo ayudarte?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_while_buffer_in_flight() {
        let mut scheduler = PlaybackScheduler::new(Box::new(NullOutput), SharedGain::default(), 24000);
        let state = scheduler.state();

        // 2400 samples = 100ms
        let outcome = scheduler.handle_frame(chunk(&[0; 2400])).await;
        assert_eq!(outcome, FrameOutcome::Played(Duration::from_millis(100)));
        assert!(state.assistant_speaking());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!state.assistant_speaking());
    }

    #[tokio::test]
    async fn test_gain_applies_to_rendered_audio() {
        let output = MemoryOutput::default();
        let rendered = Arc::clone(&output.rendered);
        let gain = SharedGain::new(0.5);
        let mut scheduler = PlaybackScheduler::new(Box::new(output), gain.clone(), 24000);

        scheduler.handle_frame(chunk(&[16384])).await;
        gain.set(0.25);
        scheduler.handle_frame(chunk(&[16384])).await;

        assert_eq!(*rendered.lock().unwrap(), vec![0.25, 0.125]);
    }

    #[tokio::test]
    async fn test_error_frame_is_terminal() {
        let mut scheduler = PlaybackScheduler::new(Box::new(NullOutput), SharedGain::default(), 24000);
        let outcome = scheduler.handle_frame(RelayFrame::Error("quota exceeded".into())).await;
        assert_eq!(outcome, FrameOutcome::Terminal("quota exceeded".into()));
    }

    #[tokio::test]
    async fn test_bad_audio_is_dropped() {
        let mut scheduler = PlaybackScheduler::new(Box::new(NullOutput), SharedGain::default(), 24000);
        let outcome = scheduler.handle_frame(RelayFrame::AudioChunk("%%%".into())).await;
        assert_eq!(outcome, FrameOutcome::Dropped);
        assert!(!scheduler.state().assistant_speaking());
    }

    #[tokio::test]
    async fn test_close_releases_output_and_clears_speaking() {
        let output = MemoryOutput::default();
        let closed = Arc::clone(&output.closed);
        let mut scheduler = PlaybackScheduler::new(Box::new(output), SharedGain::default(), 24000);
        scheduler.handle_frame(chunk(&[0; 24000])).await;
        assert!(scheduler.state().assistant_speaking());

        scheduler.close().unwrap();
        assert!(*closed.lock().unwrap());
        assert!(!scheduler.state().assistant_speaking());
    }

    #[test]
    fn test_wav_output_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reply.wav");
        let mut output = WavFileOutput::create(&path, 24000).unwrap();
        let duration = output
            .schedule(&[0.5; 2400], 24000, &SharedGain::new(1.0))
            .unwrap();
        assert_eq!(duration, Duration::from_millis(100));
        output.close().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.len(), 2400);
    }
}
