//! Energy-threshold voice activity detection that cuts the capture stream
//! into utterances.
//!
//! Silence is measured on the frame clock (`AudioFrame::timestamp_ms`), so
//! the encoder behaves identically whether blocks arrive in real time or
//! from a replayed file.

use super::backend::AudioFrame;
use super::pcm;
use crate::protocol::ClientMessage;

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS energy above which a block counts as speech
    pub silence_threshold: f32,
    /// An utterance closes once silence lasts strictly longer than this
    pub silence_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            silence_duration_ms: 1500,
        }
    }
}

impl From<&crate::config::AudioConfig> for VadConfig {
    fn from(cfg: &crate::config::AudioConfig) -> Self {
        Self {
            silence_threshold: cfg.silence_threshold,
            silence_duration_ms: cfg.silence_duration_ms,
        }
    }
}

/// One finalized segment of user speech, trailing silence included
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Number of capture blocks concatenated into `samples`
    pub blocks: usize,
    pub start_ms: u64,
}

impl Utterance {
    /// Encode as a `realtimeInput` frame (16-bit PCM, base64)
    pub fn into_message(self) -> ClientMessage {
        ClientMessage::audio(pcm::encode_utterance(&self.samples))
    }
}

pub struct VadEncoder {
    config: VadConfig,
    buffer: Vec<AudioFrame>,
    speech_active: bool,
    /// Timestamp of the most recent speech block
    last_speech_ms: u64,
    user_speaking: bool,
    muted: bool,
}

impl VadEncoder {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            speech_active: false,
            last_speech_ms: 0,
            user_speaking: false,
            muted: false,
        }
    }

    /// Feed one capture block; returns an utterance when this block closes one.
    pub fn process(&mut self, frame: AudioFrame) -> Option<Utterance> {
        if self.muted {
            self.user_speaking = false;
            return None;
        }

        let rms = frame.rms();

        if rms > self.config.silence_threshold {
            self.last_speech_ms = frame.timestamp_ms;
            self.speech_active = true;
            self.user_speaking = true;
            self.buffer.push(frame);
            return None;
        }

        if !self.speech_active {
            self.user_speaking = false;
            return None;
        }

        let now_ms = frame.timestamp_ms;
        self.buffer.push(frame);

        if now_ms.saturating_sub(self.last_speech_ms) > self.config.silence_duration_ms {
            self.user_speaking = false;
            return self.finalize();
        }

        None
    }

    /// Muting drops any utterance in progress; it is never flushed.
    pub fn set_muted(&mut self, muted: bool) {
        if muted && !self.muted {
            self.discard();
        }
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Whether the last processed block was judged speech
    pub fn user_speaking(&self) -> bool {
        self.user_speaking
    }

    /// Whether an utterance is currently being buffered
    pub fn in_utterance(&self) -> bool {
        self.speech_active
    }

    pub fn reset(&mut self) {
        self.discard();
        self.muted = false;
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.speech_active = false;
        self.user_speaking = false;
    }

    fn finalize(&mut self) -> Option<Utterance> {
        let blocks = std::mem::take(&mut self.buffer);
        self.speech_active = false;

        let first = blocks.first()?;
        let start_ms = first.timestamp_ms;
        let sample_rate = first.sample_rate;
        let samples: Vec<f32> = blocks.iter().flat_map(|b| b.samples.iter().copied()).collect();

        Some(Utterance {
            samples,
            sample_rate,
            blocks: blocks.len(),
            start_ms,
        })
    }
}
