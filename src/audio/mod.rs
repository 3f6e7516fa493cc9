pub mod backend;
pub mod file;
pub mod pcm;
pub mod playback;
pub mod vad;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use file::{AudioFile, WavFileBackend};
pub use playback::{
    AudioOutput, FrameOutcome, NullOutput, PlaybackScheduler, PlaybackState, SharedGain,
    WavFileOutput,
};
pub use vad::{Utterance, VadConfig, VadEncoder};
