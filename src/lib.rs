pub mod audio;
pub mod client;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod http;
pub mod keepalive;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod upstream;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioOutput,
    AudioSource, PlaybackScheduler, SharedGain, VadConfig, VadEncoder, WavFileOutput,
};
pub use client::{CallOptions, CallSession, CallSnapshot};
pub use config::Config;
pub use dialogue::{Dialogue, DialogueConfig, Phase};
pub use error::{CallError, ConfigError, RelayError};
pub use http::{create_router, AppState};
pub use keepalive::KeepAlive;
pub use protocol::{ClientMessage, RelayFrame, UpstreamMessage};
pub use registry::Registry;
pub use session::{RelaySession, SessionConfig, SessionHandle, SessionState, SessionStats};
pub use upstream::{UpstreamConnector, UpstreamEndpoint, WebSocketConnector};
