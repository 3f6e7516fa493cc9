use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dialogue::DialogueConfig;
use crate::error::ConfigError;
use crate::protocol::Tool;

/// Environment variables consulted for the upstream credential when the
/// config file and `VOICE_RELAY_UPSTREAM__API_KEY` leave it empty.
const CREDENTIAL_FALLBACK_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub audio: AudioConfig,
    pub client: ClientConfig,
    pub dialogue: DialogueConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-relay".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// WebSocket endpoint; `{model}` is substituted, the credential is appended as `key`
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice_name: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint:
                "wss://generativelanguage.googleapis.com/v1beta/models/{model}:bidiConnect"
                    .to_string(),
            api_key: String::new(),
            model: "gemini-1.5-flash".to_string(),
            voice_name: "Aoede".to_string(),
        }
    }
}

// Hand-written so the credential never reaches a log line.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &crate::upstream::REDACTED)
            .field("model", &self.model)
            .field("voice_name", &self.voice_name)
            .finish()
    }
}

/// What to do with a client frame when the pending queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room
    DropOldest,
    /// Drop the incoming frame
    RejectNew,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds between liveness probes of client connections
    pub keepalive_interval_secs: u64,

    /// Upper bound on frames held while upstream is not writable
    pub max_pending_frames: usize,

    pub overflow_policy: OverflowPolicy,

    /// Persona and language instruction sent in the setup message
    pub system_instruction: String,

    /// Text of the synthetic turn sent right after setup; empty disables it
    pub greeting_trigger: String,

    /// Function declarations sent in setup; none by default
    pub tools: Vec<Tool>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 30,
            max_pending_frames: 256,
            overflow_policy: OverflowPolicy::DropOldest,
            system_instruction: "Eres Riley, la recepcionista de 'Dental AI'. Hablas español. \
                Eres amable, breve y profesional. Tu objetivo es agendar citas."
                .to_string(),
            greeting_trigger: "Hola. Salúdame brevemente.".to_string(),
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per capture block
    pub block_size: usize,
    /// RMS energy above which a block counts as speech
    pub silence_threshold: f32,
    /// Silence needed to close an utterance
    pub silence_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            block_size: 4096,
            silence_threshold: 0.01,
            silence_duration_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay WebSocket URL the call client dials
    pub relay_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional file at `path` (any extension `config` understands)
    /// layered under `VOICE_RELAY_*` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICE_RELAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;
        if cfg.upstream.api_key.is_empty() {
            if let Some(key) = CREDENTIAL_FALLBACK_VARS
                .iter()
                .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            {
                cfg.upstream.api_key = key;
            }
        }

        Ok(cfg)
    }

    /// Fail fast on settings without which no session can reach `connecting`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream.validate()?;
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".into()));
        }
        if self.audio.block_size == 0 {
            return Err(ConfigError::Invalid("audio.block_size must be positive".into()));
        }
        if self.relay.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "relay.keepalive_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        Ok(())
    }
}
