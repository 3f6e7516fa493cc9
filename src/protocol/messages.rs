use serde::{Deserialize, Serialize};

/// MIME type of utterances produced by the capture encoder
pub const PCM_MIME_TYPE: &str = "audio/pcm";

// ============================================================================
// Client -> relay -> upstream
// ============================================================================

/// Frames a client may send; the relay forwards them verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<Part>,
}

/// One part of a turn: text, inline media, or neither (unknown content)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// A single base64 PCM utterance
    pub fn audio(data: String) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: PCM_MIME_TYPE.to_string(),
                data,
            }],
        })
    }

    /// A complete user text turn
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: vec![Part {
                    text: Some(text.into()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }
}

// ============================================================================
// Relay -> upstream session setup
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

/// Functions the model may call; declared in setup, executed by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(alias = "function_declarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// OpenAPI-style schema of the arguments
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

impl SetupMessage {
    pub fn new(model: &str, voice_name: &str, instruction: &str) -> Self {
        Self {
            setup: Setup {
                model: format!("models/{}", model),
                generation_config: GenerationConfig {
                    response_modalities: vec![ResponseModality::Audio, ResponseModality::Text],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    },
                },
                system_instruction: SystemInstruction {
                    parts: vec![Part {
                        text: Some(instruction.to_string()),
                        inline_data: None,
                    }],
                },
                tools: Vec::new(),
            },
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.setup.tools = tools;
        self
    }
}

// ============================================================================
// Upstream -> relay
// ============================================================================

/// Upstream envelope; fields the relay does not understand are ignored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMessage {
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl UpstreamMessage {
    /// Translate into the frames the client understands, in part order.
    ///
    /// Parts that are neither text nor `audio/*` inline data are dropped, and
    /// an envelope without recognised content yields no frames at all.
    pub fn into_relay_frames(self) -> Vec<RelayFrame> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    frames.push(RelayFrame::Text(text));
                }
                if let Some(inline) = part.inline_data {
                    if inline.mime_type.starts_with("audio/") {
                        frames.push(RelayFrame::AudioChunk(inline.data));
                    }
                }
            }
        }
        if content.interrupted {
            frames.push(RelayFrame::Control(ControlSignal::Interrupted));
        }
        if content.turn_complete {
            frames.push(RelayFrame::Control(ControlSignal::TurnComplete));
        }
        frames
    }
}

// ============================================================================
// Relay -> client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayFrame {
    /// `{"text": "..."}`
    Text(String),
    /// `{"audioChunk": "<base64 pcm>"}`
    AudioChunk(String),
    /// `{"error": "..."}`, always the last frame of a session
    Error(String),
    /// `{"control": "turnComplete"}`
    Control(ControlSignal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlSignal {
    TurnComplete,
    Interrupted,
}
