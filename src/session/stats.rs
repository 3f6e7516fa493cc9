use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of a session, shared by the relay and the call client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Upstream dial issued
    Connecting,
    /// Upstream handshake completed, setup not yet sent
    Ready,
    /// Setup sent, frames flow both ways
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Statistics about a relay session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub state: SessionState,

    /// When the client connected
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Frames received from the client
    pub frames_from_client: usize,

    /// Frames written to upstream, setup and greeting included
    pub frames_to_upstream: usize,

    /// Frames delivered to the client
    pub frames_to_client: usize,

    /// Client frames held while upstream is not writable
    pub pending_frames: usize,

    /// Frames dropped as malformed or on queue overflow
    pub dropped_frames: usize,

    /// Characters of assistant text relayed so far
    pub transcript_chars: usize,
}
