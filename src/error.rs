//! Error taxonomy for the relay and the call client.
//!
//! Every variant is terminal for the session it occurs in, except
//! [`RelayError::Decode`], which only costs the offending frame.

use thiserror::Error;

/// Missing or unusable configuration, detected before any connection attempt
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("upstream endpoint is not configured")]
    MissingEndpoint,

    #[error("upstream credential is not configured")]
    MissingCredential,

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Upstream answered the WebSocket upgrade with a non-101 status
    #[error("Upstream Handshake Failed: {status} - {body}")]
    Handshake { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A rejected upgrade becomes [`RelayError::Handshake`] carrying the response body.
///
/// tungstenite hands back only the body bytes that arrived with the response
/// head; a body split across later TCP segments is cut short there. Providers
/// answer rejections with short JSON, so no second read is attempted.
impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response) => {
                let status = response.status().as_u16();
                let body = response
                    .body()
                    .as_deref()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                RelayError::Handshake { status, body }
            }
            other => RelayError::Transport(other.to_string()),
        }
    }
}

/// Local precondition failures of the call control surface
#[derive(Debug, Error)]
pub enum CallError {
    #[error("a call is already active")]
    AlreadyActive,

    #[error("no active call")]
    NotActive,

    #[error("previous call is still being torn down")]
    CleaningUp,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("audio device unavailable: {0}")]
    Device(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("volume must be a finite number, got {0}")]
    InvalidVolume(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_message_carries_status_and_body() {
        let err = RelayError::Handshake {
            status: 403,
            body: "quota exceeded".into(),
        };
        assert_eq!(err.to_string(), "Upstream Handshake Failed: 403 - quota exceeded");
    }

    #[test]
    fn test_http_error_converts_to_handshake() {
        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(403)
            .body(Some(b"quota exceeded".to_vec()))
            .unwrap();
        let err: RelayError = tokio_tungstenite::tungstenite::Error::Http(response).into();
        match err {
            RelayError::Handshake { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("expected handshake error, got {other:?}"),
        }
    }

    #[test]
    fn test_http_error_without_body_has_empty_message_tail() {
        let response = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();
        let err: RelayError = tokio_tungstenite::tungstenite::Error::Http(response).into();
        assert_eq!(err.to_string(), "Upstream Handshake Failed: 401 - ");
    }
}
