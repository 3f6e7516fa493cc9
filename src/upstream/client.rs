use futures::future;
use futures::stream::{BoxStream, StreamExt};
use futures::{Sink, SinkExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{ConfigError, RelayError};

/// Placeholder printed wherever the upstream credential would appear
pub const REDACTED: &str = "***REDACTED***";

/// Write half of an upstream connection, one JSON text frame per item
pub type UpstreamSink = Pin<Box<dyn Sink<String, Error = RelayError> + Send>>;

/// Read half of an upstream connection; ends when upstream closes
pub type UpstreamStream = BoxStream<'static, Result<String, RelayError>>;

/// An open upstream connection
pub struct UpstreamLink {
    pub sink: UpstreamSink,
    pub stream: UpstreamStream,
}

/// Dials the speech model provider, one connection per session
#[async_trait::async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> Result<UpstreamLink, RelayError>;

    /// Credential-free description for logs
    fn describe(&self) -> String;
}

/// Provider URL with the credential embedded as the `key` query parameter
#[derive(Clone)]
pub struct UpstreamEndpoint {
    url: Url,
    redacted: String,
}

impl UpstreamEndpoint {
    pub fn from_config(cfg: &UpstreamConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let base = cfg.endpoint.replace("{model}", &cfg.model);
        let mut url = Url::parse(&base).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unsupported scheme '{}', expected ws or wss",
                    other
                )))
            }
        }

        let mut redacted_url = url.clone();
        url.query_pairs_mut().append_pair("key", &cfg.api_key);
        redacted_url.query_pairs_mut().append_pair("key", REDACTED);

        Ok(Self {
            url,
            redacted: redacted_url.to_string(),
        })
    }

    /// Full URL including the credential; never log this
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl std::fmt::Debug for UpstreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UpstreamEndpoint").field(&self.redacted).finish()
    }
}

/// Connects over WebSocket (TLS for `wss`)
pub struct WebSocketConnector {
    endpoint: UpstreamEndpoint,
}

impl WebSocketConnector {
    pub fn new(endpoint: UpstreamEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self) -> Result<UpstreamLink, RelayError> {
        info!("Connecting to upstream: {}", self.endpoint.redacted());

        let (ws_stream, _) = connect_async(self.endpoint.url().as_str()).await?;

        info!("Connected to upstream");

        let (ws_sink, ws_source) = ws_stream.split();

        let sink = ws_sink
            .with(|text: String| future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text))))
            .sink_map_err(RelayError::from);

        let stream = ws_source
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    // The provider sends JSON in binary frames as well
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Some(Ok(text)),
                        Err(e) => {
                            warn!("Dropping non-UTF-8 upstream frame: {}", e);
                            None
                        }
                    },
                    Ok(_) => None,
                    Err(e) => Some(Err(RelayError::from(e))),
                }
            })
            .boxed();

        Ok(UpstreamLink {
            sink: Box::pin(sink),
            stream,
        })
    }

    fn describe(&self) -> String {
        self.endpoint.redacted().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_config(key: &str) -> UpstreamConfig {
        UpstreamConfig {
            api_key: key.to_string(),
            ..UpstreamConfig::default()
        }
    }

    #[test]
    fn test_endpoint_embeds_model_and_key() {
        let endpoint = UpstreamEndpoint::from_config(&upstream_config("abc123")).unwrap();
        let url = endpoint.url().as_str();
        assert!(url.contains("models/gemini-1.5-flash:bidiConnect"));
        assert!(url.ends_with("key=abc123"));
    }

    #[test]
    fn test_redacted_endpoint_hides_key() {
        let endpoint = UpstreamEndpoint::from_config(&upstream_config("abc123")).unwrap();
        assert!(!endpoint.redacted().contains("abc123"));
        assert!(endpoint.redacted().contains("key=***REDACTED***"));
        assert!(!format!("{:?}", endpoint).contains("abc123"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let result = UpstreamEndpoint::from_config(&upstream_config(""));
        assert!(matches!(result, Err(ConfigError::MissingCredential)));
    }

    #[test]
    fn test_http_scheme_rejected() {
        let mut cfg = upstream_config("k");
        cfg.endpoint = "https://example.com/live".into();
        let result = UpstreamEndpoint::from_config(&cfg);
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_describe_is_redacted() {
        let endpoint = UpstreamEndpoint::from_config(&upstream_config("abc123")).unwrap();
        let connector = WebSocketConnector::new(endpoint);
        assert!(!connector.describe().contains("abc123"));
    }
}
