//! Connection to the upstream speech-to-speech model

pub mod client;

pub use client::{
    UpstreamConnector, UpstreamEndpoint, UpstreamLink, UpstreamSink, UpstreamStream,
    WebSocketConnector, REDACTED,
};
