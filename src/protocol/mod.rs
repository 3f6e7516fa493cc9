//! JSON wire frames exchanged between client, relay and upstream model

pub mod messages;

pub use messages::{
    ClientContent, ClientMessage, ControlSignal, FunctionDeclaration, InlineData, MediaChunk, Part,
    RealtimeInput, RelayFrame, SetupMessage, Tool, Turn, UpstreamMessage, PCM_MIME_TYPE,
};
