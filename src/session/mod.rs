//! Relay session management
//!
//! A `RelaySession` bridges one client WebSocket to one upstream model
//! connection:
//! - Dials upstream and buffers client frames until it is writable
//! - Sends the setup message and greeting hook, then flushes the buffer
//! - Forwards client frames verbatim and reshapes upstream replies
//! - Tears both sides down together
//!
//! The `SessionHandle` is the shared, observable half used by the HTTP
//! API, the registry and the keep-alive task.

mod config;
mod queue;
mod session;
mod stats;

pub use config::{SessionConfig, SessionHooks};
pub use queue::PendingQueue;
pub use session::{Outbound, RelaySession, SessionHandle, OUTBOUND_BUFFER_SIZE};
pub use stats::{SessionState, SessionStats};
