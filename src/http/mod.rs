//! HTTP API server
//!
//! - GET / - Banner, or the relay on a WebSocket upgrade
//! - GET /health - Health check
//! - GET /ws - Relay WebSocket
//! - GET /sessions - Stats of every live relay session
//! - GET /sessions/:id/status - Stats of one session
//! - GET /sessions/:id/transcript - Assistant text relayed so far
//! - DELETE /sessions/:id - Tear a session down
//! - POST /calls/incoming, /calls/status, /calls/transcript - Telephony webhooks

mod handlers;
mod routes;
mod state;
mod ws;

pub use handlers::ErrorResponse;
pub use routes::create_router;
pub use state::AppState;
