use super::handlers;
use super::state::AppState;
use super::ws;
use axum::{
    http::Method,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        // Banner, or the relay when the request is a WebSocket upgrade
        .route("/", get(ws::root_handler))
        .route("/health", get(handlers::health_check))
        // Relay
        .route("/ws", get(ws::ws_relay_handler))
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/:session_id",
            delete(handlers::stop_session),
        )
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/sessions/:session_id/transcript",
            get(handlers::get_session_transcript),
        )
        // Telephony webhooks
        .route("/calls/incoming", post(handlers::incoming_call))
        .route("/calls/status", post(handlers::call_status))
        .route("/calls/transcript", post(handlers::call_transcript))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
