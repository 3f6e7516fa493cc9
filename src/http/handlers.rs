use super::state::AppState;
use crate::dialogue::{Dialogue, Phase, Reply};
use crate::session::SessionStats;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub sessions: usize,
    pub calls: usize,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: String,
}

/// Telephony provider webhook bodies accept both camelCase and the
/// provider's PascalCase field names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallRequest {
    #[serde(alias = "CallSid")]
    pub call_sid: String,
    #[serde(default, alias = "From")]
    pub from: String,
    #[serde(default, alias = "To")]
    pub to: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReplyResponse {
    pub call_sid: String,
    pub message: String,
    pub phase: Phase,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatusRequest {
    #[serde(alias = "CallSid")]
    pub call_sid: String,
    #[serde(alias = "CallStatus")]
    pub call_status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatusResponse {
    pub call_sid: String,
    pub call_status: String,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTranscriptRequest {
    #[serde(alias = "CallSid")]
    pub call_sid: String,
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ============================================================================
// Service
// ============================================================================

/// GET /
pub async fn banner() -> impl IntoResponse {
    (
        StatusCode::OK,
        format!("Voice relay v{} is running", env!("CARGO_PKG_VERSION")),
    )
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            timestamp: Utc::now().to_rfc3339(),
            sessions: state.sessions.len().await,
            calls: state.calls.len().await,
        }),
    )
}

// ============================================================================
// Relay sessions
// ============================================================================

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let mut stats: Vec<SessionStats> = Vec::new();
    for handle in state.sessions.values().await {
        stats.push(handle.stats().await);
    }
    stats.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    (StatusCode::OK, Json(stats))
}

/// GET /sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get(&session_id).await {
        Some(handle) => (StatusCode::OK, Json(handle.stats().await)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /sessions/:session_id/transcript
/// Assistant text relayed so far
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get(&session_id).await {
        Some(handle) => (
            StatusCode::OK,
            Json(TranscriptResponse {
                session_id,
                transcript: handle.transcript().await,
            }),
        )
            .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// DELETE /sessions/:session_id
/// Tear a relay session down; both transports are closed.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get(&session_id).await {
        Some(handle) => {
            info!("Stopping session {} on request", session_id);
            handle.stop();
            (
                StatusCode::ACCEPTED,
                Json(StopSessionResponse {
                    session_id,
                    status: "closing".to_string(),
                }),
            )
                .into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

// ============================================================================
// Telephony webhooks
// ============================================================================

/// POST /calls/incoming
/// Open a scripted dialogue for a new call and return its greeting
pub async fn incoming_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IncomingCallRequest>,
) -> Response {
    let dialogue = Dialogue::new(
        req.call_sid.clone(),
        req.from,
        req.to,
        Arc::clone(&state.dialogue_config),
        Arc::clone(&state.slots),
    );
    let greeting = dialogue.greeting().to_string();
    let phase = dialogue.phase();

    if !state
        .calls
        .insert(req.call_sid.clone(), Arc::new(Mutex::new(dialogue)))
        .await
    {
        warn!("Call {} is already in progress", req.call_sid);
        return error_response(
            StatusCode::CONFLICT,
            format!("Call {} is already in progress", req.call_sid),
        );
    }

    info!("New call session created: {}", req.call_sid);

    call_reply(
        &headers,
        CallReplyResponse {
            call_sid: req.call_sid,
            message: greeting,
            phase,
        },
    )
}

/// POST /calls/status
/// Drops the dialogue once the provider reports the call `completed`
pub async fn call_status(
    State(state): State<AppState>,
    Json(req): Json<CallStatusRequest>,
) -> Response {
    if !state.calls.contains(&req.call_sid).await {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Call {} not found", req.call_sid),
        );
    }

    info!("Call {} status updated to: {}", req.call_sid, req.call_status);

    let active = if req.call_status == "completed" {
        state.calls.remove(&req.call_sid).await;
        info!("Call {} completed and cleaned up", req.call_sid);
        false
    } else {
        true
    };

    (
        StatusCode::OK,
        Json(CallStatusResponse {
            call_sid: req.call_sid,
            call_status: req.call_status,
            active,
        }),
    )
        .into_response()
}

/// POST /calls/transcript
/// Feed one recognised caller utterance to the dialogue
pub async fn call_transcript(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CallTranscriptRequest>,
) -> Response {
    let Some(dialogue) = state.calls.get(&req.call_sid).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Call {} not found", req.call_sid),
        );
    };

    match req.confidence {
        Some(confidence) => info!(
            "Transcript for {}: \"{}\" (confidence: {:.2})",
            req.call_sid, req.transcript, confidence
        ),
        None => info!("Transcript for {}: \"{}\"", req.call_sid, req.transcript),
    }

    let Reply { message, phase } = dialogue.lock().await.respond(&req.transcript);

    call_reply(
        &headers,
        CallReplyResponse {
            call_sid: req.call_sid,
            message,
            phase,
        },
    )
}

/// JSON by default; TwiML for telephony providers that ask for XML
fn call_reply(headers: &HeaderMap, reply: CallReplyResponse) -> Response {
    let wants_xml = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("xml"));

    if !wants_xml {
        return (StatusCode::OK, Json(reply)).into_response();
    }

    let twiml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Say language=\"es-ES\">{}</Say></Response>",
        escape_xml(&reply.message)
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        twiml,
    )
        .into_response()
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
