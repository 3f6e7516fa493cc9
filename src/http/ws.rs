//! Client WebSocket endpoint: one relay session per connection

use super::handlers;
use super::state::AppState;
use crate::session::{Outbound, RelaySession, SessionHandle, OUTBOUND_BUFFER_SIZE};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// GET /ws
pub async fn ws_relay_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    debug!("WebSocket relay upgrade requested");
    ws.on_upgrade(move |socket| handle_relay_socket(socket, state))
}

/// GET /
/// Upgrades when asked to, otherwise answers with the service banner
pub async fn root_handler(ws: Option<WebSocketUpgrade>, State(state): State<AppState>) -> Response {
    match ws {
        Some(ws) => ws_relay_handler(ws, State(state)).await,
        None => handlers::banner().await.into_response(),
    }
}

async fn handle_relay_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER_SIZE);
    let handle = SessionHandle::new(outbound_tx);
    let session_id = handle.id().to_string();

    info!("Client connected, session {}", session_id);

    let writer = tokio::spawn(write_outbound(sender, outbound_rx, handle.terminated()));

    let acks = Arc::clone(&handle);
    let inbound = receiver
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(move |msg| {
            let handle = Arc::clone(&acks);
            async move {
                match msg {
                    Ok(Message::Text(text)) => Some(text),
                    Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok(),
                    Ok(Message::Pong(_)) => {
                        handle.mark_alive();
                        None
                    }
                    _ => None,
                }
            }
        })
        .boxed();

    state
        .sessions
        .insert(session_id.clone(), Arc::clone(&handle))
        .await;

    let session = RelaySession::new(
        (*state.session_config).clone(),
        Arc::clone(&state.connector),
        Arc::clone(&handle),
    );
    session.run(inbound).await;

    state.sessions.remove(&session_id).await;

    if let Err(e) = writer.await {
        error!("Session {}: writer task failed: {}", session_id, e);
    }

    info!("Client disconnected, session {}", session_id);
}

/// Serialises everything bound for the client onto the socket.
///
/// A terminated session abandons the socket immediately, even mid-write.
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    mut terminated: watch::Receiver<bool>,
) {
    let drain = async {
        while let Some(outbound) = rx.recv().await {
            let result = match outbound {
                Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => sender.send(Message::Text(json)).await,
                    Err(e) => {
                        error!("Failed to serialize relay frame: {}", e);
                        continue;
                    }
                },
                Outbound::Ping => sender.send(Message::Ping(Vec::new())).await,
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Client socket write failed: {}", e);
                break;
            }
        }
    };

    let abandoned = tokio::select! {
        _ = drain => false,
        _ = terminated.wait_for(|t| *t) => true,
    };

    if abandoned {
        debug!("Client socket dropped after termination");
        return;
    }
    let _ = sender.close().await;
}
