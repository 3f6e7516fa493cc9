// Integration tests for the HTTP API: status endpoints and telephony webhooks

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::MemoryConnector;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use voice_relay::session::SessionConfig;
use voice_relay::{create_router, AppState};

fn app() -> Router {
    let (connector, _peers) = MemoryConnector::new();
    create_router(AppState::new(SessionConfig::default(), Arc::new(connector)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_banner_without_upgrade() {
    let app = app();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("is running"));
}

#[tokio::test]
async fn test_health_reports_counts() {
    let app = app();
    let (status, body) = get_json(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["calls"], 0);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = app();

    let (status, sessions) = get_json(&app, "/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions, json!([]));

    let (status, body) = get_json(&app, "/sessions/nope/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Session nope not found");

    let (status, _) = get_json(&app, "/sessions/nope/transcript").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("DELETE")
        .uri("/sessions/nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_call_webhooks_drive_dialogue() {
    let app = app();

    let (status, body) = post_json(
        &app,
        "/calls/incoming",
        json!({"CallSid": "CA1", "From": "+34600000000", "To": "+34910000000"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["callSid"], "CA1");
    assert_eq!(body["phase"], "greeting");
    assert!(body["message"].as_str().unwrap().starts_with("Hola, has llamado"));

    let (status, _) = post_json(&app, "/calls/incoming", json!({"callSid": "CA1"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let steps = [
        ("Buenos días", "identification"),
        ("Es la primera vez", "qualification"),
        ("Quiero una limpieza", "scheduling"),
        ("La opción 1", "confirmation"),
        ("Sí", "farewell"),
    ];
    for (utterance, phase) in steps {
        let (status, body) = post_json(
            &app,
            "/calls/transcript",
            json!({"callSid": "CA1", "transcript": utterance, "confidence": 0.93}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], phase, "after {:?}", utterance);
    }

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["calls"], 1);

    let (status, body) = post_json(
        &app,
        "/calls/status",
        json!({"callSid": "CA1", "callStatus": "in-progress"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);

    let (status, body) = post_json(
        &app,
        "/calls/status",
        json!({"CallSid": "CA1", "CallStatus": "completed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);

    let (status, _) = post_json(
        &app,
        "/calls/transcript",
        json!({"callSid": "CA1", "transcript": "hola"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_for_unknown_call_is_not_found() {
    let app = app();
    let (status, body) = post_json(
        &app,
        "/calls/status",
        json!({"callSid": "missing", "callStatus": "completed"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Call missing not found");
}

#[tokio::test]
async fn test_webhooks_answer_twiml_when_xml_is_accepted() {
    let app = app();

    let request = Request::builder()
        .method("POST")
        .uri("/calls/incoming")
        .header("content-type", "application/json")
        .header("accept", "text/xml")
        .body(Body::from(json!({"CallSid": "CA9"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/xml; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let twiml = String::from_utf8(body.to_vec()).unwrap();
    assert!(twiml.starts_with("<?xml"));
    assert!(twiml.contains("<Response><Say language=\"es-ES\">Hola, has llamado"));
    assert!(twiml.ends_with("</Say></Response>"));

    // Without an XML preference the same call answers in JSON
    let (status, body) = post_json(
        &app,
        "/calls/transcript",
        json!({"callSid": "CA9", "transcript": "Buenos días"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "identification");
}
