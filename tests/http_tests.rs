// Integration tests for the HTTP control API

mod common;

use anyhow::Result;
use avatar_call::config::{Endpoints, SessionSettings};
use avatar_call::http::{create_router, AppState, SessionFactory};
use avatar_call::room::{LoopbackRemote, LoopbackRoom};
use avatar_call::session::{SessionComponents, SessionConfig};
use avatar_call::speech::LoopbackRecognizer;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Builds loopback sessions and keeps their remote handles
#[derive(Default)]
struct LoopbackFactory {
    remotes: Mutex<Vec<LoopbackRemote>>,
    endpoints: Mutex<Vec<Endpoints>>,
    refuse_connections: bool,
}

impl LoopbackFactory {
    fn last_remote(&self) -> LoopbackRemote {
        self.remotes.lock().unwrap().last().cloned().unwrap()
    }
}

impl SessionFactory for LoopbackFactory {
    fn components(&self, _config: &SessionConfig, endpoints: &Endpoints) -> Result<SessionComponents> {
        self.endpoints.lock().unwrap().push(endpoints.clone());
        let (room, remote) = LoopbackRoom::new(LOCAL_IDENTITY);
        if self.refuse_connections {
            remote.fail_next_connect("no route to media server");
        }
        self.remotes.lock().unwrap().push(remote);

        let (recognizer, recognition_events, _speech) = LoopbackRecognizer::new();
        Ok(SessionComponents {
            transport: Box::new(room),
            recognizer: Box::new(recognizer),
            recognition_events,
            decoder: Arc::new(MillisDecoder),
            audio_output: Arc::new(RecordingSink::default()),
            track_audio_output: None,
        })
    }
}

fn app(factory: Arc<LoopbackFactory>) -> Router {
    let endpoints = Endpoints {
        media_url: "wss://media.example.com".to_string(),
        api_url: "https://api.example.com".to_string(),
    };
    create_router(AppState::new(factory, SessionSettings::default(), endpoints))
}

fn create_body(token: &str) -> Value {
    json!({
        "credentials": {
            "token": token,
            "wsUrl": "wss://media.example.com",
            "roomName": "room-1",
            "metadata": { "avatarId": "av-1" }
        },
        "conversation_type": "voice"
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let app = app(Arc::new(LoopbackFactory::default()));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_session_lifecycle() {
    let factory = Arc::new(LoopbackFactory::default());
    let app = app(factory.clone());

    let (status, body) = send(&app, "POST", "/sessions", Some(create_body(TOKEN))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"]["state"], "waiting_for_agent");
    assert_eq!(body["status"]["metadata"]["avatarId"], "av-1");
    let session_id = body["session_id"].as_str().unwrap().to_string();

    assert_eq!(
        factory.endpoints.lock().unwrap()[0].media_url,
        "wss://media.example.com"
    );

    let remote = factory.last_remote();
    remote.join(AGENT);
    settle().await;

    let (status, body) = send(&app, "GET", &format!("/sessions/{}/status", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");
    assert_eq!(body["is_connected"], true);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/sessions/{}/text", session_id),
        Some(json!({ "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(&app, "POST", &format!("/sessions/{}/interrupt", session_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/sessions/{}/transcript", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let roles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, ["system", "user"]);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/disconnect", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["duration_seconds"], 2);
    assert_eq!(remote.disconnect_count(), 1);

    let (status, _) = send(&app, "GET", &format!("/sessions/{}/status", session_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_credentials_are_rejected() {
    let app = app(Arc::new(LoopbackFactory::default()));

    let (status, body) = send(&app, "POST", "/sessions", Some(create_body("abc"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "credential_error");
}

#[tokio::test]
async fn test_unreachable_media_server() {
    let factory = Arc::new(LoopbackFactory {
        refuse_connections: true,
        ..LoopbackFactory::default()
    });
    let app = app(factory);

    let (status, body) = send(&app, "POST", "/sessions", Some(create_body(TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "connection_error");
}

#[tokio::test]
async fn test_unknown_session() {
    let app = app(Arc::new(LoopbackFactory::default()));

    let (status, body) = send(&app, "GET", "/sessions/call-missing/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("call-missing"));

    let (status, _) = send(&app, "POST", "/sessions/call-missing/disconnect", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_text_before_agent_is_accepted_but_after_end_conflicts() {
    let factory = Arc::new(LoopbackFactory::default());
    let app = app(factory.clone());

    let (_, body) = send(&app, "POST", "/sessions", Some(create_body(TOKEN))).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/sessions/{}/text", session_id),
        Some(json!({ "text": "are you there?" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    factory.last_remote().close(Some("server shutdown"));
    settle().await;

    let (status, body) = send(&app, "GET", &format!("/sessions/{}/status", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "disconnected");
    assert!(body["error"].as_str().unwrap().contains("server shutdown"));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/text", session_id),
        Some(json!({ "text": "hello?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "connection_error");
}

#[tokio::test]
async fn test_state_from_sample_config() {
    let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("avatar-call.toml");
    let cfg = avatar_call::config::Config::load(path.to_str().unwrap()).unwrap();

    let state = AppState::from_config(Arc::new(LoopbackFactory::default()), &cfg);
    assert_eq!(state.endpoints.media_url, cfg.media.server_url);
    assert_eq!(state.endpoints.api_url, cfg.api.base_url);
    assert_eq!(state.settings.language.as_deref(), Some("en-US"));
}
