use super::state::AppState;
use crate::error::SessionError;
use crate::session::{
    CallSession, CallSummary, ConversationType, SessionConfig, SessionCredentials, SessionStatus,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub credentials: SessionCredentials,

    /// Defaults to a voice conversation
    pub conversation_type: Option<ConversationType>,

    /// Recognition language; falls back to the configured one
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub session_id: String,
    pub summary: CallSummary,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Error kind, e.g. "credential_error"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error, kind: None })).into_response()
}

fn session_error_response(status: StatusCode, err: &SessionError) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: Some(err.kind().to_string()),
        }),
    )
        .into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a session and join its room
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let mut config = SessionConfig::from_settings(&state.settings);
    if let Some(conversation_type) = req.conversation_type {
        config.conversation_type = conversation_type;
    }
    if req.language.is_some() {
        config.language = req.language;
    }
    let session_id = config.session_id.clone();

    info!(
        "Creating session {} for room {}",
        session_id, req.credentials.room_name
    );

    let components = match state.factory.components(&config, &state.endpoints) {
        Ok(components) => components,
        Err(e) => {
            error!("Failed to build session components: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create session: {}", e),
            );
        }
    };

    let session = Arc::new(CallSession::new(config, components));

    if let Err(e) = session.connect(req.credentials).await {
        warn!("Session {} failed to connect: {}", session_id, e);
        let status = match e {
            SessionError::Credential(_) => StatusCode::BAD_REQUEST,
            SessionError::Connection(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return session_error_response(status, &e);
    }

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), Arc::clone(&session));
    }

    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            status: session.status(),
        }),
    )
        .into_response()
}

/// POST /sessions/:session_id/disconnect
/// End a call and forget the session
pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match session {
        Some(session) => {
            let summary = session.disconnect().await;
            info!(
                "Session {} disconnected after {}s",
                session_id, summary.duration_seconds
            );
            (
                StatusCode::OK,
                Json(DisconnectResponse {
                    session_id,
                    summary,
                }),
            )
                .into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.session(&session_id).await {
        Some(session) => (StatusCode::OK, Json(session.status())).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/transcript
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.session(&session_id).await {
        Some(session) => (StatusCode::OK, Json(session.transcript())).into_response(),
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/text
/// Send a typed message to the agent
pub async fn send_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> impl IntoResponse {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    match session.send_text(&req.text) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => session_error_response(StatusCode::CONFLICT, &e),
    }
}

/// POST /sessions/:session_id/interrupt
/// Stop the avatar mid-sentence
pub async fn interrupt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.session(&session_id).await {
        Some(session) => {
            session.interrupt();
            StatusCode::ACCEPTED.into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
