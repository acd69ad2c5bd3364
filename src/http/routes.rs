use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/:session_id/disconnect",
            post(handlers::disconnect_session),
        )
        // Session queries
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/sessions/:session_id/transcript",
            get(handlers::get_session_transcript),
        )
        // In-call controls
        .route("/sessions/:session_id/text", post(handlers::send_text))
        .route("/sessions/:session_id/interrupt", post(handlers::interrupt))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
