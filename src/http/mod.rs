//! HTTP API for driving call sessions from a UI process
//!
//! - POST /sessions - Create a session and join its room
//! - POST /sessions/:id/disconnect - End a call
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/:id/transcript - Get the transcript so far
//! - POST /sessions/:id/text - Send a typed message
//! - POST /sessions/:id/interrupt - Stop the avatar speaking
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{CreateSessionRequest, CreateSessionResponse, DisconnectResponse, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, SessionFactory};
