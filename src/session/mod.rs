//! Call session management
//!
//! This module provides the `CallSession` abstraction that manages:
//! - The room connection and its lifecycle state machine
//! - Participant and track bookkeeping
//! - Synthesized-speech playback and local speech capture
//! - The call timer and transcript

mod config;
mod credentials;
mod events;
mod session;
mod state;
mod stats;
mod timer;
mod transcript;

pub use config::{ConversationType, SessionConfig};
pub use credentials::{SessionCredentials, SessionMetadata};
pub use events::SessionEvent;
pub use session::{CallSession, SessionComponents};
pub use state::{ConnectionState, InvalidTransition, StateMachine};
pub use stats::{CallSummary, SessionStatus, TranscriptEntry, TranscriptRole};
pub use timer::CallTimer;
pub use transcript::TranscriptLog;
