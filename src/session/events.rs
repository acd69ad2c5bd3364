use super::state::ConnectionState;
use super::stats::{CallSummary, TranscriptEntry};
use crate::error::SessionError;
use crate::room::ParticipantRole;

/// Events broadcast by a call session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    ParticipantJoined {
        identity: String,
        role: ParticipantRole,
    },
    ParticipantLeft {
        identity: String,
    },
    TranscriptAppended(TranscriptEntry),
    /// The avatar started or stopped speaking
    SpeakingChanged(bool),
    /// A recoverable error; the call continues
    Warning(SessionError),
    /// The session reached `Disconnected`
    Ended {
        summary: CallSummary,
        error: Option<SessionError>,
    },
}
