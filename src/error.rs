use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a call session
///
/// Credential, connection and agent-join failures end the session.
/// Everything else is recovered locally and reported as a warning while
/// the call continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Credentials were missing a field or the token had the wrong shape
    #[error("invalid session credentials: {0}")]
    Credential(String),

    /// The media room could not be reached or dropped the connection
    #[error("media room connection failed: {0}")]
    Connection(String),

    /// No remote agent joined the room in time
    #[error("no agent joined the room within {}s", .0.as_secs())]
    AgentJoinTimeout(Duration),

    /// A track could not be attached to its sink
    #[error("track {track_sid} could not be attached after {attempts} attempts")]
    TrackAttachment { track_sid: String, attempts: u32 },

    /// A synthesized-speech chunk could not be decoded
    #[error("failed to decode audio chunk: {0}")]
    AudioDecode(String),

    /// The platform has no speech recognition capability
    #[error("speech recognition is not supported on this platform")]
    RecognitionUnsupported,

    /// Speech recognition failed while running
    #[error("speech recognition failed: {0}")]
    RecognitionRuntime(String),
}

impl SessionError {
    /// Whether this error ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::Credential(_)
                | SessionError::Connection(_)
                | SessionError::AgentJoinTimeout(_)
        )
    }

    /// Stable name for API responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Credential(_) => "credential_error",
            SessionError::Connection(_) => "connection_error",
            SessionError::AgentJoinTimeout(_) => "agent_join_timeout",
            SessionError::TrackAttachment { .. } => "track_attachment_error",
            SessionError::AudioDecode(_) => "audio_decode_error",
            SessionError::RecognitionUnsupported => "recognition_unsupported",
            SessionError::RecognitionRuntime(_) => "recognition_runtime_error",
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors() {
        assert!(SessionError::Credential("empty token".into()).is_terminal());
        assert!(SessionError::Connection("refused".into()).is_terminal());
        assert!(SessionError::AgentJoinTimeout(Duration::from_secs(30)).is_terminal());
    }

    #[test]
    fn test_recoverable_errors() {
        let recoverable = [
            SessionError::TrackAttachment {
                track_sid: "TR_1".into(),
                attempts: 10,
            },
            SessionError::AudioDecode("bad header".into()),
            SessionError::RecognitionUnsupported,
            SessionError::RecognitionRuntime("network".into()),
        ];

        for err in recoverable {
            assert!(!err.is_terminal(), "{} should be recoverable", err.kind());
        }
    }

    #[test]
    fn test_timeout_message() {
        let err = SessionError::AgentJoinTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "no agent joined the room within 30s");
    }
}
