use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::config::ConversationType;
use super::state::ConnectionState;

/// Who a transcript line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Avatar,
    System,
}

/// A single line of the call transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
    /// When this line was appended
    pub timestamp: DateTime<Utc>,
}

/// Returned when a session is torn down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub session_id: String,
    /// Seconds spent in an active call
    pub duration_seconds: u64,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: ConnectionState,
    pub room_name: Option<String>,
    pub conversation_type: ConversationType,
    pub is_connected: bool,
    pub is_speaking: bool,
    pub is_listening: bool,
    pub elapsed_seconds: u64,
    pub transcript_entries: usize,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set when the session ended because of an error
    pub error: Option<String>,
}
