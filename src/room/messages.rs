use serde::{Deserialize, Serialize};

/// Speaker of a transcript line sent by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSpeaker {
    User,
    Assistant,
}

/// Data-channel envelope received from the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Transcript { role: TranscriptSpeaker, text: String },
}

/// Data-channel envelope sent to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Final speech-recognition result
    UserText { text: String },
    /// Typed chat message
    Text { text: String },
    /// Ask the agent to stop the current utterance
    StopSpeaking,
    /// The user is leaving the call
    EndCall,
}

impl ClientMessage {
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
