use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SessionSettings;
use crate::room::{IdentityRules, RetryPolicy};

/// Kind of conversation held with the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    #[default]
    Voice,
    Video,
}

/// Configuration for a call session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "call-6f1c...")
    pub session_id: String,

    pub conversation_type: ConversationType,

    /// Recognition language started once the agent joins; `None` leaves
    /// capture to the caller
    pub language: Option<String>,

    /// How long to wait for a remote agent after connecting
    /// Default: 30 seconds
    pub agent_join_timeout: Duration,

    /// Pacing of track attachment retries
    pub attach_retry: RetryPolicy,

    pub identity_rules: IdentityRules,

    /// Prefix every signaling token must start with (JWT header)
    pub token_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("call-{}", uuid::Uuid::new_v4()),
            conversation_type: ConversationType::Voice,
            language: None,
            agent_join_timeout: Duration::from_secs(30),
            attach_retry: RetryPolicy::default(),
            identity_rules: IdentityRules::default(),
            token_prefix: "eyJ".to_string(),
        }
    }
}

impl SessionConfig {
    /// Build a session configuration from loaded settings
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            language: settings.language.clone(),
            agent_join_timeout: Duration::from_secs(settings.agent_join_timeout_secs),
            attach_retry: RetryPolicy {
                interval: Duration::from_millis(settings.attach_retry_interval_ms),
                max_attempts: settings.attach_max_retries,
            },
            identity_rules: IdentityRules {
                agent_patterns: settings.agent_identity_patterns.clone(),
                video_agent_patterns: settings.video_agent_identity_patterns.clone(),
            },
            token_prefix: settings.token_prefix.clone(),
            ..Self::default()
        }
    }
}
