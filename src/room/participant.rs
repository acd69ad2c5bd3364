use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Role of a room participant, derived from its identity string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    LocalUser,
    RemoteAgent,
    Unknown,
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
}

/// A track as announced by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Server-assigned track id
    pub sid: String,
    pub kind: TrackKind,
    /// Identity of the participant publishing this track
    pub publisher_identity: String,
}

impl TrackInfo {
    pub fn new(sid: impl Into<String>, kind: TrackKind, publisher_identity: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            kind,
            publisher_identity: publisher_identity.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackRecord {
    pub info: TrackInfo,
    pub subscription: SubscriptionState,
    /// Whether the track is currently attached to a sink
    pub attached: bool,
}

/// A participant known to the registry
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub identity: String,
    pub role: ParticipantRole,
    pub tracks: HashMap<String, TrackRecord>,
}

impl Participant {
    pub fn new(identity: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            identity: identity.into(),
            role,
            tracks: HashMap::new(),
        }
    }

    pub fn has_subscribed(&self, kind: TrackKind) -> bool {
        self.tracks
            .values()
            .any(|t| t.info.kind == kind && t.subscription == SubscriptionState::Subscribed)
    }
}

/// Identity patterns used to classify participants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRules {
    /// Substrings (case-insensitive) marking a remote agent
    pub agent_patterns: Vec<String>,
    /// Substrings (case-insensitive) marking an agent that publishes avatar video
    pub video_agent_patterns: Vec<String>,
}

impl Default for IdentityRules {
    fn default() -> Self {
        Self {
            agent_patterns: vec!["agent".to_string()],
            video_agent_patterns: vec!["avatar".to_string(), "video".to_string()],
        }
    }
}

impl IdentityRules {
    pub fn classify(&self, identity: &str, local_identity: Option<&str>) -> ParticipantRole {
        if local_identity == Some(identity) {
            return ParticipantRole::LocalUser;
        }

        if matches_any(identity, &self.agent_patterns) || self.is_video_agent(identity) {
            ParticipantRole::RemoteAgent
        } else {
            ParticipantRole::Unknown
        }
    }

    pub fn is_video_agent(&self, identity: &str) -> bool {
        matches_any(identity, &self.video_agent_patterns)
    }
}

fn matches_any(identity: &str, patterns: &[String]) -> bool {
    let identity = identity.to_lowercase();
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| identity.contains(&p.to_lowercase()))
}

/// A local rendering target tracks can be attached to
pub trait TrackSink: Send + Sync {
    /// Attach the track; an error means the sink is not ready yet
    fn attach(&self, track: &TrackInfo) -> Result<()>;

    fn detach(&self, track_sid: &str);
}

/// Mount point for a sink that may appear after its track arrives
///
/// The slot only holds a weak reference; the UI owns the sink.
#[derive(Clone, Default)]
pub struct SinkSlot {
    sink: Arc<Mutex<Option<Weak<dyn TrackSink>>>>,
}

impl SinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&self, sink: &Arc<dyn TrackSink>) {
        *self.lock() = Some(Arc::downgrade(sink));
    }

    pub fn unmount(&self) {
        *self.lock() = None;
    }

    /// The mounted sink, if it is still alive
    pub fn get(&self) -> Option<Arc<dyn TrackSink>> {
        self.lock().as_ref().and_then(Weak::upgrade)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Weak<dyn TrackSink>>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
