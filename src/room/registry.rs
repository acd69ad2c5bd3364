//! Participant and track registry
//!
//! Classifies participants as they join, records their tracks and attaches
//! the ones the session renders to their sinks. Sinks may mount after a
//! track arrives, so attachment retries on a fixed interval. Each track id
//! holds at most one retry timer and at most one sink registration.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::participant::{
    IdentityRules, Participant, ParticipantRole, SinkSlot, SubscriptionState, TrackInfo,
    TrackKind, TrackRecord, TrackSink,
};
use crate::error::SessionError;
use crate::session::{ConversationType, SessionEvent};
use crate::timers::{TaskScheduler, TimerKey};

/// How attachment retries are paced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 10,
        }
    }
}

/// Result of a participant joining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub role: ParticipantRole,
    /// True when this is the first remote agent in the room
    pub first_agent: bool,
}

/// What the registry did with a subscribed track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDisposition {
    /// Agent speech, routed to the audio slot
    AgentAudio,
    /// Avatar video, routed to the video slot
    AgentVideo,
    Ignored,
}

/// Sink registrations, plus the tracks still waiting for one
///
/// A track leaves `wanted` when it is released, so a retry that races the
/// release finds it gone and registers nothing.
#[derive(Default)]
struct Attachments {
    sinks: HashMap<String, Weak<dyn TrackSink>>,
    wanted: HashSet<String>,
}

/// Outcome of one attachment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    Attached,
    Waiting,
    Released,
}

pub struct ParticipantRegistry {
    rules: IdentityRules,
    conversation_type: Mutex<ConversationType>,
    retry: RetryPolicy,
    timers: Arc<TaskScheduler<TimerKey>>,
    events: broadcast::Sender<SessionEvent>,
    audio_slot: SinkSlot,
    video_slot: SinkSlot,
    local_identity: Mutex<Option<String>>,
    participants: Mutex<HashMap<String, Participant>>,
    attachments: Arc<Mutex<Attachments>>,
}

impl ParticipantRegistry {
    pub fn new(
        rules: IdentityRules,
        conversation_type: ConversationType,
        retry: RetryPolicy,
        timers: Arc<TaskScheduler<TimerKey>>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            rules,
            conversation_type: Mutex::new(conversation_type),
            retry,
            timers,
            events,
            audio_slot: SinkSlot::new(),
            video_slot: SinkSlot::new(),
            local_identity: Mutex::new(None),
            participants: Mutex::new(HashMap::new()),
            attachments: Arc::new(Mutex::new(Attachments::default())),
        }
    }

    /// Slot the agent's audio track is attached to
    pub fn audio_slot(&self) -> SinkSlot {
        self.audio_slot.clone()
    }

    /// Slot the avatar video track is attached to
    pub fn video_slot(&self) -> SinkSlot {
        self.video_slot.clone()
    }

    pub fn conversation_type(&self) -> ConversationType {
        *lock(&self.conversation_type)
    }

    pub fn set_conversation_type(&self, conversation_type: ConversationType) {
        *lock(&self.conversation_type) = conversation_type;
    }

    pub fn set_local_identity(&self, identity: &str) {
        *lock(&self.local_identity) = Some(identity.to_string());
    }

    pub fn classify(&self, identity: &str) -> ParticipantRole {
        let local = lock(&self.local_identity).clone();
        self.rules.classify(identity, local.as_deref())
    }

    pub fn on_participant_joined(&self, identity: &str) -> JoinOutcome {
        let role = self.classify(identity);
        let mut participants = lock(&self.participants);

        let had_agent = participants
            .values()
            .any(|p| p.role == ParticipantRole::RemoteAgent);
        participants
            .entry(identity.to_string())
            .or_insert_with(|| Participant::new(identity, role));
        drop(participants);

        info!("Participant joined: {} ({:?})", identity, role);

        if role == ParticipantRole::RemoteAgent {
            self.timers.cancel(&TimerKey::AgentJoin);
        }

        JoinOutcome {
            role,
            first_agent: role == ParticipantRole::RemoteAgent && !had_agent,
        }
    }

    /// Remove a participant and release its tracks
    ///
    /// Returns the participant's role and whether it had agent audio attached.
    pub fn on_participant_left(&self, identity: &str) -> Option<(ParticipantRole, bool)> {
        let participant = lock(&self.participants).remove(identity)?;
        info!("Participant left: {} ({:?})", identity, participant.role);

        let mut had_agent_audio = false;
        for (sid, record) in &participant.tracks {
            if participant.role == ParticipantRole::RemoteAgent
                && record.info.kind == TrackKind::Audio
                && record.subscription == SubscriptionState::Subscribed
            {
                had_agent_audio = true;
            }
            self.release_track(sid);
        }

        Some((participant.role, had_agent_audio))
    }

    pub fn on_track_subscribed(&self, track: TrackInfo) -> TrackDisposition {
        let role = self.classify(&track.publisher_identity);

        {
            let mut participants = lock(&self.participants);
            let participant = participants
                .entry(track.publisher_identity.clone())
                .or_insert_with(|| Participant::new(track.publisher_identity.clone(), role));
            participant.tracks.insert(
                track.sid.clone(),
                TrackRecord {
                    info: track.clone(),
                    subscription: SubscriptionState::Subscribed,
                    attached: false,
                },
            );
        }

        match (track.kind, role) {
            (TrackKind::Audio, ParticipantRole::RemoteAgent) => {
                info!("Agent audio track {} from {}", track.sid, track.publisher_identity);
                self.attach_track(track, self.audio_slot.clone());
                TrackDisposition::AgentAudio
            }
            (TrackKind::Video, _)
                if self.conversation_type() == ConversationType::Video
                    && self.rules.is_video_agent(&track.publisher_identity) =>
            {
                info!("Avatar video track {} from {}", track.sid, track.publisher_identity);
                self.attach_track(track, self.video_slot.clone());
                TrackDisposition::AgentVideo
            }
            _ => {
                debug!(
                    "Ignoring {:?} track {} from {}",
                    track.kind, track.sid, track.publisher_identity
                );
                TrackDisposition::Ignored
            }
        }
    }

    /// Detach a track and cancel its pending retry
    ///
    /// Returns how the track had been routed, if the registry knew it.
    pub fn on_track_unsubscribed(&self, track_sid: &str) -> Option<TrackDisposition> {
        self.release_track(track_sid);

        let mut participants = lock(&self.participants);
        let participant = participants
            .values_mut()
            .find(|p| p.tracks.contains_key(track_sid))?;
        let role = participant.role;
        let record = participant.tracks.get_mut(track_sid)?;
        record.subscription = SubscriptionState::Unsubscribed;
        record.attached = false;

        let disposition = match (record.info.kind, role) {
            (TrackKind::Audio, ParticipantRole::RemoteAgent) => TrackDisposition::AgentAudio,
            (TrackKind::Video, ParticipantRole::RemoteAgent)
                if self.conversation_type() == ConversationType::Video
                    && self.rules.is_video_agent(&record.info.publisher_identity) =>
            {
                TrackDisposition::AgentVideo
            }
            _ => TrackDisposition::Ignored,
        };

        debug!("Track {} unsubscribed", track_sid);
        Some(disposition)
    }

    /// Attach `track` to the sink mounted in `slot`, retrying until it mounts
    ///
    /// Returns true if the track was attached without waiting.
    pub fn attach_track(&self, track: TrackInfo, slot: SinkSlot) -> bool {
        lock(&self.attachments).wanted.insert(track.sid.clone());
        if try_attach(&self.attachments, &track, &slot) == Attach::Attached {
            self.mark_attached(&track.sid);
            return true;
        }

        debug!("Sink not ready for track {}, scheduling retries", track.sid);

        let key = TimerKey::TrackRetry(track.sid.clone());
        let attachments = Arc::clone(&self.attachments);
        let events = self.events.clone();
        let policy = self.retry;

        self.timers.schedule(key, async move {
            for attempt in 1..=policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
                match try_attach(&attachments, &track, &slot) {
                    Attach::Attached => {
                        debug!("Track {} attached on retry {}", track.sid, attempt);
                        return;
                    }
                    Attach::Released => return,
                    Attach::Waiting => {}
                }
            }

            let err = SessionError::TrackAttachment {
                track_sid: track.sid.clone(),
                attempts: policy.max_attempts,
            };
            error!("{}", err);
            let _ = events.send(SessionEvent::Warning(err));
        });

        false
    }

    /// Whether `track_sid` currently has a sink registration
    pub fn is_attached(&self, track_sid: &str) -> bool {
        lock(&self.attachments).sinks.contains_key(track_sid)
    }

    pub fn attachment_count(&self) -> usize {
        lock(&self.attachments).sinks.len()
    }

    pub fn has_agent(&self) -> bool {
        lock(&self.participants)
            .values()
            .any(|p| p.role == ParticipantRole::RemoteAgent)
    }

    /// Whether any of `identities` is an agent with subscribed audio
    pub fn agent_audio_active(&self, identities: &[String]) -> bool {
        let participants = lock(&self.participants);
        identities.iter().any(|identity| {
            participants.get(identity).is_some_and(|p| {
                p.role == ParticipantRole::RemoteAgent && p.has_subscribed(TrackKind::Audio)
            })
        })
    }

    pub fn participants(&self) -> Vec<Participant> {
        let attachments = lock(&self.attachments);
        let mut participants: Vec<Participant> = lock(&self.participants).values().cloned().collect();
        for participant in &mut participants {
            for (sid, record) in participant.tracks.iter_mut() {
                record.attached = attachments.sinks.contains_key(sid);
            }
        }
        participants.sort_by(|a, b| a.identity.cmp(&b.identity));
        participants
    }

    /// Detach every track and cancel every retry timer
    pub fn detach_all(&self) {
        let sids: Vec<String> = lock(&self.participants)
            .values()
            .flat_map(|p| p.tracks.keys().cloned())
            .collect();
        for sid in &sids {
            self.timers.cancel(&TimerKey::TrackRetry(sid.clone()));
        }

        let drained: Vec<(String, Weak<dyn TrackSink>)> = {
            let mut attachments = lock(&self.attachments);
            attachments.wanted.clear();
            attachments.sinks.drain().collect()
        };
        for (sid, sink) in drained {
            if let Some(sink) = sink.upgrade() {
                sink.detach(&sid);
            }
        }

        lock(&self.participants).clear();
    }

    fn release_track(&self, track_sid: &str) {
        self.timers.cancel(&TimerKey::TrackRetry(track_sid.to_string()));

        let removed = {
            let mut attachments = lock(&self.attachments);
            attachments.wanted.remove(track_sid);
            attachments.sinks.remove(track_sid)
        };
        if let Some(sink) = removed.and_then(|weak| weak.upgrade()) {
            sink.detach(track_sid);
            debug!("Track {} detached", track_sid);
        }
    }

    fn mark_attached(&self, track_sid: &str) {
        let mut participants = lock(&self.participants);
        if let Some(record) = participants
            .values_mut()
            .find_map(|p| p.tracks.get_mut(track_sid))
        {
            record.attached = true;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register `track` with the sink in `slot` unless it is already registered
fn try_attach(attachments: &Mutex<Attachments>, track: &TrackInfo, slot: &SinkSlot) -> Attach {
    let mut attachments = lock(attachments);
    if attachments.sinks.contains_key(&track.sid) {
        return Attach::Attached;
    }
    if !attachments.wanted.contains(&track.sid) {
        return Attach::Released;
    }

    let Some(sink) = slot.get() else {
        return Attach::Waiting;
    };

    match sink.attach(track) {
        Ok(()) => {
            attachments.wanted.remove(&track.sid);
            attachments.sinks.insert(track.sid.clone(), Arc::downgrade(&sink));
            Attach::Attached
        }
        Err(e) => {
            warn!("Sink rejected track {}: {:#}", track.sid, e);
            Attach::Waiting
        }
    }
}
