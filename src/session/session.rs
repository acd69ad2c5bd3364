use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{ConversationType, SessionConfig};
use super::credentials::SessionCredentials;
use super::events::SessionEvent;
use super::state::{ConnectionState, StateMachine};
use super::stats::{CallSummary, SessionStatus, TranscriptEntry, TranscriptRole};
use super::timer::CallTimer;
use super::transcript::TranscriptLog;
use crate::audio::{
    AudioDecoder, AudioSink, PlaybackCursor, PlaybackScheduler, SpeakingObserver, SpeakingSource,
};
use crate::error::{SessionError, SessionResult};
use crate::room::{
    AgentMessage, ClientMessage, Participant, ParticipantRegistry, ParticipantRole, RoomEvent,
    RoomTransport, SinkSlot, TrackDisposition, TrackSink, TranscriptSpeaker,
};
use crate::speech::{RecognitionEvent, RecognitionSession, SpeechCoordinator, SpeechRecognizer};
use crate::timers::{TaskScheduler, TimerKey};

const EVENT_CAPACITY: usize = 256;

/// Platform pieces a session is assembled from
pub struct SessionComponents {
    pub transport: Box<dyn RoomTransport>,
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub recognition_events: mpsc::UnboundedReceiver<RecognitionEvent>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub audio_output: Arc<dyn AudioSink>,
    /// Renders the agent's audio track; mounted in the audio slot
    pub track_audio_output: Option<Arc<dyn TrackSink>>,
}

#[derive(Default)]
struct Details {
    room_name: Option<String>,
    conversation_type: ConversationType,
    metadata: HashMap<String, serde_json::Value>,
    summary: Option<CallSummary>,
    end_error: Option<SessionError>,
}

struct Shared {
    config: SessionConfig,
    machine: Mutex<StateMachine>,
    details: Mutex<Details>,
    transport: tokio::sync::Mutex<Box<dyn RoomTransport>>,
    registry: ParticipantRegistry,
    playback: PlaybackScheduler,
    capture: Arc<SpeechCoordinator>,
    timer: CallTimer,
    transcript: Arc<TranscriptLog>,
    timers: Arc<TaskScheduler<TimerKey>>,
    events: broadcast::Sender<SessionEvent>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientMessage>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    /// Set once the call first becomes active
    activated: AtomicBool,
    _track_audio_output: Option<Arc<dyn TrackSink>>,
}

/// A realtime conversation with an avatar agent
///
/// Owns the room connection, the participant registry, audio playback,
/// speech capture, the call timer and the transcript. Every state change is
/// broadcast as a `SessionEvent`.
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    /// Assemble a session
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig, components: SessionComponents) -> Self {
        info!("Creating call session: {}", config.session_id);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let timers = Arc::new(TaskScheduler::new());
        let transcript = Arc::new(TranscriptLog::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let registry = ParticipantRegistry::new(
            config.identity_rules.clone(),
            config.conversation_type,
            config.attach_retry,
            Arc::clone(&timers),
            events.clone(),
        );
        if let Some(sink) = &components.track_audio_output {
            registry.audio_slot().mount(sink);
        }

        let capture = SpeechCoordinator::spawn(
            components.recognizer,
            components.recognition_events,
            Arc::clone(&transcript),
            outbound.clone(),
            events.clone(),
        );
        let observer: Arc<dyn SpeakingObserver> = capture.clone();
        let playback = PlaybackScheduler::spawn(
            components.decoder,
            components.audio_output,
            observer,
            events.clone(),
        );

        let details = Details {
            conversation_type: config.conversation_type,
            ..Details::default()
        };

        Self {
            shared: Arc::new(Shared {
                config,
                machine: Mutex::new(StateMachine::new()),
                details: Mutex::new(details),
                transport: tokio::sync::Mutex::new(components.transport),
                registry,
                playback,
                capture,
                timer: CallTimer::new(),
                transcript,
                timers,
                events,
                outbound,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                event_loop: Mutex::new(None),
                activated: AtomicBool::new(false),
                _track_audio_output: components.track_audio_output,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.config.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Join the room described by `credentials` and wait for an agent
    ///
    /// Returns once the room is joined; the agent joins later and moves the
    /// session to `Active`. Fails if the credentials are malformed or the
    /// room cannot be reached, leaving the session `Disconnected`.
    pub async fn connect(&self, credentials: SessionCredentials) -> SessionResult<()> {
        let shared = &self.shared;

        if shared.state() != ConnectionState::Idle {
            return Err(SessionError::Connection(format!(
                "session {} was already started",
                shared.config.session_id
            )));
        }

        if let Err(e) = credentials.validate(&shared.config.token_prefix) {
            error!("Rejecting credentials for {}: {}", shared.config.session_id, e);
            shared.shutdown(Some(e.clone())).await;
            return Err(e);
        }

        let conversation_type = if credentials.metadata.audio_only {
            ConversationType::Voice
        } else {
            shared.config.conversation_type
        };
        {
            let mut details = shared.lock_details();
            details.room_name = Some(credentials.room_name.clone());
            details.conversation_type = conversation_type;
            details.metadata = credentials.metadata.to_map();
        }
        shared.registry.set_conversation_type(conversation_type);

        if !shared.transition(ConnectionState::Connecting) {
            return Err(SessionError::Connection("session closed".to_string()));
        }

        let connected = {
            let mut transport = shared.transport.lock().await;
            info!(
                "Connecting to room {} via {} transport",
                credentials.room_name,
                transport.name()
            );
            match transport
                .connect(&credentials.ws_url, &credentials.token, &credentials.room_name)
                .await
            {
                Ok(connection) => {
                    let devices = enable_devices(&mut **transport, conversation_type).await;
                    devices.map(|()| connection)
                }
                Err(e) => Err(e),
            }
        };

        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                let err = SessionError::Connection(format!("{:#}", e));
                error!("Failed to join room {}: {}", credentials.room_name, err);
                shared.shutdown(Some(err.clone())).await;
                return Err(err);
            }
        };

        shared.registry.set_local_identity(&connection.local_identity);

        if !shared.transition(ConnectionState::WaitingForAgent) {
            // Disconnected while the transport was connecting
            let mut transport = shared.transport.lock().await;
            if let Err(e) = transport.disconnect().await {
                debug!("Transport disconnect after abort failed: {:#}", e);
            }
            return Err(SessionError::Connection(
                "session closed while connecting".to_string(),
            ));
        }

        shared.arm_agent_timeout();

        let outbound = shared.lock_outbound_rx().take();
        if let Some(outbound) = outbound {
            let weak = Arc::downgrade(shared);
            let task = tokio::spawn(run_event_loop(weak, connection.events, outbound));
            *lock(&shared.event_loop) = Some(task);
        }

        info!(
            "Joined room {} as {}, waiting for agent",
            credentials.room_name, connection.local_identity
        );
        Ok(())
    }

    /// End the call and release everything the session holds
    ///
    /// Safe to call more than once; later calls return the first summary.
    pub async fn disconnect(&self) -> CallSummary {
        self.shared.shutdown(None).await
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript.entries()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.shared.timer.elapsed_seconds()
    }

    /// Whether the avatar is speaking, from playback or its audio track
    pub fn is_speaking(&self) -> bool {
        !self.state().is_terminal() && self.shared.capture.is_avatar_speaking()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.capture.is_listening()
    }

    pub fn recognition(&self) -> RecognitionSession {
        self.shared.capture.recognition()
    }

    pub fn playback_cursor(&self) -> PlaybackCursor {
        self.shared.playback.cursor()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.shared.registry.participants()
    }

    /// Error that ended the session, if it ended abnormally
    pub fn end_error(&self) -> Option<SessionError> {
        self.shared.lock_details().end_error.clone()
    }

    pub fn summary(&self) -> Option<CallSummary> {
        self.shared.lock_details().summary.clone()
    }

    pub fn conversation_type(&self) -> ConversationType {
        self.shared.lock_details().conversation_type
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        let details = self.shared.lock_details();
        let elapsed_seconds = match &details.summary {
            Some(summary) => summary.duration_seconds,
            None => self.shared.timer.elapsed_seconds(),
        };

        SessionStatus {
            session_id: self.shared.config.session_id.clone(),
            state,
            room_name: details.room_name.clone(),
            conversation_type: details.conversation_type,
            is_connected: state.is_connected(),
            is_speaking: !state.is_terminal() && self.shared.capture.is_avatar_speaking(),
            is_listening: self.shared.capture.is_listening(),
            elapsed_seconds,
            transcript_entries: self.shared.transcript.len(),
            metadata: details.metadata.clone(),
            error: details.end_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Slot the agent's audio track renders into
    pub fn audio_slot(&self) -> SinkSlot {
        self.shared.registry.audio_slot()
    }

    /// Slot the avatar video renders into; mount a sink when the view is ready
    pub fn video_slot(&self) -> SinkSlot {
        self.shared.registry.video_slot()
    }

    /// Begin continuous speech capture in `language`
    pub fn start_listening(&self, language: &str) -> SessionResult<()> {
        if self.state().is_terminal() {
            return Err(SessionError::Connection("session has ended".to_string()));
        }
        self.shared.capture.start(language)
    }

    pub fn stop_listening(&self) {
        self.shared.capture.stop();
    }

    /// Send a typed message to the agent
    pub fn send_text(&self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_connected() {
            return Err(SessionError::Connection(format!(
                "cannot send text while {}",
                self.state()
            )));
        }

        if let Some(entry) = self.shared.transcript.append(TranscriptRole::User, text) {
            let _ = self.shared.events.send(SessionEvent::TranscriptAppended(entry));
        }
        self.shared.send(ClientMessage::Text {
            text: text.to_string(),
        });
        Ok(())
    }

    /// Cut the avatar off: drop queued audio and ask the agent to stop
    pub fn interrupt(&self) {
        info!("Interrupting avatar speech");
        self.shared.playback.stop_all();
        if self.is_connected() {
            self.shared.send(ClientMessage::StopSpeaking);
        }
    }

    /// Number of timers currently armed
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.pending()
    }
}

async fn enable_devices(
    transport: &mut dyn RoomTransport,
    conversation_type: ConversationType,
) -> anyhow::Result<()> {
    transport.set_microphone_enabled(true).await?;
    if conversation_type == ConversationType::Video {
        transport.set_camera_enabled(true).await?;
    }
    Ok(())
}

async fn run_event_loop(
    weak: Weak<Shared>,
    mut events: mpsc::Receiver<RoomEvent>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
) {
    debug!("Room event task started");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match event {
                    Some(event) => {
                        if !shared.handle_room_event(event) {
                            break;
                        }
                    }
                    None => {
                        warn!("Room event stream closed");
                        shared.spawn_shutdown(Some(SessionError::Connection(
                            "room event stream closed".to_string(),
                        )));
                        break;
                    }
                }
            }
            Some(message) = outbound.recv() => {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.publish(&message).await;
            }
        }
    }

    debug!("Room event task stopped");
}

impl Shared {
    fn state(&self) -> ConnectionState {
        lock(&self.machine).state()
    }

    fn lock_details(&self) -> MutexGuard<'_, Details> {
        lock(&self.details)
    }

    fn lock_outbound_rx(&self) -> MutexGuard<'_, Option<mpsc::UnboundedReceiver<ClientMessage>>> {
        lock(&self.outbound_rx)
    }

    /// Apply a transition and broadcast it; false if it is not allowed
    fn transition(&self, to: ConnectionState) -> bool {
        let result = lock(&self.machine).transition(to);
        match result {
            Ok(from) => {
                info!("Session {}: {} -> {}", self.config.session_id, from, to);
                let _ = self.events.send(SessionEvent::StateChanged { from, to });
                true
            }
            Err(e) => {
                debug!("Session {}: {}", self.config.session_id, e);
                false
            }
        }
    }

    fn arm_agent_timeout(self: &Arc<Self>) {
        let timeout = self.config.agent_join_timeout;
        let weak = Arc::downgrade(self);

        self.timers.schedule(TimerKey::AgentJoin, async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                let err = SessionError::AgentJoinTimeout(timeout);
                error!("Session {}: {}", shared.config.session_id, err);
                shared.spawn_shutdown(Some(err));
            }
        });
    }

    /// Tear down from inside a session task without aborting the caller
    fn spawn_shutdown(self: &Arc<Self>, error: Option<SessionError>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.shutdown(error).await;
        });
    }

    fn send(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Message channel closed, dropping message");
        }
    }

    async fn publish(&self, message: &ClientMessage) {
        let payload = match message.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode message: {}", e);
                return;
            }
        };

        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.publish_data(payload).await {
            warn!("Failed to publish message: {:#}", e);
        }
    }

    /// Returns false once the event loop should stop
    fn handle_room_event(self: &Arc<Self>, event: RoomEvent) -> bool {
        match event {
            RoomEvent::ParticipantConnected { identity } => {
                let outcome = self.registry.on_participant_joined(&identity);
                let _ = self.events.send(SessionEvent::ParticipantJoined {
                    identity: identity.clone(),
                    role: outcome.role,
                });
                if outcome.first_agent {
                    self.system_entry(format!("{} joined the call", identity));
                }
                if outcome.role == ParticipantRole::RemoteAgent {
                    self.on_agent_present();
                }
            }
            RoomEvent::ParticipantDisconnected { identity } => {
                if let Some((role, had_agent_audio)) = self.registry.on_participant_left(&identity)
                {
                    let _ = self.events.send(SessionEvent::ParticipantLeft {
                        identity: identity.clone(),
                    });
                    if had_agent_audio {
                        self.capture
                            .speaking_changed(SpeakingSource::AgentTrack, false);
                    }
                    if role == ParticipantRole::RemoteAgent {
                        self.system_entry(format!("{} left the call", identity));
                    }
                }
            }
            RoomEvent::TrackSubscribed { track } => {
                if self.registry.on_track_subscribed(track) == TrackDisposition::AgentAudio {
                    self.capture.speaking_changed(SpeakingSource::AgentTrack, true);
                }
            }
            RoomEvent::TrackUnsubscribed { track_sid } => {
                if self.registry.on_track_unsubscribed(&track_sid)
                    == Some(TrackDisposition::AgentAudio)
                {
                    self.capture
                        .speaking_changed(SpeakingSource::AgentTrack, false);
                }
            }
            RoomEvent::ActiveSpeakersChanged { identities } => {
                let speaking = self.registry.agent_audio_active(&identities);
                self.capture
                    .speaking_changed(SpeakingSource::AgentTrack, speaking);
            }
            RoomEvent::DataReceived { payload } => self.handle_data(&payload),
            RoomEvent::AudioChunk { data } => self.playback.enqueue(data.into()),
            RoomEvent::Reconnecting => {
                warn!("Session {}: connection lost, reconnecting", self.config.session_id);
                if self.transition(ConnectionState::Reconnecting) {
                    self.capture.set_call_active(false);
                }
            }
            RoomEvent::Reconnected => {
                let next = if self.registry.has_agent() {
                    ConnectionState::Active
                } else {
                    ConnectionState::WaitingForAgent
                };
                if self.transition(next) && next == ConnectionState::Active {
                    self.on_active();
                }
            }
            RoomEvent::Disconnected { reason } => {
                info!(
                    "Session {}: room closed ({})",
                    self.config.session_id,
                    reason.as_deref().unwrap_or("normal")
                );
                self.spawn_shutdown(reason.map(SessionError::Connection));
                return false;
            }
        }
        true
    }

    fn on_agent_present(&self) {
        // While reconnecting, `Reconnected` decides the next state
        if self.state() != ConnectionState::WaitingForAgent
            || !self.transition(ConnectionState::Active)
        {
            return;
        }
        self.on_active();
    }

    /// Entered `Active`, from an agent join or a reconnect
    fn on_active(&self) {
        self.timer.start();
        self.capture.set_call_active(true);

        if self.activated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(language) = &self.config.language {
            if let Err(e) = self.capture.start(language) {
                warn!("Speech capture unavailable: {}", e);
                let _ = self.events.send(SessionEvent::Warning(e));
            }
        }
    }

    fn handle_data(&self, payload: &[u8]) {
        match serde_json::from_slice::<AgentMessage>(payload) {
            Ok(AgentMessage::Transcript { role, text }) => {
                let role = match role {
                    TranscriptSpeaker::User => TranscriptRole::User,
                    TranscriptSpeaker::Assistant => TranscriptRole::Avatar,
                };
                if let Some(entry) = self.transcript.append(role, text) {
                    let _ = self.events.send(SessionEvent::TranscriptAppended(entry));
                }
            }
            Err(e) => {
                debug!("Ignoring data message: {}", e);
            }
        }
    }

    fn system_entry(&self, text: String) {
        if let Some(entry) = self.transcript.append(TranscriptRole::System, text) {
            let _ = self.events.send(SessionEvent::TranscriptAppended(entry));
        }
    }

    async fn shutdown(&self, error: Option<SessionError>) -> CallSummary {
        let (from, summary) = {
            let mut machine = lock(&self.machine);
            let mut details = lock(&self.details);
            let from = machine.state();
            if from == ConnectionState::Disconnected {
                let summary = details.summary.clone().unwrap_or_else(|| CallSummary {
                    session_id: self.config.session_id.clone(),
                    duration_seconds: 0,
                });
                return summary;
            }

            // Last transcript write, before the terminal state
            if let Some(err) = &error {
                self.system_entry(format!("Call ended: {}", err));
            }
            if let Err(e) = machine.transition(ConnectionState::Disconnected) {
                warn!("Session {}: {}", self.config.session_id, e);
            }
            self.transcript.close();
            let summary = CallSummary {
                session_id: self.config.session_id.clone(),
                duration_seconds: self.timer.stop(),
            };
            details.summary = Some(summary.clone());
            details.end_error = error.clone();
            (from, summary)
        };

        match &error {
            Some(err) => error!("Ending session {} ({}): {}", self.config.session_id, from, err),
            None => info!("Ending session {} ({})", self.config.session_id, from),
        }

        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} pending timers", cancelled);
        }
        let event_loop = lock(&self.event_loop).take();
        if let Some(task) = event_loop {
            task.abort();
        }
        self.registry.detach_all();
        self.playback.shutdown();
        self.capture.shutdown();

        if matches!(
            from,
            ConnectionState::WaitingForAgent | ConnectionState::Active | ConnectionState::Reconnecting
        ) {
            let mut transport = self.transport.lock().await;
            if error.is_none() {
                match ClientMessage::EndCall.to_payload() {
                    Ok(payload) => {
                        if let Err(e) = transport.publish_data(payload).await {
                            debug!("Could not notify agent of call end: {:#}", e);
                        }
                    }
                    Err(e) => debug!("Failed to encode end_call: {}", e),
                }
            }
            if let Err(e) = transport.disconnect().await {
                warn!("Failed to leave room cleanly: {:#}", e);
            }
        }

        let _ = self.events.send(SessionEvent::StateChanged {
            from,
            to: ConnectionState::Disconnected,
        });
        let _ = self.events.send(SessionEvent::Ended {
            summary: summary.clone(),
            error,
        });

        info!(
            "Session {} ended after {}s",
            self.config.session_id, summary.duration_seconds
        );
        summary
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.timers.cancel_all();
        if let Some(task) = lock(&self.event_loop).take() {
            task.abort();
        }
        self.capture.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
