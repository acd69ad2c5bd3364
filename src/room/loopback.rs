//! In-memory room transport
//!
//! `LoopbackRoom` is handed to a session as its transport while the paired
//! `LoopbackRemote` plays the agent side of the room.

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::{AgentMessage, ClientMessage};
use super::participant::{TrackInfo, TrackKind};
use super::transport::{RoomConnection, RoomEvent, RoomTransport};

const EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct LoopbackState {
    events: Option<mpsc::Sender<RoomEvent>>,
    room: Option<String>,
    fail_next_connect: Option<String>,
    microphone_enabled: bool,
    camera_enabled: bool,
    published: Vec<Vec<u8>>,
    connect_count: usize,
    disconnect_count: usize,
}

/// Client side of the loopback room
pub struct LoopbackRoom {
    state: Arc<Mutex<LoopbackState>>,
    local_identity: String,
}

/// Remote side of the loopback room
#[derive(Clone)]
pub struct LoopbackRemote {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackRoom {
    pub fn new(local_identity: impl Into<String>) -> (Self, LoopbackRemote) {
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        let room = Self {
            state: Arc::clone(&state),
            local_identity: local_identity.into(),
        };
        (room, LoopbackRemote { state })
    }
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl RoomTransport for LoopbackRoom {
    async fn connect(&mut self, url: &str, _token: &str, room: &str) -> Result<RoomConnection> {
        let mut state = lock(&self.state);
        state.connect_count += 1;

        if let Some(reason) = state.fail_next_connect.take() {
            bail!("loopback connect to {} refused: {}", url, reason);
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        state.events = Some(tx);
        state.room = Some(room.to_string());

        info!("Loopback room {} joined as {}", room, self.local_identity);

        Ok(RoomConnection {
            local_identity: self.local_identity.clone(),
            events: rx,
        })
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.disconnect_count += 1;
        state.events = None;
        state.microphone_enabled = false;
        state.camera_enabled = false;
        Ok(())
    }

    async fn set_microphone_enabled(&mut self, enabled: bool) -> Result<()> {
        lock(&self.state).microphone_enabled = enabled;
        Ok(())
    }

    async fn set_camera_enabled(&mut self, enabled: bool) -> Result<()> {
        lock(&self.state).camera_enabled = enabled;
        Ok(())
    }

    async fn publish_data(&mut self, payload: Vec<u8>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.events.is_none() {
            bail!("loopback room is not connected");
        }
        state.published.push(payload);
        Ok(())
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

impl LoopbackRemote {
    /// Deliver an event to the client, returning false if it is not connected
    pub fn emit(&self, event: RoomEvent) -> bool {
        let sender = lock(&self.state).events.clone();
        match sender {
            Some(tx) => tx.try_send(event).is_ok(),
            None => {
                debug!("Dropping loopback event, client not connected");
                false
            }
        }
    }

    pub fn join(&self, identity: &str) -> bool {
        self.emit(RoomEvent::ParticipantConnected {
            identity: identity.to_string(),
        })
    }

    pub fn leave(&self, identity: &str) -> bool {
        self.emit(RoomEvent::ParticipantDisconnected {
            identity: identity.to_string(),
        })
    }

    pub fn publish_track(&self, sid: &str, kind: TrackKind, publisher: &str) -> bool {
        self.emit(RoomEvent::TrackSubscribed {
            track: TrackInfo::new(sid, kind, publisher),
        })
    }

    pub fn unpublish_track(&self, sid: &str) -> bool {
        self.emit(RoomEvent::TrackUnsubscribed {
            track_sid: sid.to_string(),
        })
    }

    pub fn set_active_speakers(&self, identities: &[&str]) -> bool {
        self.emit(RoomEvent::ActiveSpeakersChanged {
            identities: identities.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn send_audio(&self, data: Vec<u8>) -> bool {
        self.emit(RoomEvent::AudioChunk { data })
    }

    pub fn send_message(&self, message: &AgentMessage) -> bool {
        match serde_json::to_vec(message) {
            Ok(payload) => self.emit(RoomEvent::DataReceived { payload }),
            Err(_) => false,
        }
    }

    pub fn send_raw(&self, payload: &[u8]) -> bool {
        self.emit(RoomEvent::DataReceived {
            payload: payload.to_vec(),
        })
    }

    /// Close the room from the server side
    pub fn close(&self, reason: Option<&str>) {
        self.emit(RoomEvent::Disconnected {
            reason: reason.map(str::to_string),
        });
        lock(&self.state).events = None;
    }

    /// Make the next `connect` fail with `reason`
    pub fn fail_next_connect(&self, reason: &str) {
        lock(&self.state).fail_next_connect = Some(reason.to_string());
    }

    /// Messages the client published, in order
    pub fn published(&self) -> Vec<ClientMessage> {
        lock(&self.state)
            .published
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).events.is_some()
    }

    pub fn room(&self) -> Option<String> {
        lock(&self.state).room.clone()
    }

    pub fn microphone_enabled(&self) -> bool {
        lock(&self.state).microphone_enabled
    }

    pub fn camera_enabled(&self) -> bool {
        lock(&self.state).camera_enabled
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state).connect_count
    }

    pub fn disconnect_count(&self) -> usize {
        lock(&self.state).disconnect_count
    }
}
