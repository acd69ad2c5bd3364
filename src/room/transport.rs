use anyhow::Result;
use tokio::sync::mpsc;

use super::participant::TrackInfo;

/// Event delivered by the media room
///
/// Subscribe and unsubscribe events for a given track arrive in order.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected { identity: String },
    ParticipantDisconnected { identity: String },
    TrackSubscribed { track: TrackInfo },
    TrackUnsubscribed { track_sid: String },
    /// Identities currently speaking, as reported by the media server
    ActiveSpeakersChanged { identities: Vec<String> },
    /// JSON envelope from the data channel
    DataReceived { payload: Vec<u8> },
    /// Binary frame carrying an encoded synthesized-speech chunk
    AudioChunk { data: Vec<u8> },
    Reconnecting,
    Reconnected,
    /// The room closed; `reason` is set when it closed because of a failure
    Disconnected { reason: Option<String> },
}

/// An established room connection
#[derive(Debug)]
pub struct RoomConnection {
    /// Identity the server assigned to the local participant
    pub local_identity: String,
    /// Room events, in transport order
    pub events: mpsc::Receiver<RoomEvent>,
}

/// Media-room transport
///
/// Implementations wrap a realtime media SDK. `LoopbackRoom` is an in-memory
/// implementation for tests and demos.
#[async_trait::async_trait]
pub trait RoomTransport: Send + Sync {
    /// Join `room` on the media server at `url`, authenticating with `token`
    async fn connect(&mut self, url: &str, token: &str, room: &str) -> Result<RoomConnection>;

    /// Leave the room
    async fn disconnect(&mut self) -> Result<()>;

    async fn set_microphone_enabled(&mut self, enabled: bool) -> Result<()>;

    async fn set_camera_enabled(&mut self, enabled: bool) -> Result<()>;

    /// Publish a reliable data-channel message
    async fn publish_data(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
