//! Media room plumbing
//!
//! - `transport`: the room transport trait and its event stream
//! - `participant`: participant/track types, identity classification, sinks
//! - `registry`: tracks who is in the room and attaches their tracks
//! - `messages`: data-channel envelopes
//! - `loopback`: in-memory transport for tests and demos

pub mod loopback;
pub mod messages;
pub mod participant;
pub mod registry;
pub mod transport;

pub use loopback::{LoopbackRemote, LoopbackRoom};
pub use messages::{AgentMessage, ClientMessage, TranscriptSpeaker};
pub use participant::{
    IdentityRules, Participant, ParticipantRole, SinkSlot, SubscriptionState, TrackInfo,
    TrackKind, TrackRecord, TrackSink,
};
pub use registry::{JoinOutcome, ParticipantRegistry, RetryPolicy, TrackDisposition};
pub use transport::{RoomConnection, RoomEvent, RoomTransport};
