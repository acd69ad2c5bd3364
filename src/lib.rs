pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod room;
pub mod session;
pub mod speech;
pub mod timers;

pub use audio::{
    AudioChunk, AudioDecoder, AudioSink, DecodedAudio, NullSink, PlaybackCursor, PlaybackScheduler,
    SymphoniaDecoder,
};
pub use config::{Config, Endpoints, SessionSettings};
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState, SessionFactory};
pub use room::{
    LoopbackRemote, LoopbackRoom, ParticipantRole, RoomEvent, RoomTransport, SinkSlot, TrackInfo,
    TrackKind, TrackSink,
};
pub use session::{
    CallSession, CallSummary, ConnectionState, ConversationType, SessionComponents, SessionConfig,
    SessionCredentials, SessionEvent, SessionMetadata, SessionStatus, TranscriptEntry,
    TranscriptRole,
};
pub use speech::{LoopbackRecognizer, LoopbackSpeech, RecognitionEvent, SpeechRecognizer};
pub use timers::{TaskScheduler, TimerKey};
