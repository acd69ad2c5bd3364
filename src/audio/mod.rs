pub mod decoder;
pub mod queue;
pub mod scheduler;
pub mod sink;

pub use decoder::{AudioChunk, AudioDecoder, DecodedAudio, SymphoniaDecoder};
pub use queue::{PlaybackCursor, PlaybackQueue, ScheduledChunk};
pub use scheduler::{PlaybackScheduler, SpeakingObserver, SpeakingSource};
pub use sink::{AudioSink, NullSink};
