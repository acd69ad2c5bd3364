//! Local speech capture
//!
//! Continuous recognition of the user's microphone, held off whenever the
//! avatar is speaking.

pub mod coordinator;
pub mod recognizer;

pub use coordinator::{CaptureState, RecognitionSession, SpeechCoordinator};
pub use recognizer::{LoopbackRecognizer, LoopbackSpeech, RecognitionEvent, SpeechRecognizer};
