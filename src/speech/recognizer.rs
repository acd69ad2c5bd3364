use anyhow::{bail, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// Event emitted by a running recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Partial hypothesis for the utterance in progress
    Interim(String),
    /// Finished utterance
    Final(String),
    /// The recognition run ended
    Ended,
    /// The recognition run failed; an `Ended` still follows
    Error(String),
}

/// Platform continuous speech recognition
///
/// `start` and `stop` are synchronous requests; results arrive on the
/// event channel the recognizer was created with. Every successful `start`
/// is matched by exactly one `RecognitionEvent::Ended`, whether the run
/// ended on its own, failed, or was stopped.
pub trait SpeechRecognizer: Send {
    fn is_supported(&self) -> bool;

    fn start(&mut self, language: &str) -> Result<()>;

    fn stop(&mut self);

    /// Get recognizer name for logging
    fn name(&self) -> &str;
}

#[derive(Default)]
struct LoopbackSpeechState {
    running: bool,
    language: Option<String>,
    start_count: usize,
    stop_count: usize,
}

/// Scripted recognizer for tests and demos
pub struct LoopbackRecognizer {
    supported: bool,
    state: Arc<Mutex<LoopbackSpeechState>>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

/// Drives a `LoopbackRecognizer` as if a user were speaking
#[derive(Clone)]
pub struct LoopbackSpeech {
    state: Arc<Mutex<LoopbackSpeechState>>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

impl LoopbackRecognizer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecognitionEvent>, LoopbackSpeech) {
        Self::build(true)
    }

    /// A recognizer reporting no platform support
    pub fn unsupported() -> (Self, mpsc::UnboundedReceiver<RecognitionEvent>, LoopbackSpeech) {
        Self::build(false)
    }

    fn build(supported: bool) -> (Self, mpsc::UnboundedReceiver<RecognitionEvent>, LoopbackSpeech) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(LoopbackSpeechState::default()));
        let recognizer = Self {
            supported,
            state: Arc::clone(&state),
            events: tx.clone(),
        };
        (recognizer, rx, LoopbackSpeech { state, events: tx })
    }
}

fn lock(state: &Mutex<LoopbackSpeechState>) -> MutexGuard<'_, LoopbackSpeechState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SpeechRecognizer for LoopbackRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn start(&mut self, language: &str) -> Result<()> {
        if !self.supported {
            bail!("speech recognition unavailable");
        }
        let mut state = lock(&self.state);
        if state.running {
            bail!("recognition already started");
        }
        state.running = true;
        state.language = Some(language.to_string());
        state.start_count += 1;
        debug!("Loopback recognition started ({})", language);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        if state.running {
            state.running = false;
            state.stop_count += 1;
            let _ = self.events.send(RecognitionEvent::Ended);
        }
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

impl LoopbackSpeech {
    /// Emit a partial result, if a run is active
    pub fn interim(&self, text: &str) -> bool {
        self.emit_if_running(RecognitionEvent::Interim(text.to_string()))
    }

    /// Emit a final result, if a run is active
    pub fn finalize(&self, text: &str) -> bool {
        self.emit_if_running(RecognitionEvent::Final(text.to_string()))
    }

    /// End the active run on its own (silence timeout)
    pub fn end_naturally(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.running {
            return false;
        }
        state.running = false;
        self.events.send(RecognitionEvent::Ended).is_ok()
    }

    /// Fail the active run
    pub fn fail(&self, message: &str) -> bool {
        let mut state = lock(&self.state);
        if !state.running {
            return false;
        }
        state.running = false;
        let _ = self.events.send(RecognitionEvent::Error(message.to_string()));
        self.events.send(RecognitionEvent::Ended).is_ok()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn language(&self) -> Option<String> {
        lock(&self.state).language.clone()
    }

    pub fn start_count(&self) -> usize {
        lock(&self.state).start_count
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.state).stop_count
    }

    fn emit_if_running(&self, event: RecognitionEvent) -> bool {
        let state = lock(&self.state);
        state.running && self.events.send(event).is_ok()
    }
}
