//! Speech capture coordinator
//!
//! Runs continuous recognition while the call is active and keeps it
//! mutually exclusive with the avatar's speech. Capture is a small state
//! machine:
//!
//! - `Idle`: not recognizing (capture not requested, or call not active)
//! - `Listening`: a recognition run is active
//! - `AvatarSpeaking`: the avatar is speaking; recognition is held off
//!
//! Every transition happens under one lock, so `Listening` and
//! `AvatarSpeaking` can never hold at the same time.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::recognizer::{RecognitionEvent, SpeechRecognizer};
use crate::audio::{SpeakingObserver, SpeakingSource};
use crate::error::{SessionError, SessionResult};
use crate::room::ClientMessage;
use crate::session::{SessionEvent, TranscriptLog, TranscriptRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Listening,
    AvatarSpeaking,
}

/// Snapshot of the recognition state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionSession {
    pub active: bool,
    pub language_code: Option<String>,
    pub interim_text: String,
    pub final_utterances: Vec<String>,
}

struct Capture {
    state: CaptureState,
    recognizer: Box<dyn SpeechRecognizer>,
    /// Requested language; `None` when capture is not wanted
    language: Option<String>,
    call_active: bool,
    playback_speaking: bool,
    track_speaking: bool,
    interim_text: String,
    final_utterances: Vec<String>,
    /// Runs we stopped or abandoned whose `Ended` has not arrived yet
    expected_ends: u32,
    shut_down: bool,
}

impl Capture {
    fn avatar_speaking(&self) -> bool {
        self.playback_speaking || self.track_speaking
    }

    fn resting_state(&self) -> CaptureState {
        if self.avatar_speaking() {
            CaptureState::AvatarSpeaking
        } else {
            CaptureState::Idle
        }
    }

    /// Stop the active run, if any
    fn halt(&mut self) {
        if self.state == CaptureState::Listening {
            self.recognizer.stop();
            self.expected_ends += 1;
            debug!("Recognition stopped");
        }
        self.interim_text.clear();
        self.state = self.resting_state();
    }

    /// Start a run if capture is wanted and allowed
    fn resume(&mut self) -> SessionResult<bool> {
        if self.state == CaptureState::Listening {
            return Ok(false);
        }

        self.state = self.resting_state();
        if self.shut_down || !self.call_active || self.avatar_speaking() {
            return Ok(false);
        }
        let Some(language) = self.language.clone() else {
            return Ok(false);
        };

        match self.recognizer.start(&language) {
            Ok(()) => {
                self.state = CaptureState::Listening;
                self.interim_text.clear();
                debug!("Recognition started ({})", language);
                Ok(true)
            }
            Err(e) => {
                self.language = None;
                Err(SessionError::RecognitionRuntime(format!("{:#}", e)))
            }
        }
    }
}

pub struct SpeechCoordinator {
    capture: Mutex<Capture>,
    transcript: Arc<TranscriptLog>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    events: broadcast::Sender<SessionEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechCoordinator {
    /// Create the coordinator and spawn the task consuming recognizer events
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        recognizer: Box<dyn SpeechRecognizer>,
        mut recognition_events: mpsc::UnboundedReceiver<RecognitionEvent>,
        transcript: Arc<TranscriptLog>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Arc<Self> {
        info!("Speech capture using {} recognizer", recognizer.name());

        let coordinator = Arc::new(Self {
            capture: Mutex::new(Capture {
                state: CaptureState::Idle,
                recognizer,
                language: None,
                call_active: false,
                playback_speaking: false,
                track_speaking: false,
                interim_text: String::new(),
                final_utterances: Vec::new(),
                expected_ends: 0,
                shut_down: false,
            }),
            transcript,
            outbound,
            events,
            pump: Mutex::new(None),
        });

        let weak = Arc::downgrade(&coordinator);
        let pump = tokio::spawn(async move {
            while let Some(event) = recognition_events.recv().await {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.handle_event(event);
            }
            debug!("Recognition event task stopped");
        });
        *lock(&coordinator.pump) = Some(pump);

        coordinator
    }

    /// Begin continuous recognition in `language`
    ///
    /// If the call is not active yet or the avatar is speaking, recognition
    /// starts as soon as that changes.
    pub fn start(&self, language: &str) -> SessionResult<()> {
        let mut capture = self.lock();
        if !capture.recognizer.is_supported() {
            return Err(SessionError::RecognitionUnsupported);
        }
        if capture.shut_down {
            return Ok(());
        }

        if capture.state == CaptureState::Listening {
            if capture.language.as_deref() == Some(language) {
                return Ok(());
            }
            capture.halt();
        }

        info!("Speech capture requested ({})", language);
        capture.language = Some(language.to_string());
        capture.resume().map(|_| ())
    }

    /// Halt recognition; safe when already inactive
    pub fn stop(&self) {
        let mut capture = self.lock();
        if capture.language.take().is_some() {
            info!("Speech capture stopped");
        }
        capture.halt();
    }

    /// Track whether the call is active; capture only runs while it is
    pub fn set_call_active(&self, active: bool) {
        let result = {
            let mut capture = self.lock();
            if capture.call_active == active {
                return;
            }
            capture.call_active = active;
            if active {
                capture.resume()
            } else {
                capture.halt();
                Ok(false)
            }
        };

        if let Err(e) = result {
            self.warn(e);
        }
    }

    /// Stop capture for good
    pub fn shutdown(&self) {
        {
            let mut capture = self.lock();
            capture.shut_down = true;
            capture.call_active = false;
            capture.language = None;
            capture.halt();
        }

        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn is_listening(&self) -> bool {
        self.state() == CaptureState::Listening
    }

    pub fn is_avatar_speaking(&self) -> bool {
        self.lock().avatar_speaking()
    }

    pub fn recognition(&self) -> RecognitionSession {
        let capture = self.lock();
        RecognitionSession {
            active: capture.state == CaptureState::Listening,
            language_code: capture.language.clone(),
            interim_text: capture.interim_text.clone(),
            final_utterances: capture.final_utterances.clone(),
        }
    }

    fn handle_event(&self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Interim(text) => {
                self.lock().interim_text = text;
            }
            RecognitionEvent::Final(text) => self.handle_final(text),
            RecognitionEvent::Ended => self.handle_ended(),
            RecognitionEvent::Error(message) => self.handle_error(message),
        }
    }

    fn handle_final(&self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        {
            let mut capture = self.lock();
            capture.interim_text.clear();
            capture.final_utterances.push(text.clone());
        }

        debug!("Final utterance: {}", text);
        if let Some(entry) = self.transcript.append(TranscriptRole::User, text.clone()) {
            let _ = self.events.send(SessionEvent::TranscriptAppended(entry));
        }

        if self.outbound.send(ClientMessage::UserText { text }).is_err() {
            warn!("Message channel closed, utterance not forwarded");
        }
    }

    fn handle_ended(&self) {
        let result = {
            let mut capture = self.lock();
            if capture.expected_ends > 0 {
                capture.expected_ends -= 1;
                return;
            }
            if capture.state != CaptureState::Listening {
                return;
            }

            // The run ended on its own while the call is live: listen again
            debug!("Recognition ended, restarting");
            capture.state = capture.resting_state();
            capture.resume()
        };

        if let Err(e) = result {
            self.warn(e);
        }
    }

    fn handle_error(&self, message: String) {
        {
            let mut capture = self.lock();
            if capture.state != CaptureState::Listening {
                debug!("Ignoring recognition error from a stopped run: {}", message);
                return;
            }
            // The failed run still delivers its `Ended`
            capture.expected_ends += 1;
            capture.language = None;
            capture.interim_text.clear();
            capture.state = capture.resting_state();
        }

        self.warn(SessionError::RecognitionRuntime(message));
    }

    fn warn(&self, error: SessionError) {
        warn!("{}", error);
        let _ = self.events.send(SessionEvent::Warning(error));
    }

    fn lock(&self) -> MutexGuard<'_, Capture> {
        lock(&self.capture)
    }
}

impl SpeakingObserver for SpeechCoordinator {
    fn speaking_changed(&self, source: SpeakingSource, speaking: bool) {
        let (before, after, result) = {
            let mut capture = self.lock();
            let before = capture.avatar_speaking();
            match source {
                SpeakingSource::Playback => capture.playback_speaking = speaking,
                SpeakingSource::AgentTrack => capture.track_speaking = speaking,
            }
            let after = capture.avatar_speaking();

            let result = if before == after {
                Ok(false)
            } else if after {
                capture.halt();
                Ok(false)
            } else {
                capture.resume()
            };
            (before, after, result)
        };

        if before != after {
            debug!("Avatar speaking: {} ({:?})", after, source);
            let _ = self.events.send(SessionEvent::SpeakingChanged(after));
        }
        if let Err(e) = result {
            self.warn(e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
