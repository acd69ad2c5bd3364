//! Playback scheduler task
//!
//! Owns the `PlaybackQueue` on a dedicated task. Chunks arrive over a
//! channel; the task starts each one on the sink at its scheduled instant,
//! waits for its end on the audio clock and immediately schedules the next.
//! Speaking state is published on a watch channel and reported to a
//! `SpeakingObserver` before any source starts, so listeners can stop
//! capture first.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::decoder::{AudioChunk, AudioDecoder};
use super::queue::{PlaybackCursor, PlaybackQueue};
use super::sink::AudioSink;
use crate::session::SessionEvent;

/// Source of the avatar's speech
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeakingSource {
    /// Chunks played by the playback scheduler
    Playback,
    /// The agent's live audio track
    AgentTrack,
}

/// Notified synchronously when the avatar starts or stops speaking
pub trait SpeakingObserver: Send + Sync {
    fn speaking_changed(&self, source: SpeakingSource, speaking: bool);
}

enum Command {
    Enqueue(AudioChunk),
    StopAll,
}

pub struct PlaybackScheduler {
    commands: mpsc::UnboundedSender<Command>,
    speaking: watch::Receiver<bool>,
    cursor: watch::Receiver<PlaybackCursor>,
    task: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn AudioSink>,
}

impl PlaybackScheduler {
    /// Spawn the scheduler task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        decoder: Arc<dyn AudioDecoder>,
        sink: Arc<dyn AudioSink>,
        observer: Arc<dyn SpeakingObserver>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let queue = PlaybackQueue::new(Instant::now());
        let (speaking_tx, speaking) = watch::channel(false);
        let (cursor_tx, cursor) = watch::channel(queue.cursor());

        let worker = Worker {
            queue,
            decoder,
            sink: Arc::clone(&sink),
            observer,
            events,
            speaking: speaking_tx,
            cursor: cursor_tx,
        };
        let task = tokio::spawn(worker.run(rx));

        Self {
            commands,
            speaking,
            cursor,
            task: Mutex::new(Some(task)),
            sink,
        }
    }

    /// Append a chunk to the queue
    pub fn enqueue(&self, chunk: AudioChunk) {
        if self.commands.send(Command::Enqueue(chunk)).is_err() {
            debug!("Playback scheduler stopped, dropping chunk");
        }
    }

    /// Stop the active source and drop everything queued
    pub fn stop_all(&self) {
        if self.commands.send(Command::StopAll).is_err() {
            debug!("Playback scheduler already stopped");
        }
    }

    /// True while any scheduled audio is outstanding
    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow() && self.is_running()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }

    pub fn cursor(&self) -> PlaybackCursor {
        *self.cursor.borrow()
    }

    /// Stop playback and end the scheduler task
    pub fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            self.sink.stop();
            info!("Playback scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    queue: PlaybackQueue,
    decoder: Arc<dyn AudioDecoder>,
    sink: Arc<dyn AudioSink>,
    observer: Arc<dyn SpeakingObserver>,
    events: broadcast::Sender<SessionEvent>,
    speaking: watch::Sender<bool>,
    cursor: watch::Sender<PlaybackCursor>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Playback scheduler task started");

        loop {
            let deadline = self.queue.current().map(|chunk| chunk.end());

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(chunk)) => {
                        debug!("Queued audio chunk ({} bytes)", chunk.len());
                        self.queue.enqueue(chunk);
                        self.pump();
                    }
                    Some(Command::StopAll) => self.stop_all(),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(finished) = self.queue.complete() {
                        debug!("Chunk {} finished", finished.sequence);
                    }
                    self.pump();
                }
            }
        }

        self.sink.stop();
        debug!("Playback scheduler task stopped");
    }

    /// Start the next chunk if nothing is playing, then publish state
    fn pump(&mut self) {
        loop {
            let now = Instant::now();
            match self.queue.schedule_next(now, self.decoder.as_ref()) {
                Ok(Some((scheduled, audio))) => {
                    // Capture must stop before the source starts
                    self.set_speaking(true);

                    match self.sink.play(&audio, scheduled.start) {
                        Ok(()) => {
                            debug!(
                                "Chunk {} scheduled for {:?} ({:.3}s)",
                                scheduled.sequence,
                                scheduled.start.saturating_duration_since(now),
                                scheduled.duration.as_secs_f64()
                            );
                            break;
                        }
                        Err(e) => {
                            error!("Audio output rejected chunk {}: {:#}", scheduled.sequence, e);
                            self.queue.abandon_current(now);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{}", e);
                    let _ = self.events.send(SessionEvent::Warning(e));
                    break;
                }
            }
        }

        self.publish();
    }

    fn stop_all(&mut self) {
        if self.queue.is_speaking() {
            info!("Stopping playback ({} chunks dropped)", self.queue.pending_len());
        }
        self.sink.stop();
        self.queue.clear(Instant::now());
        self.publish();
    }

    fn publish(&mut self) {
        let speaking = self.queue.is_speaking();
        self.set_speaking(speaking);
        self.cursor.send_replace(self.queue.cursor());
    }

    fn set_speaking(&mut self, speaking: bool) {
        if *self.speaking.borrow() == speaking {
            return;
        }
        // Observers hear of a start before it is visible and of a stop after
        if speaking {
            self.observer.speaking_changed(SpeakingSource::Playback, true);
            self.speaking.send_replace(true);
        } else {
            self.speaking.send_replace(false);
            self.observer.speaking_changed(SpeakingSource::Playback, false);
        }
    }
}
