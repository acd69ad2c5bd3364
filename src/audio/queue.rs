//! Gapless playback queue
//!
//! Chunks play strictly in arrival order, each starting exactly where the
//! previous one ended. If the cursor has fallen behind the audio clock
//! (chunks arriving slower than real time) it is clamped forward to "now"
//! before the next chunk starts, so gaps never compound.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::decoder::{AudioChunk, AudioDecoder, DecodedAudio};
use crate::error::SessionError;

/// A chunk placed on the audio clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledChunk {
    /// Position in arrival order, starting at 0
    pub sequence: u64,
    pub start: Instant,
    pub duration: Duration,
}

impl ScheduledChunk {
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }
}

/// Read-only view of the playback cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub next_play_time: Instant,
    pub currently_playing: Option<ScheduledChunk>,
}

pub struct PlaybackQueue {
    pending: VecDeque<AudioChunk>,
    next_play_time: Instant,
    current: Option<ScheduledChunk>,
    next_sequence: u64,
}

impl PlaybackQueue {
    pub fn new(now: Instant) -> Self {
        Self {
            pending: VecDeque::new(),
            next_play_time: now,
            current: None,
            next_sequence: 0,
        }
    }

    pub fn enqueue(&mut self, chunk: AudioChunk) {
        self.pending.push_back(chunk);
    }

    /// True while any audio is playing or queued
    pub fn is_speaking(&self) -> bool {
        self.current.is_some() || !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn current(&self) -> Option<ScheduledChunk> {
        self.current
    }

    pub fn cursor(&self) -> PlaybackCursor {
        PlaybackCursor {
            next_play_time: self.next_play_time,
            currently_playing: self.current,
        }
    }

    /// Decode the head chunk and place it on the clock
    ///
    /// Returns `Ok(None)` if a chunk is already playing or nothing is
    /// queued. A decode failure drops the chunk, clears the queue and resets
    /// the cursor to `now`.
    pub fn schedule_next(
        &mut self,
        now: Instant,
        decoder: &dyn AudioDecoder,
    ) -> Result<Option<(ScheduledChunk, DecodedAudio)>, SessionError> {
        if self.current.is_some() {
            return Ok(None);
        }
        let Some(chunk) = self.pending.pop_front() else {
            return Ok(None);
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let audio = match decoder.decode(&chunk) {
            Ok(audio) => audio,
            Err(e) => {
                self.pending.clear();
                self.reset_cursor(now);
                return Err(SessionError::AudioDecode(format!("chunk {}: {:#}", sequence, e)));
            }
        };

        if self.next_play_time < now {
            self.next_play_time = now;
        }

        let scheduled = ScheduledChunk {
            sequence,
            start: self.next_play_time,
            duration: audio.duration(),
        };
        self.current = Some(scheduled);

        Ok(Some((scheduled, audio)))
    }

    /// The current chunk finished; advance the cursor by its duration
    pub fn complete(&mut self) -> Option<ScheduledChunk> {
        let finished = self.current.take()?;
        self.next_play_time = finished.end();
        Some(finished)
    }

    /// Drop the current chunk without advancing the cursor
    pub fn abandon_current(&mut self, now: Instant) -> Option<ScheduledChunk> {
        let abandoned = self.current.take();
        self.reset_cursor(now);
        abandoned
    }

    /// Drop everything and reset the cursor to `now`
    pub fn clear(&mut self, now: Instant) {
        self.pending.clear();
        self.current = None;
        self.reset_cursor(now);
    }

    fn reset_cursor(&mut self, now: Instant) {
        // The cursor never moves backwards
        self.next_play_time = self.next_play_time.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};

    /// Reads the chunk as a duration in milliseconds; "bad" fails to decode
    struct MillisDecoder;

    impl AudioDecoder for MillisDecoder {
        fn decode(&self, chunk: &AudioChunk) -> Result<DecodedAudio> {
            let text = std::str::from_utf8(chunk.bytes())?;
            if text == "bad" {
                bail!("corrupt chunk");
            }
            let millis: usize = text.parse()?;
            Ok(DecodedAudio {
                samples: vec![0.0; millis],
                sample_rate: 1000,
                channels: 1,
            })
        }
    }

    fn chunk(millis: &str) -> AudioChunk {
        AudioChunk::new(millis.as_bytes().to_vec())
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// Play everything queued back to back, completing each chunk at its end
    fn drain(queue: &mut PlaybackQueue, now: Instant) -> Vec<ScheduledChunk> {
        let mut played = Vec::new();
        let mut clock = now;
        while let Ok(Some((scheduled, _))) = queue.schedule_next(clock, &MillisDecoder) {
            played.push(scheduled);
            clock = scheduled.end();
            queue.complete();
        }
        played
    }

    #[test]
    fn test_back_to_back_intervals() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);
        for millis in ["1000", "500", "2000"] {
            queue.enqueue(chunk(millis));
        }

        let played = drain(&mut queue, t0);
        let intervals: Vec<(Duration, Duration)> = played
            .iter()
            .map(|c| (c.start - t0, c.end() - t0))
            .collect();

        assert_eq!(
            intervals,
            [(ms(0), ms(1000)), (ms(1000), ms(1500)), (ms(1500), ms(3500))]
        );
        assert_eq!(queue.cursor().next_play_time - t0, ms(3500));
        assert!(!queue.is_speaking());
    }

    #[test]
    fn test_never_starts_before_previous_end() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);
        for millis in ["40", "10", "250", "5", "90", "1"] {
            queue.enqueue(chunk(millis));
        }

        let played = drain(&mut queue, t0);
        assert_eq!(played.len(), 6);
        for pair in played.windows(2) {
            assert!(pair[1].start >= pair[0].end());
        }
    }

    #[test]
    fn test_late_chunk_clamped_to_now() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);

        queue.enqueue(chunk("100"));
        let (first, _) = queue.schedule_next(t0, &MillisDecoder).unwrap().unwrap();
        queue.complete();

        // Next chunk arrives 400ms after the first one ended
        let arrival = first.end() + ms(400);
        queue.enqueue(chunk("100"));
        let (second, _) = queue.schedule_next(arrival, &MillisDecoder).unwrap().unwrap();

        assert_eq!(second.start, arrival);
    }

    #[test]
    fn test_slow_arrivals_never_drift() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);
        let mut now = t0;

        for _ in 0..20 {
            // 200ms chunks arriving every 350ms
            queue.enqueue(chunk("200"));
            let (scheduled, _) = queue.schedule_next(now, &MillisDecoder).unwrap().unwrap();
            assert_eq!(scheduled.start, now, "cursor must catch up to the clock");

            now = scheduled.end();
            queue.complete();
            now += ms(150);
        }
    }

    #[test]
    fn test_only_one_chunk_scheduled_at_a_time() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);
        queue.enqueue(chunk("100"));
        queue.enqueue(chunk("100"));

        assert!(queue.schedule_next(t0, &MillisDecoder).unwrap().is_some());
        assert!(queue.schedule_next(t0, &MillisDecoder).unwrap().is_none());
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_decode_failure_clears_queue() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);
        queue.enqueue(chunk("bad"));
        queue.enqueue(chunk("100"));
        queue.enqueue(chunk("100"));

        let later = t0 + ms(250);
        let err = queue.schedule_next(later, &MillisDecoder).unwrap_err();

        assert!(matches!(err, SessionError::AudioDecode(_)));
        assert!(!queue.is_speaking());
        assert_eq!(queue.cursor().next_play_time, later);

        // Playback resumes with the next chunk that arrives
        queue.enqueue(chunk("100"));
        let (scheduled, _) = queue.schedule_next(later, &MillisDecoder).unwrap().unwrap();
        assert_eq!(scheduled.start, later);
    }

    #[test]
    fn test_clear_never_moves_cursor_backwards() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(t0);
        queue.enqueue(chunk("1000"));
        let (scheduled, _) = queue.schedule_next(t0, &MillisDecoder).unwrap().unwrap();
        queue.complete();
        assert_eq!(queue.cursor().next_play_time, scheduled.end());

        queue.clear(t0 + ms(10));
        assert_eq!(queue.cursor().next_play_time, scheduled.end());

        queue.clear(t0 + ms(5000));
        assert_eq!(queue.cursor().next_play_time, t0 + ms(5000));
    }
}
