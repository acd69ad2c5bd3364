use anyhow::Result;
use tokio::time::Instant;

use super::decoder::DecodedAudio;

/// Audio output the playback scheduler drives
///
/// Platform implementations own the device; the scheduler only decides
/// what plays and when.
pub trait AudioSink: Send + Sync {
    /// Start a source playing `audio` at audio-clock instant `at`
    fn play(&self, audio: &DecodedAudio, at: Instant) -> Result<()>;

    /// Force-stop the active source, if any
    fn stop(&self);
}

/// Sink that discards audio, for headless sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, _audio: &DecodedAudio, _at: Instant) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}
