use anyhow::{bail, Context, Result};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Encoded synthesized-speech chunk, played in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Decoded PCM audio (f32, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Playback length of the decoded samples
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

/// Turns encoded chunks into playable audio
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, chunk: &AudioChunk) -> Result<DecodedAudio>;
}

/// Decoder backed by symphonia's format probe and codec registry
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, chunk: &AudioChunk) -> Result<DecodedAudio> {
        if chunk.is_empty() {
            bail!("audio chunk is empty");
        }

        let source = Cursor::new(chunk.bytes().to_vec());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("Unrecognised audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No decodable audio track in chunk")?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Unsupported audio codec")?;

        let mut samples = Vec::new();
        let mut sample_rate = 0;
        let mut channels = 0;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder
                .decode(&packet)
                .context("Failed to decode audio packet")?;
            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        if sample_rate == 0 || samples.is_empty() {
            bail!("audio chunk contained no samples");
        }

        debug!(
            "Decoded chunk: {} bytes -> {} samples, {}Hz, {} channels",
            chunk.len(),
            samples.len(),
            sample_rate,
            channels
        );

        Ok(DecodedAudio {
            samples,
            sample_rate,
            channels,
        })
    }
}
