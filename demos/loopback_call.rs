// Scripted call against the in-memory room
//
// An agent joins, greets the user with synthesized WAV chunks, the user
// answers through the loopback recognizer, and the call ends.
//
// Run with: RUST_LOG=debug cargo run --example loopback_call

use anyhow::Result;
use avatar_call::audio::{AudioSink, DecodedAudio, SymphoniaDecoder};
use avatar_call::room::{AgentMessage, LoopbackRoom, TranscriptSpeaker};
use avatar_call::session::{
    CallSession, SessionComponents, SessionConfig, SessionCredentials, SessionEvent,
    SessionMetadata,
};
use avatar_call::speech::LoopbackRecognizer;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

/// Audio output that only logs what it would play
struct LoggingSink {
    started: Instant,
}

impl AudioSink for LoggingSink {
    fn play(&self, audio: &DecodedAudio, at: Instant) -> Result<()> {
        info!(
            "Playing {:.2}s of audio at +{:.2}s",
            audio.duration().as_secs_f64(),
            at.duration_since(self.started).as_secs_f64()
        );
        Ok(())
    }

    fn stop(&self) {
        info!("Output stopped");
    }
}

/// Mono 16 kHz sine tone as WAV bytes
fn tone(ms: u32, frequency: f32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for i in 0..(16 * ms) {
            let t = i as f32 / 16_000.0;
            let sample = (t * frequency * 2.0 * std::f32::consts::PI).sin() * 0.2;
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let (room, remote) = LoopbackRoom::new("demo-user");
    let (recognizer, recognition_events, speech) = LoopbackRecognizer::new();

    let config = SessionConfig {
        language: Some("en-US".to_string()),
        ..SessionConfig::default()
    };
    let session = CallSession::new(
        config,
        SessionComponents {
            transport: Box::new(room),
            recognizer: Box::new(recognizer),
            recognition_events,
            decoder: Arc::new(SymphoniaDecoder::new()),
            audio_output: Arc::new(LoggingSink {
                started: Instant::now(),
            }),
            track_audio_output: None,
        },
    );

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged { from, to } => info!("State: {} -> {}", from, to),
                SessionEvent::TranscriptAppended(entry) => {
                    info!("[{:?}] {}", entry.role, entry.text)
                }
                SessionEvent::SpeakingChanged(speaking) => info!("Avatar speaking: {}", speaking),
                SessionEvent::Warning(err) => info!("Warning: {}", err),
                SessionEvent::Ended { summary, .. } => {
                    info!("Call ended after {}s", summary.duration_seconds)
                }
                _ => {}
            }
        }
    });

    let credentials = SessionCredentials {
        token: "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJkZW1vIn0.ZGVtbw".to_string(),
        ws_url: "wss://media.example.com".to_string(),
        room_name: "demo-room".to_string(),
        metadata: SessionMetadata {
            avatar_id: Some("demo-avatar".to_string()),
            ..SessionMetadata::default()
        },
    };
    session.connect(credentials).await?;

    sleep(Duration::from_millis(200)).await;
    remote.join("agent-demo");
    sleep(Duration::from_millis(100)).await;

    // Agent greets the user
    remote.send_message(&AgentMessage::Transcript {
        role: TranscriptSpeaker::Assistant,
        text: "Hi! How can I help you today?".to_string(),
    });
    for (ms, frequency) in [(400, 440.0), (300, 523.0), (500, 392.0)] {
        remote.send_audio(tone(ms, frequency)?);
    }

    sleep(Duration::from_millis(1400)).await;
    info!("Listening: {}", session.is_listening());

    // User answers
    speech.interim("I'd like");
    speech.finalize("I'd like to book a table");
    sleep(Duration::from_millis(1200)).await;

    let summary = session.disconnect().await;
    info!(
        "Summary: session {} lasted {}s",
        summary.session_id, summary.duration_seconds
    );
    for entry in session.transcript() {
        info!("{:?}: {}", entry.role, entry.text);
    }
    info!("Client sent {} messages", remote.published().len());

    Ok(())
}
