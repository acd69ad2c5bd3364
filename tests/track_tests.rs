// Integration tests for track attachment
//
// Sinks may mount after their track arrives; attachment retries every
// 100ms up to 10 times and each track attaches at most once.

mod common;

use avatar_call::error::SessionError;
use avatar_call::room::{ParticipantRole, TrackKind, TrackSink};
use avatar_call::session::{ConnectionState, ConversationType, SessionConfig, SessionEvent};
use common::*;
use std::sync::Arc;
use std::time::Duration;

const AVATAR: &str = "avatar-agent";

fn video_config() -> SessionConfig {
    SessionConfig {
        conversation_type: ConversationType::Video,
        ..SessionConfig::default()
    }
}

async fn video_call() -> Call {
    let call = call(video_config());
    call.session.connect(credentials()).await.unwrap();
    call.remote.join(AVATAR);
    settle().await;
    call
}

#[tokio::test(start_paused = true)]
async fn test_video_sink_mounted_late_attaches_once() {
    let call = video_call().await;
    assert_eq!(call.session.state(), ConnectionState::Active);

    call.remote.publish_track("TR_V1", TrackKind::Video, AVATAR);
    settle().await;
    assert_eq!(call.session.pending_timers(), 1);

    tokio::time::sleep(Duration::from_millis(340)).await;
    let sink = Arc::new(RecordingTrackSink::default());
    let dyn_sink: Arc<dyn TrackSink> = sink.clone();
    call.session.video_slot().mount(&dyn_sink);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.attached(), ["TR_V1"]);
    assert_eq!(call.session.pending_timers(), 0);

    // Later retries never re-register
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.attached(), ["TR_V1"]);

    let participants = call.session.participants();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].role, ParticipantRole::RemoteAgent);
    assert!(participants[0].tracks["TR_V1"].attached);
}

#[tokio::test(start_paused = true)]
async fn test_mounted_sink_attaches_immediately() {
    let call = video_call().await;
    let sink = Arc::new(RecordingTrackSink::default());
    let dyn_sink: Arc<dyn TrackSink> = sink.clone();
    call.session.video_slot().mount(&dyn_sink);

    call.remote.publish_track("TR_V1", TrackKind::Video, AVATAR);
    settle().await;

    assert_eq!(sink.attached(), ["TR_V1"]);
    assert_eq!(call.session.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_attachment_gives_up_after_max_retries() {
    let mut call = video_call().await;

    call.remote.publish_track("TR_V1", TrackKind::Video, AVATAR);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(call.session.pending_timers(), 0);
    let warning = drain(&mut call.events)
        .into_iter()
        .find_map(|event| match event {
            SessionEvent::Warning(err) => Some(err),
            _ => None,
        });
    assert_eq!(
        warning,
        Some(SessionError::TrackAttachment {
            track_sid: "TR_V1".to_string(),
            attempts: 10,
        })
    );

    // The call carries on without video
    assert_eq!(call.session.state(), ConnectionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_cancels_retry() {
    let call = video_call().await;

    call.remote.publish_track("TR_V1", TrackKind::Video, AVATAR);
    tokio::time::sleep(Duration::from_millis(150)).await;
    call.remote.unpublish_track("TR_V1");
    settle().await;
    assert_eq!(call.session.pending_timers(), 0);

    let sink = Arc::new(RecordingTrackSink::default());
    let dyn_sink: Arc<dyn TrackSink> = sink.clone();
    call.session.video_slot().mount(&dyn_sink);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(sink.attached().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_voice_call_ignores_video() {
    let call = call(SessionConfig::default());
    call.session.connect(credentials()).await.unwrap();
    call.remote.join(AVATAR);

    let sink = Arc::new(RecordingTrackSink::default());
    let dyn_sink: Arc<dyn TrackSink> = sink.clone();
    call.session.video_slot().mount(&dyn_sink);

    call.remote.publish_track("TR_V1", TrackKind::Video, AVATAR);
    settle().await;

    assert!(sink.attached().is_empty());
    assert_eq!(call.session.pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_agent_audio_track_drives_speaking() {
    let call = active_call(listening_config()).await;
    let sink = Arc::new(RecordingTrackSink::default());
    let dyn_sink: Arc<dyn TrackSink> = sink.clone();
    call.session.audio_slot().mount(&dyn_sink);

    call.remote.publish_track("TR_A1", TrackKind::Audio, AGENT);
    settle().await;
    assert_eq!(sink.attached(), ["TR_A1"]);
    assert!(call.session.is_speaking());
    assert!(!call.session.is_listening());

    call.remote.set_active_speakers(&[]);
    settle().await;
    assert!(!call.session.is_speaking());
    assert!(call.session.is_listening());

    call.remote.set_active_speakers(&[AGENT]);
    settle().await;
    assert!(call.session.is_speaking());

    call.remote.unpublish_track("TR_A1");
    settle().await;
    assert!(!call.session.is_speaking());
    assert!(call.session.is_listening());
    assert_eq!(sink.detached(), ["TR_A1"]);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_detaches_tracks() {
    let call = video_call().await;
    let sink = Arc::new(RecordingTrackSink::default());
    let dyn_sink: Arc<dyn TrackSink> = sink.clone();
    call.session.video_slot().mount(&dyn_sink);

    call.remote.publish_track("TR_V1", TrackKind::Video, AVATAR);
    call.remote.publish_track("TR_V2", TrackKind::Video, "avatar-backup");
    settle().await;
    assert_eq!(sink.attached().len(), 2);

    call.session.disconnect().await;

    let mut detached = sink.detached();
    detached.sort();
    assert_eq!(detached, ["TR_V1", "TR_V2"]);
    assert!(call.session.participants().is_empty());
}
