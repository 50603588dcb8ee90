// End-to-end publish flows against an in-process ingest server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use castline_ingest::config::SessionConfig;
use castline_ingest::events::EndReason;
use common::*;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn test_publish_and_unpublish() {
    let mut harness = Harness::start(HarnessOptions::default()).await;
    let mut client = TestClient::connect(harness.addr).await;

    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, owner_id) = started(harness.next_event().await);
    assert_eq!(owner_id, "U1");
    assert_eq!(harness.authenticator.holder("key123"), Some(session_id.clone()));

    let job = harness.supervisor.job(&session_id).unwrap();
    let names: Vec<_> = job.variants().iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["720p", "480p", "dash"]);
    for name in names {
        assert!(harness.output_root.path().join(&session_id).join(name).is_dir());
    }

    client.send_metadata().await;
    client.send_video(0, AVC_SEQUENCE_HEADER).await;
    client.send_audio(0, AAC_SEQUENCE_HEADER).await;
    client.send_video(0, AVC_KEY_FRAME).await;
    client.send_video(33, AVC_INTER_FRAME).await;

    client
        .send_command(
            "deleteStream",
            castline_rtmp::amf0::Amf0ValueType::Null,
            vec![castline_rtmp::amf0::Amf0ValueType::Number(1.0)],
        )
        .await;
    assert_eq!(client.expect_status().await, "NetStream.Unpublish.Success");

    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, session_id);
    assert_eq!(reason, EndReason::Unpublished);
    assert_eq!(harness.authenticator.holder("key123"), None);
    assert_eq!(harness.supervisor.active_jobs(), 0);
    client.expect_closed().await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_key_reusable_after_disconnect() {
    let mut harness = Harness::start(HarnessOptions::default()).await;

    let mut first = TestClient::connect(harness.addr).await;
    assert_eq!(first.publish("key123").await, PUBLISH_START);
    let (first_id, _) = started(harness.next_event().await);
    drop(first);

    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, first_id);
    assert_eq!(reason, EndReason::PeerDisconnected);

    // key passed in the query string this time
    let mut second = TestClient::connect(harness.addr).await;
    assert_eq!(second.publish("live?key=key123").await, PUBLISH_START);
    let (second_id, owner_id) = started(harness.next_event().await);
    assert_ne!(second_id, first_id);
    assert_eq!(owner_id, "U1");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_and_revoked_keys_rejected() {
    let mut harness = Harness::start(HarnessOptions::default()).await;

    for key in ["nope", "oldkey"] {
        let mut client = TestClient::connect(harness.addr).await;
        assert_eq!(client.publish(key).await, "NetStream.Publish.Rejected");
        client.expect_closed().await;
    }

    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(harness.authenticator.active_count(), 0);
    assert_eq!(harness.supervisor.active_jobs(), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_second_publisher_gets_bad_name() {
    let mut harness = Harness::start(HarnessOptions::default()).await;

    let mut first = TestClient::connect(harness.addr).await;
    assert_eq!(first.publish("key123").await, PUBLISH_START);
    let (first_id, _) = started(harness.next_event().await);

    let mut second = TestClient::connect(harness.addr).await;
    assert_eq!(second.publish("key123").await, "NetStream.Publish.BadName");
    second.expect_closed().await;

    // the original publisher is untouched
    assert_eq!(harness.authenticator.holder("key123"), Some(first_id));
    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));
    first.send_video(0, AVC_SEQUENCE_HEADER).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_idle_publisher_times_out() {
    let mut harness = Harness::start(HarnessOptions {
        session: SessionConfig {
            idle_timeout_ms: 400,
            ..HarnessOptions::default().session
        },
        ..HarnessOptions::default()
    })
    .await;

    let mut client = TestClient::connect(harness.addr).await;
    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, _) = started(harness.next_event().await);

    // steady media keeps the session alive past the idle timeout
    for i in 0..10 {
        client.send_video(i * 100, AVC_INTER_FRAME).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));

    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, session_id);
    assert_eq!(reason, EndReason::IdleTimeout);
    assert_eq!(harness.authenticator.holder("key123"), None);
    client.expect_closed().await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_encoder_budget_exhausted_fails_session_once() {
    let mut harness = Harness::start(HarnessOptions {
        encoder: "exit 3",
        restart_budget: 2,
        ..HarnessOptions::default()
    })
    .await;

    let mut client = TestClient::connect(harness.addr).await;
    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, _) = started(harness.next_event().await);

    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, session_id);
    assert_eq!(reason, EndReason::EncodeFailed);
    assert_eq!(harness.authenticator.holder("key123"), None);
    client.expect_closed().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(harness.supervisor.active_jobs(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_no_publish_before_auth_deadline() {
    let mut harness = Harness::start(HarnessOptions {
        session: SessionConfig {
            auth_timeout_ms: 300,
            ..HarnessOptions::default().session
        },
        ..HarnessOptions::default()
    })
    .await;

    let mut client = TestClient::connect(harness.addr).await;
    client.rtmp_connect().await;
    client.expect_closed().await;

    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_terminates_publishers() {
    let mut harness = Harness::start(HarnessOptions::default()).await;

    let mut client = TestClient::connect(harness.addr).await;
    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, _) = started(harness.next_event().await);

    harness.cancel.cancel();
    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, session_id);
    assert_eq!(reason, EndReason::Shutdown);
    client.expect_closed().await;
    assert_eq!(harness.authenticator.active_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_connections_over_capacity_are_dropped() {
    let harness = Harness::start(HarnessOptions {
        max_connections: 1,
        ..HarnessOptions::default()
    })
    .await;

    let mut first = TestClient::connect(harness.addr).await;
    first.rtmp_connect().await;

    let mut second = TestClient::connect_raw(harness.addr).await;
    second.expect_closed().await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_connection_reset_is_a_disconnect() {
    let mut harness = Harness::start(HarnessOptions::default()).await;
    let mut client = TestClient::connect(harness.addr).await;
    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, _) = started(harness.next_event().await);

    client.send_video(0, AVC_SEQUENCE_HEADER).await;
    client.reset();

    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, session_id);
    assert_eq!(reason, EndReason::PeerDisconnected);
    assert_eq!(harness.authenticator.holder("key123"), None);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_stalled_encoder_does_not_hold_the_session() {
    let mut harness = Harness::start(HarnessOptions {
        encoder: "exec sleep 30",
        session: SessionConfig {
            media_queue_capacity: 1,
            idle_timeout_ms: 400,
            ..HarnessOptions::default().session
        },
        ..HarnessOptions::default()
    })
    .await;
    let mut client = TestClient::connect(harness.addr).await;
    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, _) = started(harness.next_event().await);

    // more than the pipe to the encoder can hold
    let mut frame = AVC_INTER_FRAME.to_vec();
    frame.resize(100 * 1024, 0);
    for i in 0..4 {
        client.send_video(i * 33, &frame).await;
    }
    for _ in 0..3 {
        client.send_video(200, AVC_SEQUENCE_HEADER).await;
    }
    drop(client);

    let (ended, reason) = stopped(harness.next_event().await);
    assert_eq!(ended, session_id);
    assert!(matches!(
        reason,
        EndReason::PeerDisconnected | EndReason::IdleTimeout
    ));
    assert_eq!(harness.authenticator.holder("key123"), None);
    assert_eq!(harness.supervisor.active_jobs(), 0);

    harness.shutdown().await;
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_session_events_carry_span_fields() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let mut harness = Harness::start(HarnessOptions::default()).await;
    let mut client = TestClient::connect(harness.addr).await;
    assert_eq!(client.publish("key123").await, PUBLISH_START);
    let (session_id, _) = started(harness.next_event().await);
    drop(client);
    stopped(harness.next_event().await);
    harness.shutdown().await;

    let text = String::from_utf8(logs.0.lock().clone()).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    for message in ["rtmp connection accepted", "publishing", "rtmp connection closed"] {
        let event = events
            .iter()
            .find(|e| e["fields"]["message"] == message)
            .unwrap_or_else(|| panic!("no `{message}` event"));
        assert_eq!(event["span"]["name"], "rtmp_session");
        assert_eq!(event["span"]["session_id"], session_id.as_str());
        assert!(event["span"]["remote_addr"]
            .as_str()
            .unwrap()
            .starts_with("127.0.0.1:"));
    }
}
