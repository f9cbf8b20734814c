// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end broker scenarios over a real WebSocket transport.

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use switchboard::broadcast::{Broadcaster, WireCodec};
use switchboard::message::{Role, UnifiedMessage, UnifiedType};
use switchboard::test_support::{bucket, conn, new_session, RecordingSink};
use switchboard::wire::{ConsumerMessage, ConsumerRole};

use switchboard_specs::{frame_type, recv_json, recv_until, silent_for, SpecServer};

/// Reconnection replay: five broadcast messages, a consumer reporting
/// `last_seen_seq = 3` receives exactly seq 4 and 5, in order, with no
/// initial window.
#[tokio::test]
async fn replay_resumes_after_last_seen_seq() -> anyhow::Result<()> {
    let server = SpecServer::start(|_| {}).await?;
    server.coordinator.create_session("S", "fake", None).await?;
    let runtime = server
        .coordinator
        .bridge()
        .session("S")
        .await
        .ok_or_else(|| anyhow::anyhow!("session missing"))?;

    for i in 1..=5 {
        let msg = UnifiedMessage::new(UnifiedType::StatusChange, Role::System)
            .with_meta("status", json!(format!("m{i}")));
        server.coordinator.bridge().router().route(&runtime, msg).await;
    }

    let mut socket = server.connect("/ws/S?last_seen_seq=3").await?;
    let first = recv_json(&mut socket).await?;
    let second = recv_json(&mut socket).await?;
    assert_eq!(first["seq"], 4);
    assert_eq!(first["payload"]["status"], "m4");
    assert_eq!(second["seq"], 5);
    assert_eq!(second["payload"]["status"], "m5");

    // No replay window follows, only the connection marker.
    let next = recv_json(&mut socket).await?;
    assert_eq!(frame_type(&next), "cli_connected");
    Ok(())
}

/// Re-pairing invalidates old frames: after the codec is swapped for a new
/// peer, frames decode with the new peer's codec and fail with the old one.
#[tokio::test]
async fn codec_swap_invalidates_previous_peer() -> anyhow::Result<()> {
    /// XOR-ish stand-in for an encrypting codec: hex with a per-peer key
    /// byte. Decode with the wrong key yields garbage that fails JSON
    /// parsing downstream.
    struct KeyedCodec(u8);
    impl WireCodec for KeyedCodec {
        fn encode(&self, plaintext: &str) -> anyhow::Result<String> {
            Ok(plaintext.bytes().map(|b| format!("{:02x}", b ^ self.0)).collect())
        }
        fn decode(&self, wire: &str) -> anyhow::Result<String> {
            let bytes: Result<Vec<u8>, _> = (0..wire.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(wire.get(i..i + 2).unwrap_or(""), 16))
                .collect();
            let decoded: Vec<u8> = bytes?.into_iter().map(|b| b ^ self.0).collect();
            Ok(String::from_utf8(decoded)?)
        }
    }

    let sink = RecordingSink::new();
    let mut session = new_session("S");
    session.attach_consumer(conn("c", ConsumerRole::Participant, sink.clone()), bucket());

    let payloads = ["m1", "m2", "m3"];
    let old_peer = KeyedCodec(0x2a);
    let new_peer = KeyedCodec(0x55);

    // Deliver the three messages sealed for the new peer.
    let broadcaster = Broadcaster::new(1_048_576, switchboard::trace::noop_tracer())
        .with_codec(Arc::new(KeyedCodec(0x55)));
    for status in payloads {
        broadcaster
            .broadcast(&mut session, &ConsumerMessage::StatusChange { status: status.to_owned() });
    }

    let frames = sink.sent();
    assert_eq!(frames.len(), 3);
    for (frame, status) in frames.iter().zip(payloads) {
        // The new peer decodes every frame.
        let plain = new_peer.decode(frame)?;
        let value: Value = serde_json::from_str(&plain)?;
        assert_eq!(value["status"], status);

        // The old peer must fail on every frame; no silent acceptance.
        let stale = old_peer.decode(frame).and_then(|text| {
            serde_json::from_str::<Value>(&text).map_err(anyhow::Error::from)
        });
        assert!(stale.is_err(), "old peer decoded frame: {frame:?}");
    }
    Ok(())
}

/// Backpressure drop: the consumer over threshold is skipped, the healthy
/// one receives the exact frame, the callback fires once, both stay.
#[tokio::test]
async fn backpressure_skips_slow_consumer() -> anyhow::Result<()> {
    const THRESHOLD: usize = 1024;
    let calls: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let broadcaster = Broadcaster::new(THRESHOLD, switchboard::trace::noop_tracer())
        .with_callback(Arc::new(move |session_id, _msg| {
            if let Ok(mut calls) = recorded.lock() {
                calls.push(session_id.to_owned());
            }
        }));

    let mut session = new_session("S");
    let a = RecordingSink::new();
    a.set_buffered(THRESHOLD + 1);
    let b = RecordingSink::new();
    session.attach_consumer(conn("a", ConsumerRole::Participant, a.clone()), bucket());
    session.attach_consumer(conn("b", ConsumerRole::Participant, b.clone()), bucket());

    broadcaster
        .broadcast(&mut session, &ConsumerMessage::StatusChange { status: "idle".to_owned() });

    assert_eq!(a.sent_count(), 0);
    assert_eq!(b.sent(), [r#"{"type":"status_change","status":"idle"}"#]);
    let calls = calls.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(calls, ["S"]);
    assert_eq!(session.consumers().len(), 2);
    Ok(())
}

/// An unknown permission reply is a silent no-op: no backend send, no
/// consumer-visible error.
#[tokio::test]
async fn unknown_permission_reply_is_silent() -> anyhow::Result<()> {
    let server = SpecServer::start(|_| {}).await?;
    server.coordinator.create_session("S", "fake", None).await?;

    let mut socket = server.connect("/ws/S").await?;
    recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;

    socket
        .send(WsMessage::Text(
            json!({
                "type": "permission_response",
                "request_id": "no-such-id",
                "behavior": "allow",
            })
            .to_string()
            .into(),
        ))
        .await?;

    assert!(silent_for(&mut socket, Duration::from_millis(500)).await);
    Ok(())
}

/// Idle reap: with a 100 ms timeout and 10 ms sweep interval, an abandoned
/// session disappears from both the bridge and the registry.
#[tokio::test]
async fn idle_session_is_reaped() -> anyhow::Result<()> {
    let server = SpecServer::start(|c| {
        c.idle_session_timeout_ms = 100;
        c.idle_check_interval_ms = 10;
    })
    .await?;
    server.coordinator.create_session("S", "fake", None).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.coordinator.bridge().session("S").await.is_some() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "session never reaped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while server.coordinator.registry().contains("S").await {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "registry still lists session");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Role filter: a participant sees process output, an observer sees nothing
/// within the watch window, and both remain attached.
#[tokio::test]
async fn observer_never_sees_process_output() -> anyhow::Result<()> {
    let server = SpecServer::start(|_| {}).await?;
    server.coordinator.create_session("S", "fake", None).await?;

    let mut participant = server.connect("/ws/S").await?;
    recv_until(&mut participant, |f| frame_type(f) == "cli_connected").await?;
    let mut observer = server.connect("/ws/S?role=observer").await?;
    recv_until(&mut observer, |f| frame_type(f) == "cli_connected").await?;
    // The observer's attach triggers a presence broadcast; drain it on both
    // sockets before watching for silence.
    recv_until(&mut participant, |f| frame_type(f) == "presence_update").await?;
    recv_until(&mut observer, |f| frame_type(f) == "presence_update").await?;

    let runtime = server
        .coordinator
        .bridge()
        .session("S")
        .await
        .ok_or_else(|| anyhow::anyhow!("session missing"))?;
    {
        let mut session = runtime.lock().await;
        server
            .coordinator
            .bridge()
            .router()
            .broadcaster()
            .broadcast_process_output(&mut session, "stderr", "HELLO");
    }

    let frame = recv_until(&mut participant, |f| frame_type(f) == "process_output").await?;
    let payload = frame.get("payload").cloned().unwrap_or(frame);
    assert_eq!(payload["stream"], "stderr");
    assert_eq!(payload["data"], "HELLO");

    assert!(silent_for(&mut observer, Duration::from_secs(1)).await);

    let consumer_count = runtime.lock().await.consumers().len();
    assert_eq!(consumer_count, 2);
    Ok(())
}
