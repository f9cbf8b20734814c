// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::adapter::AdapterResolver;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::message::{Role, UnifiedMessage, UnifiedType};
use crate::test_support::FakeAdapter;
use crate::transport::{build_router, TransportState};

struct Server {
    addr: std::net::SocketAddr,
    coordinator: Arc<Coordinator>,
    _task: tokio::task::JoinHandle<()>,
}

async fn serve(mut mutate: impl FnMut(&mut Config)) -> anyhow::Result<Server> {
    let mut config = Config::default();
    config.idle_session_timeout_ms = 0;
    mutate(&mut config);

    let (adapter, _endpoints) = FakeAdapter::new(crate::adapter::ConnectionStyle::Direct);
    let mut resolver = AdapterResolver::new();
    resolver.register(adapter);
    let coordinator = Coordinator::builder(config)
        .resolver(resolver)
        .tracer(crate::trace::noop_tracer())
        .build();

    let state = TransportState::new(Arc::clone(&coordinator));
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(Server { addr, coordinator, _task: task })
}

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(server: &Server, path_and_query: &str) -> anyhow::Result<Socket> {
    let url = format!("ws://{}{}", server.addr, path_and_query);
    let (socket, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(socket)
}

async fn recv_json(socket: &mut Socket) -> anyhow::Result<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?;
        match frame {
            Some(Ok(WsMessage::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(WsMessage::Close(_))) | None => anyhow::bail!("socket closed"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => anyhow::bail!("socket error: {e}"),
        }
    }
}

/// Collect frames until one matches, failing after a bound.
async fn recv_until(
    socket: &mut Socket,
    want: impl Fn(&Value) -> bool,
) -> anyhow::Result<Value> {
    for _ in 0..20 {
        let frame = recv_json(socket).await?;
        if want(&frame) {
            return Ok(frame);
        }
    }
    anyhow::bail!("expected frame never arrived")
}

fn frame_type(frame: &Value) -> &str {
    // Live broadcasts arrive as sequenced wrappers; direct sends are bare.
    frame
        .get("payload")
        .and_then(|p| p.get("type"))
        .or_else(|| frame.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

#[tokio::test]
async fn unknown_session_gets_structured_error() -> anyhow::Result<()> {
    let server = serve(|_| {}).await?;
    let mut socket = connect(&server, "/ws/nope").await?;
    let frame = recv_json(&mut socket).await?;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "UNKNOWN_SESSION");
    Ok(())
}

#[tokio::test]
async fn bad_token_is_rejected() -> anyhow::Result<()> {
    let server = serve(|c| c.auth_token = Some("secret".to_owned())).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1?token=wrong").await?;
    let frame = recv_json(&mut socket).await?;
    assert_eq!(frame["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn good_token_connects_and_sees_cli_marker() -> anyhow::Result<()> {
    let server = serve(|c| c.auth_token = Some("secret".to_owned())).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1?token=secret").await?;
    let frame = recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;
    assert_eq!(frame["connected"], false);
    Ok(())
}

#[tokio::test]
async fn user_message_echo_is_broadcast_sequenced() -> anyhow::Result<()> {
    let server = serve(|_| {}).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1").await?;
    recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;

    socket
        .send(WsMessage::Text(
            json!({"type": "user_message", "content": "hello"}).to_string().into(),
        ))
        .await?;

    let frame = recv_until(&mut socket, |f| frame_type(f) == "user_message").await?;
    assert!(frame.get("seq").is_some());
    Ok(())
}

#[tokio::test]
async fn oversize_frame_gets_message_too_large() -> anyhow::Result<()> {
    let server = serve(|c| c.max_consumer_message_size = 64).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1").await?;
    recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;

    let big = "x".repeat(128);
    socket
        .send(WsMessage::Text(
            json!({"type": "user_message", "content": big}).to_string().into(),
        ))
        .await?;

    let frame = recv_until(&mut socket, |f| frame_type(f) == "error").await?;
    assert_eq!(frame["code"], "MESSAGE_TOO_LARGE");
    Ok(())
}

#[tokio::test]
async fn invalid_json_gets_bad_request() -> anyhow::Result<()> {
    let server = serve(|_| {}).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1").await?;
    recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;

    socket.send(WsMessage::Text("not json".into())).await?;
    let frame = recv_until(&mut socket, |f| frame_type(f) == "error").await?;
    assert_eq!(frame["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn rate_limit_rejects_burst_overflow() -> anyhow::Result<()> {
    let server = serve(|c| {
        c.rate_limit_burst_size = 1;
        c.rate_limit_tokens_per_second = 0.001;
    })
    .await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1").await?;
    recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;

    for _ in 0..2 {
        socket
            .send(WsMessage::Text(
                json!({"type": "presence_query"}).to_string().into(),
            ))
            .await?;
    }
    let frame = recv_until(&mut socket, |f| frame_type(f) == "error").await?;
    assert_eq!(frame["code"], "RATE_LIMITED");
    Ok(())
}

#[tokio::test]
async fn replay_cursor_receives_only_newer_messages() -> anyhow::Result<()> {
    let server = serve(|_| {}).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    // Seed five broadcasts before anyone connects.
    let runtime = server
        .coordinator
        .bridge()
        .session("s-1")
        .await
        .ok_or_else(|| anyhow::anyhow!("session missing"))?;
    for i in 1..=5 {
        let msg = UnifiedMessage::new(UnifiedType::StatusChange, Role::System)
            .with_meta("status", json!(format!("m{i}")));
        server.coordinator.bridge().router().route(&runtime, msg).await;
    }

    let mut socket = connect(&server, "/ws/s-1?last_seen_seq=3").await?;
    let first = recv_json(&mut socket).await?;
    let second = recv_json(&mut socket).await?;
    assert_eq!(first["seq"], 4);
    assert_eq!(second["seq"], 5);
    // Next frame is the cli marker, not more replay.
    let frame = recv_json(&mut socket).await?;
    assert_eq!(frame_type(&frame), "cli_connected");
    Ok(())
}

#[tokio::test]
async fn observer_input_is_refused() -> anyhow::Result<()> {
    let server = serve(|_| {}).await?;
    server.coordinator.create_session("s-1", "fake", None).await?;

    let mut socket = connect(&server, "/ws/s-1?role=observer").await?;
    recv_until(&mut socket, |f| frame_type(f) == "cli_connected").await?;

    socket
        .send(WsMessage::Text(
            json!({"type": "user_message", "content": "hi"}).to_string().into(),
        ))
        .await?;
    let frame = recv_until(&mut socket, |f| frame_type(f) == "error").await?;
    assert_eq!(frame["code"], "UNAUTHORIZED");
    Ok(())
}
