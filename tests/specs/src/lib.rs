// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end broker scenarios.
//!
//! Serves a real broker (in-process axum server on a random port) and
//! exercises it over WebSocket with a plain tungstenite client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use switchboard::adapter::AdapterResolver;
use switchboard::config::Config;
use switchboard::coordinator::Coordinator;
use switchboard::test_support::FakeAdapter;
use switchboard::transport::{build_router, TransportState};

pub type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// A broker served on a random local port.
pub struct SpecServer {
    pub addr: std::net::SocketAddr,
    pub coordinator: Arc<Coordinator>,
    _task: tokio::task::JoinHandle<()>,
}

impl SpecServer {
    /// Start a broker with the given config tweaks and a direct-style fake
    /// adapter registered as "fake".
    pub async fn start(mutate: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let mut config = Config::default();
        config.idle_session_timeout_ms = 0;
        mutate(&mut config);

        let (adapter, _endpoints) = FakeAdapter::new(switchboard::adapter::ConnectionStyle::Direct);
        let mut resolver = AdapterResolver::new();
        resolver.register(adapter);
        let coordinator = Coordinator::builder(config)
            .resolver(resolver)
            .tracer(switchboard::trace::noop_tracer())
            .build();

        let state = TransportState::new(Arc::clone(&coordinator));
        let router = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, coordinator, _task: task })
    }

    pub async fn connect(&self, path_and_query: &str) -> anyhow::Result<Socket> {
        let url = format!("ws://{}{}", self.addr, path_and_query);
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(socket)
    }
}

/// Receive the next text frame as JSON, with a timeout.
pub async fn recv_json(socket: &mut Socket) -> anyhow::Result<Value> {
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

/// Message type of a frame: sequenced wrapper or bare message.
pub fn frame_type(frame: &Value) -> &str {
    frame
        .get("payload")
        .and_then(|p| p.get("type"))
        .or_else(|| frame.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Skip frames until one matches.
pub async fn recv_until(
    socket: &mut Socket,
    want: impl Fn(&Value) -> bool,
) -> anyhow::Result<Value> {
    for _ in 0..32 {
        let frame = recv_json(socket).await?;
        if want(&frame) {
            return Ok(frame);
        }
    }
    anyhow::bail!("expected frame never arrived")
}

/// True when no text frame arrives within the window.
pub async fn silent_for(socket: &mut Socket, window: Duration) -> bool {
    match tokio::time::timeout(window, socket.next()).await {
        Err(_) => true,
        Ok(Some(Ok(WsMessage::Text(_)))) => false,
        Ok(_) => true,
    }
}
