// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer WebSocket handling.
//!
//! Each accepted socket is authenticated, attached to its session, brought
//! up to date (targeted replay when the client presents a replay cursor, a
//! short initial window otherwise), then served by a per-connection loop
//! that enforces the max frame size and the per-consumer rate limit before
//! dispatching frames to the bridge.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{ConsumerConn, ConsumerSink};
use crate::bus::DomainEvent;
use crate::error::ErrorCode;
use crate::ratelimit::TokenBucket;
use crate::transport::TransportState;
use crate::wire::{ClientMessage, ConnectParams, ConsumerMessage, ConsumerRole};

/// Outbound channel capacity per consumer connection.
const OUTBOUND_BUFFER: usize = 256;

/// Sink backed by the per-connection writer task. `buffered_bytes` counts
/// bytes accepted but not yet flushed to the socket.
pub struct WsSink {
    tx: mpsc::Sender<String>,
    buffered: Arc<AtomicUsize>,
    closed: CancellationToken,
}

impl WsSink {
    fn new(tx: mpsc::Sender<String>, buffered: Arc<AtomicUsize>, closed: CancellationToken) -> Self {
        Self { tx, buffered, closed }
    }
}

impl ConsumerSink for WsSink {
    fn send_text(&self, text: &str) -> anyhow::Result<()> {
        let len = text.len();
        self.buffered.fetch_add(len, Ordering::Relaxed);
        match self.tx.try_send(text.to_owned()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.buffered.fetch_sub(len, Ordering::Relaxed);
                anyhow::bail!("outbound queue unavailable: {e}")
            }
        }
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// WebSocket upgrade handler. Authentication runs before the upgrade
/// completes; failures surface as a structured error frame then close.
pub async fn ws_handler(
    State(state): State<Arc<TransportState>>,
    Path(session_id): Path<String>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, session_id, params, socket))
}

/// Per-connection setup and event loop.
async fn handle_connection(
    state: Arc<TransportState>,
    session_id: String,
    params: ConnectParams,
    socket: WebSocket,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let coordinator = &state.coordinator;
    let bridge = coordinator.bridge();
    let router = bridge.router();
    let broadcaster = router.broadcaster();
    let replay = router.replay();
    let config = coordinator.config();

    // Authenticate against the injected authenticator.
    if !state.authenticator.authenticate(&session_id, params.token.as_deref()) {
        tracing::warn!(session_id = %session_id, "auth:failed");
        send_error(&mut ws_tx, ErrorCode::Unauthorized, "authentication failed").await;
        let _ = ws_tx.close().await;
        return;
    }

    // Resolve the session from the handshake.
    let Some(runtime) = bridge.session(&session_id).await else {
        send_error(&mut ws_tx, ErrorCode::UnknownSession, format!("unknown session: {session_id}"))
            .await;
        let _ = ws_tx.close().await;
        return;
    };

    // Reuse a known consumer id, otherwise mint a fresh one. Unknown ids
    // are treated as brand new consumers.
    let consumer_id = match params.consumer_id.as_deref() {
        Some(offered) if !offered.is_empty() && replay.is_known(&session_id, offered).await => {
            offered.to_owned()
        }
        _ => uuid::Uuid::new_v4().to_string(),
    };
    replay.register_consumer(&session_id, &consumer_id).await;
    let role = params.role.unwrap_or(ConsumerRole::Participant);

    // Writer task: drains the outbound queue onto the socket.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let buffered = Arc::new(AtomicUsize::new(0));
    let closed = CancellationToken::new();
    let writer = {
        let buffered = Arc::clone(&buffered);
        let closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    text = out_rx.recv() => {
                        let Some(text) = text else { break };
                        let len = text.len();
                        let failed = ws_tx.send(Message::Text(text.into())).await.is_err();
                        buffered.fetch_sub(len, Ordering::Relaxed);
                        if failed {
                            break;
                        }
                    }
                }
            }
            let _ = ws_tx.close().await;
        })
    };

    let sink = Arc::new(WsSink::new(out_tx, Arc::clone(&buffered), closed.clone()));
    let conn = ConsumerConn { consumer_id: consumer_id.clone(), role, sink };

    // Attach, then bring the consumer up to date.
    {
        let mut session = runtime.lock().await;
        session.attach_consumer(
            conn.clone(),
            TokenBucket::new(config.rate_limit_burst_size, config.rate_limit_tokens_per_second),
        );
    }
    coordinator.bus().emit(DomainEvent::ConsumerConnected {
        session_id: session_id.clone(),
        consumer_id: consumer_id.clone(),
    });

    let backlog = match params.last_seen_seq {
        Some(last_seen) => replay.replay_after(&session_id, last_seen).await,
        None => replay.initial_window(&session_id, config.initial_replay_window).await,
    };
    for msg in &backlog {
        broadcaster.send_sequenced_to(&session_id, &conn, msg);
    }

    // Tell the UI whether a backend is attached.
    let connected = runtime.lock().await.backend_connected();
    broadcaster.send_to(&session_id, &conn, &ConsumerMessage::CliConnected { connected });

    {
        let mut session = runtime.lock().await;
        broadcaster.broadcast_presence(&mut session);
    }

    // Inbound loop.
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(m)) => m,
            Some(Err(_)) | None => break,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if text.len() > config.max_consumer_message_size {
            reply(&conn, ErrorCode::MessageTooLarge.to_consumer("message exceeds size limit"));
            continue;
        }

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                reply(&conn, ErrorCode::BadRequest.to_consumer(format!("invalid message: {e}")));
                continue;
            }
        };

        let allowed = runtime.lock().await.rate_limit_acquire(&consumer_id);
        if !allowed {
            tracing::debug!(session_id = %session_id, consumer_id = %consumer_id, "rate limit exceeded");
            reply(&conn, ErrorCode::RateLimited.to_consumer("rate limit exceeded"));
            continue;
        }

        if role == ConsumerRole::Observer && !observer_allowed(&client_msg) {
            reply(&conn, ErrorCode::Unauthorized.to_consumer("observers cannot send input"));
            continue;
        }

        if let Some(response) =
            bridge.handle_client_message(&session_id, &consumer_id, client_msg).await
        {
            reply(&conn, response);
        }
    }

    // Teardown: remember the replay cursor, detach, announce.
    let latest = replay.latest_seq(&session_id).await;
    replay.record_last_seen(&session_id, &consumer_id, latest).await;
    {
        let mut session = runtime.lock().await;
        if session.detach_consumer(&consumer_id) {
            broadcaster.broadcast_presence(&mut session);
        }
    }
    coordinator.bus().emit(DomainEvent::ConsumerDisconnected {
        session_id: session_id.clone(),
        consumer_id,
    });
    closed.cancel();
    let _ = writer.await;
}

/// Messages an observer may send.
fn observer_allowed(msg: &ClientMessage) -> bool {
    matches!(msg, ClientMessage::PresenceQuery {})
}

fn reply(conn: &ConsumerConn, msg: ConsumerMessage) {
    if let Ok(text) = serde_json::to_string(&msg) {
        let _ = conn.sink.send_text(&text);
    }
}

/// Send a structured error on a socket that is not yet attached.
async fn send_error<S>(tx: &mut S, code: ErrorCode, message: impl Into<String>)
where
    S: SinkExt<Message> + Unpin,
{
    if let Ok(text) = serde_json::to_string(&code.to_consumer(message)) {
        let _ = tx.send(Message::Text(text.into())).await;
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
