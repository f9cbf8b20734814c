// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer fan-out with backpressure and role filtering.
//!
//! Every broadcast JSON-encodes once and writes the same text to each
//! recipient. A consumer whose outbound buffer exceeds the threshold is
//! skipped (the message is dropped for it, not queued); a consumer whose
//! socket write fails is evicted from the session while the remaining
//! recipients still receive the message.

use std::sync::Arc;

use serde::Serialize;

use crate::error::ErrorCode;
use crate::session::Session;
use crate::trace::Tracer;
use crate::wire::{ConsumerMessage, ConsumerRole, PresenceEntry, SequencedMessage};

/// Outbound endpoint of one consumer connection.
///
/// `buffered_bytes` reports the bytes accepted but not yet written to the
/// socket; the broadcaster consults it before every send.
pub trait ConsumerSink: Send + Sync {
    fn send_text(&self, text: &str) -> anyhow::Result<()>;
    fn buffered_bytes(&self) -> usize;
    fn close(&self);
}

/// One attached consumer connection.
#[derive(Clone)]
pub struct ConsumerConn {
    pub consumer_id: String,
    pub role: ConsumerRole,
    pub sink: Arc<dyn ConsumerSink>,
}

impl std::fmt::Debug for ConsumerConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConn")
            .field("consumer_id", &self.consumer_id)
            .field("role", &self.role)
            .finish()
    }
}

/// Pluggable wire codec. The default passes text through unchanged; an
/// encrypting codec seals each frame for the currently-paired peer.
pub trait WireCodec: Send + Sync {
    fn encode(&self, plaintext: &str) -> anyhow::Result<String>;
    fn decode(&self, wire: &str) -> anyhow::Result<String>;
}

/// Identity codec.
pub struct PlainCodec;

impl WireCodec for PlainCodec {
    fn encode(&self, plaintext: &str) -> anyhow::Result<String> {
        Ok(plaintext.to_owned())
    }

    fn decode(&self, wire: &str) -> anyhow::Result<String> {
        Ok(wire.to_owned())
    }
}

/// Callback fired once per broadcast with the session id and the message.
pub type BroadcastCallback = Arc<dyn Fn(&str, &ConsumerMessage) + Send + Sync>;

/// Fan-out broadcaster for one broker process.
pub struct Broadcaster {
    backpressure_threshold: usize,
    tracer: Arc<dyn Tracer>,
    codec: Arc<dyn WireCodec>,
    on_broadcast: Option<BroadcastCallback>,
}

impl Broadcaster {
    pub fn new(backpressure_threshold: usize, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            backpressure_threshold,
            tracer,
            codec: Arc::new(PlainCodec),
            on_broadcast: None,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn WireCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_callback(mut self, callback: BroadcastCallback) -> Self {
        self.on_broadcast = Some(callback);
        self
    }

    /// Swap the wire codec (re-pairing). Previously-encoded frames become
    /// undecodable by holders of the old peer keys; that is the point.
    pub fn set_codec(&mut self, codec: Arc<dyn WireCodec>) {
        self.codec = codec;
    }

    /// Broadcast to every consumer of the session.
    pub fn broadcast(&self, session: &mut Session, msg: &ConsumerMessage) {
        self.fan_out(session, msg, false);
    }

    /// Broadcast to participants only (observers skipped).
    pub fn broadcast_to_participants(&self, session: &mut Session, msg: &ConsumerMessage) {
        self.fan_out(session, msg, true);
    }

    /// Broadcast a sequenced wrapper (the reconnection-enabled wire form).
    pub fn broadcast_sequenced(&self, session: &mut Session, msg: &SequencedMessage) {
        let participants_only = msg.payload.participants_only();
        let Some(text) = self.encode(session.id(), msg) else {
            return;
        };
        self.write_all(session, &text, participants_only);
        if let Some(callback) = &self.on_broadcast {
            callback(session.id(), &msg.payload);
        }
        self.tracer.send(session.id(), "message:outbound");
    }

    /// Send one message to a single consumer, bypassing fan-out bookkeeping.
    pub fn send_to(&self, session_id: &str, conn: &ConsumerConn, msg: &ConsumerMessage) {
        if let Some(text) = self.encode(session_id, msg) {
            if let Err(e) = conn.sink.send_text(&text) {
                tracing::debug!(session_id, consumer_id = %conn.consumer_id, err = %e, "direct send failed");
            }
        }
    }

    /// Send a sequenced wrapper to a single consumer (replay path).
    pub fn send_sequenced_to(&self, session_id: &str, conn: &ConsumerConn, msg: &SequencedMessage) {
        if let Some(text) = self.encode(session_id, msg) {
            if let Err(e) = conn.sink.send_text(&text) {
                tracing::debug!(session_id, consumer_id = %conn.consumer_id, err = %e, "replay send failed");
            }
        }
    }

    /// Send a structured error to a single consumer.
    pub fn send_error(
        &self,
        session_id: &str,
        conn: &ConsumerConn,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        self.send_to(session_id, conn, &code.to_consumer(message));
    }

    // -- Convenience wrappers ------------------------------------------------

    pub fn broadcast_presence(&self, session: &mut Session) {
        let consumers: Vec<PresenceEntry> = session
            .consumers()
            .iter()
            .map(|c| PresenceEntry { consumer_id: c.consumer_id.clone(), role: c.role })
            .collect();
        self.broadcast(session, &ConsumerMessage::PresenceUpdate { consumers });
    }

    pub fn broadcast_name_update(&self, session: &mut Session, name: &str) {
        self.broadcast(session, &ConsumerMessage::SessionNameUpdate { name: name.to_owned() });
    }

    pub fn broadcast_resume_failed(&self, session: &mut Session, reason: &str) {
        self.broadcast(session, &ConsumerMessage::ResumeFailed { reason: reason.to_owned() });
    }

    /// Process output goes to participants only; observers never see it.
    pub fn broadcast_process_output(&self, session: &mut Session, stream: &str, data: &str) {
        self.broadcast_to_participants(
            session,
            &ConsumerMessage::ProcessOutput { stream: stream.to_owned(), data: data.to_owned() },
        );
    }

    pub fn broadcast_watchdog_state(&self, session: &mut Session, phase: &str) {
        self.broadcast(session, &ConsumerMessage::SessionLifecycle { phase: phase.to_owned() });
    }

    pub fn broadcast_circuit_breaker_state(&self, session: &mut Session, state: &str) {
        self.broadcast(
            session,
            &ConsumerMessage::SessionLifecycle { phase: format!("circuit_{state}") },
        );
    }

    // -- Internals -----------------------------------------------------------

    fn fan_out(&self, session: &mut Session, msg: &ConsumerMessage, participants_only: bool) {
        let Some(text) = self.encode(session.id(), msg) else {
            return;
        };
        self.write_all(session, &text, participants_only);
        if let Some(callback) = &self.on_broadcast {
            callback(session.id(), msg);
        }
        self.tracer.send(session.id(), "message:outbound");
    }

    /// Write `text` to every (role-matching) consumer. Backpressured
    /// consumers are skipped but stay attached; failed sockets are evicted.
    fn write_all(&self, session: &mut Session, text: &str, participants_only: bool) {
        let mut failed: Vec<String> = Vec::new();
        for conn in session.consumers() {
            if participants_only && conn.role == ConsumerRole::Observer {
                continue;
            }
            if conn.sink.buffered_bytes() > self.backpressure_threshold {
                self.tracer.event(session.id(), "backpressure:drop", &conn.consumer_id);
                continue;
            }
            if let Err(e) = conn.sink.send_text(text) {
                tracing::warn!(
                    session_id = %session.id(),
                    consumer_id = %conn.consumer_id,
                    err = %e,
                    "consumer send failed, evicting"
                );
                failed.push(conn.consumer_id.clone());
            }
        }
        for consumer_id in failed {
            session.evict_consumer(&consumer_id);
        }
    }

    fn encode<T: Serialize>(&self, session_id: &str, msg: &T) -> Option<String> {
        let json = match serde_json::to_string(msg) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(session_id, err = %e, "outbound encode failed");
                return None;
            }
        };
        match self.codec.encode(&json) {
            Ok(wire) => Some(wire),
            Err(e) => {
                tracing::warn!(session_id, err = %e, "wire codec encode failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
