// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend adapter contract.
//!
//! An adapter wraps one backend protocol. It is a factory for backend
//! connections: `connect` opens one connection and returns the channel
//! endpoints the broker drives. Inbound decoding and outbound encoding live
//! entirely inside the adapter; the broker only ever sees unified messages.
//!
//! Two connection styles exist. Direct adapters spawn or dial the backend
//! and return a live connection. Inverted adapters launch a tool that calls
//! back into the broker's own server; the session stays in
//! `awaiting_backend` until the callback arrives.

pub mod lifecycle;
pub mod spawn;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::UnifiedMessage;
use crate::session::epoch_ms;

/// Outbound channel capacity per backend connection.
pub const BACKEND_COMMAND_BUFFER: usize = 256;
/// Inbound channel capacity per backend connection.
pub const BACKEND_MESSAGE_BUFFER: usize = 256;

/// Where an adapter's backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Local,
    Service,
}

/// Feature set an adapter declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub streaming: bool,
    pub permissions: bool,
    pub slash_commands: bool,
    pub teams: bool,
    pub availability: Availability,
}

/// How the adapter establishes its backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStyle {
    /// `connect` returns a live connection (spawned process or dialed
    /// service).
    Direct,
    /// A launched tool calls back into the broker; `connect` is never
    /// invoked.
    Inverted,
}

/// Options passed to `connect` / the launcher.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub cwd: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    /// Backend session id to resume, when the session had one.
    pub resume: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Command sent from the broker to a backend connection.
#[derive(Debug)]
pub enum BackendCommand {
    /// Encode and deliver one unified message (adapter applies its outbound
    /// encoding).
    Send(Box<UnifiedMessage>),
    /// Adapter-native bytes that bypass encoding (protocol control traffic).
    SendRaw(Bytes),
}

/// Broker-side endpoints of one backend connection.
pub struct BackendConnection {
    pub session_id: String,
    pub commands: mpsc::Sender<BackendCommand>,
    pub messages: mpsc::Receiver<UnifiedMessage>,
    pub cancel: CancellationToken,
    /// Present only when the backend is a child process owned by us.
    pub pid: Option<u32>,
    /// True when this connection resumed a prior backend session.
    pub resumed: bool,
}

/// Adapter-side endpoints of one backend connection.
///
/// The adapter pushes decoded inbound messages into `messages` (the sequence
/// ends when the sender is dropped) and drains `commands` for outbound
/// traffic. `cancel` fires when the broker closes the connection.
pub struct BackendEndpoints {
    pub messages: mpsc::Sender<UnifiedMessage>,
    pub commands: mpsc::Receiver<BackendCommand>,
    pub cancel: CancellationToken,
}

/// Build a connected (broker, adapter) endpoint pair.
pub fn backend_pair(session_id: &str, pid: Option<u32>) -> (BackendConnection, BackendEndpoints) {
    let (command_tx, command_rx) = mpsc::channel(BACKEND_COMMAND_BUFFER);
    let (message_tx, message_rx) = mpsc::channel(BACKEND_MESSAGE_BUFFER);
    let cancel = CancellationToken::new();
    let connection = BackendConnection {
        session_id: session_id.to_owned(),
        commands: command_tx,
        messages: message_rx,
        cancel: cancel.clone(),
        pid,
        resumed: false,
    };
    let endpoints = BackendEndpoints { messages: message_tx, commands: command_rx, cancel };
    (connection, endpoints)
}

/// Sender half of a backend connection, stored on the session record.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    pub commands: mpsc::Sender<BackendCommand>,
    pub cancel: CancellationToken,
    pub pid: Option<u32>,
    pub connected_at_ms: u64,
    pub resumed: bool,
}

impl BackendHandle {
    pub fn from_connection(conn: &BackendConnection) -> Self {
        Self {
            commands: conn.commands.clone(),
            cancel: conn.cancel.clone(),
            pid: conn.pid,
            connected_at_ms: epoch_ms(),
            resumed: conn.resumed,
        }
    }
}

/// Factory for backend connections. One implementation per protocol.
///
/// Object-safe for use as `Arc<dyn Adapter>`.
pub trait Adapter: Send + Sync {
    /// Stable identifier, referenced by session records.
    fn name(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    fn style(&self) -> ConnectionStyle {
        ConnectionStyle::Direct
    }

    /// Open one backend connection. Only called for direct-style adapters.
    fn connect(
        &self,
        session_id: &str,
        options: ConnectOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BackendConnection>> + Send + '_>>;
}

/// Registry mapping adapter names to implementations.
///
/// Adapters may be shared across sessions; the resolver owns them.
#[derive(Default)]
pub struct AdapterResolver {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterResolver {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_owned(), adapter);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
