// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session state container.
//!
//! One [`Session`] record per session id, owned by its [`SessionRuntime`].
//! Every field is private; all mutation goes through the named methods
//! below. Other components hold the runtime and lock it for the duration of
//! one handler, which serializes all per-session work.

pub mod state;
pub mod team;

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::adapter::{BackendCommand, BackendHandle};
use crate::broadcast::ConsumerConn;
use crate::message::UnifiedMessage;
use crate::ratelimit::TokenBucket;
use crate::session::state::SessionState;
use crate::session::team::TeamCorrelation;
use crate::wire::{ConsumerMessage, ImageAttachment};

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Aggregate session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    AwaitingBackend,
    Active,
    Idle,
    Degraded,
    Closed,
}

/// Derived coarse run status of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Idle,
    Compacting,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Compacting => "compacting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "idle" => Some(Self::Idle),
            "compacting" => Some(Self::Compacting),
            _ => None,
        }
    }
}

/// A permission request awaiting a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
    pub received_at_ms: u64,
}

/// The single user message held while the backend is running.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub content: String,
    pub images: Vec<ImageAttachment>,
}

/// Capabilities initialize round-trip awaiting its control response.
#[derive(Debug)]
pub struct PendingInitialize {
    pub request_id: String,
    pub reply: oneshot::Sender<Value>,
}

/// Per-session slash-command and skill registry, populated from backend init
/// and capability negotiation.
#[derive(Debug, Default)]
pub struct SlashRegistry {
    cli_commands: Vec<String>,
    skill_commands: Vec<String>,
}

impl SlashRegistry {
    pub fn cli_commands(&self) -> &[String] {
        &self.cli_commands
    }

    pub fn skill_commands(&self) -> &[String] {
        &self.skill_commands
    }

    /// True when either registry knows the command.
    pub fn knows(&self, command: &str) -> bool {
        let name = command.trim_start_matches('/');
        self.cli_commands.iter().any(|c| c.trim_start_matches('/') == name)
            || self.skill_commands.iter().any(|c| c.trim_start_matches('/') == name)
    }
}

/// Failure returned when a backend send cannot be delivered.
#[derive(Debug, PartialEq, Eq)]
pub enum BackendSendError {
    /// No backend connection attached.
    NotConnected,
    /// The backend connection is closed or its queue is full.
    Closed,
}

/// One logical conversation with one backend. All fields private; mutation
/// only through the named methods.
pub struct Session {
    id: String,
    adapter_name: String,
    backend_session_id: Option<String>,
    state: SessionState,
    lifecycle: SessionLifecycle,
    last_status: Option<RunStatus>,
    message_history: VecDeque<ConsumerMessage>,
    max_history: usize,
    pending_messages: VecDeque<UnifiedMessage>,
    pending_permissions: IndexMap<String, PermissionRequest>,
    max_pending_permissions: usize,
    queued_message: Option<QueuedMessage>,
    consumers: Vec<ConsumerConn>,
    rate_limiters: HashMap<String, TokenBucket>,
    slash_registry: SlashRegistry,
    team_corr: TeamCorrelation,
    pending_initialize: Option<PendingInitialize>,
    backend: Option<BackendHandle>,
    first_turn_completed: bool,
    last_activity_ms: u64,
    created_at_ms: u64,
    pid: Option<u32>,
}

/// Construction-time limits, taken from [`Config`](crate::config::Config).
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_history: usize,
    pub max_pending_permissions: usize,
}

impl Session {
    pub fn new(id: impl Into<String>, adapter_name: impl Into<String>, limits: SessionLimits) -> Self {
        let id = id.into();
        let now = epoch_ms();
        Self {
            state: SessionState::new(id.clone()),
            id,
            adapter_name: adapter_name.into(),
            backend_session_id: None,
            lifecycle: SessionLifecycle::AwaitingBackend,
            last_status: None,
            message_history: VecDeque::new(),
            max_history: limits.max_history,
            pending_messages: VecDeque::new(),
            pending_permissions: IndexMap::new(),
            max_pending_permissions: limits.max_pending_permissions,
            queued_message: None,
            consumers: Vec::new(),
            rate_limiters: HashMap::new(),
            slash_registry: SlashRegistry::default(),
            team_corr: TeamCorrelation::new(),
            pending_initialize: None,
            backend: None,
            first_turn_completed: false,
            last_activity_ms: now,
            created_at_ms: now,
            pid: None,
        }
    }

    // -- Read access ---------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn backend_session_id(&self) -> Option<&str> {
        self.backend_session_id.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        self.lifecycle
    }

    pub fn last_status(&self) -> Option<RunStatus> {
        self.last_status
    }

    pub fn history(&self) -> &VecDeque<ConsumerMessage> {
        &self.message_history
    }

    pub fn consumers(&self) -> &[ConsumerConn] {
        &self.consumers
    }

    pub fn pending_permission(&self, request_id: &str) -> Option<&PermissionRequest> {
        self.pending_permissions.get(request_id)
    }

    pub fn pending_permission_count(&self) -> usize {
        self.pending_permissions.len()
    }

    /// Pending permissions as (id, request) pairs, insertion-ordered.
    pub fn pending_permissions(&self) -> impl Iterator<Item = (&String, &PermissionRequest)> {
        self.pending_permissions.iter()
    }

    pub fn pending_message_count(&self) -> usize {
        self.pending_messages.len()
    }

    pub fn pending_messages(&self) -> impl Iterator<Item = &UnifiedMessage> {
        self.pending_messages.iter()
    }

    pub fn queued_message(&self) -> Option<&QueuedMessage> {
        self.queued_message.as_ref()
    }

    pub fn slash_registry(&self) -> &SlashRegistry {
        &self.slash_registry
    }

    pub fn backend_connected(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_handle(&self) -> Option<&BackendHandle> {
        self.backend.as_ref()
    }

    pub fn first_turn_completed(&self) -> bool {
        self.first_turn_completed
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_pending_initialize(&self) -> bool {
        self.pending_initialize.is_some()
    }

    // -- Mutators ------------------------------------------------------------

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Run the state reducer against this session's correlation buffer and
    /// install the result. Returns (previous, next) snapshots for diffing.
    pub fn reduce_apply(&mut self, msg: &UnifiedMessage) -> (SessionState, SessionState) {
        let prev = self.state.clone();
        let next = state::reduce(&prev, msg, &mut self.team_corr);
        self.state = next.clone();
        (prev, next)
    }

    /// Record the backend-assigned session id. Once set it is never replaced
    /// by a different id within the same session lifetime.
    pub fn set_backend_session_id(&mut self, backend_session_id: &str) {
        match &self.backend_session_id {
            Some(existing) if existing != backend_session_id => {
                tracing::warn!(
                    session_id = %self.id,
                    existing = %existing,
                    offered = backend_session_id,
                    "refusing to replace backend session id"
                );
            }
            Some(_) => {}
            None => self.backend_session_id = Some(backend_session_id.to_owned()),
        }
    }

    /// Clear the backend session id so the next connect starts fresh
    /// (resume failure path).
    pub fn clear_backend_session_id(&mut self) {
        self.backend_session_id = None;
    }

    pub fn set_lifecycle(&mut self, lifecycle: SessionLifecycle) {
        self.lifecycle = lifecycle;
    }

    pub fn set_last_status(&mut self, status: Option<RunStatus>) {
        self.last_status = status;
    }

    /// Append to history, dropping from the front on overflow.
    pub fn append_history(&mut self, msg: ConsumerMessage) {
        self.message_history.push_back(msg);
        while self.message_history.len() > self.max_history {
            self.message_history.pop_front();
        }
    }

    pub fn replace_history_at(&mut self, index: usize, msg: ConsumerMessage) {
        if let Some(slot) = self.message_history.get_mut(index) {
            *slot = msg;
        }
    }

    pub fn set_history(&mut self, history: Vec<ConsumerMessage>) {
        self.message_history = history.into();
        while self.message_history.len() > self.max_history {
            self.message_history.pop_front();
        }
    }

    /// Store a pending permission request. Returns false (and drops the
    /// request) when the map is at capacity.
    pub fn store_pending_permission(&mut self, request: PermissionRequest) -> bool {
        if self.pending_permissions.len() >= self.max_pending_permissions
            && !self.pending_permissions.contains_key(&request.request_id)
        {
            return false;
        }
        self.pending_permissions.insert(request.request_id.clone(), request);
        true
    }

    pub fn clear_pending_permission(&mut self, request_id: &str) -> Option<PermissionRequest> {
        self.pending_permissions.shift_remove(request_id)
    }

    pub fn store_pending_initialize(&mut self, pending: PendingInitialize) {
        self.pending_initialize = Some(pending);
    }

    /// Take the pending initialize if its request id matches.
    pub fn take_pending_initialize(&mut self, request_id: &str) -> Option<PendingInitialize> {
        if self.pending_initialize.as_ref().is_some_and(|p| p.request_id == request_id) {
            self.pending_initialize.take()
        } else {
            None
        }
    }

    /// Drop any pending initialize (disconnect path). The waiting side
    /// observes the dropped channel.
    pub fn cancel_pending_initialize(&mut self) {
        self.pending_initialize = None;
    }

    pub fn register_cli_commands(&mut self, commands: &[String]) {
        for command in commands {
            if !self.slash_registry.cli_commands.contains(command) {
                self.slash_registry.cli_commands.push(command.clone());
            }
        }
    }

    pub fn register_skill_commands(&mut self, commands: &[String]) {
        for command in commands {
            if !self.slash_registry.skill_commands.contains(command) {
                self.slash_registry.skill_commands.push(command.clone());
            }
        }
    }

    pub fn clear_dynamic_slash_registry(&mut self) {
        self.slash_registry.cli_commands.clear();
        self.slash_registry.skill_commands.clear();
    }

    pub fn set_queued_message(&mut self, queued: Option<QueuedMessage>) {
        self.queued_message = queued;
    }

    pub fn take_queued_message(&mut self) -> Option<QueuedMessage> {
        self.queued_message.take()
    }

    pub fn touch(&mut self) {
        self.last_activity_ms = epoch_ms();
    }

    pub fn set_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub fn mark_first_turn_completed(&mut self) {
        self.first_turn_completed = true;
    }

    // -- Consumers -----------------------------------------------------------

    /// Attach a consumer, replacing any existing connection with the same id.
    pub fn attach_consumer(&mut self, conn: ConsumerConn, bucket: TokenBucket) {
        self.consumers.retain(|c| c.consumer_id != conn.consumer_id);
        self.rate_limiters.insert(conn.consumer_id.clone(), bucket);
        self.consumers.push(conn);
        self.touch();
    }

    pub fn detach_consumer(&mut self, consumer_id: &str) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|c| c.consumer_id != consumer_id);
        self.rate_limiters.remove(consumer_id);
        before != self.consumers.len()
    }

    /// Remove a consumer whose socket failed mid-broadcast.
    pub fn evict_consumer(&mut self, consumer_id: &str) {
        self.detach_consumer(consumer_id);
    }

    /// Take one rate-limit token for a consumer. Unknown ids are allowed
    /// through (they are about to be rejected elsewhere).
    pub fn rate_limit_acquire(&mut self, consumer_id: &str) -> bool {
        match self.rate_limiters.get_mut(consumer_id) {
            Some(bucket) => bucket.try_acquire(),
            None => true,
        }
    }

    // -- Backend -------------------------------------------------------------

    pub fn set_backend(&mut self, handle: BackendHandle) {
        self.pid = handle.pid;
        self.backend = Some(handle);
        self.touch();
    }

    pub fn take_backend(&mut self) -> Option<BackendHandle> {
        self.pid = None;
        self.backend.take()
    }

    /// Send a unified message to the backend, or report why it cannot be.
    pub fn try_send_to_backend(&mut self, msg: UnifiedMessage) -> Result<(), BackendSendError> {
        let Some(backend) = &self.backend else {
            return Err(BackendSendError::NotConnected);
        };
        backend
            .commands
            .try_send(BackendCommand::Send(Box::new(msg)))
            .map_err(|_| BackendSendError::Closed)?;
        self.touch();
        Ok(())
    }

    /// Send adapter-native raw bytes to the backend, bypassing encoding.
    pub fn try_send_raw_to_backend(&mut self, bytes: bytes::Bytes) -> Result<(), BackendSendError> {
        let Some(backend) = &self.backend else {
            return Err(BackendSendError::NotConnected);
        };
        backend
            .commands
            .try_send(BackendCommand::SendRaw(bytes))
            .map_err(|_| BackendSendError::Closed)?;
        Ok(())
    }

    /// Queue a message for FIFO flush when a backend becomes available.
    pub fn push_pending_message(&mut self, msg: UnifiedMessage) {
        self.pending_messages.push_back(msg);
    }

    /// Drain pending messages in FIFO order.
    pub fn drain_pending_messages(&mut self) -> Vec<UnifiedMessage> {
        self.pending_messages.drain(..).collect()
    }
}

/// Owner of one [`Session`]. Locking the runtime for the duration of a
/// handler serializes all mutations for that session.
pub struct SessionRuntime {
    id: String,
    inner: tokio::sync::Mutex<Session>,
}

impl SessionRuntime {
    pub fn new(session: Session) -> Self {
        Self { id: session.id.clone(), inner: tokio::sync::Mutex::new(session) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.inner.lock().await
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
