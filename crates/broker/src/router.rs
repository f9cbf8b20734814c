// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified message router — the single entry point for backend traffic.
//!
//! `route` applies state reduction, decides what reaches consumers versus
//! what is consumed internally, appends to history with per-type merge
//! semantics, and emits domain events. Errors never bubble out of the
//! router: every handler drops with a trace event, surfaces a structured
//! consumer error, or triggers a policy action.
//!
//! Some backends emit explicit running signals and some do not, so the
//! router infers `running` from a top-level `message_start` stream event and
//! always derives `idle` from `result`. All adapters exhibit the same
//! lifecycle regardless of protocol.

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::bus::{DomainBus, DomainEvent};
use crate::message::{ContentBlock, Role, UnifiedMessage, UnifiedType};
use crate::persist::{self, SessionStore};
use crate::project::project;
use crate::reconnect::ReconnectionHandler;
use crate::session::state::GitInfo;
use crate::session::{
    PermissionRequest, QueuedMessage, RunStatus, Session, SessionRuntime, epoch_ms,
};
use crate::trace::Tracer;
use crate::wire::{ConsumerMessage, ImageAttachment};

/// Version of the consumer-facing protocol reported in session-init
/// snapshots.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum derived session name length.
const MAX_DERIVED_NAME: usize = 48;

pub struct Router {
    broadcaster: Arc<Broadcaster>,
    replay: Arc<ReconnectionHandler>,
    bus: DomainBus,
    store: Arc<dyn SessionStore>,
    tracer: Arc<dyn Tracer>,
}

impl Router {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        replay: Arc<ReconnectionHandler>,
        bus: DomainBus,
        store: Arc<dyn SessionStore>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self { broadcaster, replay, bus, store, tracer }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn replay(&self) -> &Arc<ReconnectionHandler> {
        &self.replay
    }

    pub fn bus(&self) -> &DomainBus {
        &self.bus
    }

    /// Process one inbound unified message for a session.
    pub async fn route(&self, runtime: &Arc<SessionRuntime>, mut msg: UnifiedMessage) {
        msg.canonicalize();
        self.tracer.recv(runtime.id(), msg.kind.as_str(), Some(&msg));

        let mut session = runtime.lock().await;
        session.touch();

        let (prev, next) = session.reduce_apply(&msg);

        // Team substate changes fan out as a full state snapshot plus
        // fine-grained domain events derived by diffing.
        if prev.team != next.team {
            self.broadcast(&mut session, ConsumerMessage::SessionUpdate { state: next.clone() })
                .await;
            for change in crate::session::team::diff(&prev.team, &next.team) {
                self.bus.emit(DomainEvent::TeamChanged {
                    session_id: session.id().to_owned(),
                    change,
                });
            }
        }

        match msg.kind {
            UnifiedType::SessionInit => self.on_session_init(runtime, &mut session, &msg).await,
            UnifiedType::StatusChange => self.on_status_change(&mut session, &msg).await,
            UnifiedType::Assistant => self.on_assistant(&mut session, &msg).await,
            UnifiedType::Result => self.on_result(runtime, &mut session, &msg).await,
            UnifiedType::StreamEvent => self.on_stream_event(&mut session, &msg).await,
            UnifiedType::PermissionRequest => self.on_permission_request(&mut session, &msg).await,
            UnifiedType::ControlResponse => self.on_control_response(&mut session, &msg),
            UnifiedType::ToolProgress
            | UnifiedType::AuthStatus
            | UnifiedType::SessionLifecycle
            | UnifiedType::UserMessage => {
                if let Some(consumer_msg) = project(&msg) {
                    self.broadcast(&mut session, consumer_msg).await;
                }
            }
            UnifiedType::ToolUseSummary => self.on_tool_use_summary(&mut session, &msg).await,
            UnifiedType::ConfigurationChange => {
                self.on_configuration_change(&mut session, &msg).await
            }
            UnifiedType::PermissionResponse | UnifiedType::Interrupt => {
                let label = format!("unhandled:{}", msg.kind);
                self.tracer.recv(session.id(), &label, Some(&msg));
            }
        }
    }

    // -- Handlers ------------------------------------------------------------

    async fn on_session_init(
        &self,
        runtime: &Arc<SessionRuntime>,
        session: &mut Session,
        msg: &UnifiedMessage,
    ) {
        if let Some(backend_session_id) = msg.backend_session_id() {
            session.set_backend_session_id(backend_session_id);
            self.bus.emit(DomainEvent::BackendSessionIdAssigned {
                session_id: session.id().to_owned(),
                backend_session_id: backend_session_id.to_owned(),
            });
        }

        if let Some(commands) = msg.meta_array("slash_commands") {
            let commands: Vec<String> = commands
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_owned)
                .collect();
            session.register_cli_commands(&commands);
        }
        if let Some(skills) = msg.meta_array("skills") {
            let skills: Vec<String> = skills
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::to_owned)
                .collect();
            session.register_skill_commands(&skills);
        }

        self.spawn_git_refresh(runtime, session);

        let snapshot = ConsumerMessage::SessionInit {
            session_id: session.id().to_owned(),
            protocol_version: PROTOCOL_VERSION,
            state: session.state().clone(),
        };
        self.broadcast(session, snapshot).await;

        let has_inline_capabilities = msg.meta_object("capabilities").is_some();
        self.bus.emit(DomainEvent::SessionInitialized {
            session_id: session.id().to_owned(),
            has_inline_capabilities,
        });

        self.persist(session);
    }

    async fn on_status_change(&self, session: &mut Session, msg: &UnifiedMessage) {
        let status = msg.meta_str("status").and_then(RunStatus::parse);
        session.set_last_status(status);
        if let Some(consumer_msg) = project(msg) {
            self.broadcast(session, consumer_msg).await;
        }
        if status == Some(RunStatus::Idle) {
            self.flush_queued_message(session).await;
        }
    }

    async fn on_assistant(&self, session: &mut Session, msg: &UnifiedMessage) {
        let Some(consumer_msg) = project(msg) else {
            return;
        };
        // A later chunk bearing the same message id supersedes the earlier
        // history entry in place; anything else appends.
        let replaced = match msg.message_id() {
            Some(id) => {
                let index = session.history().iter().position(|entry| {
                    matches!(entry, ConsumerMessage::Assistant { id: Some(existing), .. } if existing.as_str() == id)
                });
                match index {
                    Some(index) => {
                        session.replace_history_at(index, consumer_msg.clone());
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };
        self.broadcast_with_history(session, consumer_msg, !replaced).await;
    }

    async fn on_result(
        &self,
        runtime: &Arc<SessionRuntime>,
        session: &mut Session,
        msg: &UnifiedMessage,
    ) {
        if let Some(consumer_msg) = project(msg) {
            self.broadcast(session, consumer_msg).await;
        }
        session.set_last_status(Some(RunStatus::Idle));
        self.flush_queued_message(session).await;
        self.spawn_git_refresh(runtime, session);

        let num_turns = msg.meta_u64("num_turns").unwrap_or(0);
        let is_error = msg.meta_bool("is_error").unwrap_or(false);
        if num_turns == 1 && !is_error && !session.first_turn_completed() {
            session.mark_first_turn_completed();
            self.bus.emit(DomainEvent::FirstTurnCompleted {
                session_id: session.id().to_owned(),
            });
            if let Some(name) = derive_session_name(session) {
                self.broadcaster.broadcast_name_update(session, &name);
                self.bus.emit(DomainEvent::SessionNamed {
                    session_id: session.id().to_owned(),
                    name,
                });
            }
        }

        self.persist(session);
    }

    async fn on_stream_event(&self, session: &mut Session, msg: &UnifiedMessage) {
        // Top-level message_start implies the backend is running even when
        // the adapter never sends an explicit status signal. Events from
        // inside a sub-agent do not flip the status.
        if msg.stream_event_type() == Some("message_start")
            && msg.parent_tool_use_id().is_none()
            && session.last_status() != Some(RunStatus::Running)
        {
            session.set_last_status(Some(RunStatus::Running));
            self.broadcast(
                session,
                ConsumerMessage::StatusChange { status: RunStatus::Running.as_str().to_owned() },
            )
            .await;
        }
        if let Some(consumer_msg) = project(msg) {
            self.broadcast(session, consumer_msg).await;
        }
    }

    async fn on_permission_request(&self, session: &mut Session, msg: &UnifiedMessage) {
        let Some(request_id) = msg.request_id() else {
            self.tracer.event(session.id(), "permission:missing_request_id", msg.kind.as_str());
            return;
        };
        let request = PermissionRequest {
            request_id: request_id.to_owned(),
            tool_name: msg.meta_str("tool_name").unwrap_or_default().to_owned(),
            input: msg.metadata.get("input").cloned().unwrap_or(serde_json::Value::Null),
            suggestions: msg.metadata.get("suggestions").cloned(),
            received_at_ms: epoch_ms(),
        };
        if !session.store_pending_permission(request) {
            tracing::warn!(
                session_id = %session.id(),
                request_id,
                "pending permission map full, dropping request"
            );
            self.tracer.event(session.id(), "permission:overflow", request_id);
            return;
        }
        if let Some(consumer_msg) = project(msg) {
            // Participants only; the broadcast layer keys off the type.
            self.broadcast(session, consumer_msg).await;
        }
        self.bus.emit(DomainEvent::PermissionRequested {
            session_id: session.id().to_owned(),
            request_id: request_id.to_owned(),
        });
    }

    fn on_control_response(&self, session: &mut Session, msg: &UnifiedMessage) {
        let Some(request_id) = msg.request_id() else {
            self.tracer.recv(session.id(), "unhandled:control_response", Some(msg));
            return;
        };
        match session.take_pending_initialize(request_id) {
            Some(pending) => {
                let payload = serde_json::Value::Object(msg.metadata.clone());
                let _ = pending.reply.send(payload);
            }
            None => {
                self.tracer.recv(session.id(), "unhandled:control_response", Some(msg));
            }
        }
    }

    async fn on_tool_use_summary(&self, session: &mut Session, msg: &UnifiedMessage) {
        let Some(consumer_msg) = project(msg) else {
            return;
        };
        // Merge into the previous summary bearing the same tool-use id.
        let merged = match &consumer_msg {
            ConsumerMessage::ToolUseSummary { tool_use_id, .. } => {
                let index = session.history().iter().position(|entry| {
                    matches!(entry, ConsumerMessage::ToolUseSummary { tool_use_id: existing, .. } if existing == tool_use_id)
                });
                match index {
                    Some(index) => {
                        session.replace_history_at(index, consumer_msg.clone());
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        self.broadcast_with_history(session, consumer_msg, !merged).await;
    }

    async fn on_configuration_change(&self, session: &mut Session, msg: &UnifiedMessage) {
        if let Some(consumer_msg) = project(msg) {
            self.broadcast(session, consumer_msg).await;
        }
        // Keep consumer-held state in sync with a full patch.
        let state = session.state().clone();
        self.broadcast(session, ConsumerMessage::SessionUpdate { state }).await;
        self.persist(session);
    }

    // -- Shared plumbing -----------------------------------------------------

    /// Deliver a user message: record it, echo it to all consumers, then
    /// hand it to the backend or queue it for the first connection.
    pub async fn deliver_user_message(
        &self,
        session: &mut Session,
        content: &str,
        images: &[ImageAttachment],
    ) {
        let mut blocks: Vec<ContentBlock> =
            vec![ContentBlock::Text { text: content.to_owned() }];
        for image in images {
            blocks.push(ContentBlock::Image {
                media_type: image.media_type.clone(),
                data: image.data.clone(),
            });
        }

        let echo = ConsumerMessage::UserMessage { id: None, content: blocks.clone() };
        self.broadcast(session, echo).await;

        let mut unified = UnifiedMessage::new(UnifiedType::UserMessage, Role::User);
        unified.content = blocks;
        match session.try_send_to_backend(unified.clone()) {
            Ok(()) => {}
            Err(_) => {
                session.push_pending_message(unified);
                self.tracer.event(session.id(), "backend:pending_enqueue", "user_message");
            }
        }
    }

    /// On an idle transition, release the held user message.
    async fn flush_queued_message(&self, session: &mut Session) {
        if let Some(QueuedMessage { content, images }) = session.take_queued_message() {
            self.deliver_user_message(session, &content, &images).await;
        }
    }

    /// Broadcast a consumer message and record it in history.
    pub async fn broadcast(&self, session: &mut Session, msg: ConsumerMessage) {
        self.broadcast_with_history(session, msg, true).await;
    }

    async fn broadcast_with_history(
        &self,
        session: &mut Session,
        msg: ConsumerMessage,
        append_history: bool,
    ) {
        if append_history {
            session.append_history(msg.clone());
        }
        let wrapped = self.replay.assign(session.id(), msg).await;
        self.broadcaster.broadcast_sequenced(session, &wrapped);
    }

    /// Persist a best-effort snapshot. Storage failures never escape.
    pub fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(&persist::snapshot(session)) {
            tracing::warn!(session_id = %session.id(), err = %e, "session snapshot failed");
        }
    }

    /// Refresh git info off the handler path and patch it into state.
    fn spawn_git_refresh(&self, runtime: &Arc<SessionRuntime>, session: &Session) {
        let Some(cwd) = session.state().cwd.clone() else {
            return;
        };
        let runtime = Arc::clone(runtime);
        tokio::spawn(async move {
            let git = probe_git(&cwd).await;
            let mut session = runtime.lock().await;
            let mut state = session.state().clone();
            if state.git != git {
                state.git = git;
                session.set_state(state);
            }
        });
    }
}

/// Derive a session name from the first user message in history.
fn derive_session_name(session: &Session) -> Option<String> {
    let text = session.history().iter().find_map(|entry| match entry {
        ConsumerMessage::UserMessage { content, .. } => content.iter().find_map(|b| match b {
            ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        }),
        _ => None,
    })?;
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return None;
    }
    let mut name: String = line.chars().take(MAX_DERIVED_NAME).collect();
    if line.chars().count() > MAX_DERIVED_NAME {
        name.push('…');
    }
    Some(name)
}

/// Probe branch and dirtiness of a working directory. Best-effort; any
/// failure reads as "not a repository".
pub async fn probe_git(cwd: &str) -> Option<GitInfo> {
    let branch = git_output(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    let status = git_output(cwd, &["status", "--porcelain"]).await?;
    Some(GitInfo { branch: branch.trim().to_owned(), dirty: !status.trim().is_empty() })
}

async fn git_output(cwd: &str, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
