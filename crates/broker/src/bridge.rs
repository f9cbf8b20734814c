// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Programmatic facade over the session map.
//!
//! Everything that mutates a session funnels through a bridge method: the
//! consumer transport dispatches inbound frames here, and embedding code
//! calls the same operations directly. The bridge owns the id → runtime map;
//! the coordinator owns session creation and deletion policy.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapter::lifecycle::BackendLifecycle;
use crate::adapter::{BackendConnection, ConnectOptions};
use crate::bus::{DomainBus, DomainEvent};
use crate::error::ErrorCode;
use crate::message::{Role, UnifiedMessage, UnifiedType};
use crate::persist::SessionStore;
use crate::policy::permissions;
use crate::router::Router;
use crate::runner::CommandRunner;
use crate::session::{BackendSendError, QueuedMessage, RunStatus, SessionRuntime};
use crate::trace::Tracer;
use crate::wire::{ClientMessage, ConsumerMessage, ImageAttachment, PermissionBehavior};

/// Options for [`Bridge::send_user_message`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub images: Vec<ImageAttachment>,
    /// Override the session id stamped into the outbound envelope (team
    /// routing).
    pub session_id_override: Option<String>,
}

pub struct Bridge {
    sessions: RwLock<HashMap<String, Arc<SessionRuntime>>>,
    router: Arc<Router>,
    lifecycle: Arc<BackendLifecycle>,
    bus: DomainBus,
    store: Arc<dyn SessionStore>,
    tracer: Arc<dyn Tracer>,
    runner: Option<Arc<dyn CommandRunner>>,
}

impl Bridge {
    pub fn new(
        router: Arc<Router>,
        lifecycle: Arc<BackendLifecycle>,
        bus: DomainBus,
        store: Arc<dyn SessionStore>,
        tracer: Arc<dyn Tracer>,
        runner: Option<Arc<dyn CommandRunner>>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            router,
            lifecycle,
            bus,
            store,
            tracer,
            runner,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn lifecycle(&self) -> &Arc<BackendLifecycle> {
        &self.lifecycle
    }

    // -- Session map ---------------------------------------------------------

    pub async fn insert_session(&self, runtime: Arc<SessionRuntime>) {
        self.sessions.write().await.insert(runtime.id().to_owned(), runtime);
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<SessionRuntime>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // -- Programmatic API ----------------------------------------------------

    /// Record, echo, and deliver (or queue) a user message.
    pub async fn send_user_message(
        &self,
        session_id: &str,
        text: &str,
        options: SendOptions,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        if let Some(override_id) = &options.session_id_override {
            // Delivery threads the override through envelope metadata.
            let mut unified = UnifiedMessage::new(UnifiedType::UserMessage, Role::User)
                .with_text(text)
                .with_meta("session_id", Value::String(override_id.clone()));
            for image in &options.images {
                unified.content.push(crate::message::ContentBlock::Image {
                    media_type: image.media_type.clone(),
                    data: image.data.clone(),
                });
            }
            let echo = ConsumerMessage::UserMessage { id: None, content: unified.content.clone() };
            self.router.broadcast(&mut session, echo).await;
            if session.try_send_to_backend(unified.clone()).is_err() {
                session.push_pending_message(unified);
            }
            return Ok(());
        }
        self.router.deliver_user_message(&mut session, text, &options.images).await;
        Ok(())
    }

    /// Resolve a pending permission request. Unknown request ids are a
    /// silent no-op with a warn log.
    pub async fn send_permission_response(
        &self,
        session_id: &str,
        request_id: &str,
        behavior: PermissionBehavior,
        updated_input: Option<Value>,
        updated_permissions: Option<Value>,
        message: Option<String>,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        let Some(request) = permissions::take_pending(&mut session, request_id) else {
            return Ok(());
        };
        let unified = permissions::build_response(
            &request,
            behavior,
            updated_input,
            updated_permissions,
            message,
        );
        self.send_or_warn(&mut session, unified, "permission_response");
        self.bus.emit(DomainEvent::PermissionResolved {
            session_id: session_id.to_owned(),
            request_id: request_id.to_owned(),
            behavior,
        });
        Ok(())
    }

    pub async fn send_interrupt(&self, session_id: &str) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        let unified = UnifiedMessage::new(UnifiedType::Interrupt, Role::User);
        self.send_or_warn(&mut session, unified, "interrupt");
        Ok(())
    }

    pub async fn send_set_model(&self, session_id: &str, model: &str) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        let unified = UnifiedMessage::new(UnifiedType::ConfigurationChange, Role::System)
            .with_meta("model", Value::String(model.to_owned()));
        self.send_or_warn(&mut session, unified, "set_model");
        Ok(())
    }

    pub async fn send_set_permission_mode(
        &self,
        session_id: &str,
        mode: &str,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        let unified = UnifiedMessage::new(UnifiedType::ConfigurationChange, Role::System)
            .with_meta("permission_mode", Value::String(mode.to_owned()));
        self.send_or_warn(&mut session, unified, "set_permission_mode");
        Ok(())
    }

    /// Hold (or replace) the single queued user message. Delivered
    /// immediately when the backend is already idle.
    pub async fn queue_message(
        &self,
        session_id: &str,
        content: &str,
        images: Vec<ImageAttachment>,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        if session.last_status() == Some(RunStatus::Idle) {
            self.router.deliver_user_message(&mut session, content, &images).await;
            return Ok(());
        }
        session.set_queued_message(Some(QueuedMessage { content: content.to_owned(), images }));
        Ok(())
    }

    pub async fn update_queued_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;
        let images = session.queued_message().map(|q| q.images.clone()).unwrap_or_default();
        session.set_queued_message(Some(QueuedMessage { content: content.to_owned(), images }));
        Ok(())
    }

    pub async fn cancel_queued_message(&self, session_id: &str) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        runtime.lock().await.set_queued_message(None);
        Ok(())
    }

    /// Run a slash command: forward to the backend when it knows the
    /// command, fall back to the managed PTY runner when one is configured,
    /// otherwise report a structured command error.
    pub async fn slash_command(
        &self,
        session_id: &str,
        command: &str,
        request_id: Option<String>,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        let mut session = runtime.lock().await;

        if session.slash_registry().knows(command) {
            let unified = UnifiedMessage::new(UnifiedType::UserMessage, Role::User)
                .with_text(command)
                .with_meta("passthrough", Value::Bool(true));
            match session.try_send_to_backend(unified.clone()) {
                Ok(()) => {}
                Err(_) => session.push_pending_message(unified),
            }
            return Ok(());
        }

        if let Some(runner) = &self.runner {
            let cwd = session.state().cwd.clone();
            drop(session);
            let outcome = runner.run(command, cwd.as_deref()).await;
            let mut session = runtime.lock().await;
            let msg = match outcome {
                Ok(output) => ConsumerMessage::SlashCommandResult {
                    command: command.to_owned(),
                    output,
                    request_id,
                },
                Err(e) => ConsumerMessage::SlashCommandError {
                    command: command.to_owned(),
                    message: e.to_string(),
                    request_id,
                },
            };
            self.router.broadcast(&mut session, msg).await;
            return Ok(());
        }

        let msg = ConsumerMessage::SlashCommandError {
            command: command.to_owned(),
            message: format!("unknown command: {command}"),
            request_id,
        };
        self.router.broadcast(&mut session, msg).await;
        Ok(())
    }

    // -- Backend control -----------------------------------------------------

    pub async fn connect_backend(
        &self,
        session_id: &str,
        options: ConnectOptions,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        self.lifecycle.connect(&runtime, options).await
    }

    pub async fn disconnect_backend(&self, session_id: &str) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        self.lifecycle.disconnect(&runtime).await;
        Ok(())
    }

    /// Accept a callback connection from an inverted-style backend.
    pub async fn attach_backend_connection(
        &self,
        session_id: &str,
        conn: BackendConnection,
    ) -> anyhow::Result<()> {
        let runtime = self.require(session_id).await?;
        self.lifecycle.offer_callback(&runtime, conn).await;
        Ok(())
    }

    /// Tear down one session: backend closed and awaited, consumer sockets
    /// closed, snapshot removed from the store.
    pub async fn close_session(&self, session_id: &str) -> anyhow::Result<()> {
        let Some(runtime) = self.sessions.write().await.remove(session_id) else {
            anyhow::bail!("unknown session: {session_id}");
        };
        self.lifecycle.disconnect(&runtime).await;
        self.lifecycle.forget(session_id).await;
        {
            let mut session = runtime.lock().await;
            session.set_lifecycle(crate::session::SessionLifecycle::Closed);
            for conn in session.consumers().to_vec() {
                conn.sink.close();
            }
        }
        self.router.replay().drop_session(session_id).await;
        if let Err(e) = self.store.remove(session_id) {
            tracing::warn!(session_id, err = %e, "store remove failed");
        }
        self.bus.emit(DomainEvent::SessionClosed { session_id: session_id.to_owned() });
        Ok(())
    }

    /// Graceful teardown of every session.
    pub async fn close(&self) {
        let ids = self.session_ids().await;
        for id in ids {
            if let Err(e) = self.close_session(&id).await {
                tracing::warn!(session_id = %id, err = %e, "close failed");
            }
        }
    }

    // -- Inbound dispatch (consumer transport) -------------------------------

    /// Route one parsed consumer frame. Returns a direct reply for the
    /// sending socket when one is warranted.
    pub async fn handle_client_message(
        &self,
        session_id: &str,
        consumer_id: &str,
        msg: ClientMessage,
    ) -> Option<ConsumerMessage> {
        let result = match msg {
            ClientMessage::UserMessage { content, session_id: override_id, images } => {
                self.send_user_message(
                    session_id,
                    &content,
                    SendOptions { images, session_id_override: override_id },
                )
                .await
            }
            ClientMessage::PermissionResponse {
                request_id,
                behavior,
                updated_input,
                updated_permissions,
                message,
            } => {
                self.send_permission_response(
                    session_id,
                    &request_id,
                    behavior,
                    updated_input,
                    updated_permissions,
                    message,
                )
                .await
            }
            ClientMessage::Interrupt {} => self.send_interrupt(session_id).await,
            ClientMessage::SetModel { model } => self.send_set_model(session_id, &model).await,
            ClientMessage::SetPermissionMode { mode } => {
                self.send_set_permission_mode(session_id, &mode).await
            }
            ClientMessage::PresenceQuery {} => {
                return self.presence_reply(session_id).await;
            }
            ClientMessage::SlashCommand { command, request_id } => {
                self.slash_command(session_id, &command, request_id).await
            }
            ClientMessage::QueueMessage { content, images, .. } => {
                self.queue_message(session_id, &content, images).await
            }
            ClientMessage::UpdateQueuedMessage { content } => {
                self.update_queued_message(session_id, &content).await
            }
            ClientMessage::CancelQueuedMessage {} => self.cancel_queued_message(session_id).await,
            ClientMessage::SetAdapter { .. } => {
                return Some(
                    ErrorCode::SessionActive
                        .to_consumer("the adapter of an active session cannot be changed"),
                );
            }
        };

        match result {
            Ok(()) => None,
            Err(e) => {
                self.tracer.event(session_id, "inbound:error", consumer_id);
                Some(ErrorCode::BadRequest.to_consumer(e.to_string()))
            }
        }
    }

    async fn presence_reply(&self, session_id: &str) -> Option<ConsumerMessage> {
        let runtime = self.session(session_id).await?;
        let session = runtime.lock().await;
        let consumers = session
            .consumers()
            .iter()
            .map(|c| crate::wire::PresenceEntry {
                consumer_id: c.consumer_id.clone(),
                role: c.role,
            })
            .collect();
        Some(ConsumerMessage::PresenceUpdate { consumers })
    }

    // -- Internals -----------------------------------------------------------

    async fn require(&self, session_id: &str) -> anyhow::Result<Arc<SessionRuntime>> {
        self.session(session_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown session: {session_id}"))
    }

    /// Send to the backend, silently dropping (with a warn log) when no
    /// backend is attached. Control traffic is never queued.
    fn send_or_warn(
        &self,
        session: &mut crate::session::Session,
        msg: UnifiedMessage,
        label: &str,
    ) {
        match session.try_send_to_backend(msg) {
            Ok(()) => {}
            Err(BackendSendError::NotConnected) => {
                tracing::warn!(session_id = %session.id(), label, "no backend, dropping");
            }
            Err(BackendSendError::Closed) => {
                tracing::warn!(session_id = %session.id(), label, "backend closed, dropping");
            }
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
