// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability negotiation.
//!
//! Adapters that report capabilities inline in `session_init` need no round
//! trip. For the rest, the policy sends an adapter-native initialize control
//! request and holds the response behind a timeout; either way consumers get
//! exactly one `capabilities_ready` per init, and a timeout never stalls the
//! session.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::bus::{DomainBus, DomainEvent};
use crate::session::PendingInitialize;
use crate::wire::ConsumerMessage;

pub struct CapabilitiesPolicy {
    bridge: Arc<Bridge>,
    bus: DomainBus,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl CapabilitiesPolicy {
    pub fn new(
        bridge: Arc<Bridge>,
        bus: DomainBus,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self { bridge, bus, timeout, shutdown }
    }

    pub fn run(self: Arc<Self>) -> impl std::future::Future<Output = ()> {
        async move {
            let mut events = self.bus.subscribe();
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    event = events.recv() => {
                        match event {
                            Ok(DomainEvent::SessionInitialized { session_id, has_inline_capabilities }) => {
                                let policy = Arc::clone(&self);
                                tokio::spawn(async move {
                                    policy.negotiate(&session_id, has_inline_capabilities).await;
                                });
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        }
    }

    /// Run one negotiation for a freshly-initialized session.
    pub async fn negotiate(&self, session_id: &str, has_inline_capabilities: bool) {
        let Some(runtime) = self.bridge.session(session_id).await else {
            return;
        };

        if has_inline_capabilities {
            let mut session = runtime.lock().await;
            let ready = ready_from_registry(&session);
            self.bridge.router().broadcast(&mut session, ready).await;
            drop(session);
            self.bus.emit(DomainEvent::CapabilitiesReady { session_id: session_id.to_owned() });
            return;
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut session = runtime.lock().await;
            session.store_pending_initialize(PendingInitialize {
                request_id: request_id.clone(),
                reply: tx,
            });
            let request = serde_json::json!({
                "type": "control_request",
                "request_id": request_id,
                "request": { "subtype": "initialize" },
            });
            let raw = Bytes::from(request.to_string());
            if session.try_send_raw_to_backend(raw).is_err() {
                session.cancel_pending_initialize();
                let ready = ready_from_registry(&session);
                self.bridge.router().broadcast(&mut session, ready).await;
                drop(session);
                self.bus
                    .emit(DomainEvent::CapabilitiesTimeout { session_id: session_id.to_owned() });
                return;
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(payload)) => {
                let mut session = runtime.lock().await;
                let commands = string_list(&payload, "commands");
                let models = string_list(&payload, "models");
                let account = payload.get("account").cloned();
                session.register_cli_commands(&commands);
                let ready = ConsumerMessage::CapabilitiesReady { commands, models, account };
                self.bridge.router().broadcast(&mut session, ready).await;
                drop(session);
                self.bus.emit(DomainEvent::CapabilitiesReady {
                    session_id: session_id.to_owned(),
                });
            }
            Ok(Err(_)) | Err(_) => {
                // Timed out or the pending initialize was cancelled by a
                // disconnect. Proceed with whatever was already known.
                let mut session = runtime.lock().await;
                session.cancel_pending_initialize();
                let ready = ready_from_registry(&session);
                self.bridge.router().broadcast(&mut session, ready).await;
                drop(session);
                self.bus
                    .emit(DomainEvent::CapabilitiesTimeout { session_id: session_id.to_owned() });
            }
        }
    }
}

fn ready_from_registry(session: &crate::session::Session) -> ConsumerMessage {
    ConsumerMessage::CapabilitiesReady {
        commands: session.slash_registry().cli_commands().to_vec(),
        models: session.state().model.clone().into_iter().collect(),
        account: None,
    }
}

fn string_list(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .or_else(|| v.get("name").and_then(Value::as_str).map(str::to_owned))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "capabilities_tests.rs"]
mod tests;
