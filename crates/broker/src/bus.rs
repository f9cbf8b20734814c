// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal domain event bus.
//!
//! Typed coordination events fanned out to the policy services over a
//! broadcast channel. Distinct from anything consumer-visible: nothing on
//! this bus crosses the wire.

use tokio::sync::broadcast;

use crate::session::team::TeamChange;
use crate::wire::PermissionBehavior;

/// Events carried on the domain bus.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ConsumerConnected { session_id: String, consumer_id: String },
    /// A `session_init` was processed. `has_inline_capabilities` is false
    /// when the adapter expects the broker to negotiate capabilities itself.
    SessionInitialized { session_id: String, has_inline_capabilities: bool },
    /// The backend assigned (or confirmed) its own session id.
    BackendSessionIdAssigned { session_id: String, backend_session_id: String },
    ConsumerDisconnected { session_id: String, consumer_id: String },
    BackendConnected { session_id: String },
    BackendDisconnected { session_id: String },
    SessionClosed { session_id: String },
    PermissionRequested { session_id: String, request_id: String },
    PermissionResolved {
        session_id: String,
        request_id: String,
        behavior: PermissionBehavior,
    },
    FirstTurnCompleted { session_id: String },
    /// A display name was derived for the session.
    SessionNamed { session_id: String, name: String },
    CapabilitiesReady { session_id: String },
    CapabilitiesTimeout { session_id: String },
    RelaunchNeeded { session_id: String },
    TeamChanged { session_id: String, change: TeamChange },
}

impl DomainEvent {
    /// Session this event concerns.
    pub fn session_id(&self) -> &str {
        match self {
            Self::ConsumerConnected { session_id, .. }
            | Self::SessionInitialized { session_id, .. }
            | Self::BackendSessionIdAssigned { session_id, .. }
            | Self::ConsumerDisconnected { session_id, .. }
            | Self::BackendConnected { session_id }
            | Self::BackendDisconnected { session_id }
            | Self::SessionClosed { session_id }
            | Self::PermissionRequested { session_id, .. }
            | Self::PermissionResolved { session_id, .. }
            | Self::FirstTurnCompleted { session_id }
            | Self::SessionNamed { session_id, .. }
            | Self::CapabilitiesReady { session_id }
            | Self::CapabilitiesTimeout { session_id }
            | Self::RelaunchNeeded { session_id }
            | Self::TeamChanged { session_id, .. } => session_id,
        }
    }
}

/// Bus handle. Cheap to clone; subscribers each get an independent receiver.
#[derive(Clone)]
pub struct DomainBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl DomainBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for DomainBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
