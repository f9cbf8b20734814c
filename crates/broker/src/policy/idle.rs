// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle session reaper.
//!
//! Sweeps run on a periodic tick and immediately after consumer/backed
//! connectivity changes. A session is reapable when it has no backend, no
//! consumers, and has been inactive past the timeout. Sweeps are serialized
//! by the single policy task; one sweep finishes before the next starts.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::bus::{DomainBus, DomainEvent};
use crate::session::epoch_ms;

pub struct IdlePolicy {
    bridge: Arc<Bridge>,
    bus: DomainBus,
    timeout: Duration,
    check_interval: Duration,
    shutdown: CancellationToken,
}

impl IdlePolicy {
    pub fn new(
        bridge: Arc<Bridge>,
        bus: DomainBus,
        timeout: Duration,
        check_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self { bridge, bus, timeout, check_interval, shutdown }
    }

    /// Run until shutdown.
    pub async fn run(self) {
        let mut events = self.bus.subscribe();
        let mut tick = tokio::time::interval(self.check_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => self.sweep().await,
                event = events.recv() => {
                    match event {
                        Ok(DomainEvent::ConsumerDisconnected { .. })
                        | Ok(DomainEvent::BackendDisconnected { .. })
                        | Ok(DomainEvent::BackendConnected { .. }) => self.sweep().await,
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    /// Close every idle-reapable session.
    pub async fn sweep(&self) {
        let now = epoch_ms();
        let ids = self.bridge.session_ids().await;
        for id in ids {
            let Some(runtime) = self.bridge.session(&id).await else {
                continue;
            };
            let reapable = {
                let session = runtime.lock().await;
                !session.backend_connected()
                    && session.consumers().is_empty()
                    && Duration::from_millis(now.saturating_sub(session.last_activity_ms()))
                        >= self.timeout
            };
            if reapable {
                tracing::info!(session_id = %id, "idle_reap");
                if let Err(e) = self.bridge.close_session(&id).await {
                    tracing::warn!(session_id = %id, err = %e, "idle reap failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "idle_tests.rs"]
mod tests;
