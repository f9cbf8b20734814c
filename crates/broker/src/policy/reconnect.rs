// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect watchdog for inverted-connection adapters.
//!
//! When a callback-style backend disconnects, a grace timer starts. If no
//! new backend connection arrives before it expires, a relaunch is
//! requested — unless another relaunch for the same session started within
//! the dedup window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::adapter::lifecycle::BackendLifecycle;
use crate::adapter::ConnectionStyle;
use crate::bridge::Bridge;
use crate::bus::{DomainBus, DomainEvent};

pub struct ReconnectPolicy {
    bridge: Arc<Bridge>,
    lifecycle: Arc<BackendLifecycle>,
    bus: DomainBus,
    grace_period: Duration,
    dedup_window: Duration,
    shutdown: CancellationToken,
}

impl ReconnectPolicy {
    pub fn new(
        bridge: Arc<Bridge>,
        lifecycle: Arc<BackendLifecycle>,
        bus: DomainBus,
        grace_period: Duration,
        dedup_window: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self { bridge, lifecycle, bus, grace_period, dedup_window, shutdown }
    }

    pub async fn run(self) {
        let mut events = self.bus.subscribe();
        // Session id → grace deadline for sessions awaiting reconnection.
        let mut deadlines: HashMap<String, Instant> = HashMap::new();
        // Session id → last relaunch start, for dedup.
        let mut last_relaunch: HashMap<String, Instant> = HashMap::new();

        loop {
            let next_deadline = deadlines.values().min().copied();
            let sleep = async {
                match next_deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep => {
                    let now = Instant::now();
                    let due: Vec<String> = deadlines
                        .iter()
                        .filter(|(_, at)| **at <= now)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for session_id in due {
                        deadlines.remove(&session_id);
                        self.maybe_relaunch(&session_id, &mut last_relaunch).await;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(DomainEvent::BackendDisconnected { session_id }) => {
                            if self.is_inverted(&session_id).await {
                                deadlines.insert(session_id, Instant::now() + self.grace_period);
                            }
                        }
                        Ok(DomainEvent::BackendConnected { session_id })
                        | Ok(DomainEvent::SessionClosed { session_id }) => {
                            deadlines.remove(&session_id);
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn maybe_relaunch(&self, session_id: &str, last_relaunch: &mut HashMap<String, Instant>) {
        if let Some(started) = last_relaunch.get(session_id) {
            if started.elapsed() < self.dedup_window {
                tracing::debug!(session_id, "relaunch deduped");
                return;
            }
        }
        let Some(runtime) = self.bridge.session(session_id).await else {
            return;
        };
        last_relaunch.insert(session_id.to_owned(), Instant::now());
        self.bus.emit(DomainEvent::RelaunchNeeded { session_id: session_id.to_owned() });
        {
            let mut session = runtime.lock().await;
            self.lifecycle.router().broadcaster().broadcast_watchdog_state(&mut session, "relaunching");
        }
        if let Err(e) = self.lifecycle.relaunch(&runtime).await {
            tracing::warn!(session_id, err = %e, "relaunch failed");
        }
    }

    async fn is_inverted(&self, session_id: &str) -> bool {
        let Some(runtime) = self.bridge.session(session_id).await else {
            return false;
        };
        let adapter_name = runtime.lock().await.adapter_name().to_owned();
        self.lifecycle
            .resolver()
            .resolve(&adapter_name)
            .map(|a| a.style() == ConnectionStyle::Inverted)
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "reconnect_policy_tests.rs"]
mod tests;
