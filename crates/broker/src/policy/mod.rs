// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy services attached to the session runtime.
//!
//! Each policy is an independent task subscribed to the domain bus. Policies
//! never reach into each other's state; coordination happens only through
//! bus events and bridge/lifecycle calls.

pub mod breaker;
pub mod capabilities;
pub mod idle;
pub mod permissions;
pub mod reconnect;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::lifecycle::BackendLifecycle;
use crate::bridge::Bridge;
use crate::bus::DomainBus;
use crate::config::Config;

/// Running policy tasks; stopping the shutdown token ends them all.
pub struct PolicySet {
    handles: Vec<JoinHandle<()>>,
}

impl PolicySet {
    /// Spawn the standard policy services from configuration.
    pub fn spawn(
        config: &Config,
        bridge: Arc<Bridge>,
        lifecycle: Arc<BackendLifecycle>,
        bus: DomainBus,
        shutdown: CancellationToken,
    ) -> Self {
        let mut handles = Vec::new();

        if let Some(timeout) = config.idle_session_timeout() {
            let idle = idle::IdlePolicy::new(
                Arc::clone(&bridge),
                bus.clone(),
                timeout,
                Duration::from_millis(config.idle_check_interval_ms),
                shutdown.clone(),
            );
            handles.push(tokio::spawn(idle.run()));
        }

        let reconnect = reconnect::ReconnectPolicy::new(
            Arc::clone(&bridge),
            lifecycle,
            bus.clone(),
            Duration::from_millis(config.reconnect_grace_period_ms),
            Duration::from_millis(config.relaunch_dedup_ms),
            shutdown.clone(),
        );
        handles.push(tokio::spawn(reconnect.run()));

        let capabilities = Arc::new(capabilities::CapabilitiesPolicy::new(
            bridge,
            bus,
            config.initialize_timeout(),
            shutdown,
        ));
        handles.push(tokio::spawn(capabilities.run()));

        Self { handles }
    }

    /// Abort any still-running policy tasks (used after shutdown
    /// cancellation to bound teardown).
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
