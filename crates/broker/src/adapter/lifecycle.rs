// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend lifecycle manager.
//!
//! Mediates both connection styles uniformly: direct adapters are dialed via
//! `Adapter::connect`, inverted adapters are launched and the session waits
//! in `awaiting_backend` until the tool calls back and the transport hands
//! the connection to [`BackendLifecycle::attach`]. Either way the inbound
//! message sequence is pumped into the router, pending messages are flushed
//! FIFO on connect, and connect/disconnect events land on the domain bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    Adapter, AdapterResolver, BackendConnection, BackendHandle, ConnectOptions, ConnectionStyle,
};
use crate::bus::{DomainBus, DomainEvent};
use crate::policy::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::router::Router;
use crate::session::{epoch_ms, SessionLifecycle, SessionRuntime};
use crate::wire::ConsumerMessage;

/// Starts the external tool for inverted-connection adapters.
pub trait Launcher: Send + Sync {
    /// Launch the tool that will call back for `session_id`. Returns the
    /// child pid when one is owned by us.
    fn launch(&self, session_id: &str, options: &ConnectOptions) -> anyhow::Result<Option<u32>>;
}

/// Launcher that spawns the configured tool binary pointed back at the
/// broker's callback URL.
pub struct SpawnLauncher {
    launcher: crate::adapter::spawn::ProcessLauncher,
    binary: String,
    url_template: String,
}

impl SpawnLauncher {
    pub fn new(
        launcher: crate::adapter::spawn::ProcessLauncher,
        binary: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        Self { launcher, binary: binary.into(), url_template: url_template.into() }
    }
}

impl Launcher for SpawnLauncher {
    fn launch(&self, session_id: &str, options: &ConnectOptions) -> anyhow::Result<Option<u32>> {
        let url = self.url_template.replace("{session_id}", session_id);
        let mut spec = crate::adapter::spawn::SpawnSpec::new(&self.binary)
            .arg("--callback-url")
            .arg(url);
        if let Some(cwd) = &options.cwd {
            spec.cwd = Some(cwd.into());
        }
        if let Some(resume) = &options.resume {
            spec = spec.arg("--resume").arg(resume);
        }
        let mut child = self.launcher.spawn(spec)?;
        let pid = child.id();
        // Reap off-path; the tool outlives this call and connects back on
        // its own schedule.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(pid)
    }
}

/// Timing knobs for the lifecycle manager.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub resume_failure_threshold: Duration,
    pub relaunch_grace_period: Duration,
    pub kill_grace_period: Duration,
    pub breaker: BreakerConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            resume_failure_threshold: Duration::from_secs(5),
            relaunch_grace_period: Duration::from_secs(30),
            kill_grace_period: Duration::from_secs(5),
            breaker: BreakerConfig::default(),
        }
    }
}

pub struct BackendLifecycle {
    router: Arc<Router>,
    bus: DomainBus,
    resolver: Arc<AdapterResolver>,
    launcher: Option<Arc<dyn Launcher>>,
    config: LifecycleConfig,
    /// Sessions awaiting an inverted-connection callback.
    pending_callbacks: Mutex<HashMap<String, oneshot::Sender<BackendConnection>>>,
    /// Running message pumps, one per connected session.
    pumps: Mutex<HashMap<String, JoinHandle<()>>>,
    /// One breaker per session guards restart loops.
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    shutdown: CancellationToken,
}

impl BackendLifecycle {
    pub fn new(
        router: Arc<Router>,
        bus: DomainBus,
        resolver: Arc<AdapterResolver>,
        launcher: Option<Arc<dyn Launcher>>,
        config: LifecycleConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            router,
            bus,
            resolver,
            launcher,
            config,
            pending_callbacks: Mutex::new(HashMap::new()),
            pumps: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn resolver(&self) -> &Arc<AdapterResolver> {
        &self.resolver
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Connect a backend for the session, honoring the adapter's style.
    pub async fn connect(
        self: &Arc<Self>,
        runtime: &Arc<SessionRuntime>,
        options: ConnectOptions,
    ) -> anyhow::Result<()> {
        let adapter_name = runtime.lock().await.adapter_name().to_owned();
        let adapter = self
            .resolver
            .resolve(&adapter_name)
            .with_context(|| format!("unknown adapter: {adapter_name}"))?;

        if !self.breaker_allows(runtime.id()).await {
            let mut session = runtime.lock().await;
            self.router.broadcaster().broadcast_circuit_breaker_state(&mut session, "open");
            anyhow::bail!("backend restarts for {} are circuit-broken", runtime.id());
        }

        let result = match adapter.style() {
            ConnectionStyle::Direct => self.connect_direct(runtime, &adapter, options).await,
            ConnectionStyle::Inverted => self.connect_inverted(runtime, &options).await,
        };

        match &result {
            Ok(()) => self.breaker_record(runtime.id(), true).await,
            Err(_) => self.breaker_record(runtime.id(), false).await,
        }
        result
    }

    async fn connect_direct(
        self: &Arc<Self>,
        runtime: &Arc<SessionRuntime>,
        adapter: &Arc<dyn Adapter>,
        options: ConnectOptions,
    ) -> anyhow::Result<()> {
        let conn = adapter.connect(runtime.id(), options).await?;
        self.attach(runtime, conn).await;
        Ok(())
    }

    async fn connect_inverted(
        self: &Arc<Self>,
        runtime: &Arc<SessionRuntime>,
        options: &ConnectOptions,
    ) -> anyhow::Result<()> {
        let launcher =
            self.launcher.clone().context("inverted adapter requires a launcher")?;

        let (tx, rx) = oneshot::channel();
        self.pending_callbacks.lock().await.insert(runtime.id().to_owned(), tx);

        let pid = match launcher.launch(runtime.id(), options) {
            Ok(pid) => pid,
            Err(e) => {
                self.pending_callbacks.lock().await.remove(runtime.id());
                return Err(e);
            }
        };
        {
            let mut session = runtime.lock().await;
            session.set_pid(pid);
            session.set_lifecycle(SessionLifecycle::AwaitingBackend);
        }

        // Wait for the callback; the transport fulfills it via `attach`.
        match tokio::time::timeout(self.config.relaunch_grace_period, rx).await {
            Ok(Ok(conn)) => {
                self.attach(runtime, conn).await;
                Ok(())
            }
            Ok(Err(_)) => anyhow::bail!("callback waiter dropped for {}", runtime.id()),
            Err(_) => {
                self.pending_callbacks.lock().await.remove(runtime.id());
                anyhow::bail!("backend for {} never called back", runtime.id())
            }
        }
    }

    /// Hand an established backend connection to its session. Fulfills an
    /// outstanding callback waiter when one exists, otherwise wires the
    /// connection directly.
    pub async fn offer_callback(
        self: &Arc<Self>,
        runtime: &Arc<SessionRuntime>,
        conn: BackendConnection,
    ) {
        let waiter = self.pending_callbacks.lock().await.remove(runtime.id());
        match waiter {
            Some(tx) => {
                if let Err(conn) = tx.send(conn) {
                    // Waiter timed out between lookup and send; wire anyway.
                    self.attach(runtime, conn).await;
                }
            }
            None => self.attach(runtime, conn).await,
        }
    }

    /// Wire a live connection: install the handle, flush pending messages in
    /// FIFO order, announce the backend, and start the message pump.
    pub async fn attach(self: &Arc<Self>, runtime: &Arc<SessionRuntime>, conn: BackendConnection) {
        let handle = BackendHandle::from_connection(&conn);
        {
            let mut session = runtime.lock().await;
            // One backend connection per session; replacement requires an
            // explicit disconnect first.
            if session.backend_connected() {
                tracing::warn!(
                    session_id = %session.id(),
                    "backend already connected, rejecting replacement"
                );
                conn.cancel.cancel();
                return;
            }
            session.set_backend(handle);
            session.set_lifecycle(SessionLifecycle::Active);

            let pending = session.drain_pending_messages();
            let mut requeue = Vec::new();
            let mut failed = false;
            for msg in pending {
                if failed {
                    requeue.push(msg);
                    continue;
                }
                if let Err(e) = session.try_send_to_backend(msg.clone()) {
                    tracing::warn!(session_id = %session.id(), ?e, "pending flush interrupted");
                    requeue.push(msg);
                    failed = true;
                }
            }
            for msg in requeue {
                session.push_pending_message(msg);
            }

            self.router.broadcast(&mut session, ConsumerMessage::CliConnected { connected: true }).await;
        }
        self.bus.emit(DomainEvent::BackendConnected { session_id: runtime.id().to_owned() });

        self.spawn_pump(runtime, conn).await;
    }

    async fn spawn_pump(self: &Arc<Self>, runtime: &Arc<SessionRuntime>, conn: BackendConnection) {
        let manager = Arc::clone(self);
        let runtime_id = runtime.id().to_owned();
        let runtime = Arc::clone(runtime);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let BackendConnection { mut messages, cancel, .. } = conn;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    msg = messages.recv() => match msg {
                        Some(msg) => manager.router.route(&runtime, msg).await,
                        None => break,
                    }
                }
            }
            manager.on_disconnected(&runtime).await;
        });
        self.pumps.lock().await.insert(runtime_id, handle);
    }

    /// The inbound sequence ended: the backend is gone.
    async fn on_disconnected(&self, runtime: &Arc<SessionRuntime>) {
        let mut session = runtime.lock().await;
        let Some(handle) = session.take_backend() else {
            return;
        };
        session.set_lifecycle(SessionLifecycle::Degraded);

        // A resumed backend dying this quickly means the resume itself
        // failed; clear the id so the next connect starts fresh.
        let lived = Duration::from_millis(epoch_ms().saturating_sub(handle.connected_at_ms));
        if handle.resumed && lived < self.config.resume_failure_threshold {
            session.clear_backend_session_id();
            self.router
                .broadcaster()
                .broadcast_resume_failed(&mut session, "backend exited during resume");
            self.breakers
                .lock()
                .await
                .entry(session.id().to_owned())
                .or_insert_with(|| CircuitBreaker::new(self.config.breaker))
                .record_failure();
        }

        self.router.broadcast(&mut session, ConsumerMessage::CliDisconnected {}).await;
        let session_id = session.id().to_owned();
        drop(session);

        self.bus.emit(DomainEvent::BackendDisconnected { session_id });
    }

    /// Close the backend connection and await pump termination.
    pub async fn disconnect(&self, runtime: &Arc<SessionRuntime>) {
        let handle = {
            let mut session = runtime.lock().await;
            session.cancel_pending_initialize();
            session.backend_handle().cloned()
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
        }
        self.pending_callbacks.lock().await.remove(runtime.id());

        let pump = self.pumps.lock().await.remove(runtime.id());
        if let Some(pump) = pump {
            if tokio::time::timeout(self.config.kill_grace_period, pump).await.is_err() {
                tracing::warn!(session_id = %runtime.id(), "backend pump did not stop in grace period");
            }
        }
    }

    /// Relaunch a callback-style backend after its grace period expired.
    pub async fn relaunch(self: &Arc<Self>, runtime: &Arc<SessionRuntime>) -> anyhow::Result<()> {
        let options = {
            let session = runtime.lock().await;
            ConnectOptions {
                cwd: session.state().cwd.clone(),
                model: session.state().model.clone(),
                permission_mode: session.state().permission_mode.clone(),
                resume: session.backend_session_id().map(str::to_owned),
                extra: serde_json::Map::new(),
            }
        };
        self.connect(runtime, options).await
    }

    async fn breaker_allows(&self, session_id: &str) -> bool {
        self.breakers
            .lock()
            .await
            .entry(session_id.to_owned())
            .or_insert_with(|| CircuitBreaker::new(self.config.breaker))
            .can_execute()
    }

    async fn breaker_record(&self, session_id: &str, success: bool) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers
            .entry(session_id.to_owned())
            .or_insert_with(|| CircuitBreaker::new(self.config.breaker));
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// Breaker state for a session (status surfaces, tests).
    pub async fn breaker_state(&self, session_id: &str) -> Option<BreakerState> {
        self.breakers.lock().await.get(session_id).map(|b| b.state())
    }

    /// Drop per-session bookkeeping for a closed session.
    pub async fn forget(&self, session_id: &str) {
        self.pending_callbacks.lock().await.remove(session_id);
        self.breakers.lock().await.remove(session_id);
        if let Some(pump) = self.pumps.lock().await.remove(session_id) {
            pump.abort();
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
