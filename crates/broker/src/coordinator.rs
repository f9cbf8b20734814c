// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level facade.
//!
//! Owns the registry, wires the broadcaster, router, lifecycle manager,
//! bridge, and policy services together, and is the only component that
//! creates or deletes sessions. Boot-time restore rehydrates persisted
//! sessions idempotently.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adapter::lifecycle::{BackendLifecycle, Launcher, LifecycleConfig, SpawnLauncher};
use crate::adapter::AdapterResolver;
use crate::broadcast::Broadcaster;
use crate::bridge::Bridge;
use crate::bus::{DomainBus, DomainEvent};
use crate::config::Config;
use crate::persist::{MemoryStore, SessionInfo, SessionStore};
use crate::policy::breaker::BreakerConfig;
use crate::policy::PolicySet;
use crate::reconnect::ReconnectionHandler;
use crate::registry::Registry;
use crate::router::Router;
use crate::runner::{CommandRunner, PtyRunner};
use crate::session::{epoch_ms, Session, SessionLifecycle, SessionLimits, SessionRuntime};
use crate::trace::{LogTracer, Tracer};

/// Pluggable pieces of a coordinator. Defaults suit the standalone binary;
/// embedders and tests override what they need.
pub struct CoordinatorBuilder {
    config: Config,
    resolver: AdapterResolver,
    store: Option<Arc<dyn SessionStore>>,
    tracer: Option<Arc<dyn Tracer>>,
    launcher: Option<Arc<dyn Launcher>>,
    runner: Option<Arc<dyn CommandRunner>>,
    shutdown: Option<CancellationToken>,
}

impl CoordinatorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            resolver: AdapterResolver::new(),
            store: None,
            tracer: None,
            launcher: None,
            runner: None,
            shutdown: None,
        }
    }

    pub fn resolver(mut self, resolver: AdapterResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> Arc<Coordinator> {
        let config = self.config;
        let shutdown = self.shutdown.unwrap_or_default();
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let tracer = self.tracer.unwrap_or_else(|| Arc::new(LogTracer));
        let runner: Option<Arc<dyn CommandRunner>> = match &self.runner {
            Some(runner) => Some(Arc::clone(runner)),
            None if config.slash_command_pty_enabled => Some(Arc::new(PtyRunner::new(
                config.default_backend_binary.clone(),
                std::time::Duration::from_millis(config.slash_command_pty_timeout_ms),
                std::time::Duration::from_millis(config.slash_command_pty_silence_threshold_ms),
            ))),
            None => None,
        };

        let bus = DomainBus::new();
        let broadcaster =
            Arc::new(Broadcaster::new(config.backpressure_threshold, Arc::clone(&tracer)));
        let replay = Arc::new(ReconnectionHandler::new(config.replay_ring_size));
        let router = Arc::new(Router::new(
            Arc::clone(&broadcaster),
            Arc::clone(&replay),
            bus.clone(),
            Arc::clone(&store),
            Arc::clone(&tracer),
        ));

        let lifecycle_config = LifecycleConfig {
            resume_failure_threshold: std::time::Duration::from_millis(
                config.resume_failure_threshold_ms,
            ),
            relaunch_grace_period: std::time::Duration::from_millis(
                config.relaunch_grace_period_ms,
            ),
            kill_grace_period: config.kill_grace_period(),
            breaker: BreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                window: std::time::Duration::from_millis(config.breaker_window_ms),
                recovery_time: std::time::Duration::from_millis(config.breaker_recovery_time_ms),
                success_threshold: config.breaker_success_threshold,
            },
        };
        let launcher: Arc<dyn Launcher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(SpawnLauncher::new(
                crate::adapter::spawn::ProcessLauncher::new(config.env_deny_list.clone()),
                config.default_backend_binary.clone(),
                config.cli_websocket_url_template.clone(),
            )),
        };
        let lifecycle = Arc::new(BackendLifecycle::new(
            Arc::clone(&router),
            bus.clone(),
            Arc::new(self.resolver),
            Some(launcher),
            lifecycle_config,
            shutdown.clone(),
        ));

        let bridge = Arc::new(Bridge::new(
            Arc::clone(&router),
            Arc::clone(&lifecycle),
            bus.clone(),
            Arc::clone(&store),
            Arc::clone(&tracer),
            runner,
        ));

        let registry = Arc::new(Registry::new(Arc::clone(&store)));
        let policies = PolicySet::spawn(
            &config,
            Arc::clone(&bridge),
            Arc::clone(&lifecycle),
            bus.clone(),
            shutdown.clone(),
        );

        let coordinator = Arc::new(Coordinator {
            config,
            bridge,
            registry,
            lifecycle,
            bus,
            store,
            policies,
            shutdown,
            started_at_ms: epoch_ms(),
        });
        coordinator.spawn_registry_sync();
        coordinator
    }
}

pub struct Coordinator {
    config: Config,
    bridge: Arc<Bridge>,
    registry: Arc<Registry>,
    lifecycle: Arc<BackendLifecycle>,
    bus: DomainBus,
    store: Arc<dyn SessionStore>,
    policies: PolicySet,
    shutdown: CancellationToken,
    started_at_ms: u64,
}

impl Coordinator {
    pub fn builder(config: Config) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<BackendLifecycle> {
        &self.lifecycle
    }

    pub fn bus(&self) -> &DomainBus {
        &self.bus
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn uptime_secs(&self) -> u64 {
        epoch_ms().saturating_sub(self.started_at_ms) / 1000
    }

    /// Create a session with a caller-assigned id.
    pub async fn create_session(
        &self,
        id: &str,
        adapter_name: &str,
        cwd: Option<&str>,
    ) -> anyhow::Result<Arc<SessionRuntime>> {
        if self.bridge.session(id).await.is_some() {
            anyhow::bail!("session already exists: {id}");
        }
        if self.bridge.session_count().await >= self.config.max_concurrent_sessions {
            anyhow::bail!("session limit reached ({})", self.config.max_concurrent_sessions);
        }
        if self.lifecycle.resolver().resolve(adapter_name).is_none() {
            anyhow::bail!("unknown adapter: {adapter_name}");
        }

        let limits = SessionLimits {
            max_history: self.config.max_message_history_length,
            max_pending_permissions: self.config.max_pending_permissions,
        };
        let mut session = Session::new(id, adapter_name, limits);
        if let Some(cwd) = cwd {
            let mut state = session.state().clone();
            state.cwd = Some(cwd.to_owned());
            session.set_state(state);
        }
        let runtime = Arc::new(SessionRuntime::new(session));
        self.bridge.insert_session(Arc::clone(&runtime)).await;

        self.registry
            .register(SessionInfo {
                id: id.to_owned(),
                adapter_name: adapter_name.to_owned(),
                cwd: cwd.map(str::to_owned),
                pid: None,
                lifecycle: SessionLifecycle::AwaitingBackend,
                created_at_ms: epoch_ms(),
                name: None,
                backend_session_id: None,
            })
            .await;

        Ok(runtime)
    }

    /// Close and forget one session.
    pub async fn remove_session(&self, id: &str) -> anyhow::Result<()> {
        self.bridge.close_session(id).await?;
        // Registry removal happens via the SessionClosed subscription, but
        // doing it inline keeps removal deterministic for callers.
        self.registry.remove_session(id).await;
        Ok(())
    }

    /// Rehydrate persisted sessions not already present in memory.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let persisted = match self.store.load_all() {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(err = %e, "session restore load failed");
                return Ok(0);
            }
        };
        let infos: std::collections::HashMap<String, SessionInfo> = self
            .registry
            .load_persisted()
            .into_iter()
            .map(|info| (info.id.clone(), info))
            .collect();

        let mut restored = 0;
        for snapshot in persisted {
            if self.bridge.session(&snapshot.id).await.is_some() {
                continue;
            }
            let adapter_name = infos
                .get(&snapshot.id)
                .map(|info| info.adapter_name.clone())
                .unwrap_or_else(|| self.config.default_backend_binary.clone());
            let limits = SessionLimits {
                max_history: self.config.max_message_history_length,
                max_pending_permissions: self.config.max_pending_permissions,
            };
            let mut session = Session::new(&snapshot.id, &adapter_name, limits);
            session.set_state(snapshot.state);
            session.set_history(snapshot.message_history);
            for msg in snapshot.pending_messages {
                session.push_pending_message(msg);
            }
            for (_, request) in snapshot.pending_permissions {
                session.store_pending_permission(request);
            }
            if let Some(info) = infos.get(&snapshot.id) {
                if let Some(backend_session_id) = &info.backend_session_id {
                    session.set_backend_session_id(backend_session_id);
                }
                self.registry.register(info.clone()).await;
            }
            self.bridge.insert_session(Arc::new(SessionRuntime::new(session))).await;
            restored += 1;
        }
        Ok(restored)
    }

    /// Graceful teardown: close every session, stop policies.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.bridge.close().await;
        self.policies.abort();
    }

    /// Keep the registry in sync with runtime events.
    fn spawn_registry_sync(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = coordinator.bus.subscribe();
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => break,
                    event = events.recv() => {
                        match event {
                            Ok(DomainEvent::SessionClosed { session_id }) => {
                                coordinator.registry.remove_session(&session_id).await;
                            }
                            Ok(DomainEvent::BackendConnected { session_id }) => {
                                let pid = match coordinator.bridge.session(&session_id).await {
                                    Some(runtime) => runtime.lock().await.pid(),
                                    None => None,
                                };
                                coordinator.registry.mark_connected(&session_id, pid).await;
                            }
                            Ok(DomainEvent::BackendSessionIdAssigned { session_id, backend_session_id }) => {
                                coordinator
                                    .registry
                                    .set_backend_session_id(&session_id, &backend_session_id)
                                    .await;
                            }
                            Ok(DomainEvent::SessionNamed { session_id, name }) => {
                                coordinator.registry.set_session_name(&session_id, &name).await;
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
