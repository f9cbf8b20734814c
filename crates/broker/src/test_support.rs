// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes, builders, and assertion helpers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::lifecycle::{BackendLifecycle, LifecycleConfig};
use crate::adapter::{
    backend_pair, Adapter, AdapterCapabilities, AdapterResolver, Availability, BackendConnection,
    BackendEndpoints, ConnectOptions, ConnectionStyle,
};
use crate::bridge::Bridge;
use crate::broadcast::{Broadcaster, ConsumerConn, ConsumerSink};
use crate::bus::DomainBus;
use crate::persist::MemoryStore;
use crate::ratelimit::TokenBucket;
use crate::reconnect::ReconnectionHandler;
use crate::router::Router;
use crate::session::{Session, SessionLimits, SessionRuntime};
use crate::trace::noop_tracer;
use crate::wire::ConsumerRole;

/// Sink that records every sent frame and lets tests control the reported
/// buffered byte count and send failures.
pub struct RecordingSink {
    sent: Mutex<Vec<String>>,
    buffered: AtomicUsize,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            buffered: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::Relaxed);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl ConsumerSink for RecordingSink {
    fn send_text(&self, text: &str) -> anyhow::Result<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            anyhow::bail!("socket gone");
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text.to_owned());
        }
        Ok(())
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

pub fn conn(consumer_id: &str, role: ConsumerRole, sink: Arc<RecordingSink>) -> ConsumerConn {
    ConsumerConn { consumer_id: consumer_id.to_owned(), role, sink }
}

pub fn bucket() -> TokenBucket {
    TokenBucket::new(100, 100.0)
}

pub fn limits() -> SessionLimits {
    SessionLimits { max_history: 100, max_pending_permissions: 8 }
}

pub fn new_session(id: &str) -> Session {
    Session::new(id, "fake", limits())
}

/// Adapter whose connections are plain channel pairs; each `connect` hands
/// the adapter-side endpoints to the test through `endpoints_rx`.
pub struct FakeAdapter {
    name: String,
    style: ConnectionStyle,
    endpoints_tx: mpsc::UnboundedSender<BackendEndpoints>,
}

impl FakeAdapter {
    pub fn new(style: ConnectionStyle) -> (Arc<Self>, mpsc::UnboundedReceiver<BackendEndpoints>) {
        let (endpoints_tx, endpoints_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { name: "fake".to_owned(), style, endpoints_tx }), endpoints_rx)
    }
}

impl Adapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            streaming: true,
            permissions: true,
            slash_commands: true,
            teams: false,
            availability: Availability::Local,
        }
    }

    fn style(&self) -> ConnectionStyle {
        self.style
    }

    fn connect(
        &self,
        session_id: &str,
        _options: ConnectOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BackendConnection>> + Send + '_>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            let (conn, endpoints) = backend_pair(&session_id, None);
            self.endpoints_tx
                .send(endpoints)
                .map_err(|_| anyhow::anyhow!("test endpoints receiver dropped"))?;
            Ok(conn)
        })
    }
}

/// Everything a router-level test needs, wired with fakes.
pub struct Harness {
    pub router: Arc<Router>,
    pub broadcaster: Arc<Broadcaster>,
    pub replay: Arc<ReconnectionHandler>,
    pub bus: DomainBus,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_threshold(1_048_576)
    }

    pub fn with_threshold(backpressure_threshold: usize) -> Self {
        let tracer = noop_tracer();
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new(backpressure_threshold, Arc::clone(&tracer)));
        let replay = Arc::new(ReconnectionHandler::new(64));
        let bus = DomainBus::new();
        let router = Arc::new(Router::new(
            Arc::clone(&broadcaster),
            Arc::clone(&replay),
            bus.clone(),
            store.clone(),
            tracer,
        ));
        Self { router, broadcaster, replay, bus, store }
    }

    pub fn runtime(&self, id: &str) -> Arc<SessionRuntime> {
        Arc::new(SessionRuntime::new(new_session(id)))
    }
}

/// Bridge-level harness: harness + lifecycle + bridge over a [`FakeAdapter`].
pub struct BridgeHarness {
    pub harness: Harness,
    pub bridge: Arc<Bridge>,
    pub lifecycle: Arc<BackendLifecycle>,
    pub endpoints_rx: mpsc::UnboundedReceiver<BackendEndpoints>,
}

impl BridgeHarness {
    pub fn new() -> Self {
        Self::with_style(ConnectionStyle::Direct)
    }

    pub fn with_style(style: ConnectionStyle) -> Self {
        let harness = Harness::new();
        let (adapter, endpoints_rx) = FakeAdapter::new(style);
        let mut resolver = AdapterResolver::new();
        resolver.register(adapter);

        let lifecycle = Arc::new(BackendLifecycle::new(
            Arc::clone(&harness.router),
            harness.bus.clone(),
            Arc::new(resolver),
            None,
            LifecycleConfig::default(),
            CancellationToken::new(),
        ));
        let bridge = Arc::new(Bridge::new(
            Arc::clone(&harness.router),
            Arc::clone(&lifecycle),
            harness.bus.clone(),
            harness.store.clone(),
            noop_tracer(),
            None,
        ));
        Self { harness, bridge, lifecycle, endpoints_rx }
    }

    /// Create a session runtime and insert it into the bridge map.
    pub async fn session(&self, id: &str) -> Arc<SessionRuntime> {
        let runtime = self.harness.runtime(id);
        self.bridge.insert_session(Arc::clone(&runtime)).await;
        runtime
    }

    /// Connect the fake backend and return the adapter-side endpoints.
    pub async fn connect_backend(&mut self, id: &str) -> anyhow::Result<BackendEndpoints> {
        self.bridge.connect_backend(id, ConnectOptions::default()).await?;
        self.endpoints_rx
            .try_recv()
            .map_err(|_| anyhow::anyhow!("no backend endpoints delivered"))
    }
}
