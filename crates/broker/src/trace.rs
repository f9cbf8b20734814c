// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing seam for message flow.
//!
//! The router and adapters report every receive, send, and drop through a
//! [`Tracer`]. Production wires the `tracing`-backed implementation; tests
//! and embedded callers can pass the shared no-op value.

use std::sync::Arc;

use crate::message::UnifiedMessage;

/// Observer for message traffic. Implementations must be cheap; they run
/// inline on the router path.
pub trait Tracer: Send + Sync {
    /// A unified message arrived at the router for `session_id`.
    fn recv(&self, session_id: &str, label: &str, msg: Option<&UnifiedMessage>);

    /// A message left the broker (to a backend or to consumers).
    fn send(&self, session_id: &str, label: &str);

    /// A named event with no message body (drops, timeouts, metrics).
    fn event(&self, session_id: &str, label: &str, detail: &str);
}

/// Tracer that discards everything. Safe to share.
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn recv(&self, _session_id: &str, _label: &str, _msg: Option<&UnifiedMessage>) {}
    fn send(&self, _session_id: &str, _label: &str) {}
    fn event(&self, _session_id: &str, _label: &str, _detail: &str) {}
}

/// Shared no-op tracer value.
pub fn noop_tracer() -> Arc<dyn Tracer> {
    Arc::new(NoopTracer)
}

/// Tracer backed by the `tracing` crate at trace/debug level.
///
/// Metadata is canonicalized before formatting so field order is stable
/// across runs.
pub struct LogTracer;

impl Tracer for LogTracer {
    fn recv(&self, session_id: &str, label: &str, msg: Option<&UnifiedMessage>) {
        match msg {
            Some(m) => {
                let mut canonical = m.clone();
                canonical.canonicalize();
                tracing::trace!(
                    session_id,
                    label,
                    kind = %canonical.kind,
                    metadata = %serde_json::Value::Object(canonical.metadata.clone()),
                    "recv"
                );
            }
            None => tracing::trace!(session_id, label, "recv"),
        }
    }

    fn send(&self, session_id: &str, label: &str) {
        tracing::trace!(session_id, label, "send");
    }

    fn event(&self, session_id: &str, label: &str, detail: &str) {
        tracing::debug!(session_id, label, detail, "trace event");
    }
}
