// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort persistence contract.
//!
//! The store is a snapshot, not a journal: the core never assumes
//! transactional semantics, and every storage failure is a warn-and-continue.
//! Restore on boot is idempotent — sessions already present in memory are
//! not rehydrated twice.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::message::UnifiedMessage;
use crate::session::{PermissionRequest, SessionLifecycle};
use crate::session::state::SessionState;
use crate::wire::ConsumerMessage;

/// Bumped when the persisted shape changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

/// Snapshot of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub state: SessionState,
    pub message_history: Vec<ConsumerMessage>,
    pub pending_messages: Vec<UnifiedMessage>,
    /// Serialized as a list of pairs to keep insertion order.
    pub pending_permissions: Vec<(String, PermissionRequest)>,
    pub schema_version: u32,
}

/// Durable registry metadata for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub adapter_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub lifecycle: SessionLifecycle,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
}

/// Storage contract. Implementations may be file-backed, KV-backed, or
/// in-memory; all are best-effort.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &PersistedSession) -> anyhow::Result<()>;
    fn load(&self, id: &str) -> anyhow::Result<Option<PersistedSession>>;
    fn load_all(&self) -> anyhow::Result<Vec<PersistedSession>>;
    fn remove(&self, id: &str) -> anyhow::Result<()>;
    fn set_archived(&self, id: &str, archived: bool) -> anyhow::Result<()>;
    fn save_launcher_state(&self, sessions: &[SessionInfo]) -> anyhow::Result<()>;
    fn load_launcher_state(&self) -> anyhow::Result<Vec<SessionInfo>>;
}

#[derive(Default)]
struct MemoryStoreInner {
    sessions: HashMap<String, PersistedSession>,
    archived: HashMap<String, bool>,
    launcher_state: Vec<SessionInfo>,
}

/// In-memory store. The default for embedded use and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_archived(&self, id: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.archived.get(id).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session: &PersistedSession) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> anyhow::Result<Option<PersistedSession>> {
        let inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        Ok(inner.sessions.get(id).cloned())
    }

    fn load_all(&self) -> anyhow::Result<Vec<PersistedSession>> {
        let inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        Ok(inner.sessions.values().cloned().collect())
    }

    fn remove(&self, id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        inner.sessions.remove(id);
        inner.archived.remove(id);
        Ok(())
    }

    fn set_archived(&self, id: &str, archived: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        inner.archived.insert(id.to_owned(), archived);
        Ok(())
    }

    fn save_launcher_state(&self, sessions: &[SessionInfo]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        inner.launcher_state = sessions.to_vec();
        Ok(())
    }

    fn load_launcher_state(&self) -> anyhow::Result<Vec<SessionInfo>> {
        let inner = self.inner.lock().map_err(|_| anyhow::anyhow!("store poisoned"))?;
        Ok(inner.launcher_state.clone())
    }
}

/// Snapshot a live session into its persisted form.
pub fn snapshot(session: &crate::session::Session) -> PersistedSession {
    PersistedSession {
        id: session.id().to_owned(),
        state: session.state().clone(),
        message_history: session.history().iter().cloned().collect(),
        pending_messages: session.pending_messages().cloned().collect(),
        pending_permissions: session
            .pending_permissions()
            .map(|(id, req)| (id.clone(), req.clone()))
            .collect(),
        schema_version: SCHEMA_VERSION,
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
