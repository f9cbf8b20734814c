// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable session metadata registry.
//!
//! Holds the id, adapter, cwd, pid, lifecycle, and name of every session
//! known to the process, and mirrors the list into the launcher-state
//! snapshot after every mutation. `register`, `mark_connected`,
//! `set_backend_session_id`, `set_session_name`, and `remove_session` are
//! the only mutators.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::persist::{SessionInfo, SessionStore};
use crate::session::SessionLifecycle;

pub struct Registry {
    store: Arc<dyn SessionStore>,
    sessions: RwLock<HashMap<String, SessionInfo>>,
}

impl Registry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn register(&self, info: SessionInfo) {
        self.sessions.write().await.insert(info.id.clone(), info);
        self.snapshot().await;
    }

    pub async fn mark_connected(&self, id: &str, pid: Option<u32>) {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(info) = sessions.get_mut(id) {
                info.lifecycle = SessionLifecycle::Active;
                info.pid = pid;
            }
        }
        self.snapshot().await;
    }

    pub async fn set_backend_session_id(&self, id: &str, backend_session_id: &str) {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(info) = sessions.get_mut(id) {
                info.backend_session_id = Some(backend_session_id.to_owned());
            }
        }
        self.snapshot().await;
    }

    pub async fn set_session_name(&self, id: &str, name: &str) {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(info) = sessions.get_mut(id) {
                info.name = Some(name.to_owned());
            }
        }
        self.snapshot().await;
    }

    pub async fn remove_session(&self, id: &str) {
        self.sessions.write().await.remove(id);
        self.snapshot().await;
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.read().await.values().cloned().collect();
        infos.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Load the persisted launcher state (boot-time restore).
    pub fn load_persisted(&self) -> Vec<SessionInfo> {
        match self.store.load_launcher_state() {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!(err = %e, "launcher state load failed");
                Vec::new()
            }
        }
    }

    /// Mirror the current list into the store. Best-effort.
    async fn snapshot(&self) {
        let infos = self.list().await;
        if let Err(e) = self.store.save_launcher_state(&infos) {
            tracing::warn!(err = %e, "launcher state save failed");
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
