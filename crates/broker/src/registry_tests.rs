// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::persist::MemoryStore;
use crate::session::epoch_ms;

fn info(id: &str) -> SessionInfo {
    SessionInfo {
        id: id.to_owned(),
        adapter_name: "fake".to_owned(),
        cwd: Some("/work".to_owned()),
        pid: None,
        lifecycle: SessionLifecycle::AwaitingBackend,
        created_at_ms: epoch_ms(),
        name: None,
        backend_session_id: None,
    }
}

#[tokio::test]
async fn register_and_get_round_trip() {
    let registry = Registry::new(Arc::new(MemoryStore::new()));
    registry.register(info("s-1")).await;

    assert!(registry.contains("s-1").await);
    let stored = registry.get("s-1").await;
    assert_eq!(stored.map(|i| i.adapter_name), Some("fake".to_owned()));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn mark_connected_updates_lifecycle_and_pid() {
    let registry = Registry::new(Arc::new(MemoryStore::new()));
    registry.register(info("s-1")).await;
    registry.mark_connected("s-1", Some(4242)).await;

    let stored = registry.get("s-1").await;
    assert!(stored.as_ref().is_some_and(|i| i.lifecycle == SessionLifecycle::Active));
    assert_eq!(stored.and_then(|i| i.pid), Some(4242));
}

#[tokio::test]
async fn name_and_backend_id_mutators_apply() {
    let registry = Registry::new(Arc::new(MemoryStore::new()));
    registry.register(info("s-1")).await;
    registry.set_session_name("s-1", "fix the tests").await;
    registry.set_backend_session_id("s-1", "b-7").await;

    let stored = registry.get("s-1").await;
    assert_eq!(stored.as_ref().and_then(|i| i.name.clone()), Some("fix the tests".to_owned()));
    assert_eq!(
        stored.and_then(|i| i.backend_session_id),
        Some("b-7".to_owned())
    );
}

#[tokio::test]
async fn remove_session_forgets_the_entry() {
    let registry = Registry::new(Arc::new(MemoryStore::new()));
    registry.register(info("s-1")).await;
    registry.remove_session("s-1").await;
    assert!(!registry.contains("s-1").await);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn every_mutation_snapshots_launcher_state() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let registry = Registry::new(Arc::clone(&store) as Arc<dyn crate::persist::SessionStore>);

    registry.register(info("s-1")).await;
    registry.register(info("s-2")).await;
    let persisted = store.load_launcher_state()?;
    assert_eq!(persisted.len(), 2);

    registry.remove_session("s-1").await;
    let persisted = store.load_launcher_state()?;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, "s-2");
    Ok(())
}

#[tokio::test]
async fn list_orders_by_creation_time() {
    let registry = Registry::new(Arc::new(MemoryStore::new()));
    let mut first = info("s-1");
    first.created_at_ms = 100;
    let mut second = info("s-2");
    second.created_at_ms = 50;
    registry.register(first).await;
    registry.register(second).await;

    let ids: Vec<String> = registry.list().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, ["s-2", "s-1"]);
}
