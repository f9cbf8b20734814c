// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;
use crate::session::epoch_ms;
use crate::test_support::new_session;
use crate::wire::ConsumerMessage;

fn persisted(id: &str) -> PersistedSession {
    PersistedSession {
        id: id.to_owned(),
        state: SessionState::new(id),
        message_history: vec![ConsumerMessage::StatusChange { status: "idle".to_owned() }],
        pending_messages: vec![],
        pending_permissions: vec![],
        schema_version: SCHEMA_VERSION,
    }
}

#[test]
fn save_load_remove_round_trip() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.save(&persisted("s-1"))?;

    let loaded = store.load("s-1")?;
    assert!(loaded.is_some_and(|s| s.message_history.len() == 1));
    assert_eq!(store.load_all()?.len(), 1);

    store.remove("s-1")?;
    assert!(store.load("s-1")?.is_none());
    Ok(())
}

#[test]
fn archived_flag_round_trips() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.save(&persisted("s-1"))?;
    assert!(!store.is_archived("s-1"));
    store.set_archived("s-1", true)?;
    assert!(store.is_archived("s-1"));
    store.set_archived("s-1", false)?;
    assert!(!store.is_archived("s-1"));
    Ok(())
}

#[test]
fn launcher_state_round_trips() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let infos = vec![SessionInfo {
        id: "s-1".to_owned(),
        adapter_name: "fake".to_owned(),
        cwd: None,
        pid: Some(1),
        lifecycle: SessionLifecycle::Active,
        created_at_ms: epoch_ms(),
        name: None,
        backend_session_id: None,
    }];
    store.save_launcher_state(&infos)?;
    let loaded = store.load_launcher_state()?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "s-1");
    Ok(())
}

#[test]
fn snapshot_captures_live_session() {
    let mut session = new_session("s-1");
    session.append_history(ConsumerMessage::StatusChange { status: "running".to_owned() });
    session.push_pending_message(
        crate::message::UnifiedMessage::new(
            crate::message::UnifiedType::UserMessage,
            crate::message::Role::User,
        )
        .with_text("queued"),
    );
    session.store_pending_permission(crate::session::PermissionRequest {
        request_id: "r-1".to_owned(),
        tool_name: "Bash".to_owned(),
        input: json!({}),
        suggestions: None,
        received_at_ms: 0,
    });

    let snap = snapshot(&session);
    assert_eq!(snap.id, "s-1");
    assert_eq!(snap.schema_version, SCHEMA_VERSION);
    assert_eq!(snap.message_history.len(), 1);
    assert_eq!(snap.pending_messages.len(), 1);
    assert_eq!(snap.pending_permissions.len(), 1);
    assert_eq!(snap.pending_permissions[0].0, "r-1");
}

#[test]
fn persisted_session_serializes_permissions_as_pairs() -> anyhow::Result<()> {
    let mut snap = persisted("s-1");
    snap.pending_permissions.push((
        "r-1".to_owned(),
        crate::session::PermissionRequest {
            request_id: "r-1".to_owned(),
            tool_name: "Bash".to_owned(),
            input: json!({}),
            suggestions: None,
            received_at_ms: 0,
        },
    ));
    let text = serde_json::to_string(&snap)?;
    let back: PersistedSession = serde_json::from_str(&text)?;
    assert_eq!(back.pending_permissions.len(), 1);
    assert_eq!(back.pending_permissions[0].0, "r-1");
    Ok(())
}
