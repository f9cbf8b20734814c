// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;
use crate::adapter::backend_pair;
use crate::message::{Role, UnifiedType};
use crate::test_support::{bucket, conn, new_session, RecordingSink};
use crate::wire::ConsumerRole;

fn permission(id: &str) -> PermissionRequest {
    PermissionRequest {
        request_id: id.to_owned(),
        tool_name: "Bash".to_owned(),
        input: json!({}),
        suggestions: None,
        received_at_ms: 0,
    }
}

#[test]
fn state_session_id_matches_session_id() {
    let session = new_session("s-1");
    assert_eq!(session.state().session_id, session.id());
}

#[test]
fn history_drops_from_front_on_overflow() {
    let mut session = Session::new(
        "s-1",
        "fake",
        SessionLimits { max_history: 3, max_pending_permissions: 8 },
    );
    for i in 0..5 {
        session.append_history(crate::wire::ConsumerMessage::StatusChange {
            status: format!("s{i}"),
        });
    }
    assert_eq!(session.history().len(), 3);
    let first = session.history().front();
    assert!(matches!(
        first,
        Some(crate::wire::ConsumerMessage::StatusChange { status }) if status == "s2"
    ));
}

#[test]
fn backend_session_id_is_never_replaced() {
    let mut session = new_session("s-1");
    session.set_backend_session_id("b-1");
    session.set_backend_session_id("b-2");
    assert_eq!(session.backend_session_id(), Some("b-1"));

    session.clear_backend_session_id();
    session.set_backend_session_id("b-2");
    assert_eq!(session.backend_session_id(), Some("b-2"));
}

#[test]
fn pending_permissions_are_capped() {
    let mut session = Session::new(
        "s-1",
        "fake",
        SessionLimits { max_history: 10, max_pending_permissions: 2 },
    );
    assert!(session.store_pending_permission(permission("r1")));
    assert!(session.store_pending_permission(permission("r2")));
    assert!(!session.store_pending_permission(permission("r3")));
    assert_eq!(session.pending_permission_count(), 2);

    // Re-storing an existing id is not an overflow.
    assert!(session.store_pending_permission(permission("r1")));
}

#[test]
fn clear_pending_permission_removes_once() {
    let mut session = new_session("s-1");
    session.store_pending_permission(permission("r1"));
    assert!(session.clear_pending_permission("r1").is_some());
    assert!(session.clear_pending_permission("r1").is_none());
}

#[test]
fn attach_consumer_replaces_same_id() {
    let mut session = new_session("s-1");
    let sink = RecordingSink::new();
    session.attach_consumer(conn("c-1", ConsumerRole::Participant, sink.clone()), bucket());
    session.attach_consumer(conn("c-1", ConsumerRole::Observer, sink), bucket());
    assert_eq!(session.consumers().len(), 1);
    assert_eq!(session.consumers()[0].role, ConsumerRole::Observer);
}

#[test]
fn detach_consumer_reports_removal() {
    let mut session = new_session("s-1");
    let sink = RecordingSink::new();
    session.attach_consumer(conn("c-1", ConsumerRole::Participant, sink), bucket());
    assert!(session.detach_consumer("c-1"));
    assert!(!session.detach_consumer("c-1"));
}

#[test]
fn send_without_backend_reports_not_connected() {
    let mut session = new_session("s-1");
    let msg = crate::message::UnifiedMessage::new(UnifiedType::Interrupt, Role::User);
    assert_eq!(session.try_send_to_backend(msg), Err(BackendSendError::NotConnected));
}

#[tokio::test]
async fn send_with_backend_delivers_commands() -> anyhow::Result<()> {
    let mut session = new_session("s-1");
    let (backend_conn, mut endpoints) = backend_pair("s-1", None);
    session.set_backend(crate::adapter::BackendHandle::from_connection(&backend_conn));

    let msg = crate::message::UnifiedMessage::new(UnifiedType::Interrupt, Role::User);
    session.try_send_to_backend(msg).map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let command = endpoints.commands.recv().await;
    assert!(matches!(command, Some(crate::adapter::BackendCommand::Send(_))));
    Ok(())
}

#[test]
fn pending_messages_drain_in_fifo_order() {
    let mut session = new_session("s-1");
    for i in 0..3 {
        let msg = crate::message::UnifiedMessage::new(UnifiedType::UserMessage, Role::User)
            .with_text(format!("m{i}"));
        session.push_pending_message(msg);
    }
    let drained = session.drain_pending_messages();
    let texts: Vec<Option<String>> = drained.iter().map(|m| m.text()).collect();
    assert_eq!(
        texts,
        [Some("m0".to_owned()), Some("m1".to_owned()), Some("m2".to_owned())]
    );
    assert_eq!(session.pending_message_count(), 0);
}

#[test]
fn take_pending_initialize_requires_matching_id() {
    let mut session = new_session("s-1");
    let (tx, _rx) = tokio::sync::oneshot::channel();
    session.store_pending_initialize(PendingInitialize {
        request_id: "req-1".to_owned(),
        reply: tx,
    });
    assert!(session.take_pending_initialize("other").is_none());
    assert!(session.take_pending_initialize("req-1").is_some());
    assert!(!session.has_pending_initialize());
}

#[test]
fn slash_registry_knows_registered_commands() {
    let mut session = new_session("s-1");
    session.register_cli_commands(&["/compact".to_owned(), "/compact".to_owned()]);
    session.register_skill_commands(&["review".to_owned()]);
    assert!(session.slash_registry().knows("/compact"));
    assert!(session.slash_registry().knows("compact"));
    assert!(session.slash_registry().knows("/review"));
    assert!(!session.slash_registry().knows("/missing"));
    assert_eq!(session.slash_registry().cli_commands().len(), 1);

    session.clear_dynamic_slash_registry();
    assert!(!session.slash_registry().knows("/compact"));
}
