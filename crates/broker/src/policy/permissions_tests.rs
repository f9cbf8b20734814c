// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;
use crate::session::epoch_ms;
use crate::test_support::new_session;

fn request(id: &str) -> PermissionRequest {
    PermissionRequest {
        request_id: id.to_owned(),
        tool_name: "Bash".to_owned(),
        input: json!({"command": "ls"}),
        suggestions: None,
        received_at_ms: epoch_ms(),
    }
}

#[test]
fn first_reply_wins_later_replies_noop() {
    let mut session = new_session("s-1");
    session.store_pending_permission(request("r-1"));

    assert!(take_pending(&mut session, "r-1").is_some());
    assert!(take_pending(&mut session, "r-1").is_none());
}

#[test]
fn unknown_request_id_is_a_silent_noop() {
    let mut session = new_session("s-1");
    assert!(take_pending(&mut session, "no-such-id").is_none());
}

#[test]
fn response_carries_behavior_and_request_id() {
    let unified = build_response(&request("r-1"), PermissionBehavior::Allow, None, None, None);
    assert_eq!(unified.kind, UnifiedType::PermissionResponse);
    assert_eq!(unified.request_id(), Some("r-1"));
    assert_eq!(unified.meta_str("behavior"), Some("allow"));
    assert_eq!(unified.meta_str("tool_name"), Some("Bash"));
    assert!(unified.meta_str("message").is_none());
}

#[test]
fn response_includes_optional_updates() {
    let unified = build_response(
        &request("r-1"),
        PermissionBehavior::Deny,
        Some(json!({"command": "ls -la"})),
        Some(json!([{"mode": "session"}])),
        Some("not now".to_owned()),
    );
    assert_eq!(unified.meta_str("behavior"), Some("deny"));
    assert_eq!(unified.metadata.get("updated_input"), Some(&json!({"command": "ls -la"})));
    assert_eq!(
        unified.metadata.get("updated_permissions"),
        Some(&json!([{"mode": "session"}]))
    );
    assert_eq!(unified.meta_str("message"), Some("not now"));
}
