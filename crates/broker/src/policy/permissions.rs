// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Permission gatekeeper.
//!
//! Requests are stored by the router when they arrive; this module owns the
//! reply side: the first reply from any participant wins, later replies and
//! unknown request ids are no-ops with a warn log.

use serde_json::Value;

use crate::message::{Role, UnifiedMessage, UnifiedType};
use crate::session::{PermissionRequest, Session};
use crate::wire::PermissionBehavior;

/// Take the pending request for a reply. Unknown ids warn and return `None`;
/// the caller must then do nothing (no downstream send, no consumer error).
pub fn take_pending(session: &mut Session, request_id: &str) -> Option<PermissionRequest> {
    match session.clear_pending_permission(request_id) {
        Some(request) => Some(request),
        None => {
            tracing::warn!(
                session_id = %session.id(),
                request_id,
                "permission reply for unknown request id, ignoring"
            );
            None
        }
    }
}

/// Build the downstream unified reply for a resolved request.
pub fn build_response(
    request: &PermissionRequest,
    behavior: PermissionBehavior,
    updated_input: Option<Value>,
    updated_permissions: Option<Value>,
    message: Option<String>,
) -> UnifiedMessage {
    let mut unified = UnifiedMessage::new(UnifiedType::PermissionResponse, Role::User)
        .with_meta("request_id", Value::String(request.request_id.clone()))
        .with_meta("behavior", Value::String(behavior.as_str().to_owned()))
        .with_meta("tool_name", Value::String(request.tool_name.clone()));
    if let Some(input) = updated_input {
        unified = unified.with_meta("updated_input", input);
    }
    if let Some(permissions) = updated_permissions {
        unified = unified.with_meta("updated_permissions", permissions);
    }
    if let Some(message) = message {
        unified = unified.with_meta("message", Value::String(message));
    }
    unified
}

#[cfg(test)]
#[path = "permissions_tests.rs"]
mod tests;
