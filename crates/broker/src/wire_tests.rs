// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[test]
fn status_change_wire_shape_is_minimal() -> anyhow::Result<()> {
    let msg = ConsumerMessage::StatusChange { status: "idle".to_owned() };
    assert_eq!(serde_json::to_string(&msg)?, r#"{"type":"status_change","status":"idle"}"#);
    Ok(())
}

#[test]
fn participants_only_covers_process_output_and_permissions() {
    let process = ConsumerMessage::ProcessOutput {
        stream: "stderr".to_owned(),
        data: "HELLO".to_owned(),
    };
    assert!(process.participants_only());

    let permission = ConsumerMessage::PermissionRequest {
        request_id: "r1".to_owned(),
        tool_name: "Bash".to_owned(),
        input: json!({}),
        suggestions: None,
    };
    assert!(permission.participants_only());

    let status = ConsumerMessage::StatusChange { status: "idle".to_owned() };
    assert!(!status.participants_only());
}

#[test]
fn client_message_parses_tagged_variants() -> anyhow::Result<()> {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"type":"user_message","content":"hi"}"#)?;
    assert!(matches!(msg, ClientMessage::UserMessage { ref content, .. } if content == "hi"));

    let msg: ClientMessage = serde_json::from_str(
        r#"{"type":"permission_response","request_id":"r1","behavior":"allow"}"#,
    )?;
    assert!(matches!(
        msg,
        ClientMessage::PermissionResponse { behavior: PermissionBehavior::Allow, .. }
    ));

    let msg: ClientMessage = serde_json::from_str(r#"{"type":"interrupt"}"#)?;
    assert!(matches!(msg, ClientMessage::Interrupt {}));
    Ok(())
}

#[test]
fn set_adapter_accepts_arbitrary_fields() -> anyhow::Result<()> {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"type":"set_adapter","adapter":"other","force":true}"#)?;
    match msg {
        ClientMessage::SetAdapter { adapter, rest } => {
            assert_eq!(adapter.as_deref(), Some("other"));
            assert_eq!(rest.get("force"), Some(&json!(true)));
        }
        other => anyhow::bail!("unexpected variant: {other:?}"),
    }
    Ok(())
}

#[test]
fn sequenced_message_round_trips() -> anyhow::Result<()> {
    let wrapped = SequencedMessage {
        seq: 7,
        message_id: "m-7".to_owned(),
        timestamp_ms: 1234,
        payload: ConsumerMessage::StatusChange { status: "running".to_owned() },
    };
    let text = serde_json::to_string(&wrapped)?;
    let back: SequencedMessage = serde_json::from_str(&text)?;
    assert_eq!(back.seq, 7);
    assert!(matches!(back.payload, ConsumerMessage::StatusChange { ref status } if status == "running"));
    Ok(())
}

#[test]
fn consumer_role_defaults_to_participant() {
    assert_eq!(ConsumerRole::default(), ConsumerRole::Participant);
}
