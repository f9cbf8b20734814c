// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer wire protocol: inbound and outbound message types.
//!
//! Messages use internally-tagged JSON enums (`{"type": "user_message", ...}`).
//! Two top-level enums cover the consumer-to-broker and broker-to-consumer
//! directions; [`SequencedMessage`] wraps outbound messages with a per-session
//! monotonic sequence number when reconnection is enabled.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ContentBlock;
use crate::session::state::SessionState;

/// Consumer role. Participants may send input; observers are read-only and
/// never receive process output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerRole {
    Participant,
    Observer,
}

impl Default for ConsumerRole {
    fn default() -> Self {
        Self::Participant
    }
}

/// Image attachment on a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub media_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// Permission reply behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBehavior {
    Allow,
    Deny,
}

impl PermissionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Messages a consumer sends to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
    },
    PermissionResponse {
        request_id: String,
        behavior: PermissionBehavior,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Interrupt {},
    SetModel {
        model: String,
    },
    SetPermissionMode {
        mode: String,
    },
    PresenceQuery {},
    SlashCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    QueueMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
    },
    UpdateQueuedMessage {
        content: String,
    },
    CancelQueuedMessage {},
    /// Always rejected with a structured error on active sessions.
    SetAdapter {
        #[serde(default)]
        adapter: Option<String>,
        #[serde(flatten)]
        rest: serde_json::Map<String, Value>,
    },
}

/// One attached consumer, as reported by presence updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub consumer_id: String,
    pub role: ConsumerRole,
}

/// Messages the broker sends to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerMessage {
    SessionInit {
        session_id: String,
        protocol_version: u32,
        state: SessionState,
    },
    StatusChange {
        status: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        content: Vec<ContentBlock>,
    },
    Result {
        num_turns: u64,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    StreamEvent {
        event: Value,
    },
    PermissionRequest {
        request_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestions: Option<Value>,
    },
    ToolProgress {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<Value>,
    },
    ToolUseSummary {
        tool_use_id: String,
        summary: String,
    },
    AuthStatus {
        data: Value,
    },
    ConfigurationChange {
        data: Value,
    },
    SessionLifecycle {
        phase: String,
    },
    UserMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        content: Vec<ContentBlock>,
    },
    SessionUpdate {
        state: SessionState,
    },
    SessionNameUpdate {
        name: String,
    },
    ResumeFailed {
        reason: String,
    },
    ProcessOutput {
        stream: String,
        data: String,
    },
    PresenceUpdate {
        consumers: Vec<PresenceEntry>,
    },
    CliConnected {
        connected: bool,
    },
    CliDisconnected {},
    Error {
        code: String,
        message: String,
    },
    SlashCommandResult {
        command: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    SlashCommandError {
        command: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    CapabilitiesReady {
        #[serde(default)]
        commands: Vec<String>,
        #[serde(default)]
        models: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<Value>,
    },
}

impl ConsumerMessage {
    /// True for messages only participants may see.
    pub fn participants_only(&self) -> bool {
        matches!(self, Self::ProcessOutput { .. } | Self::PermissionRequest { .. })
    }
}

/// A consumer message wrapped with replay bookkeeping. The unit of replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencedMessage {
    /// Per-session monotonic sequence, starting at 1.
    pub seq: u64,
    pub message_id: String,
    pub timestamp_ms: u64,
    pub payload: ConsumerMessage,
}

/// Reconnection handshake parameters supplied on WebSocket connect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub consumer_id: Option<String>,
    #[serde(default)]
    pub last_seen_seq: Option<u64>,
    #[serde(default)]
    pub role: Option<ConsumerRole>,
    #[serde(default)]
    pub token: Option<String>,
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
