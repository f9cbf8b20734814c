// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter-independent message envelope.
//!
//! Every payload crossing the broker — consumer input, backend output,
//! internal control traffic — is normalized into a [`UnifiedMessage`] before
//! the router sees it. Adapter-specific details ride in the `metadata` map
//! and are extracted with named accessors, never read ad hoc.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Closed set of unified message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedType {
    SessionInit,
    StatusChange,
    Assistant,
    Result,
    StreamEvent,
    PermissionRequest,
    ControlResponse,
    ToolProgress,
    ToolUseSummary,
    AuthStatus,
    ConfigurationChange,
    SessionLifecycle,
    UserMessage,
    PermissionResponse,
    Interrupt,
}

impl UnifiedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInit => "session_init",
            Self::StatusChange => "status_change",
            Self::Assistant => "assistant",
            Self::Result => "result",
            Self::StreamEvent => "stream_event",
            Self::PermissionRequest => "permission_request",
            Self::ControlResponse => "control_response",
            Self::ToolProgress => "tool_progress",
            Self::ToolUseSummary => "tool_use_summary",
            Self::AuthStatus => "auth_status",
            Self::ConfigurationChange => "configuration_change",
            Self::SessionLifecycle => "session_lifecycle",
            Self::UserMessage => "user_message",
            Self::PermissionResponse => "permission_response",
            Self::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for UnifiedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One ordered content block inside a unified message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded payload.
        data: String,
    },
    Code {
        language: String,
        code: String,
    },
    Refusal {
        text: String,
    },
}

/// The adapter-independent envelope exchanged inside the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    #[serde(rename = "type")]
    pub kind: UnifiedType,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Structured carrier of adapter-specific details. Handlers extract
    /// fields with the named accessors below; the map is canonicalized
    /// (stable key order) before it reaches tracing output.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl UnifiedMessage {
    /// Build an empty envelope of the given type and role.
    pub fn new(kind: UnifiedType, role: Role) -> Self {
        Self { kind, role, content: Vec::new(), metadata: Map::new() }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(ContentBlock::Text { text: text.into() });
        self
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_owned(), value);
        self
    }

    /// Concatenated text blocks, or `None` if there is no text content.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(""))
        }
    }

    /// Tool-use blocks in content order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }

    /// Tool-result blocks in content order.
    pub fn tool_results(&self) -> impl Iterator<Item = (&str, bool)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                Some((tool_use_id.as_str(), *is_error))
            }
            _ => None,
        })
    }

    // -- Named metadata accessors --------------------------------------------

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(Value::as_bool)
    }

    pub fn meta_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.metadata.get(key).and_then(Value::as_array)
    }

    pub fn meta_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.metadata.get(key).and_then(Value::as_object)
    }

    /// Backend-assigned message id (`message_id`, falling back to `id`).
    pub fn message_id(&self) -> Option<&str> {
        self.meta_str("message_id").or_else(|| self.meta_str("id"))
    }

    /// Backend session id carried by `session_init`.
    pub fn backend_session_id(&self) -> Option<&str> {
        self.meta_str("backend_session_id").or_else(|| self.meta_str("session_id"))
    }

    /// Permission request id carried by `permission_request` / `_response`.
    pub fn request_id(&self) -> Option<&str> {
        self.meta_str("request_id")
    }

    /// Stream-event subtype (`message_start`, `content_block_delta`, ...).
    pub fn stream_event_type(&self) -> Option<&str> {
        self.meta_str("event_type")
    }

    /// Parent tool-use id for stream events emitted inside a sub-agent.
    pub fn parent_tool_use_id(&self) -> Option<&str> {
        self.meta_str("parent_tool_use_id").filter(|s| !s.is_empty())
    }

    /// Canonicalize the metadata map in place: objects sorted by key,
    /// recursively. Idempotent. Required before metadata reaches tracing.
    pub fn canonicalize(&mut self) {
        let map = std::mem::take(&mut self.metadata);
        self.metadata = canonical_map(map);
    }
}

/// Recursively sort the keys of a JSON object map.
fn canonical_map(map: Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(String, Value)> =
        map.into_iter().map(|(k, v)| (k, canonical_value(v))).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().collect()
}

/// Recursively sort object keys inside a JSON value.
pub fn canonical_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(canonical_map(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(canonical_value).collect()),
        other => other,
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
