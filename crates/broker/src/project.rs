// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Projection of unified messages into the consumer wire shape.
//!
//! One mapper per unified type. `None` means the message is consumed
//! internally and produces no consumer traffic (control responses, our own
//! outbound permission replies). `session_init` also returns `None` here:
//! its consumer snapshot is built from the full session state by the router,
//! not from the message alone.

use serde_json::Value;

use crate::message::{UnifiedMessage, UnifiedType};
use crate::wire::ConsumerMessage;

/// Map a unified message to its consumer-visible form.
pub fn project(msg: &UnifiedMessage) -> Option<ConsumerMessage> {
    match msg.kind {
        UnifiedType::SessionInit => None,
        UnifiedType::StatusChange => Some(ConsumerMessage::StatusChange {
            status: msg.meta_str("status").unwrap_or("idle").to_owned(),
        }),
        UnifiedType::Assistant => Some(ConsumerMessage::Assistant {
            id: msg.message_id().map(str::to_owned),
            content: msg.content.clone(),
        }),
        UnifiedType::Result => Some(ConsumerMessage::Result {
            num_turns: msg.meta_u64("num_turns").unwrap_or(0),
            is_error: msg.meta_bool("is_error").unwrap_or(false),
            duration_ms: msg.meta_u64("duration_ms"),
            total_cost_usd: msg.meta_f64("total_cost_usd"),
            result: msg.text(),
        }),
        UnifiedType::StreamEvent => Some(ConsumerMessage::StreamEvent {
            event: msg
                .metadata
                .get("event")
                .cloned()
                .unwrap_or_else(|| Value::Object(msg.metadata.clone())),
        }),
        UnifiedType::PermissionRequest => Some(ConsumerMessage::PermissionRequest {
            request_id: msg.request_id()?.to_owned(),
            tool_name: msg.meta_str("tool_name").unwrap_or_default().to_owned(),
            input: msg.metadata.get("input").cloned().unwrap_or(Value::Null),
            suggestions: msg.metadata.get("suggestions").cloned(),
        }),
        UnifiedType::ControlResponse => None,
        UnifiedType::ToolProgress => Some(ConsumerMessage::ToolProgress {
            tool_use_id: msg.meta_str("tool_use_id").unwrap_or_default().to_owned(),
            tool_name: msg.meta_str("tool_name").map(str::to_owned),
            progress: msg.metadata.get("progress").cloned(),
        }),
        UnifiedType::ToolUseSummary => Some(ConsumerMessage::ToolUseSummary {
            tool_use_id: msg.meta_str("tool_use_id").unwrap_or_default().to_owned(),
            summary: msg
                .text()
                .or_else(|| msg.meta_str("summary").map(str::to_owned))
                .unwrap_or_default(),
        }),
        UnifiedType::AuthStatus => {
            Some(ConsumerMessage::AuthStatus { data: Value::Object(msg.metadata.clone()) })
        }
        UnifiedType::ConfigurationChange => {
            Some(ConsumerMessage::ConfigurationChange { data: Value::Object(msg.metadata.clone()) })
        }
        UnifiedType::SessionLifecycle => Some(ConsumerMessage::SessionLifecycle {
            phase: msg.meta_str("phase").unwrap_or("unknown").to_owned(),
        }),
        UnifiedType::UserMessage => Some(ConsumerMessage::UserMessage {
            id: msg.message_id().map(str::to_owned),
            content: msg.content.clone(),
        }),
        UnifiedType::PermissionResponse => None,
        UnifiedType::Interrupt => None,
    }
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
