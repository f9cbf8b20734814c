// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state snapshot and the pure reducer that derives it.
//!
//! The reducer never performs I/O. It copies the previous snapshot, applies
//! type-specific patches from the unified message, threads team tool-uses
//! through the correlation buffer, and returns the new snapshot. Applying the
//! same message twice yields the same state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{UnifiedMessage, UnifiedType};
use crate::session::team::{self, TeamCorrelation, TeamOp, TeamState};

/// Git information refreshed outside the reducer and carried through it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: String,
    pub dirty: bool,
}

/// Flat capability-and-progress snapshot of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slash_commands: Vec<String>,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub num_turns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_usage: Option<Value>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Self::default() }
    }
}

/// Derive the next state from the previous one and a unified message.
///
/// Pure: no I/O, input untouched. The correlation buffer records optimistic
/// team tool-uses so later tool-results resolve without reapplying.
pub fn reduce(
    prev: &SessionState,
    msg: &UnifiedMessage,
    corr: &mut TeamCorrelation,
) -> SessionState {
    let mut next = prev.clone();

    match msg.kind {
        UnifiedType::SessionInit => apply_session_init(&mut next, msg),
        UnifiedType::Result => apply_result(&mut next, msg),
        UnifiedType::ConfigurationChange => apply_configuration_change(&mut next, msg),
        UnifiedType::AuthStatus => {
            if let Some(methods) = msg.meta_array("auth_methods") {
                next.auth_methods =
                    dedup(methods.iter().filter_map(Value::as_str).map(str::to_owned));
            }
        }
        _ => {}
    }

    apply_team_blocks(&mut next, msg, corr);
    next
}

fn apply_session_init(state: &mut SessionState, msg: &UnifiedMessage) {
    if let Some(model) = msg.meta_str("model") {
        state.model = Some(model.to_owned());
    }
    if let Some(cwd) = msg.meta_str("cwd") {
        state.cwd = Some(cwd.to_owned());
    }
    if let Some(mode) = msg.meta_str("permission_mode") {
        state.permission_mode = Some(mode.to_owned());
    }
    if let Some(items) = msg.meta_array("tools") {
        state.tools = dedup(items.iter().filter_map(Value::as_str).map(str::to_owned));
    }
    if let Some(items) = msg.meta_array("mcp_servers") {
        state.mcp_servers = dedup(items.iter().filter_map(Value::as_str).map(str::to_owned));
    }
    if let Some(items) = msg.meta_array("agents") {
        state.agents = dedup(items.iter().filter_map(Value::as_str).map(str::to_owned));
    }
    if let Some(items) = msg.meta_array("skills") {
        state.skills = dedup(items.iter().filter_map(Value::as_str).map(str::to_owned));
    }
    if let Some(items) = msg.meta_array("slash_commands") {
        state.slash_commands = dedup(items.iter().filter_map(Value::as_str).map(str::to_owned));
    }
    if let Some(items) = msg.meta_array("auth_methods") {
        state.auth_methods = dedup(items.iter().filter_map(Value::as_str).map(str::to_owned));
    }
}

fn apply_result(state: &mut SessionState, msg: &UnifiedMessage) {
    if let Some(turns) = msg.meta_u64("num_turns") {
        state.num_turns = turns;
    }
    if let Some(cost) = msg.meta_f64("total_cost_usd") {
        state.total_cost_usd = cost;
    }
    if let Some(pct) = msg.meta_f64("context_used_percent") {
        state.context_used_percent = Some(pct);
    }
    if let Some(usage) = msg.metadata.get("usage") {
        state.last_usage = Some(usage.clone());
    }
}

fn apply_configuration_change(state: &mut SessionState, msg: &UnifiedMessage) {
    if let Some(model) = msg.meta_str("model") {
        state.model = Some(model.to_owned());
    }
    if let Some(mode) = msg.meta_str("permission_mode") {
        state.permission_mode = Some(mode.to_owned());
    }
    if let Some(cwd) = msg.meta_str("cwd") {
        state.cwd = Some(cwd.to_owned());
    }
}

/// Apply team tool-use blocks optimistically and resolve tool-results.
fn apply_team_blocks(state: &mut SessionState, msg: &UnifiedMessage, corr: &mut TeamCorrelation) {
    for (id, name, input) in msg.tool_uses() {
        if let Some(op) = TeamOp::parse(name, input) {
            team::apply_op(&mut state.team, &op);
            corr.record(id, op);
        }
    }
    for (tool_use_id, _is_error) in msg.tool_results() {
        // The optimistic change persists even on an error result; resolution
        // only clears the correlation entry.
        corr.resolve(tool_use_id);
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
