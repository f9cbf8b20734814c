// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-agent team substate and tool-use correlation.
//!
//! Team membership and task graph changes arrive as tool-use blocks inside
//! assistant messages. Changes are applied optimistically on tool-use; the
//! matching tool-result is idempotent, and an error result leaves the
//! optimistic change in place. All apply operations deduplicate, so replaying
//! the same tool-use is a no-op.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation entries retained while a tool-result is outstanding.
const MAX_CORRELATION_ENTRIES: usize = 256;

/// One team member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

/// One tracked task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamTask {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
}

/// Team substate carried inside the session state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Role of this session within the team (lead, member).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<TeamMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TeamTask>,
}

/// A recognized team mutation extracted from a tool-use block.
#[derive(Debug, Clone, PartialEq)]
pub enum TeamOp {
    CreateTeam { name: String, role: Option<String> },
    AddMember { name: String, agent_type: Option<String> },
    RemoveMember { name: String },
    CreateTask { id: String, subject: String },
    UpdateTask {
        id: String,
        status: Option<String>,
        owner: Option<String>,
        blocked_by: Vec<String>,
    },
    DisbandTeam,
}

impl TeamOp {
    /// Parse a tool-use into a team operation. Returns `None` for tools
    /// that do not touch team state.
    pub fn parse(tool_name: &str, input: &Value) -> Option<Self> {
        let str_field = |key: &str| input.get(key).and_then(Value::as_str).map(str::to_owned);
        match tool_name {
            "TeamCreate" => Some(Self::CreateTeam {
                name: str_field("team_name").or_else(|| str_field("name"))?,
                role: str_field("role"),
            }),
            "TeamAddMember" => Some(Self::AddMember {
                name: str_field("name")?,
                agent_type: str_field("agent_type"),
            }),
            "TeamRemoveMember" => Some(Self::RemoveMember { name: str_field("name")? }),
            "TeamDisband" => Some(Self::DisbandTeam),
            "TaskCreate" => Some(Self::CreateTask {
                id: str_field("task_id").or_else(|| str_field("id"))?,
                subject: str_field("subject").unwrap_or_default(),
            }),
            "TaskUpdate" => Some(Self::UpdateTask {
                id: str_field("task_id").or_else(|| str_field("id"))?,
                status: str_field("status"),
                owner: str_field("owner"),
                blocked_by: input
                    .get("add_blocked_by")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items.iter().filter_map(Value::as_str).map(str::to_owned).collect()
                    })
                    .unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Apply a team operation to the substate. Deduplicating and idempotent:
/// repeated members, tasks, and dependency edges collapse to one.
pub fn apply_op(team: &mut Option<TeamState>, op: &TeamOp) {
    match op {
        TeamOp::CreateTeam { name, role } => {
            let state = team.get_or_insert_with(TeamState::default);
            state.name = Some(name.clone());
            if role.is_some() {
                state.role = role.clone();
            }
        }
        TeamOp::AddMember { name, agent_type } => {
            let state = team.get_or_insert_with(TeamState::default);
            if !state.members.iter().any(|m| m.name == *name) {
                state.members.push(TeamMember { name: name.clone(), agent_type: agent_type.clone() });
            }
        }
        TeamOp::RemoveMember { name } => {
            if let Some(state) = team.as_mut() {
                state.members.retain(|m| m.name != *name);
            }
        }
        TeamOp::CreateTask { id, subject } => {
            let state = team.get_or_insert_with(TeamState::default);
            if !state.tasks.iter().any(|t| t.id == *id) {
                state.tasks.push(TeamTask {
                    id: id.clone(),
                    subject: subject.clone(),
                    status: "pending".to_owned(),
                    owner: None,
                    blocked_by: Vec::new(),
                });
            }
        }
        TeamOp::UpdateTask { id, status, owner, blocked_by } => {
            let Some(state) = team.as_mut() else {
                return;
            };
            let Some(task) = state.tasks.iter_mut().find(|t| t.id == *id) else {
                return;
            };
            if let Some(status) = status {
                task.status = status.clone();
            }
            if let Some(owner) = owner {
                task.owner = Some(owner.clone());
            }
            for blocker in blocked_by {
                if !task.blocked_by.contains(blocker) {
                    task.blocked_by.push(blocker.clone());
                }
            }
        }
        TeamOp::DisbandTeam => {
            *team = None;
        }
    }
}

/// Outstanding tool-use → team-op correlation, keyed by tool-use id.
///
/// Bounded; on overflow the oldest entry is dropped.
#[derive(Debug, Default)]
pub struct TeamCorrelation {
    ops: IndexMap<String, TeamOp>,
}

impl TeamCorrelation {
    pub fn new() -> Self {
        Self { ops: IndexMap::new() }
    }

    /// Record an op applied optimistically for `tool_use_id`.
    pub fn record(&mut self, tool_use_id: &str, op: TeamOp) {
        if self.ops.len() >= MAX_CORRELATION_ENTRIES && !self.ops.contains_key(tool_use_id) {
            self.ops.shift_remove_index(0);
        }
        self.ops.insert(tool_use_id.to_owned(), op);
    }

    /// Resolve a tool-result. Returns the op recorded for the id, if any.
    /// The optimistic change stays applied whether or not the result was an
    /// error; resolution only clears the correlation entry.
    pub fn resolve(&mut self, tool_use_id: &str) -> Option<TeamOp> {
        self.ops.shift_remove(tool_use_id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Fine-grained team change derived by diffing two substates.
#[derive(Debug, Clone, PartialEq)]
pub enum TeamChange {
    MemberJoined(String),
    MemberLeft(String),
    TaskCreated(String),
    TaskStatusChanged { id: String, status: String },
    Disbanded,
}

/// Diff two team substates into fine-grained change events.
pub fn diff(prev: &Option<TeamState>, next: &Option<TeamState>) -> Vec<TeamChange> {
    let mut changes = Vec::new();
    match (prev, next) {
        (Some(_), None) => {
            changes.push(TeamChange::Disbanded);
        }
        (prev, Some(next_state)) => {
            let empty = TeamState::default();
            let prev_state = prev.as_ref().unwrap_or(&empty);
            for member in &next_state.members {
                if !prev_state.members.iter().any(|m| m.name == member.name) {
                    changes.push(TeamChange::MemberJoined(member.name.clone()));
                }
            }
            for member in &prev_state.members {
                if !next_state.members.iter().any(|m| m.name == member.name) {
                    changes.push(TeamChange::MemberLeft(member.name.clone()));
                }
            }
            for task in &next_state.tasks {
                match prev_state.tasks.iter().find(|t| t.id == task.id) {
                    None => changes.push(TeamChange::TaskCreated(task.id.clone())),
                    Some(prev_task) if prev_task.status != task.status => {
                        changes.push(TeamChange::TaskStatusChanged {
                            id: task.id.clone(),
                            status: task.status.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        (None, None) => {}
    }
    changes
}

#[cfg(test)]
#[path = "team_tests.rs"]
mod tests;
