// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model: tasks, projects, and the per-task transition audit log.

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::driver::{Confidence, Source};

/// Maximum transition records retained per task.
pub const TRANSITION_LOG_CAP: usize = 200;

/// Epoch milliseconds, the timestamp unit used everywhere on the wire.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Known agent types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Gemini,
    Codex,
    Generic,
}

impl AgentKind {
    /// Infer the agent type from the wrapped command's binary name.
    pub fn from_command(program: &str) -> Self {
        let name = std::path::Path::new(program)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(program)
            .to_lowercase();
        if name.contains("claude") {
            Self::Claude
        } else if name.contains("gemini") {
            Self::Gemini
        } else if name.contains("codex") {
            Self::Codex
        } else {
            Self::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::Generic => "generic",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "codex" => Ok(Self::Codex),
            "generic" => Ok(Self::Generic),
            other => anyhow::bail!("invalid agent type: {other}"),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a wrapped task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Idle,
    Working,
    Pending,
    Done,
    Error,
}

impl TaskState {
    /// Sort priority, ascending = higher urgency.
    pub fn sort_priority(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Working => 1,
            Self::Idle => 2,
            Self::Done => 3,
            Self::Error => 4,
        }
    }

    /// DONE and ERROR absorb: once entered, no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Working => "WORKING",
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wrapped agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub agent: AgentKind,
    pub project_id: String,
    pub repo_path: String,
    pub title: String,
    pub state: TaskState,
    pub pinned: bool,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// Free-form excerpt of the agent's last message.
    #[serde(default)]
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_ide: Option<String>,
    /// Whether the network shim was injected into this task's child.
    #[serde(default)]
    pub has_launcher: bool,
    /// Last supervisor health ping, epoch ms. The UI reaps tasks whose
    /// supervisor missed two pings without writing a terminal state.
    #[serde(default)]
    pub last_ping_at: u64,
}

impl Task {
    pub fn new(id: String, agent: AgentKind, project_id: String, repo_path: String, title: String) -> Self {
        let now = now_ms();
        Self {
            id,
            agent,
            project_id,
            repo_path,
            title,
            state: TaskState::Idle,
            pinned: false,
            created_at: now,
            completed_at: None,
            details: String::new(),
            preferred_ide: None,
            has_launcher: false,
            last_ping_at: now,
        }
    }
}

/// Logical grouping of tasks by repository path. Created on first task
/// referencing it; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub repo_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_ide: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
}

impl Project {
    /// Derive a project from a repository path. The project id doubles as
    /// the registry key: the last path component, or the full path when it
    /// has none.
    pub fn from_repo_path(repo_path: &str, preferred_ide: Option<String>) -> Self {
        let name = std::path::Path::new(repo_path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(repo_path)
            .to_owned();
        Self {
            name,
            repo_path: repo_path.to_owned(),
            preferred_ide,
            github_url: None,
        }
    }
}

/// Outcome of one pattern rule evaluation, retained for the debug surface
/// and transition audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub description: String,
    pub matched: bool,
}

/// Context captured with every accepted transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDetails {
    /// Detection window at the time of the transition.
    #[serde(default)]
    pub window: Vec<String>,
    /// Pattern rule evaluations, when the classifier produced the event.
    #[serde(default)]
    pub rule_results: Vec<RuleResult>,
    /// Freeform cause string (e.g. `fetch-start`, `hook:Stop`).
    #[serde(default)]
    pub cause: String,
}

/// Audit record written for each accepted state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: TaskState,
    pub to: TaskState,
    pub timestamp: u64,
    pub detection_method: Source,
    pub confidence: Confidence,
    pub details: TransitionDetails,
}

/// Bounded ring of transition records for one task.
#[derive(Debug, Default)]
pub struct TransitionLog {
    records: VecDeque<StateTransition>,
}

impl TransitionLog {
    pub fn push(&mut self, record: StateTransition) {
        if self.records.len() == TRANSITION_LOG_CAP {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &StateTransition> {
        self.records.iter()
    }

    /// The most recent `n` records, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<StateTransition> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
