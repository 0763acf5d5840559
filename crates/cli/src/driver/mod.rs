// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detection pipeline: sources observe the wrapped agent and emit
//! [`DetectionEvent`]s; the [`tracker::StateTracker`] merges them into the
//! task's canonical state machine.

pub mod claude;
pub mod pattern;
pub mod quiet;
pub mod rules;
pub mod tracker;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::task::{now_ms, RuleResult, TaskState};

/// Which detection path produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Network,
    Hook,
    Pattern,
    /// Child exit observed by the PTY host. Terminal.
    Exit,
}

impl Source {
    /// Merge authority: lower = wins. Network, hook, and exit observations
    /// are authoritative; the text classifier is the fallback.
    pub fn authority(&self) -> u8 {
        match self {
            Self::Network | Self::Hook | Self::Exit => 1,
            Self::Pattern => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Hook => "hook",
            Self::Pattern => "pattern",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence tag carried into the transition audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The decision returned for a tool permission round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// Payload of a detection event.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionKind {
    FetchStart {
        id: u64,
        hostname: String,
        path: String,
        method: String,
    },
    FetchEnd {
        id: u64,
    },
    PermissionPrompt {
        id: String,
    },
    PermissionRequest {
        id: String,
        tool: String,
    },
    PermissionResponse {
        id: String,
        decision: Decision,
    },
    PatternMatch {
        state: TaskState,
        window: Vec<String>,
        tests: Vec<RuleResult>,
        cause: String,
    },
    /// External hook callback proposing a state (e.g. PreToolUse → PENDING).
    HookState {
        state: TaskState,
        cause: String,
    },
    /// Assistant message observed in-process; updates the task's `details`.
    AgentMessage {
        content: String,
    },
    ChildExit {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// One observation from a detection source.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub source: Source,
    pub kind: DetectionKind,
    pub confidence: Confidence,
    pub timestamp: u64,
}

impl DetectionEvent {
    pub fn new(source: Source, confidence: Confidence, kind: DetectionKind) -> Self {
        Self {
            source,
            kind,
            confidence,
            timestamp: now_ms(),
        }
    }

    pub fn network(kind: DetectionKind) -> Self {
        Self::new(Source::Network, Confidence::High, kind)
    }

    pub fn hook(kind: DetectionKind) -> Self {
        Self::new(Source::Hook, Confidence::High, kind)
    }

    pub fn pattern(kind: DetectionKind) -> Self {
        Self::new(Source::Pattern, Confidence::Medium, kind)
    }

    pub fn exit(code: Option<i32>, signal: Option<i32>) -> Self {
        Self::new(Source::Exit, Confidence::High, DetectionKind::ChildExit { code, signal })
    }
}

/// A detection source that observes the wrapped agent and emits
/// [`DetectionEvent`]s until shutdown.
///
/// Object-safe for use as `Box<dyn Detector>`.
pub trait Detector: Send + 'static {
    fn run(
        self: Box<Self>,
        events_tx: mpsc::Sender<DetectionEvent>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>>;

    fn source(&self) -> Source;
}

/// Return the tallr session directory for the given task ID.
///
/// Session artifacts (the fetch shim, merged settings) live at
/// `$XDG_STATE_HOME/tallr/sessions/<task-id>/` (defaulting to
/// `~/.local/state/tallr/sessions/<task-id>/`) so they survive for
/// debugging after the supervisor exits.
pub fn tallr_session_dir(task_id: &str) -> anyhow::Result<std::path::PathBuf> {
    let state_home = std::env::var("XDG_STATE_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_default();
        format!("{home}/.local/state")
    });
    let dir = std::path::PathBuf::from(state_home)
        .join("tallr")
        .join("sessions")
        .join(task_id);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
