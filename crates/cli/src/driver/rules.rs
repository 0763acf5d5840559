// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent pattern rule tables.
//!
//! Rules are evaluated against the detection window in table order; the
//! first match wins. Built-in tables cover the known agents; an external
//! JSON file can replace them and is hot-reloaded via `notify`, swapping a
//! versioned immutable table atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::task::{AgentKind, TaskState};

/// One compiled classifier rule.
pub struct PatternRule {
    pub pattern: Regex,
    pub expected_state: TaskState,
    pub description: String,
}

impl std::fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRule")
            .field("pattern", &self.pattern.as_str())
            .field("expected_state", &self.expected_state)
            .field("description", &self.description)
            .finish()
    }
}

/// Immutable, versioned rule table. Swapped wholesale on reload.
#[derive(Debug)]
pub struct RuleTable {
    pub version: u64,
    pub rules: Vec<PatternRule>,
}

/// Shared handle to the current rule table. Readers clone the inner `Arc`
/// per evaluation; reloads replace it atomically.
#[derive(Clone)]
pub struct SharedRules {
    inner: Arc<RwLock<Arc<RuleTable>>>,
}

impl SharedRules {
    pub fn new(table: RuleTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn current(&self) -> Arc<RuleTable> {
        Arc::clone(&self.inner.read())
    }

    pub fn swap(&self, mut table: RuleTable) {
        let mut guard = self.inner.write();
        table.version = guard.version + 1;
        *guard = Arc::new(table);
    }
}

impl std::fmt::Debug for SharedRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.current();
        f.debug_struct("SharedRules")
            .field("version", &table.version)
            .field("rules", &table.rules.len())
            .finish()
    }
}

/// User-provided JSON rule file: a list of `{pattern, state, description}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleFileEntry {
    pub pattern: String,
    pub state: TaskState,
    #[serde(default)]
    pub description: String,
}

fn rule(pattern: &str, expected_state: TaskState, description: &str) -> Option<PatternRule> {
    match Regex::new(pattern) {
        Ok(re) => Some(PatternRule {
            pattern: re,
            expected_state,
            description: description.to_owned(),
        }),
        Err(e) => {
            warn!("skipping malformed built-in rule {pattern:?}: {e}");
            None
        }
    }
}

/// Built-in rule table for an agent.
///
/// PENDING rules come first so an approval prompt beats the idle prompt
/// that often remains visible above it.
pub fn builtin(agent: AgentKind) -> RuleTable {
    let rules: Vec<Option<PatternRule>> = match agent {
        AgentKind::Claude => vec![
            rule(
                r"Do you want to",
                TaskState::Pending,
                "claude approval question",
            ),
            rule(r"\[y/N\]", TaskState::Pending, "y/N confirmation"),
            rule(
                r"^\s*\d+\.\s",
                TaskState::Pending,
                "numbered option menu",
            ),
            rule(
                r"[✢✳✶✻✽·∗]|[\u{2800}-\u{28FF}]",
                TaskState::Working,
                "spinner glyph",
            ),
            rule(
                r"\? for shortcuts",
                TaskState::Idle,
                "claude idle prompt footer",
            ),
        ],
        AgentKind::Gemini => vec![
            rule(
                r"Apply this change\?|Allow execution\?",
                TaskState::Pending,
                "gemini approval question",
            ),
            rule(r"\[y/N\]", TaskState::Pending, "y/N confirmation"),
            rule(
                r"[\u{2800}-\u{28FF}]",
                TaskState::Working,
                "spinner glyph",
            ),
            rule(
                r"Type your message",
                TaskState::Idle,
                "gemini input prompt",
            ),
        ],
        AgentKind::Codex => vec![
            rule(
                r"Allow command\?|Approve\?",
                TaskState::Pending,
                "codex approval question",
            ),
            rule(r"\[y/N\]", TaskState::Pending, "y/N confirmation"),
            rule(
                r"[\u{2800}-\u{28FF}]",
                TaskState::Working,
                "spinner glyph",
            ),
            rule(r"Ctrl\+C to quit", TaskState::Idle, "codex idle footer"),
        ],
        AgentKind::Generic => vec![
            rule(r"\[y/N\]", TaskState::Pending, "y/N confirmation"),
            rule(r"Do you want to", TaskState::Pending, "approval question"),
        ],
    };

    RuleTable {
        version: 0,
        rules: rules.into_iter().flatten().collect(),
    }
}

/// Compile a user rule file into a table. Malformed rules are skipped with
/// a warning; the rest of the table still loads.
pub fn compile_entries(entries: &[RuleFileEntry]) -> RuleTable {
    let rules = entries
        .iter()
        .filter_map(|entry| match Regex::new(&entry.pattern) {
            Ok(re) => Some(PatternRule {
                pattern: re,
                expected_state: entry.state,
                description: if entry.description.is_empty() {
                    entry.pattern.clone()
                } else {
                    entry.description.clone()
                },
            }),
            Err(e) => {
                warn!("skipping malformed rule {:?}: {e}", entry.pattern);
                None
            }
        })
        .collect();
    RuleTable { version: 0, rules }
}

/// Load a rule table from a JSON file.
pub fn load_file(path: &Path) -> anyhow::Result<RuleTable> {
    let contents = std::fs::read_to_string(path)?;
    let entries: Vec<RuleFileEntry> = serde_json::from_str(&contents)?;
    Ok(compile_entries(&entries))
}

/// Watch `path` for changes and swap the shared table on each rewrite.
///
/// Uses `notify` on the parent directory (so file replacement via rename is
/// seen too). A file that fails to parse leaves the current table in place.
/// Returns the watcher handle, which must be kept alive.
pub fn spawn_reload(
    shared: SharedRules,
    path: PathBuf,
    shutdown: tokio_util::sync::CancellationToken,
) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let (wake_tx, mut wake_rx) = tokio::sync::mpsc::channel::<()>(1);

    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;

    let watch_path = path.parent().unwrap_or(path.as_ref());
    if let Err(e) = watcher.watch(watch_path, RecursiveMode::NonRecursive) {
        warn!("pattern file watch failed for {}: {e}", path.display());
        return None;
    }

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                wake = wake_rx.recv() => {
                    if wake.is_none() {
                        break;
                    }
                    match load_file(&path) {
                        Ok(table) => {
                            let count = table.rules.len();
                            shared.swap(table);
                            debug!("reloaded {count} pattern rules from {}", path.display());
                        }
                        Err(e) => {
                            warn!("pattern reload failed, keeping previous table: {e}");
                        }
                    }
                }
            }
        }
    });

    Some(watcher)
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
