// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide task registry and shared handles for the control plane.
//!
//! The registry is the sole shared mutable state across activities.
//! Mutation is serialized behind a single write lock and every mutating
//! method broadcasts `tasks-updated`, so subscribers never miss a change.
//! State changes for the locally supervised task are routed through the
//! state tracker's event channel rather than written directly, preserving
//! the arrival-order guarantee.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::driver::{Confidence, Decision, DetectionEvent, DetectionKind, Source};
use crate::ring::ScrollbackRing;
use crate::screen::Screen;
use crate::task::{
    now_ms, AgentKind, Project, RuleResult, StateTransition, Task, TaskState, TransitionDetails,
    TransitionLog,
};

/// Event broadcast to UI subscribers and the gateway push worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UpdateEvent {
    TasksUpdated,
    Notification { title: String, body: String },
}

/// Terminal I/O shared between the session loop and readers.
pub struct TerminalShared {
    pub screen: RwLock<Screen>,
    pub ring: RwLock<ScrollbackRing>,
    pub child_pid: AtomicU32,
}

impl TerminalShared {
    pub fn new(cols: u16, rows: u16, ring_size: usize) -> Self {
        Self {
            screen: RwLock::new(Screen::new(cols, rows)),
            ring: RwLock::new(ScrollbackRing::new(ring_size)),
            child_pid: AtomicU32::new(0),
        }
    }

    /// Build a closure returning the current detection window.
    ///
    /// Used by the pattern detector, which polls on a timer and must never
    /// block: a contended lock yields an empty window for that tick.
    pub fn window_fn(self: &Arc<Self>) -> Arc<dyn Fn() -> Vec<String> + Send + Sync> {
        let terminal = Arc::clone(self);
        Arc::new(move || {
            terminal
                .screen
                .try_read()
                .map(|s| s.detection_window())
                .unwrap_or_default()
        })
    }
}

/// Registry entry: the task plus its audit log and debug counters.
pub struct TaskEntry {
    pub task: Task,
    pub transitions: TransitionLog,
    pub active_fetches: u32,
    pub pattern_tests: Vec<RuleResult>,
}

impl TaskEntry {
    fn new(task: Task) -> Self {
        Self {
            task,
            transitions: TransitionLog::default(),
            active_fetches: 0,
            pattern_tests: Vec::new(),
        }
    }
}

/// Ordered task and project maps.
#[derive(Default)]
pub struct Registry {
    pub tasks: IndexMap<String, TaskEntry>,
    pub projects: IndexMap<String, Project>,
}

/// Payload for task creation/replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpsert {
    pub id: String,
    pub agent: AgentKind,
    pub repo_path: String,
    pub title: String,
    #[serde(default)]
    pub preferred_ide: Option<String>,
    #[serde(default)]
    pub has_launcher: bool,
}

/// Snapshot served by `GET /v1/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tasks: Vec<Task>,
    pub projects: Vec<Project>,
}

/// Shared application state passed to all handlers via axum `State`.
pub struct Store {
    registry: RwLock<Registry>,
    pub terminal: Arc<TerminalShared>,
    /// Task supervised by this process; its state changes route through
    /// the tracker.
    pub local_task_id: String,
    pub updates_tx: broadcast::Sender<UpdateEvent>,
    /// Event channel into the state tracker.
    pub detect_tx: mpsc::Sender<DetectionEvent>,
    /// Decision channel into the permission broker (claude + shim only).
    pub permission_tx: Option<mpsc::Sender<(String, Decision)>>,
    pub auth_token: String,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
    /// Path of the persisted UI settings file.
    pub settings_path: std::path::PathBuf,
}

impl Store {
    /// Read-only snapshot of all tasks and projects, tasks ordered by
    /// pinned first, then state urgency, then creation time.
    pub async fn snapshot(&self) -> StateSnapshot {
        let registry = self.registry.read().await;
        let mut tasks: Vec<Task> = registry.tasks.values().map(|e| e.task.clone()).collect();
        tasks.sort_by_key(|t| (!t.pinned, t.state.sort_priority(), t.created_at));
        let projects = registry.projects.values().cloned().collect();
        StateSnapshot { tasks, projects }
    }

    /// Create or replace task metadata. Creates the project on first
    /// reference. Re-upserting an identical payload leaves one task.
    pub async fn upsert_task(&self, payload: TaskUpsert) -> Task {
        let mut registry = self.registry.write().await;

        let project = Project::from_repo_path(&payload.repo_path, payload.preferred_ide.clone());
        let project_id = project.name.clone();
        registry
            .projects
            .entry(project_id.clone())
            .or_insert(project);

        let task = match registry.tasks.get_mut(&payload.id) {
            Some(entry) => {
                entry.task.agent = payload.agent;
                entry.task.project_id = project_id;
                entry.task.repo_path = payload.repo_path;
                entry.task.title = payload.title;
                entry.task.preferred_ide = payload.preferred_ide;
                entry.task.has_launcher = payload.has_launcher;
                entry.task.clone()
            }
            None => {
                let mut task = Task::new(
                    payload.id.clone(),
                    payload.agent,
                    project_id,
                    payload.repo_path,
                    payload.title,
                );
                task.preferred_ide = payload.preferred_ide;
                task.has_launcher = payload.has_launcher;
                registry
                    .tasks
                    .insert(payload.id.clone(), TaskEntry::new(task.clone()));
                task
            }
        };
        drop(registry);

        self.broadcast_tasks_updated();
        task
    }

    /// Record an accepted transition for a task.
    ///
    /// Returns `false` without touching the registry when the task is
    /// unknown, already terminal, or already in the target state (dedup,
    /// no audit entry). `make_record` receives the source state so the
    /// audit log always chains `from == previous.to`.
    pub async fn apply_transition(
        &self,
        task_id: &str,
        to: TaskState,
        make_record: impl FnOnce(TaskState) -> StateTransition,
    ) -> bool {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.tasks.get_mut(task_id) else {
            return false;
        };
        let from = entry.task.state;
        if from.is_terminal() || from == to {
            return false;
        }

        entry.transitions.push(make_record(from));
        entry.task.state = to;
        entry.task.completed_at = if to == TaskState::Idle || to.is_terminal() {
            Some(now_ms())
        } else {
            None
        };
        drop(registry);

        self.broadcast_tasks_updated();
        true
    }

    /// Route an externally proposed state change.
    ///
    /// Changes for the locally supervised task go through the tracker's
    /// event channel so they serialize with detector events; other tasks
    /// (registered by concurrent supervisors) are written directly.
    pub async fn propose_state(&self, task_id: &str, state: TaskState, cause: String) -> bool {
        if task_id == self.local_task_id {
            let event = DetectionEvent::hook(DetectionKind::HookState {
                state,
                cause,
            });
            return self.detect_tx.send(event).await.is_ok();
        }

        self.apply_transition(task_id, state, |from| StateTransition {
            from,
            to: state,
            timestamp: now_ms(),
            detection_method: Source::Hook,
            confidence: Confidence::High,
            details: TransitionDetails {
                cause,
                ..Default::default()
            },
        })
        .await
    }

    pub async fn set_pinned(&self, task_id: &str, pinned: bool) -> bool {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.tasks.get_mut(task_id) else {
            return false;
        };
        entry.task.pinned = pinned;
        drop(registry);
        self.broadcast_tasks_updated();
        true
    }

    pub async fn set_details(&self, task_id: &str, details: &str) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.tasks.get_mut(task_id) {
            entry.task.details = details.to_owned();
            drop(registry);
            self.broadcast_tasks_updated();
        }
    }

    pub async fn set_has_launcher(&self, task_id: &str, has_launcher: bool) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.tasks.get_mut(task_id) {
            entry.task.has_launcher = has_launcher;
        }
    }

    /// Health ping bookkeeping; refreshed every 10 s by the supervisor.
    pub async fn touch_ping(&self, task_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.tasks.get_mut(task_id) {
            entry.task.last_ping_at = now_ms();
        }
    }

    pub async fn set_active_fetches(&self, task_id: &str, count: u32) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.tasks.get_mut(task_id) {
            entry.active_fetches = count;
        }
    }

    pub async fn set_pattern_tests(&self, task_id: &str, tests: Vec<RuleResult>) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.tasks.get_mut(task_id) {
            entry.pattern_tests = tests;
        }
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        let registry = self.registry.read().await;
        registry.tasks.get(task_id).map(|e| e.task.clone())
    }

    /// Debug payload: audit tail plus live detection counters.
    pub async fn debug_snapshot(&self, task_id: &str, last_n: usize) -> Option<DebugSnapshot> {
        let window = self.detection_window_snapshot(task_id).await;
        let registry = self.registry.read().await;
        let entry = registry.tasks.get(task_id)?;
        Some(DebugSnapshot {
            task: entry.task.clone(),
            window,
            transitions: entry.transitions.last_n(last_n),
            active_fetches: entry.active_fetches,
            pattern_tests: entry.pattern_tests.clone(),
        })
    }

    /// The rendered detection window for the locally supervised task.
    /// External tasks have no terminal in this process.
    pub async fn detection_window_snapshot(&self, task_id: &str) -> Vec<String> {
        if task_id != self.local_task_id {
            return Vec::new();
        }
        self.terminal.screen.read().await.detection_window()
    }

    pub fn broadcast_tasks_updated(&self) {
        let _ = self.updates_tx.send(UpdateEvent::TasksUpdated);
    }

    pub fn broadcast_notification(&self, title: String, body: String) {
        let _ = self.updates_tx.send(UpdateEvent::Notification { title, body });
    }
}

/// Response body for `GET /v1/debug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub task: Task,
    pub window: Vec<String>,
    pub transitions: Vec<StateTransition>,
    pub active_fetches: u32,
    pub pattern_tests: Vec<RuleResult>,
}

/// Everything needed to construct a [`Store`].
pub struct StoreConfig {
    pub terminal: Arc<TerminalShared>,
    pub local_task_id: String,
    pub detect_tx: mpsc::Sender<DetectionEvent>,
    pub permission_tx: Option<mpsc::Sender<(String, Decision)>>,
    pub auth_token: String,
    pub shutdown: CancellationToken,
    pub settings_path: std::path::PathBuf,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(64);
        Self {
            registry: RwLock::new(Registry::default()),
            terminal: config.terminal,
            local_task_id: config.local_task_id,
            updates_tx,
            detect_tx: config.detect_tx,
            permission_tx: config.permission_tx,
            auth_token: config.auth_token,
            started_at: Instant::now(),
            shutdown: config.shutdown,
            settings_path: config.settings_path,
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("local_task_id", &self.local_task_id)
            .finish()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
