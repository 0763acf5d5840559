// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State tracker: merges [`DetectionEvent`]s from all sources into the
//! task's canonical state machine.
//!
//! The tracker is the sole writer of the task's `state`; all events
//! serialize through its channel in arrival order, so readers observe a
//! totally ordered transition sequence consistent with the audit log.
//!
//! Merge rules:
//! - Terminal events (child exit) are always accepted and absorb.
//! - Network and hook proposals (authority 1) are accepted immediately.
//! - Pattern proposals (authority 2) are suppressed while any network
//!   fetch is in flight or a permission round trip is outstanding, so the
//!   classifier can never drop the task to IDLE under an active fetch.
//! - `fetch-end` does not propose IDLE directly; it arms a quiet window
//!   that proposes IDLE only after 500 ms with zero active fetches.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::task::{now_ms, StateTransition, TaskState, TransitionDetails};
use crate::transport::state::Store;

use super::quiet::QuietWindow;
use super::{Confidence, DetectionEvent, DetectionKind, Source};

/// Default quiet window after the last `fetch-end` before IDLE.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

pub struct StateTracker {
    task_id: String,
    store: Arc<Store>,
    events_rx: mpsc::Receiver<DetectionEvent>,
    quiet: QuietWindow,
    active_fetches: HashSet<u64>,
    /// Permission ids requested but not yet answered.
    pending_permissions: HashSet<String>,
    shutdown: CancellationToken,
}

impl StateTracker {
    pub fn new(
        task_id: String,
        store: Arc<Store>,
        events_rx: mpsc::Receiver<DetectionEvent>,
        quiet_window: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            store,
            events_rx,
            quiet: QuietWindow::new(quiet_window),
            active_fetches: HashSet::new(),
            pending_permissions: HashSet::new(),
            shutdown,
        }
    }

    /// Run until a terminal transition is recorded or shutdown fires.
    pub async fn run(mut self) {
        loop {
            let quiet_deadline = self.quiet.deadline();
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                event = self.events_rx.recv() => {
                    let Some(event) = event else { break };
                    let terminal = matches!(event.kind, DetectionKind::ChildExit { .. });
                    self.apply(event).await;
                    if terminal {
                        break;
                    }
                }

                _ = async {
                    match quiet_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if quiet_deadline.is_some() => {
                    if self.quiet.fire() && self.active_fetches.is_empty() {
                        self.transition(
                            TaskState::Idle,
                            Source::Network,
                            Confidence::High,
                            TransitionDetails {
                                cause: "fetch quiet window elapsed".to_owned(),
                                ..Default::default()
                            },
                        )
                        .await;
                    }
                }
            }
        }
    }

    /// Apply a single event in arrival order.
    async fn apply(&mut self, event: DetectionEvent) {
        match event.kind {
            DetectionKind::FetchStart { id, ref hostname, ref path, ref method } => {
                self.active_fetches.insert(id);
                self.quiet.cancel();
                self.transition(
                    TaskState::Working,
                    event.source,
                    event.confidence,
                    TransitionDetails {
                        cause: format!("fetch-start {method} {hostname}{path}"),
                        ..Default::default()
                    },
                )
                .await;
                self.store
                    .set_active_fetches(&self.task_id, self.active_fetches.len() as u32)
                    .await;
            }

            DetectionKind::FetchEnd { id } => {
                self.active_fetches.remove(&id);
                self.store
                    .set_active_fetches(&self.task_id, self.active_fetches.len() as u32)
                    .await;
                if self.active_fetches.is_empty() {
                    self.quiet.arm();
                }
            }

            DetectionKind::PermissionPrompt { ref id } => {
                self.quiet.cancel();
                self.transition(
                    TaskState::Pending,
                    event.source,
                    event.confidence,
                    TransitionDetails {
                        cause: format!("permission-prompt {id}"),
                        ..Default::default()
                    },
                )
                .await;
            }

            DetectionKind::PermissionRequest { ref id, ref tool } => {
                self.quiet.cancel();
                self.pending_permissions.insert(id.clone());
                self.transition(
                    TaskState::Pending,
                    event.source,
                    event.confidence,
                    TransitionDetails {
                        cause: format!("permission-request {tool}"),
                        ..Default::default()
                    },
                )
                .await;
            }

            DetectionKind::PermissionResponse { ref id, decision } => {
                self.pending_permissions.remove(id);
                self.transition(
                    TaskState::Working,
                    event.source,
                    event.confidence,
                    TransitionDetails {
                        cause: format!("permission-response {decision:?}"),
                        ..Default::default()
                    },
                )
                .await;
            }

            DetectionKind::HookState { state, ref cause } => {
                if state == TaskState::Pending {
                    self.quiet.cancel();
                }
                self.transition(
                    state,
                    event.source,
                    event.confidence,
                    TransitionDetails {
                        cause: cause.clone(),
                        ..Default::default()
                    },
                )
                .await;
            }

            DetectionKind::PatternMatch { state, window, tests, cause } => {
                self.store
                    .set_pattern_tests(&self.task_id, tests.clone())
                    .await;
                if !self.active_fetches.is_empty() || !self.pending_permissions.is_empty() {
                    debug!(
                        proposed = %state,
                        active_fetches = self.active_fetches.len(),
                        "suppressing pattern proposal while higher-authority event in flight"
                    );
                    return;
                }
                self.transition(
                    state,
                    event.source,
                    event.confidence,
                    TransitionDetails {
                        window,
                        rule_results: tests,
                        cause,
                    },
                )
                .await;
            }

            DetectionKind::AgentMessage { ref content } => {
                self.store.set_details(&self.task_id, content).await;
            }

            DetectionKind::ChildExit { code, signal } => {
                let state = match (code, signal) {
                    (Some(0), None) => TaskState::Done,
                    _ => TaskState::Error,
                };
                self.transition(
                    state,
                    Source::Exit,
                    Confidence::High,
                    TransitionDetails {
                        cause: format!("child exit code={code:?} signal={signal:?}"),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
    }

    /// Record an accepted transition. Terminal states absorb; duplicate
    /// states are suppressed without an audit entry.
    async fn transition(
        &self,
        to: TaskState,
        source: Source,
        confidence: Confidence,
        mut details: TransitionDetails,
    ) {
        if details.window.is_empty() {
            details.window = self.store.detection_window_snapshot(&self.task_id).await;
        }
        let record = |from: TaskState| StateTransition {
            from,
            to,
            timestamp: now_ms(),
            detection_method: source,
            confidence,
            details,
        };
        let applied = self.store.apply_transition(&self.task_id, to, record).await;
        if applied {
            debug!(task = %self.task_id, state = %to, source = %source, "state transition");
        }
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
