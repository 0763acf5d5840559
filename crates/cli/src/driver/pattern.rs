// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fallback text classifier over the detection window.
//!
//! Evaluates every rule of the current table on each refresh; the first
//! match in table order proposes a state. A proposal must persist across
//! two consecutive refreshes at least [`MIN_PERSIST`] apart before it is
//! emitted, which dampens flicker from rapid repaint.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::task::{RuleResult, TaskState};

use super::rules::{RuleTable, SharedRules};
use super::{Confidence, DetectionEvent, DetectionKind, Detector, Source};

/// Minimum time a proposal must persist before emission.
pub const MIN_PERSIST: Duration = Duration::from_millis(250);

/// Outcome of one classifier pass over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub proposed: Option<TaskState>,
    pub cause: String,
    pub tests: Vec<RuleResult>,
}

/// Evaluate all rules against the window. The first rule (in table order)
/// matching any window line wins; every rule's test result is recorded.
pub fn classify(table: &RuleTable, window: &[String]) -> Classification {
    let mut proposed = None;
    let mut cause = String::new();
    let mut tests = Vec::with_capacity(table.rules.len());

    for rule in &table.rules {
        let matched = window.iter().any(|line| rule.pattern.is_match(line));
        if matched && proposed.is_none() {
            proposed = Some(rule.expected_state);
            cause = rule.description.clone();
        }
        tests.push(RuleResult {
            description: rule.description.clone(),
            matched,
        });
    }

    Classification {
        proposed,
        cause,
        tests,
    }
}

/// How long a suppressed duplicate waits before being re-announced. The
/// tracker dedups repeats, but a periodic refresher keeps the task from
/// sticking when an authoritative source moved the state in between.
pub const REANNOUNCE: Duration = Duration::from_secs(2);

/// Debounce state machine: tracks the proposal awaiting its second refresh.
#[derive(Debug, Default)]
pub struct Debounce {
    pending: Option<(TaskState, tokio::time::Instant)>,
    last_emitted: Option<(TaskState, tokio::time::Instant)>,
}

impl Debounce {
    /// Feed one refresh result; returns a state once the same proposal has
    /// been seen on two consecutive refreshes ≥ [`MIN_PERSIST`] apart.
    /// Unchanged proposals are re-announced every [`REANNOUNCE`].
    pub fn observe(&mut self, proposal: Option<TaskState>) -> Option<TaskState> {
        let now = tokio::time::Instant::now();
        match proposal {
            None => {
                self.pending = None;
                None
            }
            Some(state) => match self.pending {
                Some((pending, since)) if pending == state => {
                    if now.duration_since(since) < MIN_PERSIST {
                        return None;
                    }
                    let fresh = match self.last_emitted {
                        Some((emitted, at)) => {
                            emitted != state || now.duration_since(at) >= REANNOUNCE
                        }
                        None => true,
                    };
                    if fresh {
                        self.last_emitted = Some((state, now));
                        return Some(state);
                    }
                    None
                }
                _ => {
                    self.pending = Some((state, now));
                    None
                }
            },
        }
    }
}

/// Classifier detector polling the rendered detection window.
pub struct PatternDetector {
    rules: SharedRules,
    window_fn: Arc<dyn Fn() -> Vec<String> + Send + Sync>,
    interval: Duration,
}

impl PatternDetector {
    pub fn new(rules: SharedRules, window_fn: Arc<dyn Fn() -> Vec<String> + Send + Sync>) -> Self {
        Self {
            rules,
            window_fn,
            interval: MIN_PERSIST,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Detector for PatternDetector {
    fn run(
        self: Box<Self>,
        events_tx: mpsc::Sender<DetectionEvent>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut interval = tokio::time::interval(self.interval);
            let mut debounce = Debounce::default();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let window = (self.window_fn)();
                if window.is_empty() {
                    debounce.observe(None);
                    continue;
                }

                let table = self.rules.current();
                let classification = classify(&table, &window);

                if let Some(state) = debounce.observe(classification.proposed) {
                    trace!(state = %state, cause = %classification.cause, "pattern match");
                    let event = DetectionEvent::new(
                        Source::Pattern,
                        Confidence::Medium,
                        DetectionKind::PatternMatch {
                            state,
                            window: window.clone(),
                            tests: classification.tests,
                            cause: classification.cause,
                        },
                    );
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    fn source(&self) -> Source {
        Source::Pattern
    }
}

#[cfg(test)]
#[path = "pattern_tests.rs"]
mod tests;
