// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::driver::rules::{builtin, compile_entries, RuleFileEntry};
use crate::task::AgentKind;

fn window(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| s.to_string()).collect()
}

#[test]
fn first_match_in_table_order_wins() {
    let table = builtin(AgentKind::Claude);
    // Both the approval question and the idle footer are present; the
    // approval rule comes first in the table.
    let c = classify(
        &table,
        &window(&["Do you want to proceed?", "? for shortcuts"]),
    );
    assert_eq!(c.proposed, Some(TaskState::Pending));
}

#[test]
fn claude_idle_footer() {
    let table = builtin(AgentKind::Claude);
    let c = classify(&table, &window(&["❯", "? for shortcuts"]));
    assert_eq!(c.proposed, Some(TaskState::Idle));
}

#[test]
fn claude_spinner_is_working() {
    let table = builtin(AgentKind::Claude);
    let c = classify(&table, &window(&["✻ Pondering… (3s · 1.2k tokens)"]));
    assert_eq!(c.proposed, Some(TaskState::Working));
}

#[test]
fn numbered_menu_is_pending() {
    let table = builtin(AgentKind::Claude);
    let c = classify(
        &table,
        &window(&["  1. Yes", "  2. Yes, and don't ask again", "  3. No"]),
    );
    assert_eq!(c.proposed, Some(TaskState::Pending));
}

#[test]
fn every_rule_result_is_recorded() {
    let table = builtin(AgentKind::Generic);
    let c = classify(&table, &window(&["nothing to see"]));
    assert_eq!(c.proposed, None);
    assert_eq!(c.tests.len(), table.rules.len());
    assert!(c.tests.iter().all(|t| !t.matched));
}

#[tokio::test(start_paused = true)]
async fn debounce_requires_two_refreshes() {
    let mut debounce = Debounce::default();
    assert_eq!(debounce.observe(Some(TaskState::Pending)), None);

    tokio::time::advance(MIN_PERSIST).await;
    assert_eq!(
        debounce.observe(Some(TaskState::Pending)),
        Some(TaskState::Pending)
    );
}

#[tokio::test(start_paused = true)]
async fn debounce_resets_on_flicker() {
    let mut debounce = Debounce::default();
    assert_eq!(debounce.observe(Some(TaskState::Working)), None);

    tokio::time::advance(MIN_PERSIST).await;
    // Different proposal: restart the persistence clock.
    assert_eq!(debounce.observe(Some(TaskState::Idle)), None);
    assert_eq!(debounce.observe(Some(TaskState::Idle)), None);

    tokio::time::advance(MIN_PERSIST).await;
    assert_eq!(debounce.observe(Some(TaskState::Idle)), Some(TaskState::Idle));
}

#[tokio::test(start_paused = true)]
async fn debounce_suppresses_repeat_emissions() {
    let mut debounce = Debounce::default();
    debounce.observe(Some(TaskState::Working));
    tokio::time::advance(MIN_PERSIST).await;
    assert_eq!(
        debounce.observe(Some(TaskState::Working)),
        Some(TaskState::Working)
    );

    tokio::time::advance(MIN_PERSIST).await;
    assert_eq!(debounce.observe(Some(TaskState::Working)), None);
}

#[tokio::test(start_paused = true)]
async fn debounce_reannounces_unchanged_state() {
    let mut debounce = Debounce::default();
    debounce.observe(Some(TaskState::Idle));
    tokio::time::advance(MIN_PERSIST).await;
    assert_eq!(debounce.observe(Some(TaskState::Idle)), Some(TaskState::Idle));

    // Still idle two seconds later: announced again so the tracker can
    // recover if an authoritative source changed the state meanwhile.
    tokio::time::advance(REANNOUNCE).await;
    assert_eq!(debounce.observe(Some(TaskState::Idle)), Some(TaskState::Idle));
}

#[tokio::test(start_paused = true)]
async fn detector_emits_after_persistent_match() {
    let rules = SharedRules::new(compile_entries(&[RuleFileEntry {
        pattern: r"\[y/N\]".into(),
        state: TaskState::Pending,
        description: "confirm".into(),
    }]));
    let window_fn: Arc<dyn Fn() -> Vec<String> + Send + Sync> =
        Arc::new(|| vec!["Overwrite? [y/N]".to_string()]);

    let detector = Box::new(PatternDetector::new(rules, window_fn));
    let (tx, mut rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(detector.run(tx, shutdown.clone()));

    // Two interval ticks at 250ms apart satisfy the persistence rule.
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("classifier timed out")
        .expect("channel closed");

    assert_eq!(event.source, Source::Pattern);
    assert_eq!(event.confidence, Confidence::Medium);
    match event.kind {
        DetectionKind::PatternMatch { state, window, tests, .. } => {
            assert_eq!(state, TaskState::Pending);
            assert_eq!(window, vec!["Overwrite? [y/N]".to_string()]);
            assert!(tests.iter().any(|t| t.matched));
        }
        other => panic!("unexpected event kind: {other:?}"),
    }

    shutdown.cancel();
    let _ = handle.await;
}
