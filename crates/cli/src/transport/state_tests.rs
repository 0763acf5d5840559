// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{store_with_local_task, upsert_payload};

#[tokio::test]
async fn upsert_is_idempotent() {
    let (store, _rx) = store_with_local_task("t1").await;

    store.upsert_task(upsert_payload("t2", "/repo/beta")).await;
    store.upsert_task(upsert_payload("t2", "/repo/beta")).await;

    let snap = store.snapshot().await;
    assert_eq!(snap.tasks.iter().filter(|t| t.id == "t2").count(), 1);
    assert_eq!(snap.projects.iter().filter(|p| p.name == "beta").count(), 1);
}

#[tokio::test]
async fn upsert_creates_project_once() {
    let (store, _rx) = store_with_local_task("t1").await;
    store.upsert_task(upsert_payload("a", "/work/gamma")).await;
    store.upsert_task(upsert_payload("b", "/work/gamma")).await;

    let snap = store.snapshot().await;
    assert_eq!(snap.projects.iter().filter(|p| p.name == "gamma").count(), 1);
}

#[tokio::test]
async fn transition_chains_audit_log() {
    let (store, _rx) = store_with_local_task("t1").await;

    for to in [TaskState::Working, TaskState::Pending, TaskState::Working] {
        let applied = store
            .apply_transition("t1", to, |from| StateTransition {
                from,
                to,
                timestamp: now_ms(),
                detection_method: Source::Network,
                confidence: Confidence::High,
                details: TransitionDetails::default(),
            })
            .await;
        assert!(applied);
    }

    let debug = store.debug_snapshot("t1", 10).await.expect("task exists");
    assert_eq!(debug.transitions.len(), 3);
    for pair in debug.transitions.windows(2) {
        assert_eq!(pair[0].to, pair[1].from, "audit log must chain");
    }
}

#[tokio::test]
async fn duplicate_state_not_recorded() {
    let (store, _rx) = store_with_local_task("t1").await;

    let make = |from| StateTransition {
        from,
        to: TaskState::Working,
        timestamp: now_ms(),
        detection_method: Source::Network,
        confidence: Confidence::High,
        details: TransitionDetails::default(),
    };
    assert!(store.apply_transition("t1", TaskState::Working, make).await);
    assert!(!store.apply_transition("t1", TaskState::Working, make).await);

    let debug = store.debug_snapshot("t1", 10).await.expect("task exists");
    assert_eq!(debug.transitions.len(), 1);
}

#[tokio::test]
async fn terminal_state_absorbs() {
    let (store, _rx) = store_with_local_task("t1").await;

    let make_to = |to: TaskState| {
        move |from| StateTransition {
            from,
            to,
            timestamp: now_ms(),
            detection_method: Source::Exit,
            confidence: Confidence::High,
            details: TransitionDetails::default(),
        }
    };
    assert!(store.apply_transition("t1", TaskState::Done, make_to(TaskState::Done)).await);
    assert!(!store.apply_transition("t1", TaskState::Working, make_to(TaskState::Working)).await);
    assert!(!store.apply_transition("t1", TaskState::Error, make_to(TaskState::Error)).await);

    let task = store.task("t1").await.expect("task exists");
    assert_eq!(task.state, TaskState::Done);
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn completed_at_follows_state() {
    let (store, _rx) = store_with_local_task("t1").await;

    let make_to = |to: TaskState| {
        move |from| StateTransition {
            from,
            to,
            timestamp: now_ms(),
            detection_method: Source::Network,
            confidence: Confidence::High,
            details: TransitionDetails::default(),
        }
    };

    store.apply_transition("t1", TaskState::Working, make_to(TaskState::Working)).await;
    assert!(store.task("t1").await.expect("t1").completed_at.is_none());

    store.apply_transition("t1", TaskState::Idle, make_to(TaskState::Idle)).await;
    assert!(store.task("t1").await.expect("t1").completed_at.is_some());

    store.apply_transition("t1", TaskState::Pending, make_to(TaskState::Pending)).await;
    assert!(store.task("t1").await.expect("t1").completed_at.is_none());
}

#[tokio::test]
async fn snapshot_orders_by_pin_then_urgency() {
    let (store, _rx) = store_with_local_task("t1").await;
    store.upsert_task(upsert_payload("t2", "/r2")).await;
    store.upsert_task(upsert_payload("t3", "/r3")).await;

    // t2 goes PENDING (most urgent), t3 gets pinned.
    let make = |from| StateTransition {
        from,
        to: TaskState::Pending,
        timestamp: now_ms(),
        detection_method: Source::Hook,
        confidence: Confidence::High,
        details: TransitionDetails::default(),
    };
    store.apply_transition("t2", TaskState::Pending, make).await;
    store.set_pinned("t3", true).await;

    let snap = store.snapshot().await;
    assert_eq!(snap.tasks[0].id, "t3", "pinned first");
    assert_eq!(snap.tasks[1].id, "t2", "then by state urgency");
}

#[tokio::test]
async fn propose_state_routes_local_task_through_tracker() {
    let (store, mut detect_rx) = store_with_local_task("t1").await;

    let accepted = store
        .propose_state("t1", TaskState::Pending, "hook:PreToolUse".into())
        .await;
    assert!(accepted);

    // Nothing written directly; the event went to the tracker channel.
    assert_eq!(store.task("t1").await.expect("t1").state, TaskState::Idle);
    let event = detect_rx.recv().await.expect("tracker event");
    assert_eq!(event.source, Source::Hook);
    match event.kind {
        DetectionKind::HookState { state, .. } => assert_eq!(state, TaskState::Pending),
        other => panic!("unexpected kind: {other:?}"),
    }
}

#[tokio::test]
async fn propose_state_writes_external_task_directly() {
    let (store, _rx) = store_with_local_task("t1").await;
    store.upsert_task(upsert_payload("ext", "/r")).await;

    let accepted = store
        .propose_state("ext", TaskState::Working, "hook:PostToolUse".into())
        .await;
    assert!(accepted);
    assert_eq!(store.task("ext").await.expect("ext").state, TaskState::Working);
}

#[tokio::test]
async fn mutations_broadcast_tasks_updated() {
    let (store, _rx) = store_with_local_task("t1").await;
    let mut updates = store.updates_tx.subscribe();

    store.set_pinned("t1", true).await;
    let event = updates.recv().await.expect("update event");
    assert!(matches!(event, UpdateEvent::TasksUpdated));
}
