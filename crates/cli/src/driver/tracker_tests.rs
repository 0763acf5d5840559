// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::driver::Decision;
use crate::task::RuleResult;
use crate::test_support::store_with_local_task;
use crate::transport::state::Store;

struct Harness {
    store: Arc<Store>,
    events_tx: mpsc::Sender<DetectionEvent>,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

async fn harness() -> Harness {
    let (store, _upstream_rx) = store_with_local_task("t1").await;
    let (events_tx, events_rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();
    let tracker = StateTracker::new(
        "t1".to_owned(),
        Arc::clone(&store),
        events_rx,
        DEFAULT_QUIET_WINDOW,
        shutdown.clone(),
    );
    let handle = tokio::spawn(tracker.run());
    Harness {
        store,
        events_tx,
        shutdown,
        handle,
    }
}

fn fetch_start(id: u64) -> DetectionEvent {
    DetectionEvent::network(DetectionKind::FetchStart {
        id,
        hostname: "api.anthropic.com".into(),
        path: "/v1/messages".into(),
        method: "POST".into(),
    })
}

fn fetch_end(id: u64) -> DetectionEvent {
    DetectionEvent::network(DetectionKind::FetchEnd { id })
}

fn pattern(state: TaskState) -> DetectionEvent {
    DetectionEvent::pattern(DetectionKind::PatternMatch {
        state,
        window: vec!["? for shortcuts".into()],
        tests: vec![RuleResult {
            description: "idle footer".into(),
            matched: true,
        }],
        cause: "idle footer".into(),
    })
}

async fn wait_for_state(store: &Store, want: TaskState) {
    for _ in 0..100 {
        if store.task("t1").await.map(|t| t.state) == Some(want) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let got = store.task("t1").await.map(|t| t.state);
    panic!("task never reached {want}, currently {got:?}");
}

#[tokio::test]
async fn fetch_start_moves_to_working() {
    let h = harness().await;
    h.events_tx.send(fetch_start(1)).await.expect("send");
    wait_for_state(&h.store, TaskState::Working).await;
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn idle_after_quiet_window() {
    let h = harness().await;
    h.events_tx.send(fetch_start(1)).await.expect("send");
    h.events_tx.send(fetch_end(1)).await.expect("send");
    wait_for_state(&h.store, TaskState::Working).await;

    // Quiet window (500ms) elapses with no further fetches.
    wait_for_state(&h.store, TaskState::Idle).await;
    let task = h.store.task("t1").await.expect("t1");
    assert!(task.completed_at.is_some());
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn new_fetch_cancels_scheduled_idle() {
    let h = harness().await;
    h.events_tx.send(fetch_start(1)).await.expect("send");
    h.events_tx.send(fetch_end(1)).await.expect("send");
    wait_for_state(&h.store, TaskState::Working).await;

    // A second fetch arrives inside the quiet window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.events_tx.send(fetch_start(2)).await.expect("send");

    // Well past the original deadline the task is still WORKING.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let state = h.store.task("t1").await.expect("t1").state;
    assert_eq!(state, TaskState::Working);
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn pattern_suppressed_while_fetch_in_flight() {
    let h = harness().await;
    h.events_tx.send(fetch_start(1)).await.expect("send");
    wait_for_state(&h.store, TaskState::Working).await;

    // The classifier sees an idle-looking screen mid-fetch; it must not win.
    h.events_tx.send(pattern(TaskState::Idle)).await.expect("send");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = h.store.task("t1").await.expect("t1").state;
    assert_eq!(state, TaskState::Working);
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn pattern_accepted_when_nothing_in_flight() {
    let h = harness().await;
    h.events_tx.send(pattern(TaskState::Pending)).await.expect("send");
    wait_for_state(&h.store, TaskState::Pending).await;

    let debug = h.store.debug_snapshot("t1", 5).await.expect("t1");
    let last = debug.transitions.last().expect("transition recorded");
    assert_eq!(last.detection_method, Source::Pattern);
    assert_eq!(last.confidence, Confidence::Medium);
    assert!(!last.details.rule_results.is_empty());
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn permission_round_trip() {
    let h = harness().await;
    h.events_tx.send(fetch_start(1)).await.expect("send");
    wait_for_state(&h.store, TaskState::Working).await;

    h.events_tx
        .send(DetectionEvent::network(DetectionKind::PermissionRequest {
            id: "p1".into(),
            tool: "read_file".into(),
        }))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Pending).await;

    h.events_tx
        .send(DetectionEvent::network(DetectionKind::PermissionResponse {
            id: "p1".into(),
            decision: Decision::Allow,
        }))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Working).await;
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn pattern_suppressed_while_permission_outstanding() {
    let h = harness().await;
    h.events_tx
        .send(DetectionEvent::network(DetectionKind::PermissionRequest {
            id: "p1".into(),
            tool: "run_command".into(),
        }))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Pending).await;

    h.events_tx.send(pattern(TaskState::Idle)).await.expect("send");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.store.task("t1").await.expect("t1").state, TaskState::Pending);
    h.shutdown.cancel();
    let _ = h.handle.await;
}

#[tokio::test]
async fn clean_exit_is_done() {
    let h = harness().await;
    h.events_tx.send(fetch_start(1)).await.expect("send");
    wait_for_state(&h.store, TaskState::Working).await;

    h.events_tx
        .send(DetectionEvent::exit(Some(0), None))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Done).await;

    // The tracker stops after a terminal event.
    let _ = h.handle.await;
}

#[tokio::test]
async fn crash_exit_is_error() {
    let h = harness().await;
    h.events_tx
        .send(DetectionEvent::exit(None, Some(11)))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Error).await;
    let _ = h.handle.await;
}

#[tokio::test]
async fn nonzero_exit_is_error() {
    let h = harness().await;
    h.events_tx
        .send(DetectionEvent::exit(Some(3), None))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Error).await;
    let _ = h.handle.await;
}

#[tokio::test]
async fn no_transitions_after_terminal() {
    let h = harness().await;
    h.events_tx
        .send(DetectionEvent::exit(Some(0), None))
        .await
        .expect("send");
    wait_for_state(&h.store, TaskState::Done).await;
    let _ = h.handle.await;

    let before = h.store.debug_snapshot("t1", 300).await.expect("t1").transitions.len();
    let applied = h
        .store
        .apply_transition("t1", TaskState::Working, |from| StateTransition {
            from,
            to: TaskState::Working,
            timestamp: now_ms(),
            detection_method: Source::Pattern,
            confidence: Confidence::Medium,
            details: TransitionDetails::default(),
        })
        .await;
    assert!(!applied);
    let after = h.store.debug_snapshot("t1", 300).await.expect("t1").transitions.len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn agent_message_updates_details() {
    let h = harness().await;
    h.events_tx
        .send(DetectionEvent::network(DetectionKind::AgentMessage {
            content: "I updated the README.".into(),
        }))
        .await
        .expect("send");

    for _ in 0..100 {
        if h.store.task("t1").await.expect("t1").details == "I updated the README." {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.store.task("t1").await.expect("t1").details,
        "I updated the README."
    );
    h.shutdown.cancel();
    let _ = h.handle.await;
}
