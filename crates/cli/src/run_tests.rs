// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::session::{Session, SessionConfig};
use crate::test_support::store_with_local_task;

#[test]
fn debug_namespaces_map_to_directives() {
    let directives = debug_filter_directives("tallr:state,tallr:network");
    assert_eq!(
        directives,
        vec![
            "tallr::driver::tracker=debug".to_owned(),
            "tallr::driver::claude=debug".to_owned(),
        ]
    );
}

#[test]
fn debug_all_known_namespaces() {
    let directives =
        debug_filter_directives("tallr:state,tallr:network,tallr:cli,tallr:pattern,tallr:api");
    assert_eq!(directives.len(), 5);
    assert!(directives.contains(&"tallr=debug".to_owned()));
    assert!(directives.contains(&"tallr::transport=debug".to_owned()));
    assert!(directives.contains(&"tallr::driver::pattern=debug".to_owned()));
}

#[test]
fn debug_unknown_namespace_passes_through() {
    let directives = debug_filter_directives("tallr:session");
    assert_eq!(directives, vec!["tallr::session=debug".to_owned()]);
}

#[test]
fn debug_foreign_namespaces_ignored() {
    assert!(debug_filter_directives("express:router, ,").is_empty());
}

/// Boundary property: an interrupt at the supervisor is delivered to the
/// child's process group, not consumed. The child stays up, the shutdown
/// token stays untouched, and the session keeps running until a real
/// control-plane shutdown ends it.
#[tokio::test]
#[serial_test::serial]
async fn interrupt_forwards_to_child_and_supervisor_survives() {
    let (store, _tracker_rx) = store_with_local_task("t1").await;
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (_stdin_tx, stdin_rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();

    // A child that survives SIGINT, like an agent sitting at a prompt.
    let command: Vec<String> = [
        "sh",
        "-c",
        "trap 'echo caught-int' INT; n=0; while [ $n -lt 100 ]; do sleep 0.1; n=$((n+1)); done",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let pty = PtyHost::spawn(&command, SpawnOptions::default()).expect("spawn");
    let child_pid = pty.child_pid();

    spawn_signal_forwarder(child_pid, shutdown.clone());
    // Give the forwarder tasks a poll so the handlers are armed.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session = Session::new(SessionConfig {
        store: Arc::clone(&store),
        pty,
        detectors: vec![],
        events_tx,
        stdin_rx,
        shutdown: shutdown.clone(),
        drain_timeout: Duration::from_millis(500),
    });
    let session_handle = tokio::spawn(session.run());

    // The interrupt lands on the supervisor process, as if from `kill -INT`.
    nix::sys::signal::kill(nix::unistd::Pid::this(), nix::sys::signal::Signal::SIGINT)
        .expect("raise SIGINT");

    // The child saw the forwarded interrupt and kept going.
    let mut caught = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let tail = {
            let ring = store.terminal.ring.read().await;
            String::from_utf8_lossy(&ring.tail()).to_string()
        };
        if tail.contains("caught-int") {
            caught = true;
            break;
        }
    }
    assert!(caught, "child never reported the forwarded SIGINT");

    // The supervisor survived: no shutdown began, the session is still up.
    assert!(
        !shutdown.is_cancelled(),
        "interactive interrupt must not start shutdown"
    );
    assert!(!session_handle.is_finished(), "session must keep running");

    // An actual control-plane shutdown still tears the child down.
    shutdown.cancel();
    let status = tokio::time::timeout(Duration::from_secs(5), session_handle)
        .await
        .expect("session timed out")
        .expect("join")
        .expect("run");
    assert!(status.signal.is_some(), "child should die by signal: {status:?}");

    let exit = events_rx.recv().await.expect("exit event");
    assert!(matches!(
        exit.kind,
        crate::driver::DetectionKind::ChildExit { .. }
    ));
}

#[tokio::test]
async fn spawn_failure_is_fatal_with_error_state() {
    let config = crate::config::Config {
        project: None,
        repo: Some("/tmp".into()),
        agent: Some("generic".into()),
        title: Some("missing binary".into()),
        ide: None,
        token: Some("test-token".into()),
        gateway: None,
        port: 0,
        log_format: "text".into(),
        log_level: "error".into(),
        patterns: None,
        ring_size: 4096,
        quiet_window_ms: 500,
        classify_interval_ms: 250,
        ping_interval_secs: 10,
        drain_timeout_ms: 500,
        command: vec!["definitely-not-a-real-binary-xyz".into()],
    };

    let result = run(config).await;
    assert!(result.is_err(), "spawning a nonexistent binary must fail");
}
