// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::driver::DetectionEvent;
use crate::task::AgentKind;
use crate::transport::state::{Store, StoreConfig, TaskUpsert, TerminalShared};

/// Convert foreign test-harness errors into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Build a store with one registered local task and hand back the tracker
/// side of the detection channel.
pub async fn store_with_local_task(task_id: &str) -> (Arc<Store>, mpsc::Receiver<DetectionEvent>) {
    store_with_settings_path(task_id, std::env::temp_dir().join("tallr-test-settings.json")).await
}

/// Same as [`store_with_local_task`] with an explicit settings file path.
pub async fn store_with_settings_path(
    task_id: &str,
    settings_path: std::path::PathBuf,
) -> (Arc<Store>, mpsc::Receiver<DetectionEvent>) {
    let (detect_tx, detect_rx) = mpsc::channel(64);
    let store = Arc::new(Store::new(StoreConfig {
        terminal: Arc::new(TerminalShared::new(80, 24, 64 * 1024)),
        local_task_id: task_id.to_owned(),
        detect_tx,
        permission_tx: None,
        auth_token: "test-token".to_owned(),
        shutdown: CancellationToken::new(),
        settings_path,
    }));
    store.upsert_task(upsert_payload(task_id, "/repo/alpha")).await;
    (store, detect_rx)
}

/// Minimal upsert payload for a generic task.
pub fn upsert_payload(id: &str, repo_path: &str) -> TaskUpsert {
    TaskUpsert {
        id: id.to_owned(),
        agent: AgentKind::Generic,
        repo_path: repo_path.to_owned(),
        title: format!("task {id}"),
        preferred_ide: None,
        has_launcher: false,
    }
}
