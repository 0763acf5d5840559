// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::driver::Decision;
use crate::error::ErrorCode;
use crate::settings::UiSettings;
use crate::task::{Task, TaskState};
use crate::transport::state::{Store, TaskUpsert};

// -- Types --------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateRequest {
    pub task_id: String,
    /// Explicit state, or derived from `hook` when absent.
    #[serde(default)]
    pub state: Option<TaskState>,
    /// Hook kind (e.g. "PreToolUse") reported by the hook bridge.
    #[serde(default)]
    pub hook: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneRequest {
    pub task_id: String,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRequest {
    pub task_id: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub task_id: String,
    pub id: String,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DebugQuery {
    pub task_id: String,
    #[serde(default)]
    pub last: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: Task,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /v1/state`
pub async fn state(State(s): State<Arc<Store>>) -> impl IntoResponse {
    Json(s.snapshot().await)
}

/// `POST /v1/tasks/upsert`
pub async fn tasks_upsert(
    State(s): State<Arc<Store>>,
    Json(req): Json<TaskUpsert>,
) -> impl IntoResponse {
    if req.id.is_empty() {
        return ErrorCode::BadRequest
            .http_reply("task id must not be empty")
            .into_response();
    }
    let task = s.upsert_task(req).await;
    Json(TaskResponse { task }).into_response()
}

/// `POST /v1/tasks/state`: external state update, used by the hook bridge.
pub async fn tasks_state(
    State(s): State<Arc<Store>>,
    Json(req): Json<StateUpdateRequest>,
) -> impl IntoResponse {
    let Some(task) = s.task(&req.task_id).await else {
        return ErrorCode::UnknownTask
            .http_reply(format!("no task {}", req.task_id))
            .into_response();
    };
    if task.state.is_terminal() {
        return ErrorCode::TaskFinished
            .http_reply("task already reached a terminal state")
            .into_response();
    }

    let proposal = match (&req.state, &req.hook) {
        (Some(state), _) => Some((*state, "api".to_owned())),
        (None, Some(kind)) => crate::driver::claude::hooks::map_hook_kind(kind),
        (None, None) => None,
    };
    let Some((state, cause)) = proposal else {
        return ErrorCode::BadRequest
            .http_reply("either state or a known hook kind is required")
            .into_response();
    };

    if let Some(ref details) = req.details {
        s.set_details(&req.task_id, details).await;
    }
    s.propose_state(&req.task_id, state, cause).await;
    Json(AcceptedResponse { accepted: true }).into_response()
}

/// `POST /v1/tasks/done`
pub async fn tasks_done(
    State(s): State<Arc<Store>>,
    Json(req): Json<DoneRequest>,
) -> impl IntoResponse {
    if s.task(&req.task_id).await.is_none() {
        return ErrorCode::UnknownTask
            .http_reply(format!("no task {}", req.task_id))
            .into_response();
    }
    if let Some(ref details) = req.details {
        s.set_details(&req.task_id, details).await;
    }
    s.propose_state(&req.task_id, TaskState::Done, "api:done".to_owned())
        .await;
    Json(AcceptedResponse { accepted: true }).into_response()
}

/// `POST /v1/tasks/pin`
pub async fn tasks_pin(
    State(s): State<Arc<Store>>,
    Json(req): Json<PinRequest>,
) -> impl IntoResponse {
    if s.set_pinned(&req.task_id, req.pinned).await {
        Json(AcceptedResponse { accepted: true }).into_response()
    } else {
        ErrorCode::UnknownTask
            .http_reply(format!("no task {}", req.task_id))
            .into_response()
    }
}

/// `POST /v1/tasks/respond`: resolve a pending tool-permission request.
pub async fn tasks_respond(
    State(s): State<Arc<Store>>,
    Json(req): Json<RespondRequest>,
) -> impl IntoResponse {
    if req.task_id != s.local_task_id {
        return ErrorCode::UnknownTask
            .http_reply("permission round trips exist only for the supervised task")
            .into_response();
    }
    let Some(ref permission_tx) = s.permission_tx else {
        return ErrorCode::NoPermissionPending
            .http_reply("no shim channel for this task")
            .into_response();
    };
    if permission_tx.send((req.id, req.decision)).await.is_err() {
        return ErrorCode::Internal
            .http_reply("permission broker is gone")
            .into_response();
    }
    Json(AcceptedResponse { accepted: true }).into_response()
}

/// `GET /v1/debug?taskId=…`
pub async fn debug(
    State(s): State<Arc<Store>>,
    Query(q): Query<DebugQuery>,
) -> impl IntoResponse {
    match s.debug_snapshot(&q.task_id, q.last.unwrap_or(20)).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => ErrorCode::UnknownTask
            .http_reply(format!("no task {}", q.task_id))
            .into_response(),
    }
}

/// `POST /v1/notify`
pub async fn notify(
    State(s): State<Arc<Store>>,
    Json(req): Json<NotifyRequest>,
) -> impl IntoResponse {
    s.broadcast_notification(req.title, req.body);
    Json(AcceptedResponse { accepted: true })
}

/// `GET /v1/settings`
pub async fn settings_get(State(s): State<Arc<Store>>) -> impl IntoResponse {
    match UiSettings::load(&s.settings_path) {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => ErrorCode::Internal
            .http_reply(format!("settings load failed: {e}"))
            .into_response(),
    }
}

/// `PUT /v1/settings`
pub async fn settings_put(
    State(s): State<Arc<Store>>,
    Json(settings): Json<UiSettings>,
) -> impl IntoResponse {
    match settings.store(&s.settings_path) {
        Ok(()) => Json(AcceptedResponse { accepted: true }).into_response(),
        Err(e) => ErrorCode::Internal
            .http_reply(format!("settings store failed: {e}"))
            .into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
