// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control plane: the loopback HTTP API and its subscriber stream.

pub mod auth;
pub mod gateway;
pub mod http;
pub mod state;
pub mod ws;

pub use state::Store;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::ErrorCode;

/// JSON error envelope: `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorCode {
    /// Build the status + JSON envelope reply for this error code.
    pub fn http_reply(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorEnvelope>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope {
            error: ErrorDetail {
                code: self.as_str().to_owned(),
                message: message.into(),
            },
        };
        (status, Json(envelope))
    }
}

/// Build the axum `Router` for the control plane.
pub fn build_router(state: Arc<Store>) -> Router {
    Router::new()
        .route("/v1/state", get(http::state))
        .route("/v1/tasks/upsert", post(http::tasks_upsert))
        .route("/v1/tasks/state", post(http::tasks_state))
        .route("/v1/tasks/done", post(http::tasks_done))
        .route("/v1/tasks/pin", post(http::tasks_pin))
        .route("/v1/tasks/respond", post(http::tasks_respond))
        .route("/v1/debug", get(http::debug))
        .route("/v1/notify", post(http::notify))
        .route("/v1/settings", get(http::settings_get).put(http::settings_put))
        .route("/v1/events", get(ws::events_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
