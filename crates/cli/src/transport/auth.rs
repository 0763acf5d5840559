// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token authentication for the control plane.
//!
//! A token is provisioned at startup (or taken from `TALLR_TOKEN`) and
//! required on every route; the WebSocket upgrade carries it in the query
//! string instead because browsers cannot set headers there.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ErrorCode;
use crate::transport::state::Store;

/// Generate a fresh bearer token for this supervisor run.
pub fn generate_token() -> String {
    let a = uuid::Uuid::new_v4().simple();
    let b = uuid::Uuid::new_v4().simple();
    format!("{a}{b}")
}

/// Length-guarded comparison without an early exit on the first differing
/// byte, so the token cannot be probed through response timing.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Check the `Authorization: Bearer <token>` header.
pub fn validate_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ErrorCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ErrorCode::Unauthorized)?;
    if timing_safe_eq(token, expected) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Check a `token=...` pair in a WebSocket upgrade query string.
pub fn validate_ws_query(query: &str, expected: &str) -> Result<(), ErrorCode> {
    let authorized = query
        .split('&')
        .filter_map(|pair| pair.strip_prefix("token="))
        .any(|candidate| timing_safe_eq(candidate, expected));
    if authorized {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Axum middleware enforcing the bearer token on every route except the
/// WebSocket upgrade, which authenticates inside its own handler.
pub async fn auth_layer(
    State(state): State<Arc<Store>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/v1/events" {
        return next.run(req).await;
    }

    match validate_bearer(req.headers(), &state.auth_token) {
        Ok(()) => next.run(req).await,
        Err(code) => code.http_reply("unauthorized").into_response(),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
