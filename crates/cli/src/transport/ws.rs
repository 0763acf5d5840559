// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /v1/events`: WebSocket stream of registry updates.
//!
//! Subscribers (the desktop UI) receive a `tasks-updated` message on every
//! registry mutation and `notification` messages from `/v1/notify`. The
//! subscriber is unprivileged: this socket is read-only.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::transport::auth::validate_ws_query;
use crate::transport::state::Store;

pub async fn events_handler(
    State(state): State<Arc<Store>>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if validate_ws_query(query.as_deref().unwrap_or(""), &state.auth_token).is_err() {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<Store>) {
    let (mut tx, mut rx) = socket.split();
    let mut updates = BroadcastStream::new(state.updates_tx.subscribe());
    let shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            update = updates.next() => {
                match update {
                    Some(Ok(event)) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // A lagged subscriber only missed intermediate states;
                    // resync with a single tasks-updated.
                    Some(Err(_lagged)) => {
                        let resync = serde_json::json!({"event": "tasks-updated"}).to_string();
                        if tx.send(Message::Text(resync.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // subscribers have nothing to say
                    Some(Err(e)) => {
                        debug!("events socket error: {e}");
                        break;
                    }
                }
            }
        }
    }
}
