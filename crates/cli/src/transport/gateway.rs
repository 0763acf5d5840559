// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound push to an external gateway (`TALLR_GATEWAY`).
//!
//! When the desktop host runs its own aggregator, the supervisor mirrors
//! registry updates and notifications to it. Delivery failures retry with
//! exponential backoff up to [`MAX_ATTEMPTS`]; after that the event is
//! dropped, never blocking the detection pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::state::{Store, UpdateEvent};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

pub struct GatewayClient {
    base: String,
    token: String,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base: &str, token: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            http: reqwest::Client::new(),
        }
    }

    /// POST `payload`, retrying transient failures with exponential backoff.
    /// Returns `false` when all attempts failed and the event was dropped.
    pub async fn push(&self, path: &str, payload: &serde_json::Value) -> bool {
        let url = format!("{}{path}", self.base);
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .json(payload)
                .timeout(Duration::from_secs(5))
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    debug!("gateway push to {url} got {}", response.status());
                }
                Err(e) => {
                    debug!("gateway push to {url} failed (attempt {attempt}): {e}");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        warn!("gateway push to {url} dropped after {MAX_ATTEMPTS} attempts");
        false
    }
}

/// Mirror registry updates and notifications to the configured gateway
/// until shutdown. No gateway configured means no task is spawned.
pub fn spawn_if_configured(
    gateway_url: Option<&str>,
    token: &str,
    store: Arc<Store>,
    shutdown: CancellationToken,
) {
    let Some(url) = gateway_url else { return };
    let client = GatewayClient::new(url, token);
    let mut updates = store.updates_tx.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                update = updates.recv() => {
                    let event = match update {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!("gateway push lagged by {n}, resyncing");
                            UpdateEvent::TasksUpdated
                        }
                        Err(_) => break,
                    };
                    match event {
                        UpdateEvent::TasksUpdated => {
                            let snapshot = store.snapshot().await;
                            for task in &snapshot.tasks {
                                let Ok(payload) = serde_json::to_value(task) else { continue };
                                client.push("/v1/tasks/upsert", &payload).await;
                            }
                        }
                        UpdateEvent::Notification { title, body } => {
                            let payload = serde_json::json!({"title": title, "body": body});
                            client.push("/v1/notify", &payload).await;
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
