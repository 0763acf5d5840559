// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network detector: turns shim telemetry into [`DetectionEvent`]s and
//! brokers the tool-permission round trip.
//!
//! The detector owns both descriptor ends: telemetry from fd 3 and the
//! control channel to fd 4. Decisions arrive from the control plane via an
//! mpsc channel; a response is written at most once per requested id, and
//! a pending round trip is resolved with `deny` on shutdown so the child
//! never stays blocked.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{Decision, DetectionEvent, DetectionKind, Detector, Source};

use super::feed::{ControlWriter, ShimEvent, ShimFeed};

pub struct NetworkDetector {
    feed: ShimFeed,
    control: ControlWriter,
    decisions_rx: mpsc::Receiver<(String, Decision)>,
}

impl NetworkDetector {
    pub fn new(
        feed: ShimFeed,
        control: ControlWriter,
        decisions_rx: mpsc::Receiver<(String, Decision)>,
    ) -> Self {
        Self {
            feed,
            control,
            decisions_rx,
        }
    }
}

fn map_event(event: ShimEvent) -> DetectionEvent {
    match event {
        ShimEvent::FetchStart {
            id,
            hostname,
            path,
            method,
            ..
        } => DetectionEvent::network(DetectionKind::FetchStart {
            id,
            hostname,
            path,
            method,
        }),
        ShimEvent::FetchEnd { id, .. } => DetectionEvent::network(DetectionKind::FetchEnd { id }),
        ShimEvent::PermissionPrompt { id } => {
            DetectionEvent::network(DetectionKind::PermissionPrompt { id })
        }
        ShimEvent::PermissionRequest { id, tool } => {
            DetectionEvent::network(DetectionKind::PermissionRequest {
                id,
                tool: tool.name,
            })
        }
        ShimEvent::ClaudeMessage { content } => {
            DetectionEvent::network(DetectionKind::AgentMessage { content })
        }
    }
}

impl Detector for NetworkDetector {
    fn run(
        self: Box<Self>,
        events_tx: mpsc::Sender<DetectionEvent>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut feed = self.feed;
            let control = self.control;
            let mut decisions_rx = self.decisions_rx;

            // Permission ids seen but not yet answered, and ids already
            // answered (a response is delivered at most once per request).
            let mut outstanding: HashSet<String> = HashSet::new();
            let mut answered: HashSet<String> = HashSet::new();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,

                    event = feed.next_event() => {
                        let Some(event) = event else { break };
                        if let ShimEvent::PermissionRequest { ref id, .. } = event {
                            if answered.contains(id) {
                                debug!("duplicate permission request {id}, ignoring");
                                continue;
                            }
                            outstanding.insert(id.clone());
                        }
                        if events_tx.send(map_event(event)).await.is_err() {
                            break;
                        }
                    }

                    decision = decisions_rx.recv() => {
                        let Some((id, decision)) = decision else { break };
                        if !outstanding.remove(&id) {
                            warn!("permission decision for unknown or answered id {id}, dropping");
                            continue;
                        }
                        answered.insert(id.clone());
                        if let Err(e) = control.send(&id, decision).await {
                            warn!("failed to deliver permission response: {e}");
                            continue;
                        }
                        let event = DetectionEvent::network(DetectionKind::PermissionResponse {
                            id,
                            decision,
                        });
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // Unblock the child: deny anything still outstanding.
            for id in outstanding.drain() {
                let _ = control.send(&id, Decision::Deny).await;
            }
        })
    }

    fn source(&self) -> Source {
        Source::Network
    }
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
