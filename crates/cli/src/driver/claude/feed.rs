// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor side of the shim descriptor protocol.
//!
//! The child writes newline-delimited JSON telemetry on fd 3 and reads
//! permission responses on fd 4. Both ends are plain pipes inherited at
//! spawn; reads go through a non-blocking [`AsyncFd`] so they are
//! cancellable by `tokio::select!`.

use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::unix::AsyncFd;
use tracing::warn;

use crate::driver::Decision;
use crate::pty::nbio::{io_err, send_all, set_nonblocking, PtyFd};

/// Protocol errors tolerated within [`ERROR_WINDOW`] before the feed
/// detaches.
const MAX_ERRORS: u32 = 10;
const ERROR_WINDOW: Duration = Duration::from_secs(1);

/// Telemetry messages the shim writes on fd 3.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShimEvent {
    FetchStart {
        id: u64,
        hostname: String,
        path: String,
        method: String,
        timestamp: u64,
    },
    FetchEnd {
        id: u64,
        timestamp: u64,
    },
    PermissionPrompt {
        id: String,
    },
    PermissionRequest {
        id: String,
        tool: ToolCall,
    },
    ClaudeMessage {
        content: String,
    },
}

/// Tool name and arguments carried by a permission request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Control message written on fd 4.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ControlMessage {
    PermissionResponse { id: String, decision: Decision },
}

/// Reads [`ShimEvent`]s from the telemetry pipe (the child's fd 3).
pub struct ShimFeed {
    async_fd: AsyncFd<PtyFd>,
    line_buf: Vec<u8>,
    errors: u32,
    error_window_start: Instant,
    detached: bool,
}

impl ShimFeed {
    pub fn new(events: OwnedFd) -> anyhow::Result<Self> {
        set_nonblocking(&events)?;
        Ok(Self {
            async_fd: AsyncFd::new(PtyFd(events))?,
            line_buf: Vec::with_capacity(4096),
            errors: 0,
            error_window_start: Instant::now(),
            detached: false,
        })
    }

    /// Read the next event from the pipe.
    ///
    /// Malformed lines are discarded; more than [`MAX_ERRORS`] of them
    /// within [`ERROR_WINDOW`] detaches the feed. Returns `None` on EOF,
    /// unrecoverable error, or detach.
    pub async fn next_event(&mut self) -> Option<ShimEvent> {
        if self.detached {
            return None;
        }

        loop {
            if let Some(event) = self.try_parse_line() {
                return Some(event);
            }
            if self.detached {
                return None;
            }

            let mut guard = match self.async_fd.readable().await {
                Ok(g) => g,
                Err(_) => return None,
            };
            let mut buf = [0u8; 4096];
            match guard.try_io(|inner| nix::unistd::read(inner.get_ref(), &mut buf).map_err(io_err)) {
                Ok(Ok(0)) => return None, // EOF: shim side closed
                Ok(Ok(n)) => self.line_buf.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => return None,
                Err(_would_block) => continue,
            }
        }
    }

    /// Extract the first parseable event from complete lines in the buffer.
    ///
    /// Bad lines count toward the rate-limited detach.
    fn try_parse_line(&mut self) -> Option<ShimEvent> {
        loop {
            let pos = self.line_buf.iter().position(|&b| b == b'\n')?;
            let line = String::from_utf8_lossy(&self.line_buf[..pos]).to_string();
            self.line_buf.drain(..=pos);

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ShimEvent>(trimmed) {
                Ok(event) => return Some(event),
                Err(e) => {
                    if self.record_error() {
                        warn!("shim feed: repeated protocol errors, detaching (last: {e})");
                        self.detached = true;
                        return None;
                    }
                }
            }
        }
    }

    /// Count a protocol error; returns `true` when the detach threshold is
    /// crossed.
    fn record_error(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.error_window_start) > ERROR_WINDOW {
            self.error_window_start = now;
            self.errors = 0;
        }
        self.errors += 1;
        self.errors > MAX_ERRORS
    }
}

/// Writes permission responses on the control pipe (the child's fd 4).
pub struct ControlWriter {
    async_fd: AsyncFd<PtyFd>,
}

impl ControlWriter {
    pub fn new(control: OwnedFd) -> anyhow::Result<Self> {
        set_nonblocking(&control)?;
        Ok(Self {
            async_fd: AsyncFd::new(PtyFd(control))?,
        })
    }

    pub async fn send(&self, id: &str, decision: Decision) -> anyhow::Result<()> {
        let msg = ControlMessage::PermissionResponse {
            id: id.to_owned(),
            decision,
        };
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        send_all(&self.async_fd, &line).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "feed_tests.rs"]
mod tests;
