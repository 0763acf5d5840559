// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::time::Instant;

/// Timer that enforces a quiet window after the last `fetch-end` before the
/// tracker may drop the task back to IDLE.
///
/// Any new `fetch-start` cancels the pending window.
#[derive(Debug)]
pub struct QuietWindow {
    duration: Duration,
    deadline: Option<Instant>,
}

impl QuietWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    /// Arm the window: IDLE may be proposed once `deadline()` elapses.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.duration);
    }

    /// Cancel the pending window (a new fetch started).
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// The pending deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and report whether the deadline had elapsed.
    pub fn fire(&mut self) -> bool {
        match self.deadline.take() {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "quiet_tests.rs"]
mod tests;
