// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session loop: the supervisor's multiplexer between the user's TTY, the
//! PTY child, the rendered screen, and the detection pipeline.
//!
//! Child output is forwarded to the user verbatim and teed into the
//! scrollback ring and the rendered screen; the pattern detector reads the
//! screen on its own timer. Child exit produces the terminal
//! [`DetectionEvent`] that drives the tracker's DONE/ERROR transition.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{DetectionEvent, Detector};
use crate::pty::{spawn::signal_group, stdio, ExitStatus, PtyHost};
use crate::transport::state::Store;

/// Runtime inputs for a [`Session`].
pub struct SessionConfig {
    pub store: Arc<Store>,
    pub pty: PtyHost,
    pub detectors: Vec<Box<dyn Detector>>,
    pub events_tx: mpsc::Sender<DetectionEvent>,
    pub stdin_rx: mpsc::Receiver<Vec<u8>>,
    pub shutdown: CancellationToken,
    /// How long after a shutdown signal the child gets before SIGKILL.
    pub drain_timeout: Duration,
}

pub struct Session {
    store: Arc<Store>,
    child_pid: u32,
    output_rx: mpsc::Receiver<Bytes>,
    input_tx: mpsc::Sender<Bytes>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
    events_tx: mpsc::Sender<DetectionEvent>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
    pty_handle: JoinHandle<anyhow::Result<ExitStatus>>,
}

impl Session {
    /// Start the PTY pumps and all detectors.
    pub fn new(config: SessionConfig) -> Self {
        let SessionConfig {
            store,
            mut pty,
            detectors,
            events_tx,
            stdin_rx,
            shutdown,
            drain_timeout,
        } = config;

        let child_pid = pty.child_pid();
        store
            .terminal
            .child_pid
            .store(child_pid, std::sync::atomic::Ordering::Release);

        // The shim channel must be consumed before this point.
        debug_assert!(pty.take_shim().is_none());

        let (output_tx, output_rx) = mpsc::channel(256);
        let (input_tx, input_rx) = mpsc::channel::<Bytes>(256);
        let (resize_tx, resize_rx) = mpsc::channel(4);

        let pty_handle = tokio::spawn(pty.run(output_tx, input_rx, resize_rx));

        for detector in detectors {
            tokio::spawn(detector.run(events_tx.clone(), shutdown.clone()));
        }

        Self {
            store,
            child_pid,
            output_rx,
            input_tx,
            resize_tx,
            stdin_rx,
            events_tx,
            shutdown,
            drain_timeout,
            pty_handle,
        }
    }

    /// Run until the child exits. Returns its exit status after emitting
    /// the terminal detection event.
    pub async fn run(mut self) -> anyhow::Result<ExitStatus> {
        let mut sigwinch =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change()).ok();
        let mut stdin_open = true;
        let mut drain_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                // 1. Child output → user TTY verbatim, tee to ring + screen.
                data = self.output_rx.recv() => {
                    match data {
                        Some(bytes) => self.consume_output(&bytes).await,
                        // Pump ended: child exited and the PTY master closed.
                        None => break,
                    }
                }

                // 2. User TTY input → child verbatim.
                data = self.stdin_rx.recv(), if stdin_open => {
                    match data {
                        Some(bytes) => {
                            if self.input_tx.send(Bytes::from(bytes)).await.is_err() {
                                debug!("pty input channel closed");
                                break;
                            }
                        }
                        // Stdin EOF is not a reason to kill the child; it
                        // may still be streaming output.
                        None => stdin_open = false,
                    }
                }

                // 3. Window-size change → resize screen model and PTY.
                _ = async {
                    match sigwinch.as_mut() {
                        Some(s) => { s.recv().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some((cols, rows)) = stdio::terminal_size() {
                        self.store.terminal.screen.write().await.resize(cols, rows);
                        let _ = self.resize_tx.try_send((cols, rows));
                    }
                }

                // 4. Shutdown → forward TERM to the child's process group
                //    and give it the drain window before SIGKILL.
                _ = self.shutdown.cancelled(), if drain_deadline.is_none() => {
                    debug!("shutdown: forwarding SIGTERM to child group");
                    signal_group(self.child_pid, Signal::SIGTERM);
                    drain_deadline =
                        Some(tokio::time::Instant::now() + self.drain_timeout);
                }

                // 5. Drain deadline → force kill.
                _ = async {
                    match drain_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if drain_deadline.is_some() => {
                    warn!("drain deadline reached, sending SIGKILL");
                    signal_group(self.child_pid, Signal::SIGKILL);
                    drain_deadline = None;
                }
            }
        }

        // Capture any output that raced the exit.
        while let Ok(bytes) = self.output_rx.try_recv() {
            self.consume_output(&bytes).await;
        }

        // Close the input side and collect the exit status.
        drop(self.input_tx);
        let status = match self.pty_handle.await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("pty pump error: {e}");
                ExitStatus {
                    code: Some(1),
                    signal: None,
                }
            }
            Err(e) => {
                warn!("pty task panicked: {e}");
                ExitStatus {
                    code: Some(1),
                    signal: None,
                }
            }
        };

        // Terminal detection event: drives DONE/ERROR in the tracker.
        let _ = self
            .events_tx
            .send(DetectionEvent::exit(status.code, status.signal))
            .await;

        Ok(status)
    }

    async fn consume_output(&self, bytes: &Bytes) {
        stdio::write_stdout(bytes);
        {
            let mut ring = self.store.terminal.ring.write().await;
            ring.write(bytes);
        }
        {
            let mut screen = self.store.terminal.screen.write().await;
            screen.feed(bytes);
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
