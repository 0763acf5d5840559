// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-TTY side of the wrapper: raw mode, size probing, stdin pumping.
//!
//! The user's terminal goes raw for the child's lifetime so keystrokes
//! (including control sequences) pass through byte-for-byte. Cooked mode is
//! restored on every exit path: the RAII guard covers normal return and
//! errors, and a panic hook covers unwinds.

use std::io::Write;

use rustix::termios::{self, OptionalActions, Termios};
use tokio::sync::mpsc;

/// RAII guard that restores the original terminal attributes on drop.
pub struct RawModeGuard {
    original: Termios,
}

impl RawModeGuard {
    /// Put stdin into raw mode. Returns `None` when stdin is not a TTY
    /// (non-interactive invocation, e.g. piped input or tests).
    pub fn enter() -> anyhow::Result<Option<Self>> {
        if !termios::isatty(std::io::stdin()) {
            return Ok(None);
        }

        let original = termios::tcgetattr(std::io::stdin())?;
        let mut raw = original.clone();
        raw.make_raw();
        termios::tcsetattr(std::io::stdin(), OptionalActions::Flush, &raw)?;

        install_panic_restore(original.clone());

        Ok(Some(Self { original }))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(std::io::stdin(), OptionalActions::Flush, &self.original);
    }
}

/// Install a panic hook that restores the terminal even on unwind.
fn install_panic_restore(original: Termios) {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = termios::tcsetattr(std::io::stdin(), OptionalActions::Flush, &original);
        prev_hook(info);
    }));
}

/// Current terminal size of the user's TTY, if any.
pub fn terminal_size() -> Option<(u16, u16)> {
    let ws = termios::tcgetwinsize(std::io::stdout()).ok()?;
    (ws.ws_col > 0 && ws.ws_row > 0).then_some((ws.ws_col, ws.ws_row))
}

/// Spawn a blocking thread that reads stdin and forwards chunks.
///
/// A blocking thread rather than `AsyncFd` because stdin may be a regular
/// file or pipe, which epoll rejects. The thread exits on EOF or when the
/// receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 4096];
        while let Ok(n) = stdin.read(&mut buf) {
            if n == 0 || stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    });
    stdin_rx
}

/// Write child output to the user's terminal verbatim.
pub fn write_stdout(data: &[u8]) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(data);
    let _ = stdout.flush();
}
