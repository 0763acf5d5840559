// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::path::PathBuf;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::nbio::{recv_chunk, send_all, set_nonblocking, PtyFd};

/// Exit status of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// The code the supervisor itself should exit with: the child's code,
    /// or the conventional 128+signal for signal deaths.
    pub fn supervisor_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }
}

/// Out-of-band descriptor pair inherited by the child for the network shim:
/// the child writes telemetry on fd 3 and reads control on fd 4.
pub struct ShimChannel {
    /// Supervisor-side read end of the child's fd 3.
    pub events: OwnedFd,
    /// Supervisor-side write end of the child's fd 4.
    pub control: OwnedFd,
}

/// Spawn parameters beyond the command itself.
pub struct SpawnOptions {
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    /// Allocate the fd 3/4 shim channel pair.
    pub shim_channel: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            cwd: None,
            cols: 80,
            rows: 24,
            shim_channel: false,
        }
    }
}

/// Native PTY host: spawns the child via `forkpty` with the slave as its
/// controlling terminal and stdio.
pub struct PtyHost {
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
    shim: Option<ShimChannel>,
}

impl PtyHost {
    /// Spawn a child process on a new PTY.
    ///
    /// `command` must have at least one element (the program to run).
    /// When `opts.shim_channel` is set, two pipes are created and wired to
    /// descriptors 3 and 4 in the child before exec; close-on-exec stays
    /// clear on the child side so the descriptors survive into the agent
    /// and any subprocesses it forks.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(command: &[String], opts: SpawnOptions) -> anyhow::Result<Self> {
        if command.is_empty() {
            bail!("empty command");
        }
        if !program_exists(&command[0]) {
            bail!("{}: command not found", command[0]);
        }

        let winsize = Winsize {
            ws_col: opts.cols,
            ws_row: opts.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // Pre-convert exec arguments so the post-fork child does no
        // allocation before execvp.
        let c_args: Vec<CString> = command
            .iter()
            .map(|s| CString::new(s.as_bytes()))
            .collect::<Result<_, _>>()
            .context("invalid command argument")?;

        // Pipes for the shim channel, created before the fork so both
        // halves inherit them.
        let shim_pipes = if opts.shim_channel {
            let (events_read, events_write) = nix::unistd::pipe().context("pipe failed")?;
            let (control_read, control_write) = nix::unistd::pipe().context("pipe failed")?;
            Some(((events_read, events_write), (control_read, control_write)))
        } else {
            None
        };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. The child branch only
        // calls async-signal-safe-ish setup then execs.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("TALLR", "1");
                for (key, value) in &opts.env {
                    std::env::set_var(key, value);
                }
                if let Some(ref cwd) = opts.cwd {
                    let _ = nix::unistd::chdir(cwd.as_path());
                }

                if let Some(((events_read, events_write), (control_read, control_write))) =
                    shim_pipes
                {
                    // Supervisor-side ends are useless in the child.
                    drop(events_read);
                    drop(control_write);

                    // Wire the child ends to the fixed descriptor numbers.
                    // dup2 clears FD_CLOEXEC on the duplicate, which is
                    // exactly what the shim contract requires.
                    let mut ev = events_write.into_raw_fd();
                    let mut ctl = control_read.into_raw_fd();
                    // SAFETY: fcntl/dup2/close onto fixed descriptor
                    // numbers in the single-threaded post-fork child.
                    unsafe {
                        // A pipe end may already sit on 3 or 4; move it out
                        // of the target range so dup2 cannot clobber it.
                        if ev == 3 || ev == 4 {
                            ev = libc::fcntl(ev, libc::F_DUPFD, 10);
                        }
                        if ctl == 3 || ctl == 4 {
                            ctl = libc::fcntl(ctl, libc::F_DUPFD, 10);
                        }
                        libc::dup2(ev, 3);
                        libc::dup2(ctl, 4);
                        libc::close(ev);
                        libc::close(ctl);
                    }
                }

                let _ = execvp(&c_args[0], &c_args);
                // Exec failed after fork: die without unwinding into the
                // supervisor's code in this forked copy.
                // SAFETY: _exit is async-signal-safe and does not run
                // destructors or atexit handlers.
                unsafe { libc::_exit(127) }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;

                let shim = shim_pipes.map(
                    |((events_read, events_write), (control_read, control_write))| {
                        // Child-side ends are useless in the supervisor.
                        drop(events_write);
                        drop(control_read);
                        ShimChannel {
                            events: events_read,
                            control: control_write,
                        }
                    },
                );

                Ok(Self {
                    master: afd,
                    child_pid: child,
                    shim,
                })
            }
        }
    }

    /// Take the shim channel ends (at most once).
    pub fn take_shim(&mut self) -> Option<ShimChannel> {
        self.shim.take()
    }

    pub fn child_pid(&self) -> u32 {
        self.child_pid.as_raw() as u32
    }

    /// Pump bytes between the channels and the PTY until the child exits.
    ///
    /// Output chunks are sent to `output_tx`; input received on `input_rx`
    /// is written verbatim; window-size changes on `resize_rx` are applied
    /// with TIOCSWINSZ. EIO from the master means the slave side closed
    /// (child exited); the child is then reaped on a blocking thread.
    pub fn run(
        mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<Bytes>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> impl std::future::Future<Output = anyhow::Result<ExitStatus>> + Send {
        let pid = self.child_pid;
        async move {
            let mut buf = vec![0u8; 8192];
            let mut input_closed = false;

            loop {
                if input_closed {
                    match recv_chunk(&self.master, &mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            let data = Bytes::copy_from_slice(&buf[..n]);
                            if output_tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    tokio::select! {
                        result = recv_chunk(&self.master, &mut buf) => {
                            match result {
                                Ok(0) => break,
                                Ok(n) => {
                                    let data = Bytes::copy_from_slice(&buf[..n]);
                                    if output_tx.send(data).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                                Err(e) => return Err(e.into()),
                            }
                        }
                        input = input_rx.recv() => {
                            match input {
                                Some(data) => {
                                    send_all(&self.master, &data).await?;
                                }
                                None => input_closed = true,
                            }
                        }
                        resize = resize_rx.recv() => {
                            if let Some((cols, rows)) = resize {
                                let _ = self.resize(cols, rows);
                            }
                        }
                    }
                }
            }

            // Reap the child on a blocking thread to avoid stalling the runtime.
            let status = tokio::task::spawn_blocking(move || reap_child(pid))
                .await
                .context("join wait thread")??;
            Ok(status)
        }
    }

    /// Propagate a window-size change to the PTY; the kernel delivers
    /// SIGWINCH to the child's foreground process group.
    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize {
            ws_col: cols,
            ws_row: rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
        // size on the PTY master fd. The Winsize struct is properly
        // initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!(
                "TIOCSWINSZ ioctl failed: {}",
                std::io::Error::last_os_error()
            );
        }

        Ok(())
    }
}

impl Drop for PtyHost {
    fn drop(&mut self) {
        // A child that was never reaped gets a hangup, a short grace, then
        // a hard kill, so no agent outlives its supervisor. If the first
        // kill fails the pid is already gone and the escalation is moot.
        if kill(self.child_pid, Signal::SIGHUP).is_ok() {
            std::thread::sleep(std::time::Duration::from_millis(50));
            let _ = kill(self.child_pid, Signal::SIGKILL);
        }
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

/// Deliver a signal to a process group by leader pid.
pub fn signal_group(pid: u32, signal: Signal) {
    let _ = kill(Pid::from_raw(-(pid as i32)), signal);
}

/// Whether `program` resolves to an existing file, via PATH lookup for
/// bare names. Checked before forking so a typo'd agent command fails the
/// spawn instead of surfacing as a cryptic child exit.
fn program_exists(program: &str) -> bool {
    let path = std::path::Path::new(program);
    if path.components().count() > 1 {
        return path.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Block in `waitpid` until the child is reaped, mapping the result into
/// an [`ExitStatus`].
fn reap_child(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        return match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => Ok(ExitStatus {
                code: Some(code),
                signal: None,
            }),
            Ok(WaitStatus::Signaled(_, signal, _core_dumped)) => Ok(ExitStatus {
                code: None,
                signal: Some(signal as i32),
            }),
            // Stop/continue notifications and interrupted waits are not
            // exits; keep waiting.
            Ok(_) | Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => Err(anyhow::anyhow!("waitpid({pid}) failed: {e}")),
        };
    }
}
