// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-blocking fd plumbing shared by the PTY master and the shim pipes.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

/// Owned fd registered with the tokio reactor: the PTY master and both
/// shim pipe ends all flow through this wrapper.
#[derive(Debug)]
pub struct PtyFd(pub OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for PtyFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Put the descriptor into non-blocking mode; required before handing it
/// to [`AsyncFd`].
pub fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let fd = fd.as_fd();
    let current = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?);
    fcntl(fd, FcntlArg::F_SETFL(current | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Wait for readability and read one chunk. Retries on spurious readiness.
pub async fn recv_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut ready = afd.readable().await?;
        if let Ok(outcome) =
            ready.try_io(|fd| nix::unistd::read(fd.get_ref(), buf).map_err(io_err))
        {
            return outcome;
        }
        // Spurious wakeup: poll again.
    }
}

/// Write the whole buffer, waiting for writability between short writes.
pub async fn send_all(afd: &AsyncFd<PtyFd>, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let mut ready = afd.writable().await?;
        match ready.try_io(|fd| nix::unistd::write(fd.get_ref(), data).map_err(io_err)) {
            Ok(Ok(n)) => data = &data[n..],
            Ok(Err(e)) => return Err(e),
            Err(_spurious) => {}
        }
    }
    Ok(())
}

pub fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
