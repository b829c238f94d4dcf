// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::sys::owned_fd;

/// Asks an engine worker to stop, through the same readiness mechanism it already waits on.
///
/// Backed by a non-blocking `eventfd`. Once raised, the descriptor stays readable until the
/// worker acknowledges it, so a worker that is busy echoing when the signal arrives still sees
/// it on its next wait. One acknowledgement consumes any number of raises.
///
/// # Ownership
///
/// Shared between the engine handle (which raises) and its worker thread (which waits and
/// acknowledges), typically via `Arc`.
#[derive(Debug)]
pub(crate) struct StopSignal {
    fd: OwnedFd,
}

impl StopSignal {
    pub(crate) fn new() -> io::Result<Self> {
        // SAFETY: No safety requirements; the result is checked by `owned_fd`.
        let fd = owned_fd(unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) })?;

        Ok(Self { fd })
    }

    /// Raises the signal. Raising an already raised signal has no further effect.
    pub(crate) fn raise(&self) {
        let value: u64 = 1;

        // The only realistic failure is EAGAIN on counter overflow, which still leaves the
        // descriptor readable, so the result does not matter.
        //
        // SAFETY: We pass a pointer to a live u64 and its exact size.
        _ = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&raw const value).cast(),
                size_of::<u64>(),
            )
        };
    }

    /// Consumes the signal, returning whether it was actually raised.
    ///
    /// A `false` result means the readiness notification was stale and the worker must keep
    /// waiting.
    pub(crate) fn acknowledge(&self) -> bool {
        let mut value: u64 = 0;

        // SAFETY: We pass a pointer to a live u64 and its exact size.
        let read = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&raw mut value).cast(),
                size_of::<u64>(),
            )
        };

        read == size_of::<u64>().cast_signed()
    }
}

impl AsRawFd for StopSignal {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for StopSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
