// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::os::unix::thread::JoinHandleExt;
use std::sync::OnceLock;
use std::thread::JoinHandle;

use tracing::{Level, event};

use crate::sys::cvt;

/// The signal used to knock threads out of blocking system calls.
const INTERRUPT_SIGNAL: libc::c_int = libc::SIGUSR1;

/// Knocks one specific thread out of a blocking system call.
///
/// The target thread receives a signal whose process-wide handler does nothing and is installed
/// without `SA_RESTART`, so a blocking `read()`/`write()` on that thread returns `EINTR`
/// instead of resuming. The target is expected to check some flag after every interrupted call;
/// an interruption that arrives while the thread is not blocked is simply lost, so callers that
/// must not lose it keep interrupting until the target acknowledges.
///
/// An `Interrupter` must only be used while the target thread has not yet been joined.
#[derive(Clone, Copy, Debug)]
pub struct Interrupter {
    thread: libc::pthread_t,
}

impl Interrupter {
    /// Installs the process-wide no-op handler, if that has not happened yet.
    ///
    /// Interrupters cannot be created once this has failed; after it has succeeded, creating one
    /// cannot fail.
    pub(crate) fn install() -> io::Result<()> {
        install_handler()
    }

    /// Targets the calling thread.
    ///
    /// # Errors
    ///
    /// Fails if the interrupt signal handler cannot be installed.
    pub fn current() -> io::Result<Self> {
        Self::install()?;

        Ok(Self {
            // SAFETY: No safety requirements.
            thread: unsafe { libc::pthread_self() },
        })
    }

    /// Targets the thread behind a join handle.
    pub(crate) fn for_thread<T>(handle: &JoinHandle<T>) -> io::Result<Self> {
        Self::install()?;

        Ok(Self {
            thread: handle.as_pthread_t(),
        })
    }

    /// Sends one interruption to the target thread.
    pub fn interrupt(&self) {
        // SAFETY: The target has not been joined yet (type contract), so the handle is valid.
        let result = unsafe { libc::pthread_kill(self.thread, INTERRUPT_SIGNAL) };

        if result != 0 {
            event!(
                Level::WARN,
                message = "failed to interrupt thread",
                error = %io::Error::from_raw_os_error(result)
            );
        }
    }
}

extern "C" fn on_interrupt(_signal: libc::c_int) {}

/// Installs the no-op handler once per process. Later calls return the outcome of the first.
fn install_handler() -> io::Result<()> {
    static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();

    INSTALLED
        .get_or_init(|| {
            // SAFETY: All-zero is a valid bit pattern for the plain C struct.
            let mut action: libc::sigaction = unsafe { std::mem::zeroed() };

            #[expect(
                clippy::fn_to_numeric_cast_any,
                reason = "sigaction takes the handler as an address"
            )]
            let handler = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_sigaction = handler;

            // No SA_RESTART: interrupted system calls must fail with EINTR.
            action.sa_flags = 0;

            // SAFETY: The mask lives in a struct we own.
            unsafe {
                libc::sigemptyset(&raw mut action.sa_mask);
            }

            // SAFETY: The action is fully initialized and the handler is async-signal-safe (it does nothing).
            cvt(unsafe { libc::sigaction(INTERRUPT_SIGNAL, &raw const action, std::ptr::null_mut()) })
                .map(|_| ())
                .map_err(|e| e.raw_os_error().unwrap_or(libc::EINVAL))
        })
        .map_err(io::Error::from_raw_os_error)
}
