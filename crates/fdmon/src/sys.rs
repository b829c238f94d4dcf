// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Thin wrappers over the libc calls shared by several modules.

use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Converts a libc return value following the "-1 and errno" convention into a `Result`.
pub(crate) fn cvt(result: libc::c_int) -> io::Result<libc::c_int> {
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

/// Takes ownership of a freshly created descriptor, or reports the error that prevented its creation.
pub(crate) fn owned_fd(result: libc::c_int) -> io::Result<OwnedFd> {
    let fd = cvt(result)?;

    // SAFETY: The descriptor was just returned by a successful creation call and nothing else owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Switches a descriptor between blocking and non-blocking mode.
///
/// The mode is a property of the open file description, so it is observed by every
/// descriptor and every thread sharing it.
pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: F_GETFL only reads descriptor state; an invalid descriptor yields EBADF.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;

    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };

    // SAFETY: F_SETFL only updates descriptor state; an invalid descriptor yields EBADF.
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })?;
    Ok(())
}

/// User plus system CPU time consumed by the whole process so far.
pub(crate) fn process_cpu_time() -> io::Result<Duration> {
    // SAFETY: All-zero is a valid bit pattern for the plain C struct.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    // SAFETY: We pass a valid pointer to a properly sized struct that outlives the call.
    cvt(unsafe { libc::getrusage(libc::RUSAGE_SELF, &raw mut usage) })?;

    Ok(timeval_to_duration(usage.ru_utime) + timeval_to_duration(usage.ru_stime))
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    #[expect(
        clippy::cast_sign_loss,
        reason = "getrusage never reports negative times"
    )]
    let micros = tv.tv_usec as u32;
    #[expect(
        clippy::cast_sign_loss,
        reason = "getrusage never reports negative times"
    )]
    let secs = tv.tv_sec as u64;

    Duration::new(secs, micros.saturating_mul(1000))
}

/// The kernel identifier of the calling thread.
pub(crate) fn thread_id() -> libc::pid_t {
    // SAFETY: No safety requirements.
    unsafe { libc::gettid() }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    fn is_nonblocking(fd: RawFd) -> bool {
        // SAFETY: F_GETFL only reads descriptor state.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        flags & libc::O_NONBLOCK != 0
    }

    #[test]
    fn toggles_nonblocking_mode() {
        let (a, _b) = UnixStream::pair().unwrap();

        set_nonblocking(a.as_raw_fd(), true).unwrap();
        assert!(is_nonblocking(a.as_raw_fd()));

        set_nonblocking(a.as_raw_fd(), false).unwrap();
        assert!(!is_nonblocking(a.as_raw_fd()));
    }

    #[test]
    fn invalid_descriptor_is_reported() {
        let e = set_nonblocking(-1, true).unwrap_err();
        assert_eq!(e.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn cpu_time_is_monotonic() {
        let before = process_cpu_time().unwrap();

        // Burn a little CPU so the counter has a chance to move.
        let mut x = 0_u64;
        for i in 0..1_000_000_u64 {
            x = std::hint::black_box(x.wrapping_add(i));
        }

        let after = process_cpu_time().unwrap();
        assert!(after >= before);
    }

    #[test]
    fn converts_timeval() {
        let tv = libc::timeval {
            tv_sec: 3,
            tv_usec: 250_000,
        };

        assert_eq!(timeval_to_duration(tv), Duration::from_millis(3250));
    }
}
