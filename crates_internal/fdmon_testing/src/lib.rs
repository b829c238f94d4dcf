// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test aids shared by the fdmon crates.
//!
//! Nothing in here is meant for production code: functions panic freely when the environment
//! does not look like a Linux test run.

use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};
use std::time::Duration;
use std::{fs, thread};

use tracing::level_filters::LevelFilter;

/// If something (whatever) does not happen in a test within this time, the test will fail.
///
/// Generous on purpose: this only breaks out of hangs such as a worker that never wakes up, it
/// is not a performance expectation.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a thread-safe function on a background thread and abandons it if
/// it does not complete before [`TEST_TIMEOUT`].
///
/// Returns `None` if the function panicked or timed out.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
#[must_use]
pub fn execute_or_abandon<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();

    // A panic or a hang both leave the channel without a result; a panic also closes it.
    thread::spawn(move || {
        let result = f();
        _ = sender.send(result);
    });

    receiver.recv_timeout(TEST_TIMEOUT).ok()
}

/// Serializes tests that look at process-wide resource counts.
///
/// Descriptor and thread counts are only meaningful if no other test creates or releases either
/// while they are being compared. Hold the returned guard for the whole measurement.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
pub fn process_resources_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());

    // A test that panicked while holding the lock has not corrupted the unit value.
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The number of descriptors currently open in this process.
///
/// # Panics
///
/// Panics if `/proc/self/fd` cannot be read.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
#[must_use]
pub fn open_fd_count() -> usize {
    // The directory handle used for listing shows up in the listing itself.
    directory_entries("/proc/self/fd") - 1
}

/// The number of threads currently running in this process.
///
/// # Panics
///
/// Panics if `/proc/self/task` cannot be read.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
#[must_use]
pub fn thread_count() -> usize {
    directory_entries("/proc/self/task")
}

/// Polls `condition` until it holds or [`TEST_TIMEOUT`] elapses, returning its final value.
///
/// Thread exit is observed by the kernel slightly after `join()` returns, so thread counts in
/// particular need a moment to settle.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let started = std::time::Instant::now();

    while started.elapsed() < TEST_TIMEOUT {
        if condition() {
            return true;
        }

        thread::sleep(Duration::from_millis(5));
    }

    condition()
}

/// Routes log output of the current test process to the test harness' captured stdout, so it is
/// shown for failing tests only.
///
/// Logging can be configured only once per process. Later calls are no-ops.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
pub fn log_to_console() {
    _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

fn directory_entries(path: &str) -> usize {
    fs::read_dir(path)
        .expect("process information must be available under /proc")
        .count()
}
