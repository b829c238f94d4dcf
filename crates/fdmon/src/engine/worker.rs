// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{Level, event};

use crate::stop_signal::StopSignal;
use crate::{Error, Result};

/// Handed to a worker body; the body reports through it that it is about to start waiting.
#[derive(Debug)]
pub(crate) struct Ready(oneshot::Sender<()>);

impl Ready {
    /// Releases the thread blocked in engine creation.
    pub(crate) fn signal(self) {
        // The creator only goes away without receiving if it panicked, which is not our problem.
        _ = self.0.send(());
    }
}

/// Spawns a worker thread and blocks until the worker calls [`Ready::signal()`].
///
/// If the worker exits without signalling, it is joined and an error is returned.
pub(crate) fn spawn_ready<F>(name: &'static str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce(Ready) + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread = thread::Builder::new()
        .name(format!("{name}-worker"))
        .spawn(move || body(Ready(ready_tx)))
        .map_err(|e| Error::resource("failed to start worker thread", e))?;

    if ready_rx.recv().is_err() {
        join_worker(name, thread);

        return Err(Error::resource(
            "worker failed to signal readiness",
            io::Error::other("worker exited during startup"),
        ));
    }

    Ok(thread)
}

/// Joins a worker, logging instead of propagating a panic.
#[cfg_attr(test, mutants::skip)] // Removing the join is caught by leak tests, not unit tests.
pub(crate) fn join_worker(name: &'static str, thread: JoinHandle<()>) {
    if thread.join().is_err() {
        event!(Level::WARN, message = "engine worker panicked", engine = name);
    }
}

/// Decides whether a worker retries a readiness wait that failed with `error`.
///
/// Interrupted waits are retried. Any other failure is logged and the worker is expected to exit,
/// after which joining it completes without the stop signal ever being observed.
pub(crate) fn retry_wait(engine: &'static str, error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::Interrupted {
        return true;
    }

    event!(
        Level::WARN,
        message = "readiness wait failed, stopping worker",
        engine,
        error = %error
    );

    false
}

/// A worker thread that waits on a [`StopSignal`] next to its descriptors.
///
/// Dropping the handle raises the signal and joins the thread. Whatever the worker body owns
/// (notification object, message buffer, endpoint handles) is released when the thread exits.
#[derive(Debug)]
pub(crate) struct SignaledWorker {
    name: &'static str,
    stop: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl SignaledWorker {
    /// Starts the worker and waits for it to report readiness.
    pub(crate) fn start<F>(name: &'static str, stop: Arc<StopSignal>, body: F) -> Result<Self>
    where
        F: FnOnce(Ready) + Send + 'static,
    {
        let thread = spawn_ready(name, body)?;

        event!(Level::DEBUG, message = "engine started", engine = name);

        Ok(Self {
            name,
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for SignaledWorker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.raise();
            join_worker(self.name, thread);

            event!(Level::DEBUG, message = "engine stopped", engine = self.name);
        }
    }
}
